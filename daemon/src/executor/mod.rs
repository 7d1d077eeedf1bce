//! Job strategies and the table that picks one per job type.

pub mod database;
pub mod dispatcher;
pub mod file_backup;
pub mod file_move;
pub mod folder_clean;
pub mod fsutil;
pub mod result;

pub use dispatcher::{DispatchError, Dispatcher};
pub use result::ExecutionResult;

use common::Job;

/// One job type's behaviour.
///
/// Implementors write [`run`](Self::run); callers use
/// [`execute`](Self::execute), which never fails: precondition problems are
/// reported through `result.fail(..)` inside `run`, and any `Err` that
/// escapes `run` becomes a failed result. The result is always finished.
pub trait ExecutorStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn run(&self, job: &Job, result: &mut ExecutionResult) -> anyhow::Result<()>;

    fn execute(&self, job: &Job) -> ExecutionResult {
        let mut result = ExecutionResult::new(format!("Starting {}", self.name()));
        if let Err(e) = self.run(job, &mut result) {
            log::error!("{} failed for job {}: {:#}", self.name(), job.name, e);
            result.fail(format!("Error: {:#}", e));
        }
        result.finish();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::JobType;

    struct Exploding;

    impl ExecutorStrategy for Exploding {
        fn name(&self) -> &'static str { "exploding" }

        fn run(&self, _job: &Job, result: &mut ExecutionResult) -> anyhow::Result<()> {
            result.item_count = 7;
            anyhow::bail!("disk on fire")
        }
    }

    #[test]
    fn test_execute_converts_errors_and_finishes() {
        let job = Job::new("x", "exploding job", JobType::FolderClean);
        let result = Exploding.execute(&job);
        assert!(!result.success);
        assert_eq!(result.status.code(), 2);
        assert_eq!(result.message, "Error: disk on fire");
        assert!(result.is_finished());
        assert!(result.duration.is_some());
    }
}
