use super::database::DatabaseDumpExecutor;
use super::file_backup::FileBackupExecutor;
use super::file_move::FileMoveExecutor;
use super::folder_clean::FolderCleanExecutor;
use super::ExecutorStrategy;
use crate::config::Config;
use common::{Job, JobType};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// A job whose type has no strategy. This is a data or configuration
/// problem, not a failed run, and is never retried.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown job type: {0}")]
    UnknownJobType(String),
}

pub struct Dispatcher {
    strategies: HashMap<JobType, Arc<dyn ExecutorStrategy>>,
}

impl Dispatcher {
    /// An empty table. Use [`from_config`](Self::from_config) for the
    /// standard four strategies.
    pub fn new() -> Self {
        Self { strategies: HashMap::new() }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register(
            JobType::DatabaseDump,
            Arc::new(DatabaseDumpExecutor::new(config.database.clone())),
        );
        dispatcher.register(
            JobType::FileBackup,
            Arc::new(FileBackupExecutor::new(config.backup.clone())),
        );
        dispatcher.register(JobType::FileMove, Arc::new(FileMoveExecutor));
        dispatcher.register(JobType::FolderClean, Arc::new(FolderCleanExecutor));
        dispatcher
    }

    pub fn register(&mut self, job_type: JobType, strategy: Arc<dyn ExecutorStrategy>) {
        self.strategies.insert(job_type, strategy);
    }

    pub fn resolve(&self, job: &Job) -> Result<Arc<dyn ExecutorStrategy>, DispatchError> {
        let strategy = self
            .strategies
            .get(&job.job_type)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownJobType(job.job_type.description().to_string()))?;
        log::debug!("Using {} for job {} ({})", strategy.name(), job.name, job.job_type);
        Ok(strategy)
    }

    /// Resolution straight from a persisted type code.
    pub fn resolve_code(&self, code: i64) -> Result<Arc<dyn ExecutorStrategy>, DispatchError> {
        let job_type = JobType::try_from(code)
            .map_err(|_| DispatchError::UnknownJobType(code.to_string()))?;
        self.strategies
            .get(&job_type)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownJobType(code.to_string()))
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_table_covers_every_type() {
        let dispatcher = Dispatcher::from_config(&Config::default());
        for job_type in JobType::ALL {
            let job = Job::new("j", "job", job_type);
            assert!(dispatcher.resolve(&job).is_ok(), "{:?}", job_type);
            assert!(dispatcher.resolve_code(job_type.code()).is_ok());
        }
        assert_eq!(
            dispatcher.resolve(&Job::new("j", "job", JobType::FileMove)).unwrap().name(),
            "file move"
        );
    }

    #[test]
    fn test_unknown_type_is_a_dispatch_error() {
        let dispatcher = Dispatcher::from_config(&Config::default());
        let err = dispatcher.resolve_code(99).err().unwrap();
        assert!(matches!(err, DispatchError::UnknownJobType(ref c) if c == "99"));
        assert_eq!(err.to_string(), "unknown job type: 99");

        let empty = Dispatcher::new();
        let job = Job::new("j", "job", JobType::FolderClean);
        assert!(matches!(empty.resolve(&job), Err(DispatchError::UnknownJobType(_))));
    }
}
