//! Runs one job to completion and records what happened.

use crate::executor::{DispatchError, Dispatcher, ExecutionResult};
use crate::metrics::MetricsCollector;
use crate::notifier::HistoryNotifier;
use crate::store::{HistoryStore, RejectedJob};
use chrono::Local;
use common::{HistoryEvent, HistoryRecord, Job, NewHistoryRecord};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ExecutorError {
    /// No strategy for the job's type. A failed history row was still
    /// written when possible.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("failed to record run history: {0:#}")]
    History(anyhow::Error),
}

pub struct TaskExecutor {
    dispatcher: Dispatcher,
    history: Arc<dyn HistoryStore>,
    notifier: HistoryNotifier,
    metrics: Arc<MetricsCollector>,
}

fn panic_text(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn new_record(job: &Job, result: ExecutionResult) -> NewHistoryRecord {
    NewHistoryRecord {
        run_id: Uuid::new_v4(),
        job_id: job.id.clone(),
        job_name: job.name.clone(),
        job_type: job.job_type,
        started_at: result.started_at,
        ended_at: result.ended_at,
        duration: result.duration,
        status: result.status,
        message: result.message,
        item_count: result.item_count,
        bytes: result.bytes,
    }
}

impl TaskExecutor {
    pub fn new(
        dispatcher: Dispatcher,
        history: Arc<dyn HistoryStore>,
        notifier: HistoryNotifier,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self { dispatcher, history, notifier, metrics }
    }

    pub fn execute(&self, job: &Job) -> Result<HistoryRecord, ExecutorError> {
        let strategy = match self.dispatcher.resolve(job) {
            Ok(s) => s,
            Err(e) => {
                log::error!("Cannot run job {} ({}): {}", job.name, job.id, e);
                self.metrics.record_dispatch_error();
                let mut result = ExecutionResult::new("");
                result.fail(format!("Error: {}", e));
                result.finish();
                if let Err(history_err) = self.record(job, result) {
                    log::error!("{}", history_err);
                }
                return Err(e.into());
            }
        };

        log::info!("Running job {} ({}) with {}", job.name, job.id, strategy.name());
        let started_at = Local::now().naive_local();
        let result = panic::catch_unwind(AssertUnwindSafe(|| strategy.execute(job)))
            .unwrap_or_else(|payload| {
                let text = panic_text(payload.as_ref());
                log::error!("Job {} panicked: {}", job.name, text);
                let mut result = ExecutionResult::with_start("", started_at);
                result.fail(format!("Error: job panicked: {}", text));
                result.finish();
                result
            });

        if result.success {
            log::info!("Job {} succeeded: {}", job.name, result.message);
        } else {
            log::warn!("Job {} failed: {}", job.name, result.message);
        }
        self.record(job, result)
    }

    /// Surfaces a stored job that could not be decoded. An unknown type
    /// code goes through the dispatcher and comes back as its error.
    /// Nothing is written to history, which only holds known types.
    pub fn reject(&self, rejected: &RejectedJob) -> Result<(), DispatchError> {
        if let Err(e) = self.dispatcher.resolve_code(rejected.job_type_code) {
            log::error!("Cannot run job {} ({}): {}", rejected.name, rejected.id, e);
            self.metrics.record_dispatch_error();
            return Err(e);
        }
        log::error!("Cannot schedule job {} ({}): {}", rejected.name, rejected.id, rejected.error);
        Ok(())
    }

    fn record(&self, job: &Job, result: ExecutionResult) -> Result<HistoryRecord, ExecutorError> {
        let record = self
            .history
            .append(new_record(job, result))
            .map_err(ExecutorError::History)?;
        self.metrics.record_run(&record);
        self.notifier.publish(HistoryEvent::created(record.clone()));
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use crate::executor::ExecutorStrategy;
    use common::{CodeError, ExecutionStatus, HistoryEventKind, JobId, JobType};

    struct Panics;

    impl ExecutorStrategy for Panics {
        fn name(&self) -> &'static str {
            "panics"
        }

        fn run(&self, _job: &Job, _result: &mut ExecutionResult) -> anyhow::Result<()> {
            panic!("disk on fire");
        }
    }

    struct Counts;

    impl ExecutorStrategy for Counts {
        fn name(&self) -> &'static str {
            "counts"
        }

        fn run(&self, _job: &Job, result: &mut ExecutionResult) -> anyhow::Result<()> {
            result.succeed("Moved 3 files", 3, 300);
            Ok(())
        }
    }

    fn executor(dispatcher: Dispatcher) -> (TaskExecutor, Arc<Db>, HistoryNotifier) {
        let db = Arc::new(Db::open_in_memory().unwrap());
        let notifier = HistoryNotifier::new();
        let exec = TaskExecutor::new(
            dispatcher,
            db.clone(),
            notifier.clone(),
            Arc::new(MetricsCollector::new()),
        );
        (exec, db, notifier)
    }

    fn job() -> Job {
        Job::new("m1", "Move recordings", JobType::FileMove)
    }

    #[test]
    fn test_successful_run_is_recorded_and_published() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(JobType::FileMove, Arc::new(Counts));
        let (exec, db, notifier) = executor(dispatcher);
        let mut events = notifier.subscribe();

        let record = exec.execute(&job()).unwrap();
        assert_eq!(record.status, ExecutionStatus::Success);
        assert_eq!(record.item_count, 3);
        assert_eq!(record.job_name, "Move recordings");
        assert!(record.ended_at.is_some());

        let event = events.try_recv().unwrap();
        assert_eq!(event.kind, HistoryEventKind::Created);
        assert_eq!(event.record.id, record.id);
        assert_eq!(db.history_for_job(&record.job_id, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_panic_becomes_failed_record() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(JobType::FileMove, Arc::new(Panics));
        let (exec, _db, _notifier) = executor(dispatcher);

        let record = exec.execute(&job()).unwrap();
        assert_eq!(record.status.code(), 2);
        assert!(record.message.contains("disk on fire"));
        assert!(record.duration.is_some());
    }

    #[test]
    fn test_unknown_type_is_fatal_but_visible_in_history() {
        let (exec, db, _notifier) = executor(Dispatcher::new());

        let err = exec.execute(&job()).unwrap_err();
        assert!(matches!(err, ExecutorError::Dispatch(DispatchError::UnknownJobType(_))));

        let history = db.history_for_job(&job().id, 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ExecutionStatus::Failure);
        assert!(history[0].message.contains("unknown job type"));
    }

    #[test]
    fn test_rejected_row_with_unknown_type_is_a_dispatch_error() {
        let metrics = Arc::new(MetricsCollector::new());
        let db = Arc::new(Db::open_in_memory().unwrap());
        let exec = TaskExecutor::new(
            Dispatcher::from_config(&crate::config::Config::default()),
            db.clone(),
            HistoryNotifier::new(),
            metrics.clone(),
        );

        let unknown_type = RejectedJob {
            id: JobId::from("bad"),
            name: "Bad row".to_string(),
            job_type_code: 9,
            error: CodeError::UnknownJobType(9),
        };
        let err = exec.reject(&unknown_type).unwrap_err();
        assert_eq!(err.to_string(), "unknown job type: 9");
        assert!(metrics.export().contains("backup_agent_dispatch_errors_total 1"));

        let unknown_frequency = RejectedJob {
            job_type_code: JobType::FileMove.code(),
            error: CodeError::UnknownFrequency(7),
            ..unknown_type
        };
        assert!(exec.reject(&unknown_frequency).is_ok());
        assert!(db.history_for_job(&JobId::from("bad"), 10).unwrap().is_empty());
    }
}
