//! Persistence seams consumed by the scheduler and task executor.

use chrono::NaiveDateTime;
use common::{CodeError, HistoryRecord, HistoryStats, Job, JobId, NewHistoryRecord};

/// A stored job row whose type or frequency code is not recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedJob {
    pub id: JobId,
    pub name: String,
    pub job_type_code: i64,
    pub error: CodeError,
}

pub trait JobStore: Send + Sync {
    /// Rows with `active` set, in id order. Each row decodes on its own,
    /// so one bad row does not hide the others.
    fn active_jobs(&self) -> anyhow::Result<Vec<Result<Job, RejectedJob>>>;
    fn get_job(&self, id: &JobId) -> anyhow::Result<Option<Job>>;
    /// Every decodable job. Rows that fail to decode are logged and left out.
    fn list_jobs(&self) -> anyhow::Result<Vec<Job>>;
    /// Insert or replace by id.
    fn save_job(&self, job: &Job) -> anyhow::Result<()>;
    /// Returns whether a job was removed.
    fn remove_job(&self, id: &JobId) -> anyhow::Result<bool>;
}

/// Append-only run log.
pub trait HistoryStore: Send + Sync {
    fn append(&self, record: NewHistoryRecord) -> anyhow::Result<HistoryRecord>;
    /// Newest first.
    fn history_for_job(&self, id: &JobId, limit: u32) -> anyhow::Result<Vec<HistoryRecord>>;
    /// Counters for the day containing `now`. `next_execution` is left empty.
    fn stats(&self, now: NaiveDateTime) -> anyhow::Result<HistoryStats>;
}
