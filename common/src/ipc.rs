use serde::{Deserialize, Serialize};
use crate::history::{HistoryRecord, HistoryStats};
use crate::job::{Job, JobId};

#[derive(Debug, Serialize, Deserialize)]
pub enum Request {
    AddJob(Job),
    RemoveJob(JobId),
    ListJobs,
    GetJob(JobId),
    /// Manual trigger. Answered as soon as the run is queued.
    RunJob(JobId),
    GetHistory { job_id: JobId, limit: u32 },
    GetStats,
    GetMetrics,
    /// Forget every scheduled dispatch timestamp.
    ClearSchedule,
}

#[derive(Debug, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Error(String),
    JobList(Vec<Job>),
    JobDetail(Option<Job>),
    HistoryList(Vec<HistoryRecord>),
    Stats(HistoryStats),
    Metrics(String),
}
