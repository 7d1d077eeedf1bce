use crate::job::{JobId, JobType};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Outcome code of a run. The numeric codes are shared with the history store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ExecutionStatus {
    Success,
    Failure,
}

impl ExecutionStatus {
    pub fn code(self) -> i64 {
        match self {
            ExecutionStatus::Success => 1,
            ExecutionStatus::Failure => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(ExecutionStatus::Success),
            2 => Some(ExecutionStatus::Failure),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Success => write!(f, "success"),
            ExecutionStatus::Failure => write!(f, "failure"),
        }
    }
}

/// Insert shape for the history log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewHistoryRecord {
    pub run_id: Uuid,
    pub job_id: JobId,
    pub job_name: String,
    pub job_type: JobType,
    pub started_at: NaiveDateTime,
    pub ended_at: Option<NaiveDateTime>,
    pub duration: Option<String>,
    pub status: ExecutionStatus,
    pub message: String,
    pub item_count: u64,
    pub bytes: u64,
}

/// One persisted run. Name and type are snapshots taken at run time so the
/// record survives deletion of the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub run_id: Uuid,
    pub job_id: JobId,
    pub job_name: String,
    pub job_type: JobType,
    pub started_at: NaiveDateTime,
    pub ended_at: Option<NaiveDateTime>,
    pub duration: Option<String>,
    pub status: ExecutionStatus,
    pub message: String,
    pub item_count: u64,
    pub bytes: u64,
    pub created_at: NaiveDateTime,
}

impl HistoryRecord {
    pub fn from_new(id: i64, record: NewHistoryRecord, created_at: NaiveDateTime) -> Self {
        Self {
            id,
            run_id: record.run_id,
            job_id: record.job_id,
            job_name: record.job_name,
            job_type: record.job_type,
            started_at: record.started_at,
            ended_at: record.ended_at,
            duration: record.duration,
            status: record.status,
            message: record.message,
            item_count: record.item_count,
            bytes: record.bytes,
            created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HistoryEventKind {
    Created,
    Updated,
    Deleted,
}

/// Published after every persisted run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub kind: HistoryEventKind,
    pub record: HistoryRecord,
}

impl HistoryEvent {
    pub fn created(record: HistoryRecord) -> Self {
        Self {
            kind: HistoryEventKind::Created,
            record,
        }
    }
}

/// Dashboard counters derived from the history log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryStats {
    pub total_runs: u64,
    pub successes: u64,
    pub failures: u64,
    pub completed_today: u64,
    pub runs_today_by_type: BTreeMap<String, u64>,
    pub items_moved_today: u64,
    pub bytes_today: u64,
    pub average_duration: String,
    pub active_jobs: u64,
    pub next_execution: Option<NextExecution>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextExecution {
    pub job_id: JobId,
    pub job_name: String,
    pub job_type: JobType,
    pub at: NaiveDateTime,
}
