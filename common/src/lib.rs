pub mod format;
pub mod history;
pub mod ipc;
pub mod job;
pub mod schedule;
pub mod validation;

pub use format::{format_duration, format_size};
pub use history::{ExecutionStatus, HistoryEvent, HistoryEventKind, HistoryRecord,
                  HistoryStats, NewHistoryRecord, NextExecution};
pub use ipc::{Request, Response};
pub use job::{CodeError, Frequency, Job, JobId, JobType};
pub use schedule::{describe_schedule, parse_schedule, parse_time};
pub use validation::{validate, ValidationError};

// Production paths (follow FHS - Filesystem Hierarchy Standard)
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/backup-agent/backup-agent.sock";
pub const DEFAULT_DB_PATH: &str = "/var/lib/backup-agent/backup-agent.db";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/backup-agent/config.yaml";
pub const DEFAULT_LOG_FILE: &str = "/var/log/backup-agent/daemon.log";
pub const DEFAULT_JOBS_LOG_FILE: &str = "/var/log/backup-agent/jobs.log";

// Fallback paths for non-root users
pub const USER_SOCKET_PATH: &str = "/tmp/backup-agent.sock";
pub const USER_DB_PATH: &str = "backup-agent.db";
pub const USER_LOG_FILE: &str = "backup-agent-daemon.log";
pub const USER_JOBS_LOG_FILE: &str = "backup-agent-jobs.log";
