use chrono::{Local, NaiveDateTime};
use common::ExecutionStatus;

/// Outcome of one run of one job.
///
/// Starts out failed; a strategy flips it with [`succeed`](Self::succeed).
/// [`finish`](Self::finish) stamps the end time and duration and must be
/// called on every path before the result is recorded.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub message: String,
    pub started_at: NaiveDateTime,
    pub ended_at: Option<NaiveDateTime>,
    pub duration: Option<String>,
    pub item_count: u64,
    pub bytes: u64,
    pub status: ExecutionStatus,
}

impl ExecutionResult {
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_start(message, Local::now().naive_local())
    }

    pub fn with_start(message: impl Into<String>, started_at: NaiveDateTime) -> Self {
        Self {
            success: false,
            message: message.into(),
            started_at,
            ended_at: None,
            duration: None,
            item_count: 0,
            bytes: 0,
            status: ExecutionStatus::Failure,
        }
    }

    pub fn succeed(&mut self, message: impl Into<String>, item_count: u64, bytes: u64) {
        self.success = true;
        self.status = ExecutionStatus::Success;
        self.message = message.into();
        self.item_count = item_count;
        self.bytes = bytes;
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.success = false;
        self.status = ExecutionStatus::Failure;
        self.message = message.into();
    }

    pub fn finish(&mut self) {
        self.finish_at(Local::now().naive_local());
    }

    /// Only the first call has an effect.
    pub fn finish_at(&mut self, ended_at: NaiveDateTime) {
        if self.ended_at.is_some() {
            return;
        }
        let seconds = (ended_at - self.started_at).num_seconds();
        self.ended_at = Some(ended_at);
        self.duration = Some(common::format_duration(seconds));
    }

    pub fn is_finished(&self) -> bool {
        self.ended_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 3).unwrap().and_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_new_result_is_failed_and_unfinished() {
        let result = ExecutionResult::new("starting");
        assert!(!result.success);
        assert_eq!(result.status, ExecutionStatus::Failure);
        assert!(result.ended_at.is_none());
        assert!(result.duration.is_none());
    }

    #[test]
    fn test_zero_second_span() {
        let mut result = ExecutionResult::with_start("x", at(10, 0, 0));
        result.finish_at(at(10, 0, 0));
        assert_eq!(result.ended_at, Some(at(10, 0, 0)));
        assert_eq!(result.duration.as_deref(), Some("0 s"));
    }

    #[test]
    fn test_finish_only_once() {
        let mut result = ExecutionResult::with_start("x", at(10, 0, 0));
        result.finish_at(at(10, 2, 5));
        result.finish_at(at(11, 0, 0));
        assert_eq!(result.ended_at, Some(at(10, 2, 5)));
        assert_eq!(result.duration.as_deref(), Some("2 min 5 s"));
    }

    #[test]
    fn test_finish_with_wall_clock() {
        let mut result = ExecutionResult::new("x");
        result.started_at = result.started_at - Duration::seconds(3);
        result.finish();
        assert!(result.is_finished());
        assert!(result.duration.is_some());
    }

    #[test]
    fn test_succeed_then_fail() {
        let mut result = ExecutionResult::new("x");
        result.succeed("done", 3, 1024);
        assert!(result.success);
        assert_eq!(result.status.code(), 1);
        result.fail("broke");
        assert!(!result.success);
        assert_eq!(result.status.code(), 2);
        assert_eq!(result.item_count, 3);
    }
}
