use common::{ExecutionStatus, HistoryRecord};
use dashmap::DashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

const DURATION_SAMPLES: usize = 100;

/// Run counters exported in Prometheus text format.
#[derive(Default)]
pub struct MetricsCollector {
    runs: DashMap<String, AtomicU64>,
    successes: DashMap<String, AtomicU64>,
    failures: DashMap<String, AtomicU64>,
    items: DashMap<String, AtomicU64>,
    bytes: DashMap<String, AtomicU64>,
    // last DURATION_SAMPLES run durations per job, in milliseconds
    durations: DashMap<String, Vec<u64>>,
    scheduler_ticks: AtomicU64,
    dispatch_errors: AtomicU64,
    in_flight: AtomicI64,
}

fn bump(map: &DashMap<String, AtomicU64>, key: &str, by: u64) {
    map.entry(key.to_string())
        .or_insert_with(|| AtomicU64::new(0))
        .fetch_add(by, Ordering::Relaxed);
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_run(&self, record: &HistoryRecord) {
        let job = record.job_id.0.as_str();
        bump(&self.runs, job, 1);
        match record.status {
            ExecutionStatus::Success => bump(&self.successes, job, 1),
            ExecutionStatus::Failure => bump(&self.failures, job, 1),
        }
        bump(&self.items, job, record.item_count);
        bump(&self.bytes, job, record.bytes);

        if let Some(ended) = record.ended_at {
            let ms = (ended - record.started_at).num_milliseconds().max(0) as u64;
            let mut samples = self.durations.entry(job.to_string()).or_default();
            samples.push(ms);
            let len = samples.len();
            if len > DURATION_SAMPLES {
                samples.drain(0..len - DURATION_SAMPLES);
            }
        }
    }

    pub fn record_tick(&self) {
        self.scheduler_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch_error(&self) {
        self.dispatch_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_started(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_finished(&self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn in_flight(&self) -> i64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn export(&self) -> String {
        let mut out = String::new();
        write_scalar(
            &mut out,
            "backup_agent_scheduler_ticks_total",
            "Scheduler ticks since start",
            "counter",
            self.scheduler_ticks.load(Ordering::Relaxed),
        );
        write_scalar(
            &mut out,
            "backup_agent_dispatch_errors_total",
            "Jobs rejected because no strategy handles their type",
            "counter",
            self.dispatch_errors.load(Ordering::Relaxed),
        );
        write_scalar(
            &mut out,
            "backup_agent_jobs_in_flight",
            "Jobs currently running",
            "gauge",
            self.in_flight(),
        );
        write_per_job(&mut out, "backup_agent_job_runs_total", "Runs recorded", &self.runs);
        write_per_job(&mut out, "backup_agent_job_successes_total", "Successful runs", &self.successes);
        write_per_job(&mut out, "backup_agent_job_failures_total", "Failed runs", &self.failures);
        write_per_job(&mut out, "backup_agent_job_items_total", "Files or dumps handled", &self.items);
        write_per_job(&mut out, "backup_agent_job_bytes_total", "Bytes written", &self.bytes);

        let _ = writeln!(out, "# HELP backup_agent_job_duration_ms Run duration percentiles");
        let _ = writeln!(out, "# TYPE backup_agent_job_duration_ms gauge");
        for entry in self.durations.iter() {
            let mut samples = entry.value().clone();
            if samples.is_empty() {
                continue;
            }
            samples.sort_unstable();
            for (label, p) in [("0.5", 50.0), ("0.95", 95.0), ("0.99", 99.0)] {
                let _ = writeln!(
                    out,
                    "backup_agent_job_duration_ms{{job_id=\"{}\",quantile=\"{}\"}} {}",
                    entry.key(),
                    label,
                    percentile(&samples, p)
                );
            }
        }
        out
    }
}

fn write_scalar(out: &mut String, name: &str, help: &str, kind: &str, value: impl std::fmt::Display) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} {}", name, kind);
    let _ = writeln!(out, "{} {}\n", name, value);
}

fn write_per_job(out: &mut String, name: &str, help: &str, map: &DashMap<String, AtomicU64>) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} counter", name);
    let mut rows: Vec<(String, u64)> = map
        .iter()
        .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
        .collect();
    rows.sort();
    for (job, value) in rows {
        let _ = writeln!(out, "{}{{job_id=\"{}\"}} {}", name, job, value);
    }
    out.push('\n');
}

fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let index = ((p / 100.0) * (sorted.len() as f64 - 1.0)).round() as usize;
    sorted[index.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use common::{HistoryRecord, JobId, JobType};

    fn record(job: &str, status: ExecutionStatus, ms: i64) -> HistoryRecord {
        let started = NaiveDate::from_ymd_opt(2024, 5, 17).unwrap().and_hms_opt(9, 0, 0).unwrap();
        HistoryRecord {
            id: 1,
            run_id: uuid::Uuid::new_v4(),
            job_id: JobId::from(job),
            job_name: job.to_string(),
            job_type: JobType::FileMove,
            started_at: started,
            ended_at: Some(started + Duration::milliseconds(ms)),
            duration: None,
            status,
            message: String::new(),
            item_count: 2,
            bytes: 512,
            created_at: started,
        }
    }

    #[test]
    fn test_export_counts_runs_by_outcome() {
        let metrics = MetricsCollector::new();
        metrics.record_run(&record("move", ExecutionStatus::Success, 1500));
        metrics.record_run(&record("move", ExecutionStatus::Failure, 10));
        metrics.record_tick();
        metrics.job_started();

        let text = metrics.export();
        assert!(text.contains("backup_agent_scheduler_ticks_total 1"));
        assert!(text.contains("backup_agent_jobs_in_flight 1"));
        assert!(text.contains("backup_agent_job_runs_total{job_id=\"move\"} 2"));
        assert!(text.contains("backup_agent_job_successes_total{job_id=\"move\"} 1"));
        assert!(text.contains("backup_agent_job_failures_total{job_id=\"move\"} 1"));
        assert!(text.contains("backup_agent_job_bytes_total{job_id=\"move\"} 1024"));
        assert!(text.contains("backup_agent_job_duration_ms{job_id=\"move\",quantile=\"0.99\"} 1500"));

        metrics.job_finished();
        assert_eq!(metrics.in_flight(), 0);
    }

    #[test]
    fn test_duration_samples_are_bounded() {
        let metrics = MetricsCollector::new();
        for ms in 0..150 {
            metrics.record_run(&record("clean", ExecutionStatus::Success, ms));
        }
        assert_eq!(metrics.durations.get("clean").unwrap().len(), DURATION_SAMPLES);
        assert_eq!(percentile(&[1, 2, 3], 50.0), 2);
    }
}
