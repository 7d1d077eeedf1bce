use crate::pool::WorkerPool;
use crate::store::{JobStore, RejectedJob};
use chrono::{Datelike, Duration, Local, NaiveDateTime, Timelike, Utc, Weekday};
use common::{Frequency, Job, JobId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A job dispatched less than this long ago is not dispatched again.
pub const GUARD_WINDOW_SECS: i64 = 120;

/// Where due jobs are handed off. Submission must not wait for the run.
pub trait JobQueue: Send + Sync {
    fn submit(&self, job: Job) -> anyhow::Result<()>;

    /// Told about a stored job that cannot be decoded into a [`Job`].
    fn reject(&self, rejected: RejectedJob) {
        log::error!("Cannot run job {} ({}): {}", rejected.name, rejected.id, rejected.error);
    }
}

impl JobQueue for WorkerPool {
    fn submit(&self, job: Job) -> anyhow::Result<()> {
        WorkerPool::submit(self, job)
    }

    fn reject(&self, rejected: RejectedJob) {
        WorkerPool::reject(self, &rejected);
    }
}

/// Wall-clock "now" in `tz`, or in the host's local zone.
pub fn local_now(tz: Option<chrono_tz::Tz>) -> NaiveDateTime {
    match tz {
        Some(tz) => Utc::now().with_timezone(&tz).naive_local(),
        None => Local::now().naive_local(),
    }
}

/// Whether `job` should be dispatched at `now`, given when the scheduler
/// last dispatched it.
pub fn is_due(job: &Job, now: NaiveDateTime, last_run: Option<NaiveDateTime>) -> bool {
    if !job.active || job.frequency == Frequency::Manual {
        return false;
    }
    let Some(at) = job.schedule_time else {
        return false;
    };
    if at.hour() != now.hour() || at.minute() != now.minute() {
        return false;
    }
    if let Some(last) = last_run {
        if now - last < Duration::seconds(GUARD_WINDOW_SECS) {
            return false;
        }
    }
    match job.frequency {
        Frequency::Daily => true,
        Frequency::Weekly => now.weekday() == Weekday::Mon,
        Frequency::Manual => false,
    }
}

fn next_run_of(job: &Job, now: NaiveDateTime) -> Option<NaiveDateTime> {
    if !job.active || job.frequency == Frequency::Manual {
        return None;
    }
    let at = job.schedule_time?;
    let at = at.with_second(0)?.with_nanosecond(0)?;
    (0..=7)
        .map(|days| (now.date() + Duration::days(days)).and_time(at))
        .filter(|candidate| *candidate > now)
        .find(|candidate| job.frequency == Frequency::Daily || candidate.weekday() == Weekday::Mon)
}

/// The soonest upcoming dispatch among `jobs`.
pub fn next_scheduled(jobs: &[Job], now: NaiveDateTime) -> Option<(Job, NaiveDateTime)> {
    jobs.iter()
        .filter_map(|job| next_run_of(job, now).map(|at| (job.clone(), at)))
        .min_by_key(|(_, at)| *at)
}

pub struct Scheduler {
    jobs: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
    last_runs: HashMap<JobId, NaiveDateTime>,
    /// Undecodable rows already reported, so each is surfaced once.
    rejected: HashSet<JobId>,
}

impl Scheduler {
    pub fn new(jobs: Arc<dyn JobStore>, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            jobs,
            queue,
            last_runs: HashMap::new(),
            rejected: HashSet::new(),
        }
    }

    /// Dispatches every active job due at `now` and returns their ids.
    pub fn tick(&mut self, now: NaiveDateTime) -> Vec<JobId> {
        let rows = match self.jobs.active_jobs() {
            Ok(rows) => rows,
            Err(e) => {
                log::error!("Failed to load jobs: {:#}", e);
                return Vec::new();
            }
        };

        let mut dispatched = Vec::new();
        for row in rows {
            let job = match row {
                Ok(job) => job,
                Err(rejected) => {
                    if self.rejected.insert(rejected.id.clone()) {
                        self.queue.reject(rejected);
                    }
                    continue;
                }
            };
            self.rejected.remove(&job.id);

            let last = self.last_runs.get(&job.id).copied();
            if !is_due(&job, now, last) {
                continue;
            }

            self.last_runs.insert(job.id.clone(), now);
            let id = job.id.clone();
            let name = job.name.clone();
            match self.queue.submit(job) {
                Ok(()) => {
                    log::info!("Dispatched job {} ({})", name, id);
                    dispatched.push(id);
                }
                Err(e) => log::error!("Failed to dispatch job {} ({}): {:#}", name, id, e),
            }
        }
        dispatched
    }

    /// Runs `job` now regardless of schedule or recent dispatches. The
    /// last-execution map is left untouched.
    pub fn execute_job_manually(&self, job: Job) -> anyhow::Result<()> {
        log::info!("Manual run of job {} ({})", job.name, job.id);
        self.queue.submit(job)
    }

    /// Looks the job up and runs it manually. `Ok(false)` when no such job.
    pub fn execute_job_by_id(&self, id: &JobId) -> anyhow::Result<bool> {
        match self.jobs.get_job(id)? {
            Some(job) => {
                self.execute_job_manually(job)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn clear_execution_history(&mut self) {
        log::info!("Clearing {} scheduled-run timestamps", self.last_runs.len());
        self.last_runs.clear();
    }

    pub fn last_execution(&self, id: &JobId) -> Option<NaiveDateTime> {
        self.last_runs.get(id).copied()
    }
}
