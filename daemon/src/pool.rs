use crate::metrics::MetricsCollector;
use crate::store::RejectedJob;
use crate::task_executor::TaskExecutor;
use common::Job;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Bounded, fire-and-forget job runner.
///
/// `submit` returns at once. The run waits for one of
/// `max_concurrent_jobs` permits and then executes on the blocking pool;
/// completion is observed through the history notifier.
#[derive(Clone)]
pub struct WorkerPool {
    executor: Arc<TaskExecutor>,
    permits: Arc<Semaphore>,
    metrics: Arc<MetricsCollector>,
    handle: tokio::runtime::Handle,
}

impl WorkerPool {
    /// Must be called from inside a tokio runtime.
    pub fn new(executor: Arc<TaskExecutor>, max_concurrent_jobs: usize, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            executor,
            permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
            metrics,
            handle: tokio::runtime::Handle::current(),
        }
    }

    pub fn submit(&self, job: Job) -> anyhow::Result<()> {
        if self.permits.is_closed() {
            anyhow::bail!("worker pool is shut down");
        }
        let executor = self.executor.clone();
        let permits = self.permits.clone();
        let metrics = self.metrics.clone();
        log::debug!("Queued job {} ({})", job.name, job.id);

        self.handle.spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(p) => p,
                Err(_) => {
                    log::error!("Worker pool closed; job {} dropped", job.name);
                    return;
                }
            };
            metrics.job_started();
            let name = job.name.clone();
            let outcome = tokio::task::spawn_blocking(move || executor.execute(&job)).await;
            metrics.job_finished();

            match outcome {
                Ok(Ok(record)) => log::debug!("Job {} recorded as run {}", name, record.id),
                Ok(Err(e)) => log::error!("Job {} could not run: {}", name, e),
                Err(e) => log::error!("Worker for job {} died: {}", name, e),
            }
        });
        Ok(())
    }

    /// Reports an undecodable stored job. Runs inline; nothing is queued.
    pub fn reject(&self, rejected: &RejectedJob) {
        if let Err(e) = self.executor.reject(rejected) {
            log::debug!("Job {} not queued: {}", rejected.id, e);
        }
    }

    /// Refuses new submissions. Queued runs that have no permit yet are
    /// dropped; running ones finish.
    pub fn shutdown(&self) {
        self.permits.close();
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}
