//! Unix-socket control surface. One JSON request per line, one JSON
//! response per line.

use crate::metrics::MetricsCollector;
use crate::scheduler::{local_now, next_scheduled, Scheduler};
use crate::store::{HistoryStore, JobStore};
use common::{validate, Job, NextExecution, Request, Response};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

const DEFAULT_HISTORY_LIMIT: u32 = 10;

#[derive(Clone)]
pub struct RequestHandler {
    pub jobs: Arc<dyn JobStore>,
    pub history: Arc<dyn HistoryStore>,
    pub scheduler: Arc<Mutex<Scheduler>>,
    pub metrics: Arc<MetricsCollector>,
    pub timezone: Option<chrono_tz::Tz>,
}

fn store_error(e: anyhow::Error) -> Response {
    Response::Error(format!("Store error: {:#}", e))
}

impl RequestHandler {
    pub fn handle(&self, req: Request) -> Response {
        match req {
            Request::AddJob(job) => {
                let errors = validate(&job);
                if !errors.is_empty() {
                    let text: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
                    return Response::Error(format!("Invalid job: {}", text.join("; ")));
                }
                match self.jobs.save_job(&job) {
                    Ok(()) => {
                        log::info!("Saved job {} ({})", job.name, job.id);
                        Response::Ok
                    }
                    Err(e) => store_error(e),
                }
            }
            Request::RemoveJob(id) => match self.jobs.remove_job(&id) {
                Ok(true) => {
                    log::info!("Removed job {}", id);
                    Response::Ok
                }
                Ok(false) => Response::Error("Job not found".to_string()),
                Err(e) => store_error(e),
            },
            Request::ListJobs => self.jobs.list_jobs().map(Response::JobList).unwrap_or_else(store_error),
            Request::GetJob(id) => self.jobs.get_job(&id).map(Response::JobDetail).unwrap_or_else(store_error),
            Request::RunJob(id) => {
                let scheduler = match self.scheduler.lock() {
                    Ok(s) => s,
                    Err(_) => return Response::Error("Scheduler lock poisoned".to_string()),
                };
                match scheduler.execute_job_by_id(&id) {
                    Ok(true) => Response::Ok,
                    Ok(false) => Response::Error("Job not found".to_string()),
                    Err(e) => Response::Error(format!("Could not start job: {:#}", e)),
                }
            }
            Request::GetHistory { job_id, limit } => {
                let limit = if limit == 0 { DEFAULT_HISTORY_LIMIT } else { limit };
                self.history
                    .history_for_job(&job_id, limit)
                    .map(Response::HistoryList)
                    .unwrap_or_else(store_error)
            }
            Request::GetStats => {
                let now = local_now(self.timezone);
                let mut stats = match self.history.stats(now) {
                    Ok(s) => s,
                    Err(e) => return store_error(e),
                };
                let active: Vec<Job> = match self.jobs.active_jobs() {
                    Ok(rows) => rows.into_iter().filter_map(Result::ok).collect(),
                    Err(e) => return store_error(e),
                };
                stats.next_execution = next_scheduled(&active, now).map(|(job, at)| NextExecution {
                    job_id: job.id,
                    job_name: job.name,
                    job_type: job.job_type,
                    at,
                });
                Response::Stats(stats)
            }
            Request::GetMetrics => Response::Metrics(self.metrics.export()),
            Request::ClearSchedule => match self.scheduler.lock() {
                Ok(mut s) => {
                    s.clear_execution_history();
                    Response::Ok
                }
                Err(_) => Response::Error("Scheduler lock poisoned".to_string()),
            },
        }
    }
}

/// Binds the control socket, replacing a stale one.
pub fn bind(path: &Path) -> anyhow::Result<UnixListener> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    let listener = UnixListener::bind(path)?;

    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o660);
    std::fs::set_permissions(path, perms)?;
    Ok(listener)
}

/// Binds `path`, or `fallback` when that fails. Returns the path in use.
pub fn bind_with_fallback(path: &Path, fallback: &Path) -> anyhow::Result<(UnixListener, PathBuf)> {
    match bind(path) {
        Ok(listener) => Ok((listener, path.to_path_buf())),
        Err(e) => {
            log::warn!("Cannot bind {} ({:#}), using {}", path.display(), e, fallback.display());
            Ok((bind(fallback)?, fallback.to_path_buf()))
        }
    }
}

pub async fn serve_connection(socket: UnixStream, handler: RequestHandler) {
    let (read_half, mut write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                log::error!("Failed to read from socket: {}", e);
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<Request>(&line) {
            Ok(req) => {
                log::debug!("Received request: {:?}", req);
                let handler = handler.clone();
                tokio::task::spawn_blocking(move || handler.handle(req))
                    .await
                    .unwrap_or_else(|e| Response::Error(format!("Request handler failed: {}", e)))
            }
            Err(e) => {
                log::warn!("Malformed request: {}", e);
                Response::Error(format!("Malformed request: {}", e))
            }
        };

        let mut bytes = match serde_json::to_vec(&resp) {
            Ok(b) => b,
            Err(e) => {
                log::error!("Failed to encode response: {}", e);
                return;
            }
        };
        bytes.push(b'\n');
        if let Err(e) = write_half.write_all(&bytes).await {
            log::error!("Failed to write to socket: {}", e);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use crate::scheduler::JobQueue;
    use chrono::NaiveTime;
    use common::{Frequency, Job, JobId, JobType};

    struct Sink(Mutex<Vec<JobId>>);

    impl JobQueue for Sink {
        fn submit(&self, job: Job) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(job.id);
            Ok(())
        }
    }

    fn handler() -> (RequestHandler, Arc<Sink>) {
        let db = Arc::new(Db::open_in_memory().unwrap());
        let sink = Arc::new(Sink(Mutex::new(Vec::new())));
        let scheduler = Arc::new(Mutex::new(Scheduler::new(db.clone(), sink.clone())));
        let handler = RequestHandler {
            jobs: db.clone(),
            history: db,
            scheduler,
            metrics: Arc::new(MetricsCollector::new()),
            timezone: None,
        };
        (handler, sink)
    }

    fn clean_job(dir: &Path) -> Job {
        let mut job = Job::new("clean", "Clean scratch", JobType::FolderClean);
        job.source_path = Some(dir.to_path_buf());
        job.frequency = Frequency::Daily;
        job.schedule_time = NaiveTime::from_hms_opt(3, 0, 0);
        job
    }

    #[test]
    fn test_add_rejects_invalid_jobs() {
        let (handler, _) = handler();
        let job = Job::new("x", "ab", JobType::FileMove);
        match handler.handle(Request::AddJob(job)) {
            Response::Error(msg) => {
                assert!(msg.contains("name"));
                assert!(msg.contains("source_path"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(handler.handle(Request::ListJobs), Response::JobList(j) if j.is_empty()));
    }

    #[test]
    fn test_add_run_and_remove() {
        let (handler, sink) = handler();
        let dir = tempfile::tempdir().unwrap();
        let job = clean_job(dir.path());

        assert!(matches!(handler.handle(Request::AddJob(job.clone())), Response::Ok));
        assert!(matches!(
            handler.handle(Request::GetJob(job.id.clone())),
            Response::JobDetail(Some(j)) if j.name == "Clean scratch"
        ));

        assert!(matches!(handler.handle(Request::RunJob(job.id.clone())), Response::Ok));
        assert_eq!(*sink.0.lock().unwrap(), vec![job.id.clone()]);
        assert!(matches!(handler.handle(Request::RunJob(JobId::from("nope"))), Response::Error(_)));

        assert!(matches!(handler.handle(Request::RemoveJob(job.id.clone())), Response::Ok));
        assert!(matches!(handler.handle(Request::RemoveJob(job.id)), Response::Error(_)));
    }

    #[test]
    fn test_stats_include_next_execution() {
        let (handler, _) = handler();
        let dir = tempfile::tempdir().unwrap();
        handler.handle(Request::AddJob(clean_job(dir.path())));

        match handler.handle(Request::GetStats) {
            Response::Stats(stats) => {
                assert_eq!(stats.active_jobs, 1);
                let next = stats.next_execution.unwrap();
                assert_eq!(next.job_id, JobId::from("clean"));
                assert_eq!(next.at.time(), NaiveTime::from_hms_opt(3, 0, 0).unwrap());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(handler.handle(Request::GetMetrics), Response::Metrics(_)));
        assert!(matches!(handler.handle(Request::ClearSchedule), Response::Ok));
    }

    #[tokio::test]
    async fn test_socket_round_trip() {
        let (handler, _) = handler();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.sock");
        let listener = bind(&path).unwrap();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            serve_connection(socket, handler).await;
        });

        let stream = UnixStream::connect(&path).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut req = serde_json::to_vec(&Request::ListJobs).unwrap();
        req.push(b'\n');
        write_half.write_all(&req).await.unwrap();

        let line = BufReader::new(read_half).lines().next_line().await.unwrap().unwrap();
        let resp: Response = serde_json::from_str(&line).unwrap();
        assert!(matches!(resp, Response::JobList(j) if j.is_empty()));
    }

    #[tokio::test]
    async fn test_bind_falls_back_when_path_is_unusable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();
        let fallback = dir.path().join("user.sock");

        let (_listener, in_use) = bind_with_fallback(&blocker.join("agent.sock"), &fallback).unwrap();
        assert_eq!(in_use, fallback);
        assert!(UnixStream::connect(&fallback).await.is_ok());
    }
}
