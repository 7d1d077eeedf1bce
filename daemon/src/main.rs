mod config;
mod db;
mod executor;
mod ipc;
mod metrics;
mod migrations;
mod notifier;
mod pool;
mod scheduler;
mod store;
mod task_executor;

use clap::Parser;
use config::{Config, LoggingConfig};
use db::Db;
use executor::Dispatcher;
use ipc::RequestHandler;
use metrics::MetricsCollector;
use notifier::HistoryNotifier;
use pool::WorkerPool;
use scheduler::Scheduler;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use store::JobStore;
use task_executor::TaskExecutor;

#[derive(Parser)]
#[command(author, version, about = "Backup agent daemon", long_about = None)]
struct Args {
    /// YAML or TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;
    setup_logging(&config.logging)?;
    log::info!("Starting backup-agent-daemon...");

    let timezone = config.server.timezone()?;
    if let Some(tz) = timezone {
        log::info!("Scheduling in timezone {}", tz);
    }

    let db_path = &config.server.db_path;
    let db = if db_path == Path::new(common::DEFAULT_DB_PATH) {
        Db::open_with_fallback(db_path, Path::new(common::USER_DB_PATH))?
    } else {
        Db::open(db_path)?
    };
    let db = Arc::new(db);
    seed_jobs(db.as_ref(), &config.jobs);

    let metrics = Arc::new(MetricsCollector::new());
    let notifier = HistoryNotifier::new();
    notifier.spawn_webhook_forwarder(&config.notifications);

    let executor = Arc::new(TaskExecutor::new(
        Dispatcher::from_config(&config),
        db.clone(),
        notifier.clone(),
        metrics.clone(),
    ));
    let pool = WorkerPool::new(
        executor,
        config.server.max_concurrent_jobs as usize,
        metrics.clone(),
    );
    let scheduler = Arc::new(Mutex::new(Scheduler::new(db.clone(), Arc::new(pool.clone()))));

    let tick_scheduler = scheduler.clone();
    let tick_metrics = metrics.clone();
    let tick_secs = config.server.tick_interval_secs.max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(tick_secs));
        loop {
            interval.tick().await;
            tick_metrics.record_tick();
            let now = scheduler::local_now(timezone);
            let sched = tick_scheduler.clone();
            let ticked = tokio::task::spawn_blocking(move || match sched.lock() {
                Ok(mut sched) => {
                    sched.tick(now);
                }
                Err(_) => log::error!("Scheduler lock poisoned; tick skipped"),
            })
            .await;
            if let Err(e) = ticked {
                log::error!("Scheduler tick failed: {}", e);
            }
        }
    });

    let (listener, socket_path) = if config.server.socket_path == Path::new(common::DEFAULT_SOCKET_PATH) {
        ipc::bind_with_fallback(&config.server.socket_path, Path::new(common::USER_SOCKET_PATH))?
    } else {
        let path = config.server.socket_path.clone();
        (ipc::bind(&path)?, path)
    };
    log::info!("Listening on {}", socket_path.display());

    let handler = RequestHandler {
        jobs: db.clone(),
        history: db,
        scheduler,
        metrics,
        timezone,
    };

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, _) = accepted?;
                tokio::spawn(ipc::serve_connection(socket, handler.clone()));
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("Shutting down");
                pool.shutdown();
                let _ = std::fs::remove_file(&socket_path);
                return Ok(());
            }
        }
    }
}

/// Upserts the jobs listed in the config file. Problems are logged; a job
/// whose paths are not mounted yet is still stored.
fn seed_jobs(store: &dyn JobStore, jobs: &[common::Job]) {
    for job in jobs {
        for problem in common::validate(job) {
            log::warn!("Configured job {} ({}): {}", job.name, job.id, problem);
        }
        match store.save_job(job) {
            Ok(()) => log::info!("Loaded job {} ({}) from config", job.name, job.id),
            Err(e) => log::error!("Failed to store configured job {}: {:#}", job.id, e),
        }
    }
}

fn open_log(path: &Path, fallback: &str) -> anyhow::Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    match fern::log_file(path) {
        Ok(file) => Ok(file),
        Err(e) => {
            eprintln!("Cannot open {} ({}), logging to {}", path.display(), e, fallback);
            Ok(fern::log_file(fallback)?)
        }
    }
}

fn setup_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = std::env::var("BACKUP_AGENT_LOG_LEVEL").unwrap_or_else(|_| config.level.clone());
    let level: log::LevelFilter = level.parse().unwrap_or(log::LevelFilter::Info);

    let log_file = config
        .file
        .clone()
        .unwrap_or_else(|| PathBuf::from(common::DEFAULT_LOG_FILE));
    let jobs_log_file = config
        .jobs_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(common::DEFAULT_JOBS_LOG_FILE));

    let base_config = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}] {}",
                chrono::Local::now().format("%Y-%m-%d][%H:%M:%S"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(level);

    // Main log file: Filter OUT job_output
    let main_log = fern::Dispatch::new()
        .filter(|metadata| metadata.target() != "job_output")
        .chain(std::io::stdout())
        .chain(open_log(&log_file, common::USER_LOG_FILE)?);

    // Jobs log file: Filter IN job_output
    let jobs_log = fern::Dispatch::new()
        .filter(|metadata| metadata.target() == "job_output")
        .chain(open_log(&jobs_log_file, common::USER_JOBS_LOG_FILE)?);

    base_config
        .chain(main_log)
        .chain(jobs_log)
        .apply()?;

    Ok(())
}
