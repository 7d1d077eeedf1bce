use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use common::{describe_schedule, format_size, HistoryRecord, Job, JobId, JobType, Request, Response};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

#[derive(Parser)]
#[command(author, version, about = "Control the backup agent daemon", long_about = None)]
struct Cli {
    /// Daemon control socket
    #[arg(long, default_value = common::DEFAULT_SOCKET_PATH)]
    socket: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum TypeArg {
    DatabaseDump,
    FileBackup,
    FileMove,
    FolderClean,
}

impl From<TypeArg> for JobType {
    fn from(t: TypeArg) -> Self {
        match t {
            TypeArg::DatabaseDump => JobType::DatabaseDump,
            TypeArg::FileBackup => JobType::FileBackup,
            TypeArg::FileMove => JobType::FileMove,
            TypeArg::FolderClean => JobType::FolderClean,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Add or replace a job
    Add {
        /// Name of the job
        #[arg(short, long)]
        name: String,
        /// Job id; derived from the name when omitted
        #[arg(long)]
        id: Option<String>,
        #[arg(short = 't', long = "type", value_enum)]
        job_type: TypeArg,
        #[arg(long)]
        source: Option<PathBuf>,
        #[arg(long)]
        destination: Option<PathBuf>,
        /// Only files ending in this extension, e.g. ".wav"
        #[arg(long)]
        extension: Option<String>,
        /// Database to dump
        #[arg(long)]
        database: Option<String>,
        /// "manual", "daily at HH:MM" or "weekly at HH:MM" (Mondays)
        #[arg(short, long, default_value = "manual")]
        schedule: String,
        /// Store the job without scheduling it
        #[arg(long)]
        inactive: bool,
    },
    /// List all jobs
    List,
    /// Show one job
    Get { id: String },
    /// Run a job now
    Run { id: String },
    /// Remove a job
    Remove { id: String },
    /// Show a job's recent runs
    History {
        id: String,
        #[arg(short, long, default_value_t = 10)]
        limit: u32,
        /// Also write the rows to this CSV file
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Run counters and the next scheduled execution
    Stats,
    /// Prometheus metrics text
    Metrics,
    /// Forget recent scheduled runs so due jobs can fire again
    ClearSchedule,
}

/// Lowercase ASCII letters and digits of `name`, other runs collapsed to `-`.
fn slug(name: &str) -> String {
    let mut out = String::new();
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

#[allow(clippy::too_many_arguments)]
fn build_job(
    name: String,
    id: Option<String>,
    job_type: JobType,
    source: Option<PathBuf>,
    destination: Option<PathBuf>,
    extension: Option<String>,
    database: Option<String>,
    schedule: &str,
    inactive: bool,
) -> anyhow::Result<Job> {
    let (frequency, schedule_time) = common::parse_schedule(schedule)?;
    let id = id.unwrap_or_else(|| slug(&name));
    if id.is_empty() {
        return Err(anyhow!("Cannot derive a job id from {:?}; pass --id", name));
    }
    let mut job = Job::new(id, name, job_type);
    job.source_path = source;
    job.destination_path = destination;
    job.file_extension = extension;
    job.database_name = database;
    job.frequency = frequency;
    job.schedule_time = schedule_time;
    job.active = !inactive;
    Ok(job)
}

/// The stock socket falls back to the per-user one, which an unprivileged
/// daemon binds instead.
fn socket_candidates(socket: &Path) -> Vec<PathBuf> {
    let mut candidates = vec![socket.to_path_buf()];
    if socket == Path::new(common::DEFAULT_SOCKET_PATH) {
        candidates.push(PathBuf::from(common::USER_SOCKET_PATH));
    }
    candidates
}

async fn connect(socket: &Path) -> anyhow::Result<UnixStream> {
    let mut last_err = None;
    for candidate in socket_candidates(socket) {
        match UnixStream::connect(&candidate).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some((candidate, e)),
        }
    }
    match last_err {
        Some((path, e)) => Err(e).with_context(|| format!("Cannot connect to daemon at {}", path.display())),
        None => Err(anyhow!("no socket path to connect to")),
    }
}

async fn send(socket: &Path, req: &Request) -> anyhow::Result<Response> {
    let stream = connect(socket).await?;
    let (read_half, mut write_half) = stream.into_split();

    let mut bytes = serde_json::to_vec(req)?;
    bytes.push(b'\n');
    write_half.write_all(&bytes).await?;

    let line = BufReader::new(read_half)
        .lines()
        .next_line()
        .await?
        .ok_or_else(|| anyhow!("Daemon closed the connection without answering"))?;
    Ok(serde_json::from_str(&line)?)
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn print_jobs(jobs: &[Job]) {
    let mut table = new_table(vec!["ID", "Name", "Type", "Schedule", "Active"]);
    for job in jobs {
        table.add_row(vec![
            job.id.to_string(),
            job.name.clone(),
            job.job_type.description().to_string(),
            describe_schedule(job.frequency, job.schedule_time),
            if job.active { "yes".to_string() } else { "no".to_string() },
        ]);
    }
    println!("{table}");
}

fn print_job(job: &Job) {
    let path = |p: &Option<PathBuf>| p.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "-".into());
    println!("Job Details:");
    println!("  ID:          {}", job.id);
    println!("  Name:        {}", job.name);
    println!("  Type:        {}", job.job_type.description());
    println!("  Schedule:    {}", describe_schedule(job.frequency, job.schedule_time));
    println!("  Source:      {}", path(&job.source_path));
    println!("  Destination: {}", path(&job.destination_path));
    println!("  Extension:   {}", job.file_extension.as_deref().unwrap_or("-"));
    println!("  Database:    {}", job.database_name.as_deref().unwrap_or("-"));
    println!("  Active:      {}", job.active);
}

fn history_row(r: &HistoryRecord) -> Vec<String> {
    vec![
        r.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        r.status.to_string(),
        r.duration.clone().unwrap_or_default(),
        r.item_count.to_string(),
        format_size(r.bytes),
        r.message.clone(),
    ]
}

const HISTORY_HEADER: [&str; 6] = ["Started", "Status", "Duration", "Items", "Size", "Message"];

fn write_history_csv(path: &Path, records: &[HistoryRecord]) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Cannot write {}", path.display()))?;
    writer.write_record(HISTORY_HEADER)?;
    for record in records {
        writer.write_record(history_row(record))?;
    }
    writer.flush()?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut csv_target = None;

    let req = match cli.command {
        Commands::Add { name, id, job_type, source, destination, extension, database, schedule, inactive } => {
            let job = build_job(
                name, id, job_type.into(), source, destination, extension, database, &schedule, inactive,
            )?;
            Request::AddJob(job)
        }
        Commands::List => Request::ListJobs,
        Commands::Get { id } => Request::GetJob(JobId(id)),
        Commands::Run { id } => Request::RunJob(JobId(id)),
        Commands::Remove { id } => Request::RemoveJob(JobId(id)),
        Commands::History { id, limit, csv } => {
            csv_target = csv;
            Request::GetHistory { job_id: JobId(id), limit }
        }
        Commands::Stats => Request::GetStats,
        Commands::Metrics => Request::GetMetrics,
        Commands::ClearSchedule => Request::ClearSchedule,
    };

    match send(&cli.socket, &req).await? {
        Response::Ok => println!("Success"),
        Response::Error(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
        Response::JobList(jobs) => print_jobs(&jobs),
        Response::JobDetail(Some(job)) => print_job(&job),
        Response::JobDetail(None) => println!("Job not found."),
        Response::HistoryList(records) => {
            let mut table = new_table(HISTORY_HEADER.to_vec());
            for record in &records {
                table.add_row(history_row(record));
            }
            println!("{table}");
            if let Some(path) = csv_target {
                write_history_csv(&path, &records)?;
                println!("Wrote {} rows to {}", records.len(), path.display());
            }
        }
        Response::Stats(stats) => {
            println!("Runs:            {} ({} ok, {} failed)", stats.total_runs, stats.successes, stats.failures);
            println!("Completed today: {}", stats.completed_today);
            for (job_type, count) in &stats.runs_today_by_type {
                println!("  {:<20} {}", job_type, count);
            }
            println!("Moved today:     {} files", stats.items_moved_today);
            println!("Written today:   {}", format_size(stats.bytes_today));
            println!("Average run:     {}", stats.average_duration);
            println!("Active jobs:     {}", stats.active_jobs);
            match stats.next_execution {
                Some(next) => println!(
                    "Next execution:  {} ({}) at {}",
                    next.job_name,
                    next.job_type.description(),
                    next.at.format("%Y-%m-%d %H:%M")
                ),
                None => println!("Next execution:  none scheduled"),
            }
        }
        Response::Metrics(text) => print!("{}", text),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Frequency;

    #[test]
    fn test_default_socket_falls_back_to_user_socket() {
        let stock = socket_candidates(Path::new(common::DEFAULT_SOCKET_PATH));
        assert_eq!(
            stock,
            vec![PathBuf::from(common::DEFAULT_SOCKET_PATH), PathBuf::from(common::USER_SOCKET_PATH)]
        );
        assert_eq!(socket_candidates(Path::new("/run/custom.sock")).len(), 1);
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("Nightly DB  dump!"), "nightly-db-dump");
        assert_eq!(slug("***"), "");
    }

    #[test]
    fn test_build_job_from_args() {
        let job = build_job(
            "Move WAVs".to_string(),
            None,
            JobType::FileMove,
            Some(PathBuf::from("/in")),
            Some(PathBuf::from("/out")),
            Some(".wav".to_string()),
            None,
            "weekly at 06:15",
            false,
        )
        .unwrap();
        assert_eq!(job.id, JobId::from("move-wavs"));
        assert_eq!(job.frequency, Frequency::Weekly);
        assert_eq!(job.schedule_time.unwrap().format("%H:%M").to_string(), "06:15");
        assert!(job.active);

        assert!(build_job("x".into(), None, JobType::FolderClean, None, None, None, None, "hourly", false).is_err());
    }

    #[test]
    fn test_history_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.csv");
        write_history_csv(&path, &[]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Started,Status,Duration"));
    }
}
