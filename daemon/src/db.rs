use crate::migrations::Migrator;
use crate::store::{HistoryStore, JobStore, RejectedJob};
use anyhow::{anyhow, Context};
use chrono::{NaiveDateTime, NaiveTime};
use common::{
    format_duration, CodeError, ExecutionStatus, Frequency, HistoryRecord, HistoryStats, Job,
    JobId, JobType, NewHistoryRecord,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

const JOB_COLUMNS: &str = "id, name, job_type, source_path, destination_path, file_extension, \
                           database_name, frequency, schedule_time, active";
const HISTORY_COLUMNS: &str = "id, run_id, job_id, job_name, job_type, started_at, ended_at, \
                               duration, status, message, item_count, bytes, created_at";

/// SQLite-backed job and history store.
pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path).with_context(|| format!("opening {}", path.display()))?;
        Self::with_connection(conn)
    }

    /// Opens `path`, or `fallback` when `path` cannot be opened (the stock
    /// system location is usually not writable for an unprivileged user).
    pub fn open_with_fallback(path: &Path, fallback: &Path) -> anyhow::Result<Self> {
        match Self::open(path) {
            Ok(db) => Ok(db),
            Err(e) => {
                log::warn!("Cannot open {} ({:#}), using {}", path.display(), e, fallback.display());
                Self::open(fallback)
            }
        }
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(mut conn: Connection) -> anyhow::Result<Self> {
        Migrator::new(&mut conn)
            .run_migrations()
            .context("running database migrations")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("database lock poisoned"))
    }
}

fn code_error(idx: usize, e: CodeError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e))
}

fn path_column(value: Option<String>) -> Option<PathBuf> {
    value.map(PathBuf::from)
}

fn decode_job(row: &Row) -> rusqlite::Result<Result<Job, RejectedJob>> {
    let id = JobId(row.get(0)?);
    let name: String = row.get(1)?;
    let job_type_code: i64 = row.get(2)?;
    let frequency_code: i64 = row.get(7)?;
    let codes = JobType::try_from(job_type_code)
        .and_then(|job_type| Frequency::try_from(frequency_code).map(|f| (job_type, f)));
    let (job_type, frequency) = match codes {
        Ok(codes) => codes,
        Err(error) => return Ok(Err(RejectedJob { id, name, job_type_code, error })),
    };
    Ok(Ok(Job {
        id,
        name,
        job_type,
        source_path: path_column(row.get(3)?),
        destination_path: path_column(row.get(4)?),
        file_extension: row.get(5)?,
        database_name: row.get(6)?,
        frequency,
        schedule_time: row.get::<_, Option<NaiveTime>>(8)?,
        active: row.get(9)?,
    }))
}

fn job_from_row(row: &Row) -> rusqlite::Result<Job> {
    decode_job(row)?.map_err(|rejected| {
        let idx = match rejected.error {
            CodeError::UnknownFrequency(_) => 7,
            _ => 2,
        };
        code_error(idx, rejected.error)
    })
}

fn history_from_row(row: &Row) -> rusqlite::Result<HistoryRecord> {
    let run_id: String = row.get(1)?;
    let run_id = Uuid::parse_str(&run_id)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;
    let job_type = JobType::try_from(row.get::<_, i64>(4)?).map_err(|e| code_error(4, e))?;
    let status_code: i64 = row.get(8)?;
    let status = ExecutionStatus::from_code(status_code)
        .ok_or_else(|| code_error(8, CodeError::UnknownStatus(status_code)))?;
    Ok(HistoryRecord {
        id: row.get(0)?,
        run_id,
        job_id: JobId(row.get(2)?),
        job_name: row.get(3)?,
        job_type,
        started_at: row.get(5)?,
        ended_at: row.get(6)?,
        duration: row.get(7)?,
        status,
        message: row.get(9)?,
        item_count: row.get::<_, i64>(10)?.max(0) as u64,
        bytes: row.get::<_, i64>(11)?.max(0) as u64,
        created_at: row.get(12)?,
    })
}

impl JobStore for Db {
    fn active_jobs(&self) -> anyhow::Result<Vec<Result<Job, RejectedJob>>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM jobs WHERE active = 1 ORDER BY id",
            JOB_COLUMNS
        ))?;
        let rows = stmt.query_map([], decode_job)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn get_job(&self, id: &JobId) -> anyhow::Result<Option<Job>> {
        let conn = self.conn()?;
        let job = conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
                params![id.0],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    fn list_jobs(&self) -> anyhow::Result<Vec<Job>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM jobs ORDER BY id", JOB_COLUMNS))?;
        let rows = stmt.query_map([], decode_job)?.collect::<rusqlite::Result<Vec<_>>>()?;
        let jobs = rows
            .into_iter()
            .filter_map(|row| match row {
                Ok(job) => Some(job),
                Err(rejected) => {
                    log::warn!("Skipping job {} ({}): {}", rejected.name, rejected.id, rejected.error);
                    None
                }
            })
            .collect();
        Ok(jobs)
    }

    fn save_job(&self, job: &Job) -> anyhow::Result<()> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO jobs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                JOB_COLUMNS
            ),
            params![
                job.id.0,
                job.name,
                job.job_type.code(),
                job.source_path.as_ref().map(|p| p.to_string_lossy().into_owned()),
                job.destination_path.as_ref().map(|p| p.to_string_lossy().into_owned()),
                job.file_extension,
                job.database_name,
                job.frequency.code(),
                job.schedule_time,
                job.active,
            ],
        )?;
        Ok(())
    }

    fn remove_job(&self, id: &JobId) -> anyhow::Result<bool> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM jobs WHERE id = ?1", params![id.0])?;
        Ok(removed > 0)
    }
}

impl HistoryStore for Db {
    fn append(&self, record: NewHistoryRecord) -> anyhow::Result<HistoryRecord> {
        let created_at = chrono::Local::now().naive_local();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO history (run_id, job_id, job_name, job_type, started_at, ended_at,
                                  duration, status, message, item_count, bytes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                record.run_id.to_string(),
                record.job_id.0,
                record.job_name,
                record.job_type.code(),
                record.started_at,
                record.ended_at,
                record.duration,
                record.status.code(),
                record.message,
                record.item_count as i64,
                record.bytes as i64,
                created_at,
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(HistoryRecord::from_new(id, record, created_at))
    }

    fn history_for_job(&self, id: &JobId, limit: u32) -> anyhow::Result<Vec<HistoryRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM history WHERE job_id = ?1 ORDER BY started_at DESC, id DESC LIMIT ?2",
            HISTORY_COLUMNS
        ))?;
        let records = stmt
            .query_map(params![id.0, limit], history_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn stats(&self, now: NaiveDateTime) -> anyhow::Result<HistoryStats> {
        let day_start = now.date().and_time(NaiveTime::MIN);
        let success = ExecutionStatus::Success.code();
        let conn = self.conn()?;

        let (total_runs, successes, failures): (i64, i64, i64) = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(status = ?1), 0),
                    COALESCE(SUM(status = ?2), 0)
             FROM history",
            params![success, ExecutionStatus::Failure.code()],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )?;

        let (completed_today, items_moved_today, bytes_today): (i64, i64, i64) = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN job_type = ?3 THEN item_count ELSE 0 END), 0),
                    COALESCE(SUM(bytes), 0)
             FROM history WHERE status = ?1 AND started_at >= ?2",
            params![success, day_start, JobType::FileMove.code()],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )?;

        let mut runs_today_by_type = std::collections::BTreeMap::new();
        {
            let mut stmt = conn.prepare(
                "SELECT job_type, COUNT(*) FROM history WHERE started_at >= ?1 GROUP BY job_type",
            )?;
            let rows = stmt.query_map(params![day_start], |r| {
                Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (code, count) = row?;
                let label = JobType::try_from(code)
                    .map(|t| t.description().to_string())
                    .unwrap_or_else(|_| format!("type {}", code));
                runs_today_by_type.insert(label, count.max(0) as u64);
            }
        }

        let average_secs: Option<f64> = conn.query_row(
            "SELECT AVG((julianday(ended_at) - julianday(started_at)) * 86400.0)
             FROM history WHERE status = ?1 AND ended_at IS NOT NULL",
            params![success],
            |r| r.get(0),
        )?;

        let active_jobs: i64 =
            conn.query_row("SELECT COUNT(*) FROM jobs WHERE active = 1", [], |r| r.get(0))?;

        Ok(HistoryStats {
            total_runs: total_runs as u64,
            successes: successes as u64,
            failures: failures as u64,
            completed_today: completed_today as u64,
            runs_today_by_type,
            items_moved_today: items_moved_today as u64,
            bytes_today: bytes_today as u64,
            average_duration: format_duration(average_secs.unwrap_or(0.0).round() as i64),
            active_jobs: active_jobs as u64,
            next_execution: None,
        })
    }
}
