use rusqlite::{params, Connection, Result};

const SCHEMA_VERSION: i32 = 2;

pub struct Migrator<'a> {
    conn: &'a mut Connection,
}

impl<'a> Migrator<'a> {
    pub fn new(conn: &'a mut Connection) -> Self {
        Self { conn }
    }

    pub fn run_migrations(&mut self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        let current_version = self.current_version()?;
        log::info!("Current database schema version: {}", current_version);

        if current_version < SCHEMA_VERSION {
            log::info!("Migrating database from version {} to {}", current_version, SCHEMA_VERSION);
            self.migrate_from(current_version)?;
        }

        Ok(())
    }

    pub fn current_version(&self) -> Result<i32> {
        let version: Option<i32> = self.conn.query_row(
            "SELECT MAX(version) FROM schema_version",
            [],
            |row| row.get(0),
        )?;
        Ok(version.unwrap_or(0))
    }

    fn migrate_from(&mut self, from_version: i32) -> Result<()> {
        let tx = self.conn.transaction()?;

        for version in (from_version + 1)..=SCHEMA_VERSION {
            log::info!("Applying migration to version {}", version);
            match version {
                1 => migrate_to_v1(&tx)?,
                2 => migrate_to_v2(&tx)?,
                _ => return Err(rusqlite::Error::InvalidQuery),
            }

            tx.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                params![version],
            )?;
        }

        tx.commit()
    }
}

fn migrate_to_v1(tx: &rusqlite::Transaction) -> Result<()> {
    tx.execute(
        "CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            job_type INTEGER NOT NULL,
            source_path TEXT,
            destination_path TEXT,
            file_extension TEXT,
            database_name TEXT,
            frequency INTEGER NOT NULL,
            schedule_time TEXT,
            active BOOLEAN NOT NULL DEFAULT 1
        )",
        [],
    )?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            job_id TEXT NOT NULL,
            job_name TEXT NOT NULL,
            job_type INTEGER NOT NULL,
            started_at TEXT NOT NULL,
            ended_at TEXT,
            duration TEXT,
            status INTEGER NOT NULL,
            message TEXT NOT NULL,
            item_count INTEGER NOT NULL DEFAULT 0,
            bytes INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    tx.execute(
        "CREATE INDEX IF NOT EXISTS idx_history_job_id ON history(job_id)",
        [],
    )?;

    Ok(())
}

fn migrate_to_v2(tx: &rusqlite::Transaction) -> Result<()> {
    // status lookup so history rows can be read without the daemon
    tx.execute(
        "CREATE TABLE IF NOT EXISTS execution_status (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;
    tx.execute(
        "INSERT OR IGNORE INTO execution_status (id, name) VALUES (1, 'success'), (2, 'failure')",
        [],
    )?;

    tx.execute(
        "CREATE INDEX IF NOT EXISTS idx_history_started_at ON history(started_at)",
        [],
    )?;

    Ok(())
}
