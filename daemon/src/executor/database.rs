use super::fsutil::{find_in_dirs, search_path_dirs, timestamp_token};
use super::{ExecutionResult, ExecutorStrategy};
use crate::config::DatabaseConfig;
use anyhow::Context;
use chrono::Local;
use common::Job;
use std::path::{Path, PathBuf};
use std::process::Command;

const DUMP_TOOL_CANDIDATES: &[&str] = &[
    "/usr/bin/mysqldump",
    "/usr/local/bin/mysqldump",
    "/usr/bin/mariadb-dump",
    "/usr/bin/pg_dump",
    "/usr/local/bin/pg_dump",
    r"C:\xampp\mysql\bin\mysqldump.exe",
    r"C:\Program Files\MySQL\MySQL Server 8.0\bin\mysqldump.exe",
];

const DUMP_TOOL_NAMES: &[&str] = &[
    "mysqldump",
    "mariadb-dump",
    "pg_dump",
    "mysqldump.exe",
    "pg_dump.exe",
];

/// Dump tools that share a command-line convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpFamily {
    MySql,
    Postgres,
}

impl DumpFamily {
    pub fn detect(tool: &Path) -> Option<Self> {
        let stem = tool.file_stem()?.to_string_lossy().to_lowercase();
        match stem.as_str() {
            "mysqldump" | "mariadb-dump" => Some(DumpFamily::MySql),
            "pg_dump" => Some(DumpFamily::Postgres),
            _ => None,
        }
    }

    fn default_port(self) -> u16 {
        match self {
            DumpFamily::MySql => 3306,
            DumpFamily::Postgres => 5432,
        }
    }

    /// Connection, output and consistency flags for one dump.
    pub fn args(self, conn: &DatabaseConfig, database: &str, output: &Path) -> Vec<String> {
        let port = conn.port.unwrap_or_else(|| self.default_port()).to_string();
        let output = output.to_string_lossy().into_owned();
        match self {
            DumpFamily::MySql => {
                let mut args = vec![
                    "-h".to_string(), conn.host.clone(),
                    "-P".to_string(), port,
                    "-u".to_string(), conn.user.clone(),
                ];
                if let Some(pw) = conn.password.as_deref().filter(|p| !p.is_empty()) {
                    args.push(format!("-p{}", pw));
                }
                args.extend([
                    "--databases".to_string(), database.to_string(),
                    format!("--result-file={}", output),
                    "--single-transaction".to_string(),
                    "--quick".to_string(),
                    "--lock-tables=false".to_string(),
                ]);
                args
            }
            DumpFamily::Postgres => vec![
                "-h".to_string(), conn.host.clone(),
                "-p".to_string(), port,
                "-U".to_string(), conn.user.clone(),
                "--no-password".to_string(),
                "-f".to_string(), output,
                database.to_string(),
            ],
        }
    }

    /// Postgres takes the password from the environment, never argv.
    pub fn envs(self, conn: &DatabaseConfig) -> Vec<(String, String)> {
        match (self, conn.password.as_deref()) {
            (DumpFamily::Postgres, Some(pw)) if !pw.is_empty() => {
                vec![("PGPASSWORD".to_string(), pw.to_string())]
            }
            _ => Vec::new(),
        }
    }
}

pub struct DatabaseDumpExecutor {
    config: DatabaseConfig,
}

impl DatabaseDumpExecutor {
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }

    fn locate_tool(&self) -> Result<PathBuf, String> {
        if let Some(tool) = &self.config.dump_tool {
            return if tool.is_file() {
                Ok(tool.clone())
            } else {
                Err(format!("Error: dump tool not found at {}", tool.display()))
            };
        }
        DUMP_TOOL_CANDIDATES
            .iter()
            .map(PathBuf::from)
            .find(|p| p.is_file())
            .or_else(|| find_in_dirs(&search_path_dirs(), DUMP_TOOL_NAMES))
            .ok_or_else(|| "Error: no database dump tool (mysqldump, pg_dump) was found".to_string())
    }
}

impl ExecutorStrategy for DatabaseDumpExecutor {
    fn name(&self) -> &'static str {
        "database dump"
    }

    fn run(&self, job: &Job, result: &mut ExecutionResult) -> anyhow::Result<()> {
        let database = match job.database_name.as_deref().map(str::trim) {
            Some(db) if !db.is_empty() => db,
            _ => {
                result.fail("Error: no database name was given");
                return Ok(());
            }
        };
        let destination = match job.destination_path.as_deref() {
            Some(d) if d.is_dir() => d,
            _ => {
                result.fail("Error: destination path does not exist");
                return Ok(());
            }
        };
        let tool = match self.locate_tool() {
            Ok(t) => t,
            Err(msg) => {
                log::error!("{}", msg);
                result.fail(msg);
                return Ok(());
            }
        };
        let family = match DumpFamily::detect(&tool) {
            Some(f) => f,
            None => {
                result.fail(format!("Error: unrecognised dump tool {}", tool.display()));
                return Ok(());
            }
        };

        let file_name = format!(
            "{}_backup_{}.sql",
            database,
            timestamp_token(Local::now().naive_local())
        );
        let output_path = destination.join(&file_name);

        log::info!("Dumping database {} with {}", database, tool.display());
        let output = Command::new(&tool)
            .args(family.args(&self.config, database, &output_path))
            .envs(family.envs(&self.config))
            .output()
            .with_context(|| format!("starting {}", tool.display()))?;

        let captured = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        log::info!(target: "job_output", "Job: {}\n{}", job.name, captured);

        if !output.status.success() {
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            log::error!("Dump of {} failed with exit code {}", database, code);
            result.fail(format!(
                "Error running {} (exit code {}): {}",
                tool.display(),
                code,
                captured.trim()
            ));
            return Ok(());
        }

        let size = std::fs::metadata(&output_path).map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            log::error!("Dump file {} is empty or missing", output_path.display());
            result.fail(format!(
                "Error: dump file is empty or was not created: {}",
                captured.trim()
            ));
            return Ok(());
        }

        log::info!("Dump finished: {} ({})", file_name, common::format_size(size));
        result.succeed(
            format!("Database {} dumped to {} ({})", database, file_name, common::format_size(size)),
            1,
            size,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::JobType;

    fn dump_job(dest: &Path) -> Job {
        let mut job = Job::new("dump", "Shop dump", JobType::DatabaseDump);
        job.destination_path = Some(dest.to_path_buf());
        job.database_name = Some("shop".to_string());
        job
    }

    #[test]
    fn test_family_detection() {
        assert_eq!(DumpFamily::detect(Path::new("/usr/bin/mysqldump")), Some(DumpFamily::MySql));
        assert_eq!(DumpFamily::detect(Path::new(r"mariadb-dump")), Some(DumpFamily::MySql));
        assert_eq!(DumpFamily::detect(Path::new("/opt/pg/bin/pg_dump")), Some(DumpFamily::Postgres));
        assert_eq!(DumpFamily::detect(Path::new("/bin/tar")), None);
    }

    #[test]
    fn test_mysql_args() {
        let conn = DatabaseConfig { password: Some("pw".into()), ..Default::default() };
        let args = DumpFamily::MySql.args(&conn, "shop", Path::new("/tmp/out.sql"));
        assert_eq!(&args[..6], ["-h", "localhost", "-P", "3306", "-u", "root"]);
        assert!(args.contains(&"-ppw".to_string()));
        assert!(args.contains(&"--result-file=/tmp/out.sql".to_string()));
        assert!(args.contains(&"--single-transaction".to_string()));
        assert!(DumpFamily::MySql.envs(&conn).is_empty());
    }

    #[test]
    fn test_postgres_password_goes_to_env() {
        let conn = DatabaseConfig { password: Some("pw".into()), port: Some(6543), ..Default::default() };
        let args = DumpFamily::Postgres.args(&conn, "shop", Path::new("/tmp/out.sql"));
        assert!(!args.iter().any(|a| a.contains("pw")));
        assert!(args.contains(&"6543".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("shop"));
        assert_eq!(DumpFamily::Postgres.envs(&conn), vec![("PGPASSWORD".to_string(), "pw".to_string())]);
    }

    #[test]
    fn test_preconditions() {
        let dir = tempfile::tempdir().unwrap();
        let executor = DatabaseDumpExecutor::new(DatabaseConfig::default());

        let mut job = dump_job(dir.path());
        job.database_name = None;
        let result = executor.execute(&job);
        assert!(!result.success);
        assert!(result.message.contains("database name"));

        let job = dump_job(&dir.path().join("missing"));
        let result = executor.execute(&job);
        assert!(!result.success);
        assert!(result.message.contains("destination"));

        let executor = DatabaseDumpExecutor::new(DatabaseConfig {
            dump_tool: Some(dir.path().join("mysqldump")),
            ..Default::default()
        });
        let result = executor.execute(&dump_job(dir.path()));
        assert!(!result.success);
        assert!(result.message.contains("not found"));
        assert!(result.is_finished());
    }

    #[cfg(unix)]
    fn fake_tool(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let bin = dir.join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let path = bin.join("mysqldump");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn test_successful_dump() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir(&out).unwrap();
        let tool = fake_tool(
            dir.path(),
            r#"for arg in "$@"; do
  case "$arg" in
    --result-file=*) printf 'CREATE TABLE t (id int);\n' > "${arg#--result-file=}" ;;
  esac
done"#,
        );
        let executor = DatabaseDumpExecutor::new(DatabaseConfig { dump_tool: Some(tool), ..Default::default() });

        let result = executor.execute(&dump_job(&out));

        assert!(result.success, "{}", result.message);
        assert_eq!(result.item_count, 1);
        assert!(result.bytes > 0);
        let dumps: Vec<_> = std::fs::read_dir(&out).unwrap().collect();
        assert_eq!(dumps.len(), 1);
        let name = dumps[0].as_ref().unwrap().file_name().to_string_lossy().into_owned();
        assert!(name.starts_with("shop_backup_") && name.ends_with(".sql"), "{}", name);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_zero_exit_reports_output() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), "echo 'Access denied for user' >&2\nexit 2");
        let executor = DatabaseDumpExecutor::new(DatabaseConfig { dump_tool: Some(tool), ..Default::default() });

        let result = executor.execute(&dump_job(dir.path()));

        assert!(!result.success);
        assert!(result.message.contains("exit code 2"), "{}", result.message);
        assert!(result.message.contains("Access denied"));
    }

    #[cfg(unix)]
    #[test]
    fn test_zero_exit_without_output_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), "echo 'nothing to do'\nexit 0");
        let executor = DatabaseDumpExecutor::new(DatabaseConfig { dump_tool: Some(tool), ..Default::default() });

        let result = executor.execute(&dump_job(dir.path()));

        assert!(!result.success);
        assert!(result.message.contains("empty"), "{}", result.message);
    }
}
