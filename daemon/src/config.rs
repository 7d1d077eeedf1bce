use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use std::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_jobs: u32,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
    /// IANA name such as "America/Lima". Local time when unset.
    #[serde(default)]
    pub timezone: Option<String>,
}

fn default_tick_interval() -> u64 { 60 }
fn default_max_concurrent() -> u32 { 4 }
fn default_db_path() -> PathBuf { PathBuf::from(common::DEFAULT_DB_PATH) }
fn default_socket_path() -> PathBuf { PathBuf::from(common::DEFAULT_SOCKET_PATH) }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            max_concurrent_jobs: default_max_concurrent(),
            db_path: default_db_path(),
            socket_path: default_socket_path(),
            timezone: None,
        }
    }
}

impl ServerConfig {
    pub fn timezone(&self) -> Result<Option<chrono_tz::Tz>> {
        match &self.timezone {
            None => Ok(None),
            Some(name) => name
                .parse::<chrono_tz::Tz>()
                .map(Some)
                .map_err(|e| anyhow::anyhow!("Invalid timezone {:?}: {}", name, e)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub jobs_file: Option<PathBuf>,
}

fn default_log_level() -> String { "info".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            jobs_file: None,
        }
    }
}

/// Connection settings for the dump tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Explicit dump executable. Searched for when unset.
    #[serde(default)]
    pub dump_tool: Option<PathBuf>,
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_db_user")]
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_db_host() -> String { "localhost".to_string() }
fn default_db_user() -> String { "root".to_string() }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dump_tool: None,
            host: default_db_host(),
            port: None,
            user: default_db_user(),
            password: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Probed before the built-in install locations.
    #[serde(default)]
    pub extra_tool_paths: Vec<PathBuf>,
    #[serde(default = "default_search_path")]
    pub search_path: bool,
    /// Skip external archivers and always write zip.
    #[serde(default)]
    pub builtin_only: bool,
}

fn default_search_path() -> bool { true }

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            extra_tool_paths: Vec::new(),
            search_path: default_search_path(),
            builtin_only: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub only_failures: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub webhooks: Vec<WebhookConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    /// Upserted into the job store at start-up.
    #[serde(default)]
    pub jobs: Vec<common::Job>,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    /// Detect file type by extension and load
    pub fn from_file(path: &Path) -> Result<Self> {
        let ext = path.extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        match ext {
            "yaml" | "yml" => Self::from_yaml_file(path),
            "toml" => Self::from_toml_file(path),
            _ => Err(anyhow::anyhow!("Unsupported config file format. Use .yaml, .yml, or .toml")),
        }
    }

    /// An explicit path must load. Without one, the default path is used if
    /// present, otherwise built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => {
                let default = Path::new(common::DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::from_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Frequency, JobType};

    #[test]
    fn test_yaml_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, r#"
server:
  max_concurrent_jobs: 2
  timezone: America/Lima
database:
  dump_tool: /usr/bin/mysqldump
  password: secret
jobs:
  - id: nightly
    name: Nightly dump
    job_type: DatabaseDump
    destination_path: /srv/dumps
    database_name: shop
    frequency: Daily
    schedule_time: "02:30:00"
"#).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.server.tick_interval_secs, 60);
        assert_eq!(config.server.max_concurrent_jobs, 2);
        assert!(config.server.timezone().unwrap().is_some());
        assert_eq!(config.database.host, "localhost");
        assert_eq!(config.database.password.as_deref(), Some("secret"));
        assert!(config.backup.search_path);
        assert_eq!(config.jobs.len(), 1);
        assert_eq!(config.jobs[0].job_type, JobType::DatabaseDump);
        assert_eq!(config.jobs[0].frequency, Frequency::Daily);
        assert!(config.jobs[0].active);
    }

    #[test]
    fn test_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, r#"
[backup]
builtin_only = true

[[notifications.webhooks]]
url = "http://localhost:9000/hook"
only_failures = true
"#).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert!(config.backup.builtin_only);
        assert_eq!(config.notifications.webhooks.len(), 1);
        assert!(config.notifications.webhooks[0].only_failures);
    }

    #[test]
    fn test_bad_extension_and_timezone() {
        assert!(Config::from_file(Path::new("config.ini")).is_err());
        let server = ServerConfig { timezone: Some("Mars/Olympus".into()), ..Default::default() };
        assert!(server.timezone().is_err());
    }
}
