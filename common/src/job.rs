use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct JobId(pub String);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        JobId(s.to_string())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodeError {
    #[error("unknown job type code: {0}")]
    UnknownJobType(i64),
    #[error("unknown frequency code: {0}")]
    UnknownFrequency(i64),
    #[error("unknown execution status code: {0}")]
    UnknownStatus(i64),
}

/// What a job does. The integer codes are what the history store persists.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobType {
    DatabaseDump,
    FileBackup,
    FileMove,
    FolderClean,
}

impl JobType {
    pub const ALL: [JobType; 4] = [
        JobType::DatabaseDump,
        JobType::FileBackup,
        JobType::FileMove,
        JobType::FolderClean,
    ];

    pub fn code(self) -> i64 {
        match self {
            JobType::DatabaseDump => 1,
            JobType::FileBackup => 2,
            JobType::FileMove => 3,
            JobType::FolderClean => 4,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            JobType::DatabaseDump => "Database dump",
            JobType::FileBackup => "File backup",
            JobType::FileMove => "File move",
            JobType::FolderClean => "Folder clean",
        }
    }
}

impl TryFrom<i64> for JobType {
    type Error = CodeError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(JobType::DatabaseDump),
            2 => Ok(JobType::FileBackup),
            3 => Ok(JobType::FileMove),
            4 => Ok(JobType::FolderClean),
            other => Err(CodeError::UnknownJobType(other)),
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Frequency {
    Manual,
    Daily,
    /// Runs on Mondays only.
    Weekly,
}

impl Frequency {
    pub fn code(self) -> i64 {
        match self {
            Frequency::Manual => 1,
            Frequency::Daily => 2,
            Frequency::Weekly => 3,
        }
    }
}

impl TryFrom<i64> for Frequency {
    type Error = CodeError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Frequency::Manual),
            2 => Ok(Frequency::Daily),
            3 => Ok(Frequency::Weekly),
            other => Err(CodeError::UnknownFrequency(other)),
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Frequency::Manual => write!(f, "manual"),
            Frequency::Daily => write!(f, "daily"),
            Frequency::Weekly => write!(f, "weekly (Mon)"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub job_type: JobType,
    #[serde(default)]
    pub source_path: Option<PathBuf>,
    #[serde(default)]
    pub destination_path: Option<PathBuf>,
    /// Case-insensitive suffix filter, e.g. ".wav".
    #[serde(default)]
    pub file_extension: Option<String>,
    #[serde(default)]
    pub database_name: Option<String>,
    pub frequency: Frequency,
    #[serde(default)]
    pub schedule_time: Option<NaiveTime>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Job {
    pub fn new(id: impl Into<String>, name: impl Into<String>, job_type: JobType) -> Self {
        Self {
            id: JobId(id.into()),
            name: name.into(),
            job_type,
            source_path: None,
            destination_path: None,
            file_extension: None,
            database_name: None,
            frequency: Frequency::Manual,
            schedule_time: None,
            active: true,
        }
    }

    /// Job name with every character outside `[A-Za-z0-9]` replaced by `_`.
    /// Used as the file name prefix of the job's archives.
    pub fn archive_prefix(&self) -> String {
        self.name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }

    /// The extension filter, if one is set and non-blank.
    pub fn extension_filter(&self) -> Option<&str> {
        self.file_extension
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }

    /// Case-insensitive suffix match against the extension filter.
    pub fn matches_extension(&self, file_name: &str) -> bool {
        match self.extension_filter() {
            Some(ext) => file_name.to_lowercase().ends_with(&ext.to_lowercase()),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip_and_reject_unknown() {
        for t in JobType::ALL {
            assert_eq!(JobType::try_from(t.code()), Ok(t));
        }
        assert_eq!(JobType::try_from(9), Err(CodeError::UnknownJobType(9)));
        assert_eq!(Frequency::try_from(0), Err(CodeError::UnknownFrequency(0)));
    }

    #[test]
    fn test_archive_prefix() {
        let job = Job::new("a", "Audios del día #2", JobType::FileBackup);
        assert_eq!(job.archive_prefix(), "Audios_del_d_a__2");
    }

    #[test]
    fn test_extension_filter_is_case_insensitive() {
        let mut job = Job::new("a", "a", JobType::FileMove);
        assert!(job.matches_extension("anything.bin"));

        job.file_extension = Some(".WAV".to_string());
        assert!(job.matches_extension("call.wav"));
        assert!(job.matches_extension("CALL.Wav"));
        assert!(!job.matches_extension("call.mp3"));

        job.file_extension = Some("  ".to_string());
        assert!(job.matches_extension("call.mp3"));
    }
}
