use crate::job::{Frequency, Job, JobType};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Checks a job definition before it is stored. Returns every problem
/// found, at most one per field (the first one wins).
pub fn validate(job: &Job) -> Vec<ValidationError> {
    let mut errors: Vec<ValidationError> = Vec::new();
    let mut push = |field: &'static str, message: String| {
        if !errors.iter().any(|e| e.field == field) {
            errors.push(ValidationError { field, message });
        }
    };

    let name = job.name.trim();
    if name.is_empty() {
        push("name", "Name is required".to_string());
    } else if !(3..=100).contains(&name.chars().count()) {
        push("name", "Name must be between 3 and 100 characters".to_string());
    }

    let source = non_blank(job.source_path.as_deref());
    let destination = non_blank(job.destination_path.as_deref());

    match job.job_type {
        JobType::DatabaseDump => {
            if destination.is_none() {
                push("destination_path", "Destination is required for database dumps".to_string());
            }
            if job.database_name.as_deref().map(str::trim).unwrap_or("").is_empty() {
                push("database_name", "Database name is required".to_string());
            }
        }
        JobType::FileBackup | JobType::FileMove => {
            if source.is_none() {
                push("source_path", "Source path is required".to_string());
            }
            if destination.is_none() {
                push("destination_path", "Destination path is required".to_string());
            }
        }
        JobType::FolderClean => {
            if source.is_none() {
                push("source_path", "Folder to clean is required".to_string());
            }
        }
    }

    if let Some(src) = source {
        if !src.exists() {
            push("source_path", "Source path does not exist".to_string());
        } else if !src.is_dir() {
            push("source_path", "Source path must be a folder".to_string());
        } else if std::fs::read_dir(src).is_err() {
            push("source_path", "Source path is not readable".to_string());
        }
    }

    if let Some(dst) = destination {
        if !dst.exists() {
            push("destination_path", "Destination path does not exist".to_string());
        } else if !dst.is_dir() {
            push("destination_path", "Destination path must be a folder".to_string());
        } else if std::fs::metadata(dst).map(|m| m.permissions().readonly()).unwrap_or(true) {
            push("destination_path", "Destination path is not writable".to_string());
        }
    }

    if let (Some(src), Some(dst)) = (source, destination) {
        if src == dst {
            push("destination_path", "Destination cannot be the same as the source".to_string());
        } else if dst.starts_with(src) {
            push("destination_path", "Destination cannot be inside the source folder".to_string());
        }
    }

    if let Some(ext) = job.extension_filter() {
        if !ext.starts_with('.') {
            push("file_extension", "Extension must start with a dot (e.g. .txt)".to_string());
        } else if ext.len() < 2 {
            push("file_extension", "Extension needs at least one character after the dot".to_string());
        } else if !ext[1..].chars().all(|c| c.is_ascii_alphanumeric()) {
            push("file_extension", "Extension may only contain letters and digits".to_string());
        }
    }

    if job.frequency != Frequency::Manual && job.schedule_time.is_none() {
        push("schedule_time", "A time of day is required for scheduled jobs".to_string());
    }

    errors
}

fn non_blank(path: Option<&Path>) -> Option<&Path> {
    path.filter(|p| !p.as_os_str().is_empty())
}
