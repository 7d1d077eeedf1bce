//! Incremental file backup.
//!
//! Each run compares the source tree against the newest archive already in
//! the destination and packs only the files that archive does not contain.
//! With no prior archive (or one that cannot be read) everything matching
//! the extension filter is packed.

pub mod archive;
pub mod listing;
pub mod locate;
pub mod tool;

use super::fsutil::{relative_slash_path, walk_files};
use super::{ExecutionResult, ExecutorStrategy};
use crate::config::BackupConfig;
use anyhow::Context;
use chrono::Local;
use common::{format_size, Job};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tool::ToolLocator;

pub struct FileBackupExecutor {
    locator: ToolLocator,
}

impl FileBackupExecutor {
    pub fn new(config: BackupConfig) -> Self {
        Self::with_locator(ToolLocator::from_config(&config))
    }

    pub fn with_locator(locator: ToolLocator) -> Self {
        Self { locator }
    }
}

impl ExecutorStrategy for FileBackupExecutor {
    fn name(&self) -> &'static str {
        "file backup"
    }

    fn run(&self, job: &Job, result: &mut ExecutionResult) -> anyhow::Result<()> {
        let (source, destination) = match (job.source_path.as_deref(), job.destination_path.as_deref()) {
            (Some(s), Some(d)) => (s, d),
            (None, _) => {
                result.fail("Error: no source path was given");
                return Ok(());
            }
            (_, None) => {
                result.fail("Error: no destination path was given");
                return Ok(());
            }
        };
        if !source.is_dir() {
            result.fail(format!("Error: source path {} does not exist", source.display()));
            return Ok(());
        }
        if !destination.is_dir() {
            result.fail(format!(
                "Error: destination path {} does not exist",
                destination.display()
            ));
            return Ok(());
        }

        let tool = self.locator.discover();
        let prefix = job.archive_prefix();
        log::info!("Backing up {} with {}", source.display(), tool.describe());

        // relative name -> absolute path, sorted for a stable archive layout
        let mut files: BTreeMap<String, PathBuf> = BTreeMap::new();
        for path in walk_files(source).with_context(|| format!("reading {}", source.display()))? {
            let matches = path
                .file_name()
                .map(|n| job.matches_extension(&n.to_string_lossy()))
                .unwrap_or(false);
            if !matches {
                continue;
            }
            if let Some(rel) = relative_slash_path(source, &path) {
                files.insert(rel, path);
            }
        }
        if files.is_empty() {
            let msg = match job.extension_filter() {
                Some(ext) => format!("No files to back up matching {}", ext),
                None => "No files to back up".to_string(),
            };
            result.fail(msg);
            return Ok(());
        }

        let prior = locate::latest_archive(destination, &prefix)
            .with_context(|| format!("reading {}", destination.display()))?;
        let mut incremental = false;
        if let Some(prior) = &prior {
            match listing::list_entries(prior, &tool, &self.locator) {
                Ok(existing) => {
                    incremental = true;
                    let before = files.len();
                    files.retain(|rel, _| !existing.contains(rel));
                    log::info!(
                        "Prior archive {} holds {} of {} files",
                        prior.display(),
                        before - files.len(),
                        before
                    );
                }
                Err(e) => log::warn!(
                    "Cannot read prior archive {} ({:#}); doing a full backup",
                    prior.display(),
                    e
                ),
            }
        }

        if files.is_empty() {
            result.succeed("No new files; everything is already backed up", 0, 0);
            return Ok(());
        }

        let staging = tempfile::Builder::new()
            .prefix("backup_temp_")
            .tempdir()
            .context("creating staging directory")?;
        let mut original_bytes = 0u64;
        for (rel, path) in &files {
            let target = staging.path().join(rel);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            original_bytes += fs::copy(path, &target)
                .with_context(|| format!("staging {}", path.display()))?;
        }

        let archive_path = locate::next_archive_path(
            destination,
            &prefix,
            Local::now().naive_local(),
            tool.family().extension(),
        );
        if let Err(e) = archive::create_archive(&tool, staging.path(), &archive_path) {
            let _ = fs::remove_file(&archive_path);
            return Err(e);
        }
        if let Err(e) = staging.close() {
            log::warn!("Could not remove staging directory: {}", e);
        }

        let compressed = fs::metadata(&archive_path)?.len();
        let reduction = if original_bytes > 0 {
            (original_bytes as f64 - compressed as f64) / original_bytes as f64 * 100.0
        } else {
            0.0
        };
        let count = files.len() as u64;
        let archive_name = archive_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let message = format!(
            "{} backup of {} files to {}: {} -> {} ({:.1}% smaller)",
            if incremental { "Incremental" } else { "Full" },
            count,
            archive_name,
            format_size(original_bytes),
            format_size(compressed),
            reduction
        );
        log::info!("{}", message);
        result.succeed(message, count, compressed);
        Ok(())
    }
}
