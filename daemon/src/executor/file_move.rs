use super::fsutil::walk_files;
use super::{ExecutionResult, ExecutorStrategy};
use anyhow::Context;
use common::Job;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Moves matching files from anywhere under the source into the
/// destination folder, renaming on collision.
pub struct FileMoveExecutor;

impl ExecutorStrategy for FileMoveExecutor {
    fn name(&self) -> &'static str {
        "file move"
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
        if !source.exists() {
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

        log::info!("Moving files for job {}", job.name);

        let mut moved = 0u64;
        let mut bytes = 0u64;
        let files = walk_files(source).with_context(|| format!("reading {}", source.display()))?;
        for file in files {
            let file_name = match file.file_name() {
                Some(n) => n.to_string_lossy().into_owned(),
                None => continue,
            };
            if !job.matches_extension(&file_name) {
                log::debug!("Skipping {} (extension does not match)", file.display());
                continue;
            }

            let size = fs::metadata(&file).map(|m| m.len()).unwrap_or(0);
            let target = free_target(destination, &file_name);
            move_file(&file, &target)
                .with_context(|| format!("moving {} to {}", file.display(), target.display()))?;

            moved += 1;
            bytes += size;
            log::debug!("Moved {} -> {}", file.display(), target.display());
        }

        log::info!("File move finished: {} files moved", moved);
        result.succeed(
            format!("Moved {} files ({})", moved, common::format_size(bytes)),
            moved,
            bytes,
        );
        Ok(())
    }
}

/// `dir/name`, or `dir/stem_1.ext`, `dir/stem_2.ext`, ... for the first one
/// that does not exist yet.
pub fn free_target(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match file_name.rfind('.') {
        Some(idx) => (&file_name[..idx], &file_name[idx..]),
        None => (file_name, ""),
    };
    let mut counter = 1u32;
    loop {
        let candidate = dir.join(format!("{}_{}{}", stem, counter, ext));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Rename, falling back to copy and delete when the two paths are on
/// different filesystems.
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}
