use super::{ExecutionResult, ExecutorStrategy};
use anyhow::Context;
use common::Job;
use std::fs;
use std::path::Path;

/// Empties a folder: every file, then every sub-folder, bottom-up.
/// The folder itself stays.
pub struct FolderCleanExecutor;

#[derive(Default)]
struct CleanStats {
    files: u64,
    bytes: u64,
}

impl ExecutorStrategy for FolderCleanExecutor {
    fn name(&self) -> &'static str {
        "folder clean"
    }

    fn run(&self, job: &Job, result: &mut ExecutionResult) -> anyhow::Result<()> {
        let folder = match job.source_path.as_deref() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => {
                result.fail("Error: no folder to clean was given");
                return Ok(());
            }
        };
        if !folder.exists() {
            result.fail(format!("Error: folder {} does not exist", folder.display()));
            return Ok(());
        }
        if !folder.is_dir() {
            result.fail(format!("Error: {} is not a folder", folder.display()));
            return Ok(());
        }

        log::info!("Cleaning folder {} for job {}", folder.display(), job.name);

        let mut stats = CleanStats::default();
        clean_children(folder, &mut stats)
            .with_context(|| format!("cleaning {}", folder.display()))?;

        log::info!(
            "Folder clean finished: {} files, {} freed",
            stats.files,
            common::format_size(stats.bytes)
        );
        result.succeed(
            format!(
                "Deleted {} files ({} freed)",
                stats.files,
                common::format_size(stats.bytes)
            ),
            stats.files,
            stats.bytes,
        );
        Ok(())
    }
}

fn clean_children(dir: &Path, stats: &mut CleanStats) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            clean_children(&path, stats)?;
            fs::remove_dir(&path)?;
        } else {
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            fs::remove_file(&path)?;
            stats.files += 1;
            stats.bytes += size;
            log::debug!("Deleted {}", path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::JobType;

    fn clean_job(path: &Path) -> Job {
        let mut job = Job::new("clean", "Clean temp", JobType::FolderClean);
        job.source_path = Some(path.to_path_buf());
        job
    }

    #[test]
    fn test_empty_folder_is_a_successful_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let result = FolderCleanExecutor.execute(&clean_job(dir.path()));

        assert!(result.success);
        assert_eq!(result.status.code(), 1);
        assert_eq!(result.item_count, 0);
        assert_eq!(result.bytes, 0);
        assert!(dir.path().is_dir());
        assert!(result.is_finished());
    }

    #[test]
    fn test_deletes_nested_tree_but_keeps_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("top.log"), vec![0u8; 10]).unwrap();
        fs::write(dir.path().join("a/mid.log"), vec![0u8; 20]).unwrap();
        fs::write(dir.path().join("a/b/deep.log"), vec![0u8; 30]).unwrap();

        let result = FolderCleanExecutor.execute(&clean_job(dir.path()));

        assert!(result.success, "{}", result.message);
        assert_eq!(result.item_count, 3);
        assert_eq!(result.bytes, 60);
        assert!(dir.path().is_dir());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_folder_fails_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = FolderCleanExecutor.execute(&clean_job(&dir.path().join("nope")));
        assert!(!result.success);
        assert_eq!(result.status.code(), 2);
        assert!(result.message.contains("does not exist"));
        assert!(result.is_finished());
    }
}
