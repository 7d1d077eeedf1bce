//! Writing a staging directory out as a single archive.

use super::tool::{ArchiveTool, ExternalTool};
use crate::executor::fsutil::{relative_slash_path, walk_files};
use anyhow::{anyhow, bail, Context, Result};
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::Path;
use std::process::Command;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Packs everything under `staging` into `target`. Succeeds only when the
/// archive exists afterwards and is non-empty.
pub fn create_archive(tool: &ArchiveTool, staging: &Path, target: &Path) -> Result<()> {
    match tool {
        ArchiveTool::BuiltinZip => write_zip(staging, target)?,
        ArchiveTool::External(t) => {
            let writer = t.writer().ok_or_else(|| {
                anyhow!("{} can only extract and no archiving tool sits next to it", t.path.display())
            })?;
            run_external(&writer, staging, target)?;
        }
    }

    let size = fs::metadata(target).map(|m| m.len()).unwrap_or(0);
    if size == 0 {
        bail!("archive {} was not written", target.display());
    }
    Ok(())
}

fn write_zip(staging: &Path, target: &Path) -> Result<()> {
    let file = File::create(target).with_context(|| format!("creating {}", target.display()))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9))
        .large_file(true);

    for path in walk_files(staging)? {
        let Some(name) = relative_slash_path(staging, &path) else {
            continue;
        };
        zip.start_file(name, options)?;
        let mut reader = BufReader::new(File::open(&path)?);
        io::copy(&mut reader, &mut zip)?;
    }
    zip.finish()?;
    Ok(())
}

fn run_external(tool: &ExternalTool, staging: &Path, target: &Path) -> Result<()> {
    let Some(flags) = tool.kind.flags().create else {
        bail!("{} cannot create archives", tool.path.display());
    };
    let output = Command::new(&tool.path)
        .args(flags)
        .arg(target)
        .arg(staging.join("*"))
        .output()
        .with_context(|| format!("running {}", tool.path.display()))?;

    for line in String::from_utf8_lossy(&output.stdout).lines() {
        log::debug!(target: "job_output", "{}", line);
    }
    if !output.status.success() {
        bail!(
            "{} exited with {}: {}",
            tool.path.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::file_backup::listing::list_entries;
    use crate::executor::file_backup::tool::ToolLocator;

    #[test]
    fn test_builtin_zip_keeps_relative_layout() {
        let staging = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        fs::create_dir_all(staging.path().join("album")).unwrap();
        fs::write(staging.path().join("album/track01.wav"), vec![7u8; 4096]).unwrap();
        fs::write(staging.path().join("intro.wav"), b"intro").unwrap();

        let target = out.path().join("Music_backup_20240517_090000.zip");
        create_archive(&ArchiveTool::BuiltinZip, staging.path(), &target).unwrap();

        assert!(fs::metadata(&target).unwrap().len() > 0);
        let mut entries: Vec<String> =
            list_entries(&target, &ArchiveTool::BuiltinZip, &ToolLocator::builtin_only())
                .unwrap()
                .into_iter()
                .collect();
        entries.sort();
        assert_eq!(entries, vec!["album/track01.wav", "intro.wav"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_external_tool_that_writes_nothing_fails() {
        use std::os::unix::fs::PermissionsExt;

        let bin = tempfile::tempdir().unwrap();
        let fake = bin.path().join("7z");
        fs::write(&fake, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(&fake, fs::Permissions::from_mode(0o755)).unwrap();

        let staging = tempfile::tempdir().unwrap();
        fs::write(staging.path().join("a.wav"), b"a").unwrap();
        let target = staging.path().join("out.7z");
        let tool = ArchiveTool::External(ExternalTool::from_path(fake).unwrap());

        let err = create_archive(&tool, staging.path(), &target).unwrap_err();
        assert!(err.to_string().contains("was not written"));
    }

    #[cfg(unix)]
    #[test]
    fn test_external_tool_failure_exit_is_reported() {
        use std::os::unix::fs::PermissionsExt;

        let bin = tempfile::tempdir().unwrap();
        let fake = bin.path().join("rar");
        fs::write(&fake, "#!/bin/sh\necho boom >&2\nexit 3\n").unwrap();
        fs::set_permissions(&fake, fs::Permissions::from_mode(0o755)).unwrap();

        let staging = tempfile::tempdir().unwrap();
        let target = bin.path().join("out.rar");
        let tool = ArchiveTool::External(ExternalTool::from_path(fake).unwrap());

        let err = create_archive(&tool, staging.path(), &target).unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
