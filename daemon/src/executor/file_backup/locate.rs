//! Naming of new archives and lookup of the most recent prior one.

use crate::executor::fsutil::timestamp_token;
use chrono::NaiveDateTime;
use regex::Regex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::SystemTime;

pub const ARCHIVE_EXTENSIONS: [&str; 3] = ["zip", "rar", "7z"];

fn timestamp_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{8}_\d{6})").expect("static regex"))
}

pub fn archive_file_name(prefix: &str, now: NaiveDateTime, extension: &str) -> String {
    format!("{}_backup_{}.{}", prefix, timestamp_token(now), extension)
}

/// Path for a new archive in `dir`. A name already taken gets `_1`, `_2`, ...
/// before the extension.
pub fn next_archive_path(dir: &Path, prefix: &str, now: NaiveDateTime, extension: &str) -> PathBuf {
    let first = dir.join(archive_file_name(prefix, now, extension));
    if !first.exists() {
        return first;
    }
    let stem = format!("{}_backup_{}", prefix, timestamp_token(now));
    (1u32..)
        .map(|n| dir.join(format!("{}_{}.{}", stem, n, extension)))
        .find(|p| !p.exists())
        .unwrap_or(first)
}

fn is_archive_of(name: &str, prefix: &str) -> bool {
    let lower = name.to_lowercase();
    let wanted = format!("{}_backup_", prefix.to_lowercase());
    lower.starts_with(&wanted)
        && ARCHIVE_EXTENSIONS
            .iter()
            .any(|ext| lower.ends_with(&format!(".{}", ext)))
}

struct Candidate {
    path: PathBuf,
    token: Option<String>,
    modified: SystemTime,
}

/// The newest archive written for `prefix` in `dir`, if any. Archives are
/// ordered by the timestamp in their name; when either side lacks one the
/// modification time decides.
pub fn latest_archive(dir: &Path, prefix: &str) -> io::Result<Option<PathBuf>> {
    let mut candidates = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !entry.file_type()?.is_file() || !is_archive_of(&name, prefix) {
            continue;
        }
        let token = timestamp_regex()
            .captures(&name)
            .map(|c| c[1].to_string());
        let modified = entry.metadata()?.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        candidates.push(Candidate { path: entry.path(), token, modified });
    }

    let latest = candidates.into_iter().max_by(|a, b| {
        let by_time = a.modified.cmp(&b.modified);
        let ordering = match (&a.token, &b.token) {
            (Some(ta), Some(tb)) => ta.cmp(tb).then(by_time),
            _ => by_time,
        };
        ordering.then_with(|| a.path.cmp(&b.path))
    });
    Ok(latest.map(|c| c.path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::time::Duration;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 17).unwrap().and_hms_opt(h, m, s).unwrap()
    }

    fn write_with_mtime(path: &Path, secs: u64) {
        fs::write(path, b"x").unwrap();
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs)).unwrap();
    }

    #[test]
    fn test_archive_name_format() {
        assert_eq!(
            archive_file_name("Music", at(9, 5, 3), "zip"),
            "Music_backup_20240517_090503.zip"
        );
    }

    #[test]
    fn test_collision_gets_numbered_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let first = next_archive_path(dir.path(), "Music", at(9, 0, 0), "7z");
        fs::write(&first, b"x").unwrap();
        let second = next_archive_path(dir.path(), "Music", at(9, 0, 0), "7z");
        assert_eq!(second.file_name().unwrap(), "Music_backup_20240517_090000_1.7z");
    }

    #[test]
    fn test_latest_by_timestamp_token_not_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let older = dir.path().join("Music_backup_20240101_000000.zip");
        let newer = dir.path().join("Music_backup_20240301_000000.rar");
        write_with_mtime(&older, 2_000_000_000);
        write_with_mtime(&newer, 1_000_000_000);

        assert_eq!(latest_archive(dir.path(), "Music").unwrap(), Some(newer));
    }

    #[test]
    fn test_latest_falls_back_to_mtime_without_token() {
        let dir = tempfile::tempdir().unwrap();
        let tokened = dir.path().join("Music_backup_20240101_000000.zip");
        let renamed = dir.path().join("music_BACKUP_latest.7z");
        write_with_mtime(&tokened, 1_000_000_000);
        write_with_mtime(&renamed, 2_000_000_000);

        assert_eq!(latest_archive(dir.path(), "Music").unwrap(), Some(renamed));
    }

    #[test]
    fn test_other_prefixes_and_extensions_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Musical_backup_20240101_000000.zip"), b"x").unwrap();
        fs::write(dir.path().join("Music_backup_20240101_000000.tar"), b"x").unwrap();
        fs::write(dir.path().join("Music_20240101_000000.zip"), b"x").unwrap();
        fs::create_dir(dir.path().join("Music_backup_dir.zip")).unwrap();

        assert_eq!(latest_archive(dir.path(), "Music").unwrap(), None);
    }
}
