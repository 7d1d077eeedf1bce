//! Reading the entry names of an existing archive.
//!
//! The format is taken from the archive's extension, not from the tool that
//! is about to write the next one. Names come back with `/` separators.

use super::tool::{ArchiveTool, ExternalTool, ToolFamily, ToolLocator};
use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;

pub fn list_entries(
    archive: &Path,
    selected: &ArchiveTool,
    locator: &ToolLocator,
) -> Result<HashSet<String>> {
    let family = archive
        .extension()
        .and_then(|e| e.to_str())
        .and_then(ToolFamily::from_extension)
        .ok_or_else(|| anyhow!("{} is not a known archive format", archive.display()))?;

    match family {
        ToolFamily::Zip => list_zip(archive),
        ToolFamily::SevenZip | ToolFamily::Rar => {
            let tool = match selected {
                ArchiveTool::External(t) if t.kind.family() == family => Some(t.clone()),
                _ => locator.find_family(family),
            }
            .ok_or_else(|| anyhow!("no tool available to read .{} archives", family.extension()))?;
            let lister = tool.lister();
            let output = run_list(&lister, archive)?;
            Ok(match family {
                ToolFamily::SevenZip => parse_7z_listing(&output),
                _ => parse_rar_listing(&output),
            })
        }
    }
}

fn list_zip(archive: &Path) -> Result<HashSet<String>> {
    let file = File::open(archive).with_context(|| format!("opening {}", archive.display()))?;
    let zip = zip::ZipArchive::new(file).with_context(|| format!("reading {}", archive.display()))?;
    Ok(zip
        .file_names()
        .filter(|name| !name.ends_with('/'))
        .map(|name| name.replace('\\', "/"))
        .collect())
}

fn run_list(tool: &ExternalTool, archive: &Path) -> Result<String> {
    let output = Command::new(&tool.path)
        .args(tool.kind.flags().list)
        .arg(archive)
        .output()
        .with_context(|| format!("running {}", tool.path.display()))?;
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.status.success() {
        bail!(
            "{} exited with {}: {}",
            tool.path.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(stdout)
}

/// Parses `7z l -slt`. Entry blocks follow the `----------` line and are
/// separated by blank lines; folder blocks are dropped.
pub fn parse_7z_listing(output: &str) -> HashSet<String> {
    let mut entries = HashSet::new();
    let mut in_entries = false;
    let mut path: Option<String> = None;
    let mut is_folder = false;

    let mut flush = |path: &mut Option<String>, is_folder: &mut bool| {
        if let Some(p) = path.take() {
            if !*is_folder && !p.is_empty() {
                entries.insert(p.replace('\\', "/"));
            }
        }
        *is_folder = false;
    };

    for line in output.lines() {
        let line = line.trim();
        if line == "----------" {
            in_entries = true;
            continue;
        }
        if !in_entries {
            continue;
        }
        if line.is_empty() {
            flush(&mut path, &mut is_folder);
        } else if let Some(p) = line.strip_prefix("Path = ") {
            flush(&mut path, &mut is_folder);
            path = Some(p.to_string());
        } else if line == "Folder = +" {
            is_folder = true;
        } else if let Some(attrs) = line.strip_prefix("Attributes = ") {
            if attrs.starts_with('D') {
                is_folder = true;
            }
        }
    }
    flush(&mut path, &mut is_folder);
    entries
}

fn rar_banner_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:UN)?RAR \d+\.\d+\b.*Copyright").expect("static regex"))
}

/// Parses the bare `lb` listing of the RAR tools: one name per line. The
/// version banner block at the top (up to the first blank line) and
/// all-dash separator lines are dropped; every other line is an entry.
pub fn parse_rar_listing(output: &str) -> HashSet<String> {
    let mut lines = output
        .lines()
        .map(str::trim)
        .skip_while(|line| line.is_empty())
        .peekable();
    if lines.peek().is_some_and(|line| rar_banner_regex().is_match(line)) {
        let _ = lines.by_ref().find(|line| line.is_empty());
    }
    lines
        .filter(|line| !line.is_empty() && !line.chars().all(|c| c == '-'))
        .map(|line| line.replace('\\', "/"))
        .collect()
}
