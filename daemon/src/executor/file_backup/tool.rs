//! Archiver discovery and the per-tool command-line table.

use crate::config::BackupConfig;
use crate::executor::fsutil::{find_in_dirs, search_path_dirs};
use std::path::{Path, PathBuf};

/// Install locations probed in order: high-ratio archivers first, then the
/// RAR family.
const DEFAULT_INSTALL_PATHS: &[&str] = &[
    "/usr/bin/7z",
    "/usr/local/bin/7z",
    "/usr/bin/7za",
    "/usr/bin/7zz",
    r"C:\Program Files\7-Zip\7z.exe",
    r"C:\Program Files (x86)\7-Zip\7z.exe",
    "/usr/bin/rar",
    "/usr/local/bin/rar",
    r"C:\Program Files\WinRAR\Rar.exe",
    r"C:\Program Files (x86)\WinRAR\Rar.exe",
    r"C:\Program Files\WinRAR\WinRAR.exe",
    r"C:\Program Files (x86)\WinRAR\WinRAR.exe",
    "/usr/bin/unrar",
    "/usr/local/bin/unrar",
    r"C:\Program Files\WinRAR\UnRAR.exe",
    r"C:\Program Files (x86)\WinRAR\UnRAR.exe",
];

/// Executable names looked up in every search directory, same priority.
const SEARCH_NAMES: &[&str] = &[
    "7z", "7za", "7zz", "7z.exe",
    "rar", "Rar.exe",
    "WinRAR.exe",
    "unrar", "UnRAR.exe",
];

const RAR_WRITER_NAMES: &[&str] = &["rar", "Rar.exe", "WinRAR.exe"];
const RAR_LISTER_NAMES: &[&str] = &["unrar", "UnRAR.exe", "rar", "Rar.exe"];

/// Archive container format, which fixes the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolFamily {
    SevenZip,
    Rar,
    Zip,
}

impl ToolFamily {
    pub fn extension(self) -> &'static str {
        match self {
            ToolFamily::SevenZip => "7z",
            ToolFamily::Rar => "rar",
            ToolFamily::Zip => "zip",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "7z" => Some(ToolFamily::SevenZip),
            "rar" => Some(ToolFamily::Rar),
            "zip" => Some(ToolFamily::Zip),
            _ => None,
        }
    }
}

/// External executables the engine knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    SevenZip,
    /// Console RAR.
    Rar,
    /// GUI RAR; needs `-ibck` to stay in the background.
    WinRar,
    /// Extraction and listing only.
    UnRar,
}

pub struct ToolFlags {
    pub create: Option<&'static [&'static str]>,
    pub list: &'static [&'static str],
}

const SEVEN_ZIP_FLAGS: ToolFlags = ToolFlags {
    create: Some(&["a", "-mx9", "-y"]),
    list: &["l", "-slt"],
};
const RAR_FLAGS: ToolFlags = ToolFlags {
    create: Some(&["a", "-m5", "-ep1", "-r", "-y"]),
    list: &["lb"],
};
const WINRAR_FLAGS: ToolFlags = ToolFlags {
    create: Some(&["a", "-m5", "-ep1", "-r", "-ibck", "-y"]),
    list: &["lb"],
};
const UNRAR_FLAGS: ToolFlags = ToolFlags {
    create: None,
    list: &["lb"],
};

impl ToolKind {
    /// Classifies an executable by its file name. Both `/` and `\` count as
    /// separators so Windows install paths classify on any host.
    pub fn from_path(path: &Path) -> Option<Self> {
        let raw = path.to_string_lossy();
        let name = raw.rsplit(['/', '\\']).next()?.to_ascii_lowercase();
        let stem = name.strip_suffix(".exe").unwrap_or(&name);
        match stem {
            "7z" | "7za" | "7zz" => Some(ToolKind::SevenZip),
            "rar" => Some(ToolKind::Rar),
            "winrar" => Some(ToolKind::WinRar),
            "unrar" => Some(ToolKind::UnRar),
            _ => None,
        }
    }

    pub fn family(self) -> ToolFamily {
        match self {
            ToolKind::SevenZip => ToolFamily::SevenZip,
            ToolKind::Rar | ToolKind::WinRar | ToolKind::UnRar => ToolFamily::Rar,
        }
    }

    pub fn flags(self) -> &'static ToolFlags {
        match self {
            ToolKind::SevenZip => &SEVEN_ZIP_FLAGS,
            ToolKind::Rar => &RAR_FLAGS,
            ToolKind::WinRar => &WINRAR_FLAGS,
            ToolKind::UnRar => &UNRAR_FLAGS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalTool {
    pub kind: ToolKind,
    pub path: PathBuf,
}

impl ExternalTool {
    pub fn from_path(path: PathBuf) -> Option<Self> {
        ToolKind::from_path(&path).map(|kind| Self { kind, path })
    }

    fn sibling(&self, names: &[&str]) -> Option<ExternalTool> {
        let dir = self.path.parent()?;
        find_in_dirs(&[dir.to_path_buf()], names).and_then(ExternalTool::from_path)
    }

    /// The executable that can write archives of this family. An extraction
    /// only UnRAR is swapped for a `rar`/`WinRAR` next to it.
    pub fn writer(&self) -> Option<ExternalTool> {
        if self.kind.flags().create.is_some() {
            return Some(self.clone());
        }
        self.sibling(RAR_WRITER_NAMES)
    }

    /// The executable used to list archives of this family. RAR listing
    /// goes through `unrar`/`rar` when one sits next to the GUI binary.
    pub fn lister(&self) -> ExternalTool {
        match self.kind {
            ToolKind::WinRar => self.sibling(RAR_LISTER_NAMES).unwrap_or_else(|| self.clone()),
            _ => self.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveTool {
    External(ExternalTool),
    /// In-process zip writer, always available.
    BuiltinZip,
}

impl ArchiveTool {
    pub fn family(&self) -> ToolFamily {
        match self {
            ArchiveTool::External(t) => t.kind.family(),
            ArchiveTool::BuiltinZip => ToolFamily::Zip,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ArchiveTool::External(t) => format!("{:?} ({})", t.kind, t.path.display()),
            ArchiveTool::BuiltinZip => "built-in zip".to_string(),
        }
    }
}

/// Where to look for archivers.
#[derive(Debug, Clone, Default)]
pub struct ToolLocator {
    candidates: Vec<PathBuf>,
    search_dirs: Vec<PathBuf>,
}

impl ToolLocator {
    pub fn new(candidates: Vec<PathBuf>, search_dirs: Vec<PathBuf>) -> Self {
        Self { candidates, search_dirs }
    }

    /// Finds nothing, so discovery always lands on the built-in zip writer.
    pub fn builtin_only() -> Self {
        Self::default()
    }

    pub fn from_config(config: &BackupConfig) -> Self {
        if config.builtin_only {
            return Self::builtin_only();
        }
        let candidates = config
            .extra_tool_paths
            .iter()
            .cloned()
            .chain(DEFAULT_INSTALL_PATHS.iter().map(PathBuf::from))
            .collect();
        let search_dirs = if config.search_path { search_path_dirs() } else { Vec::new() };
        Self::new(candidates, search_dirs)
    }

    /// Every known archiver that exists, in priority order.
    fn available(&self) -> impl Iterator<Item = ExternalTool> + '_ {
        let installed = self
            .candidates
            .iter()
            .filter(|p| p.is_file())
            .filter_map(|p| ExternalTool::from_path(p.clone()));
        let on_path = self.search_dirs.iter().flat_map(|dir| {
            SEARCH_NAMES
                .iter()
                .map(move |name| dir.join(name))
                .filter(|p| p.is_file())
                .filter_map(ExternalTool::from_path)
        });
        installed.chain(on_path)
    }

    pub fn discover(&self) -> ArchiveTool {
        self.available()
            .next()
            .map(ArchiveTool::External)
            .unwrap_or(ArchiveTool::BuiltinZip)
    }

    /// First available tool able to read archives of `family`.
    pub fn find_family(&self, family: ToolFamily) -> Option<ExternalTool> {
        self.available().find(|t| t.kind.family() == family)
    }
}
