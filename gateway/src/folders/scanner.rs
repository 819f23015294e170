use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use shared_types::{ArtifactEntry, ArtifactLocation, CategoryCounts, LinkIndexRecord};
use tracing::warn;

use super::link_index;

pub const LOCATIONS: [ArtifactLocation; 4] = [
    ArtifactLocation::Main,
    ArtifactLocation::Protected,
    ArtifactLocation::Unprotected,
    ArtifactLocation::Combined,
];

/// Raw result of scanning one folder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderScan {
    /// Sorted by location, then file name
    pub artifacts: Vec<ArtifactEntry>,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    /// A category could not be read; counts are incomplete
    pub degraded: bool,
}

impl FolderScan {
    pub fn counts(&self) -> CategoryCounts {
        let mut counts = CategoryCounts::default();
        for artifact in &self.artifacts {
            match artifact.location {
                ArtifactLocation::Main => counts.main += 1,
                ArtifactLocation::Protected => counts.protected += 1,
                ArtifactLocation::Unprotected => counts.unprotected += 1,
                ArtifactLocation::Combined => counts.combined += 1,
            }
        }
        counts
    }
}

/// Filesystem access used by the folder inspector.
pub trait FolderScanner: Send + Sync {
    /// Names of the directories directly under the work root.
    fn list_folders(&self) -> io::Result<Vec<String>>;

    /// Scan one folder. `NotFound` if it does not exist.
    fn scan(&self, folder: &str) -> io::Result<FolderScan>;

    /// The link index written by the last link-generation run, if any.
    fn read_link_index(&self, folder: &str) -> io::Result<Option<LinkIndexRecord>>;
}

/// Scanner over a real directory tree.
#[derive(Debug, Clone)]
pub struct FsScanner {
    root: PathBuf,
}

impl FsScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl FolderScanner for FsScanner {
    fn list_folders(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn scan(&self, folder: &str) -> io::Result<FolderScan> {
        let folder_path = self.root.join(folder);
        let meta = fs::metadata(&folder_path)?;
        if !meta.is_dir() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "not a directory"));
        }

        let mut scan = FolderScan {
            created_at: meta.created().ok().map(to_utc),
            modified_at: meta.modified().ok().map(to_utc),
            ..FolderScan::default()
        };

        for location in LOCATIONS {
            let dir = match location.subdir() {
                Some(sub) => folder_path.join(sub),
                None => folder_path.clone(),
            };
            match scan_category(&dir, location) {
                Ok(found) => {
                    for (entry, modified) in found {
                        if modified > scan.modified_at {
                            scan.modified_at = modified;
                        }
                        scan.artifacts.push(entry);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(folder, ?location, "category scan failed: {e}");
                    scan.degraded = true;
                }
            }
        }

        Ok(scan)
    }

    fn read_link_index(&self, folder: &str) -> io::Result<Option<LinkIndexRecord>> {
        link_index::read(&self.root, folder)
    }
}

fn scan_category(
    dir: &Path,
    location: ArtifactLocation,
) -> io::Result<Vec<(ArtifactEntry, Option<DateTime<Utc>>)>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !is_artifact(&path) {
            continue;
        }
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let filename = entry.file_name().to_string_lossy().to_string();
        found.push((
            ArtifactEntry {
                filename,
                path: path.to_string_lossy().to_string(),
                size: meta.len(),
                location,
            },
            meta.modified().ok().map(to_utc),
        ));
    }
    found.sort_by(|a, b| a.0.filename.cmp(&b.0.filename));
    Ok(found)
}

/// Rendered letters are PDFs; everything else in a folder is bookkeeping.
pub fn is_artifact(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

fn to_utc(t: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(t)
}
