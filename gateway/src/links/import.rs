//! Loads the per-letter records the link worker leaves in
//! `letter_links/<folder>/<id>.json`.

use std::io;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use super::{is_valid_letter_id, LetterAccessRecord, LinkAccessGuard};
use crate::folders::link_index::{links_dir, LINKS_DIR};

/// Where [`retire_folder`] parks the previous run's letter files.
pub const SUPERSEDED_DIR: &str = "superseded";

/// Applied when a letter file omits its own expiry or quota.
#[derive(Debug, Clone, Copy)]
pub struct LetterDefaults {
    pub ttl: Duration,
    pub max_access: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LetterFile {
    id: String,
    pdf_path: String,
    #[serde(default)]
    expires_at: Option<String>,
    #[serde(default)]
    max_access: Option<u32>,
    #[serde(default)]
    access_count: Option<u32>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportReport {
    /// Well-formed letter records in the folder
    pub found: usize,
    /// Records the guard did not know yet
    pub adopted: usize,
}

/// Import every letter file of one folder. Malformed files are logged and
/// skipped.
pub async fn import_folder(
    guard: &LinkAccessGuard,
    root: &Path,
    folder: &str,
    defaults: LetterDefaults,
    now: DateTime<Utc>,
) -> io::Result<ImportReport> {
    let dir = links_dir(root, folder);
    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ImportReport::default()),
        Err(e) => return Err(e),
    };

    let mut report = ImportReport::default();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(stem) = letter_file_id(&path) else {
            continue;
        };
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(file = %path.display(), "skipping unreadable letter file: {e}");
                continue;
            }
        };
        match parse_letter(&raw, root, defaults, now) {
            Ok(record) if record.id == stem => {
                report.found += 1;
                if guard.adopt(record) {
                    report.adopted += 1;
                }
            }
            Ok(record) => {
                warn!(file = %path.display(), id = %record.id, "letter id does not match file name, skipping");
            }
            Err(reason) => {
                warn!(file = %path.display(), "skipping letter file: {reason}");
            }
        }
    }

    info!(
        folder,
        found = report.found,
        adopted = report.adopted,
        "letter records imported"
    );
    Ok(report)
}

/// Move the letter files of an earlier run into `superseded/` so the next
/// import sees only what the new run wrote. Records already adopted stay
/// in the guard until they expire or run out. Returns how many moved.
pub async fn retire_folder(root: &Path, folder: &str) -> io::Result<usize> {
    let dir = links_dir(root, folder);
    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let retired = dir.join(SUPERSEDED_DIR);
    let mut moved = 0;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if letter_file_id(&path).is_none() {
            continue;
        }
        if moved == 0 {
            tokio::fs::create_dir_all(&retired).await?;
        }
        tokio::fs::rename(&path, retired.join(entry.file_name())).await?;
        moved += 1;
    }
    if moved > 0 {
        info!(folder, moved, "retired letter records of the previous run");
    }
    Ok(moved)
}

/// `Some(id)` for `<16 hex>.json`.
fn letter_file_id(path: &Path) -> Option<&str> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|_| path.extension().is_some_and(|e| e == "json"))
        .filter(|stem| is_valid_letter_id(stem))
}

/// Import every folder under `letter_links/`. Used at startup; returns
/// the number of records adopted.
pub async fn import_all(
    guard: &LinkAccessGuard,
    root: &Path,
    defaults: LetterDefaults,
    now: DateTime<Utc>,
) -> io::Result<usize> {
    let mut entries = match tokio::fs::read_dir(root.join(LINKS_DIR)).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let mut total = 0;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let Ok(folder) = entry.file_name().into_string() else {
            continue;
        };
        match import_folder(guard, root, &folder, defaults, now).await {
            Ok(report) => total += report.adopted,
            Err(e) => warn!(folder, "could not import letter records: {e}"),
        }
    }
    Ok(total)
}

fn parse_letter(
    raw: &[u8],
    root: &Path,
    defaults: LetterDefaults,
    now: DateTime<Utc>,
) -> Result<LetterAccessRecord, String> {
    let file: LetterFile = serde_json::from_slice(raw).map_err(|e| e.to_string())?;
    let artifact = resolve_artifact(root, &file.pdf_path)
        .ok_or_else(|| format!("pdf path escapes the work root: {}", file.pdf_path))?;
    let expires_at = match file.expires_at.as_deref() {
        Some(s) => parse_timestamp(s).ok_or_else(|| format!("unreadable expiresAt: {s}"))?,
        None => now + defaults.ttl,
    };
    Ok(LetterAccessRecord {
        id: file.id,
        artifact,
        expires_at,
        max_access_count: file.max_access.unwrap_or(defaults.max_access),
        access_count: file.access_count.unwrap_or(0),
    })
}

/// `/<folder>/protected/x.pdf` relative to the work root, with no way out.
fn resolve_artifact(root: &Path, pdf_path: &str) -> Option<PathBuf> {
    let relative = Path::new(pdf_path.trim_start_matches(['/', '\\']));
    let mut resolved = root.to_path_buf();
    let mut parts = 0;
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                parts += 1;
            }
            Component::CurDir => {}
            _ => return None,
        }
    }
    (parts > 0).then_some(resolved)
}

/// RFC 3339, or a naive ISO timestamp taken as UTC.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|n| n.and_utc())
}
