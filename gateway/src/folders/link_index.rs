//! The per-folder status file recording the last link-generation run.
//!
//! Lives at `letter_links/<folder>/.link_index.json` next to the letter
//! records and SMS batch the link worker writes.

use std::io;
use std::path::{Path, PathBuf};

use shared_types::LinkIndexRecord;

pub const LINKS_DIR: &str = "letter_links";
pub const INDEX_FILE: &str = ".link_index.json";
pub const SMS_BATCH_FILE: &str = "sms_batch.csv";

pub fn links_dir(root: &Path, folder: &str) -> PathBuf {
    root.join(LINKS_DIR).join(folder)
}

pub fn index_path(root: &Path, folder: &str) -> PathBuf {
    links_dir(root, folder).join(INDEX_FILE)
}

pub fn read(root: &Path, folder: &str) -> io::Result<Option<LinkIndexRecord>> {
    let raw = match std::fs::read(index_path(root, folder)) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Replace the index atomically (write to a temp file, then rename).
pub async fn write(root: &Path, record: &LinkIndexRecord) -> io::Result<()> {
    let dir = links_dir(root, &record.folder_name);
    tokio::fs::create_dir_all(&dir).await?;
    let json = serde_json::to_vec_pretty(record)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let tmp = dir.join(format!("{INDEX_FILE}.tmp"));
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, dir.join(INDEX_FILE)).await
}
