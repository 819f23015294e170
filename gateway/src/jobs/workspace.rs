use std::io;
use std::path::Path;

use tokio::fs;
use tracing::{debug, info, warn};

/// What a clear pass managed to remove.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClearReport {
    pub removed: usize,
    pub skipped: usize,
}

/// Empty `dir` (creating it if needed) so artifact counts never mix two runs.
///
/// Entries that cannot be removed (a letter open in a viewer, say) are
/// logged and skipped; only failing to create the directory is an error.
pub async fn prepare_output_dir(dir: &Path) -> io::Result<ClearReport> {
    let mut report = ClearReport::default();

    match fs::read_dir(dir).await {
        Ok(mut entries) => loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(dir = %dir.display(), "stopped listing output dir: {e}");
                    report.skipped += 1;
                    break;
                }
            };
            let path = entry.path();
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            let result = if is_dir {
                fs::remove_dir_all(&path).await
            } else {
                fs::remove_file(&path).await
            };
            match result {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    warn!(path = %path.display(), "could not delete, file may be open elsewhere: {e}");
                    report.skipped += 1;
                }
            }
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            warn!(dir = %dir.display(), "could not list output dir for clearing: {e}");
        }
    }

    fs::create_dir_all(dir).await?;
    if report.removed > 0 || report.skipped > 0 {
        info!(
            dir = %dir.display(),
            removed = report.removed,
            skipped = report.skipped,
            "output dir cleared"
        );
    }
    Ok(report)
}

/// Read a worker's result file. Missing or unreadable means no result.
pub async fn read_result(job_id: &str, path: &Path) -> Option<String> {
    match fs::read(path).await {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!(job_id, path = %path.display(), "could not read worker result: {e}");
            None
        }
    }
}

/// Delete job scratch files. Already-missing files are fine.
pub async fn remove_files(job_id: &str, paths: &[std::path::PathBuf]) {
    for path in paths {
        match fs::remove_file(path).await {
            Ok(()) => debug!(job_id, path = %path.display(), "removed job scratch file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(job_id, path = %path.display(), "could not remove job scratch file: {e}"),
        }
    }
}
