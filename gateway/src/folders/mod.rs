//! Derived state of output folders.
//!
//! Nothing here is cached: every call rescans, so a folder edited by hand
//! between two calls is reported as it is now.

use std::io;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use shared_types::{
    ArtifactEntry, CategoryCounts, DerivedStatus, EnhancedFolderStatus, FolderStatus,
    LinkIndexRecord,
};
use tracing::warn;

pub mod link_index;
pub mod scanner;

pub use scanner::{FolderScan, FolderScanner, FsScanner};

/// Output folder written by render jobs that don't name one.
pub const DEFAULT_OUTPUT_FOLDER: &str = "generated_pdfs";

static TEMPLATE_IN_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:output|default)_([A-Z][A-Z0-9]*(?:_[A-Z][A-Z0-9]*)*)(?:_|$)")
        .expect("constant regex pattern is valid")
});

/// Whether a directory under the work root holds generated letters.
pub fn is_recognized_folder(name: &str) -> bool {
    name.starts_with("output_") || name.starts_with("default_") || name == DEFAULT_OUTPUT_FOLDER
}

/// Best-effort guess of the template from a name like `output_SPH_Fresh_Oct`.
pub fn classify_template(folder_name: &str) -> Option<String> {
    TEMPLATE_IN_NAME
        .captures(folder_name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// A folder name is one plain path component.
pub fn is_valid_folder_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

/// Completeness of the protected/unprotected pair.
///
/// A folder with no artifacts at all is `Unknown`. With neither pair
/// category populated, the main artifacts alone make it `Complete`.
pub fn derive_status(counts: &CategoryCounts) -> DerivedStatus {
    if counts.max_letter_count() == 0 {
        return DerivedStatus::Unknown;
    }
    match (counts.protected, counts.unprotected) {
        (0, 0) => DerivedStatus::Complete,
        (0, _) | (_, 0) => DerivedStatus::Partial,
        (p, u) if p != u => DerivedStatus::Partial,
        _ => DerivedStatus::Complete,
    }
}

/// Freshness of a folder's generated links against its current artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkFreshness {
    NeverGenerated,
    UpToDate,
    Stale,
}

/// Links are current only while the recorded count equals what is on disk.
/// Any difference, in either direction, means stale.
pub fn link_freshness(recorded_links: Option<usize>, current_artifacts: usize) -> LinkFreshness {
    match recorded_links {
        None => LinkFreshness::NeverGenerated,
        Some(n) if n == current_artifacts => LinkFreshness::UpToDate,
        Some(_) => LinkFreshness::Stale,
    }
}

/// Reports folder state on demand from a [`FolderScanner`].
#[derive(Clone)]
pub struct FolderStateInspector {
    scanner: Arc<dyn FolderScanner>,
}

impl FolderStateInspector {
    pub fn new(scanner: Arc<dyn FolderScanner>) -> Self {
        Self { scanner }
    }

    pub fn for_root(root: &Path) -> Self {
        Self::new(Arc::new(FsScanner::new(root)))
    }

    pub fn exists(&self, name: &str) -> bool {
        is_valid_folder_name(name) && self.scanner.scan(name).is_ok()
    }

    /// Current status of one folder. Never fails: unreadable or missing
    /// folders come back `Unknown` with zero counts.
    pub fn inspect(&self, name: &str) -> FolderStatus {
        let scan = if is_valid_folder_name(name) {
            match self.scanner.scan(name) {
                Ok(scan) => Some(scan),
                Err(e) => {
                    if e.kind() != io::ErrorKind::NotFound {
                        warn!(folder = name, "folder scan failed: {e}");
                    }
                    None
                }
            }
        } else {
            None
        };
        status_from_scan(name, scan.as_ref())
    }

    /// Status plus link-generation state.
    pub fn inspect_enhanced(&self, name: &str) -> EnhancedFolderStatus {
        let status = self.inspect(name);
        let link_index = if is_valid_folder_name(name) {
            self.read_link_index(name)
        } else {
            None
        };
        enhance(status, link_index)
    }

    /// Artifact listing for a folder, sorted by location then name.
    pub fn artifacts(&self, name: &str) -> io::Result<Vec<ArtifactEntry>> {
        if !is_valid_folder_name(name) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "invalid folder name"));
        }
        Ok(self.scanner.scan(name)?.artifacts)
    }

    /// Status of every recognized folder, sorted by name. One unreadable
    /// folder degrades to `Unknown` instead of failing the listing.
    pub fn list(&self) -> io::Result<Vec<FolderStatus>> {
        Ok(self
            .recognized_folders()?
            .iter()
            .map(|name| self.inspect(name))
            .collect())
    }

    pub fn list_enhanced(&self) -> io::Result<Vec<EnhancedFolderStatus>> {
        Ok(self
            .recognized_folders()?
            .iter()
            .map(|name| self.inspect_enhanced(name))
            .collect())
    }

    pub fn link_index(&self, name: &str) -> Option<LinkIndexRecord> {
        if !is_valid_folder_name(name) {
            return None;
        }
        self.read_link_index(name)
    }

    fn recognized_folders(&self) -> io::Result<Vec<String>> {
        let mut names: Vec<String> = self
            .scanner
            .list_folders()?
            .into_iter()
            .filter(|n| is_recognized_folder(n))
            .collect();
        names.sort();
        Ok(names)
    }

    fn read_link_index(&self, name: &str) -> Option<LinkIndexRecord> {
        match self.scanner.read_link_index(name) {
            Ok(index) => index,
            Err(e) => {
                warn!(folder = name, "unreadable link index, treating as absent: {e}");
                None
            }
        }
    }
}

fn status_from_scan(name: &str, scan: Option<&FolderScan>) -> FolderStatus {
    let counts = scan.map(FolderScan::counts).unwrap_or_default();
    let degraded = scan.map(|s| s.degraded).unwrap_or(true);
    FolderStatus {
        name: name.to_string(),
        template: classify_template(name),
        primary_artifact_count: counts.max_letter_count(),
        per_category_counts: counts,
        created_at: scan.and_then(|s| s.created_at),
        last_modified_at: scan.and_then(|s| s.modified_at),
        derived_status: if degraded {
            DerivedStatus::Unknown
        } else {
            derive_status(&counts)
        },
    }
}

fn enhance(status: FolderStatus, link_index: Option<LinkIndexRecord>) -> EnhancedFolderStatus {
    let recorded = link_index.as_ref().map(|i| i.link_count);
    let freshness = link_freshness(recorded, status.primary_artifact_count);
    EnhancedFolderStatus {
        links_generated: recorded.unwrap_or(0) > 0,
        link_count: recorded.unwrap_or(0),
        links_up_to_date: freshness == LinkFreshness::UpToDate,
        link_index,
        status,
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::HashMap;

    use parking_lot::Mutex;
    use shared_types::ArtifactLocation;

    use super::*;

    /// In-memory scanner for tests.
    #[derive(Default)]
    pub struct FakeScanner {
        pub folders: Mutex<HashMap<String, io::Result<FolderScan>>>,
        pub indexes: Mutex<HashMap<String, LinkIndexRecord>>,
    }

    impl FakeScanner {
        pub fn with_counts(&self, name: &str, counts: CategoryCounts) {
            let mut artifacts = Vec::new();
            let groups = [
                (ArtifactLocation::Main, counts.main),
                (ArtifactLocation::Protected, counts.protected),
                (ArtifactLocation::Unprotected, counts.unprotected),
                (ArtifactLocation::Combined, counts.combined),
            ];
            for (location, n) in groups {
                for i in 0..n {
                    artifacts.push(ArtifactEntry {
                        filename: format!("letter_{i}.pdf"),
                        path: format!("{name}/letter_{i}.pdf"),
                        size: 1024,
                        location,
                    });
                }
            }
            self.folders.lock().insert(
                name.to_string(),
                Ok(FolderScan {
                    artifacts,
                    ..FolderScan::default()
                }),
            );
        }

        pub fn failing(&self, name: &str) {
            self.folders.lock().insert(
                name.to_string(),
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied")),
            );
        }

        pub fn with_index(&self, name: &str, link_count: usize) {
            self.indexes.lock().insert(
                name.to_string(),
                LinkIndexRecord {
                    folder_name: name.to_string(),
                    generated_at: chrono::Utc::now(),
                    link_count,
                    source_artifact_count_at_generation: link_count,
                },
            );
        }
    }

    impl FolderScanner for FakeScanner {
        fn list_folders(&self) -> io::Result<Vec<String>> {
            Ok(self.folders.lock().keys().cloned().collect())
        }

        fn scan(&self, folder: &str) -> io::Result<FolderScan> {
            match self.folders.lock().get(folder) {
                Some(Ok(scan)) => Ok(scan.clone()),
                Some(Err(e)) => Err(io::Error::new(e.kind(), e.to_string())),
                None => Err(io::Error::new(io::ErrorKind::NotFound, "no such folder")),
            }
        }

        fn read_link_index(&self, folder: &str) -> io::Result<Option<LinkIndexRecord>> {
            Ok(self.indexes.lock().get(folder).cloned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeScanner;
    use super::*;
    use proptest::prelude::*;

    fn counts(main: usize, protected: usize, unprotected: usize) -> CategoryCounts {
        CategoryCounts {
            main,
            protected,
            unprotected,
            combined: 0,
        }
    }

    fn inspector() -> (Arc<FakeScanner>, FolderStateInspector) {
        let scanner = Arc::new(FakeScanner::default());
        let inspector = FolderStateInspector::new(scanner.clone());
        (scanner, inspector)
    }

    #[test]
    fn test_derive_status() {
        assert_eq!(derive_status(&counts(0, 0, 0)), DerivedStatus::Unknown);
        assert_eq!(derive_status(&counts(4, 0, 0)), DerivedStatus::Complete);
        assert_eq!(derive_status(&counts(0, 5, 5)), DerivedStatus::Complete);
        assert_eq!(derive_status(&counts(0, 5, 0)), DerivedStatus::Partial);
        assert_eq!(derive_status(&counts(0, 0, 3)), DerivedStatus::Partial);
        assert_eq!(derive_status(&counts(0, 5, 6)), DerivedStatus::Partial);
    }

    #[test]
    fn test_combined_output_does_not_count_as_letters() {
        let c = CategoryCounts {
            combined: 1,
            ..CategoryCounts::default()
        };
        assert_eq!(derive_status(&c), DerivedStatus::Unknown);
    }

    #[test]
    fn test_classify_template() {
        assert_eq!(classify_template("output_SPH_Fresh_Oct"), Some("SPH".into()));
        assert_eq!(classify_template("output_MED_JPH_September2025"), Some("MED_JPH".into()));
        assert_eq!(classify_template("default_JPH"), Some("JPH".into()));
        assert_eq!(classify_template("generated_pdfs"), None);
        assert_eq!(classify_template("output_batch3"), None);
    }

    #[test]
    fn test_recognized_folders() {
        assert!(is_recognized_folder("output_SPH_Oct"));
        assert!(is_recognized_folder("default_Motor"));
        assert!(is_recognized_folder("generated_pdfs"));
        assert!(!is_recognized_folder("letter_links"));
        assert!(!is_recognized_folder("temp_uploads"));
    }

    #[test]
    fn test_folder_name_validation() {
        assert!(is_valid_folder_name("output_SPH_Oct"));
        assert!(!is_valid_folder_name(".."));
        assert!(!is_valid_folder_name("a/b"));
        assert!(!is_valid_folder_name(""));
    }

    #[test]
    fn test_links_go_stale_when_artifacts_grow() {
        let (scanner, inspector) = inspector();
        scanner.with_counts("output_SPH_Oct", counts(0, 5, 5));
        scanner.with_index("output_SPH_Oct", 5);

        let status = inspector.inspect_enhanced("output_SPH_Oct");
        assert!(status.links_generated);
        assert!(status.links_up_to_date);

        scanner.with_counts("output_SPH_Oct", counts(0, 6, 6));
        let status = inspector.inspect_enhanced("output_SPH_Oct");
        assert_eq!(status.link_count, 5);
        assert!(!status.links_up_to_date);
    }

    #[test]
    fn test_one_sided_growth_is_partial_and_stale() {
        let (scanner, inspector) = inspector();
        scanner.with_counts("output_SPH_Oct", counts(0, 5, 5));
        scanner.with_index("output_SPH_Oct", 5);

        scanner.with_counts("output_SPH_Oct", counts(0, 5, 6));
        let status = inspector.inspect_enhanced("output_SPH_Oct");
        assert_eq!(status.status.derived_status, DerivedStatus::Partial);
        assert_eq!(status.status.primary_artifact_count, 6);
        assert!(status.links_generated);
        assert!(!status.links_up_to_date);
    }

    #[test]
    fn test_missing_index_means_no_links() {
        let (scanner, inspector) = inspector();
        scanner.with_counts("output_JPH_Oct", counts(3, 0, 0));
        let status = inspector.inspect_enhanced("output_JPH_Oct");
        assert!(!status.links_generated);
        assert!(!status.links_up_to_date);
        assert_eq!(status.link_index, None);
    }

    #[test]
    fn test_unreadable_folder_degrades_only_itself() {
        let (scanner, inspector) = inspector();
        scanner.with_counts("output_SPH_Oct", counts(0, 2, 2));
        scanner.failing("output_JPH_Oct");
        scanner.with_counts("letter_links", counts(9, 0, 0));

        let listed = inspector.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "output_JPH_Oct");
        assert_eq!(listed[0].derived_status, DerivedStatus::Unknown);
        assert_eq!(listed[0].primary_artifact_count, 0);
        assert_eq!(listed[1].derived_status, DerivedStatus::Complete);
    }

    #[test]
    fn test_inspect_is_repeatable() {
        let (scanner, inspector) = inspector();
        scanner.with_counts("output_SPH_Oct", counts(0, 3, 2));
        assert_eq!(
            inspector.inspect("output_SPH_Oct"),
            inspector.inspect("output_SPH_Oct")
        );
    }

    #[test]
    fn test_missing_folder_is_unknown() {
        let (_, inspector) = inspector();
        let status = inspector.inspect("output_gone");
        assert_eq!(status.derived_status, DerivedStatus::Unknown);
        assert!(!inspector.exists("output_gone"));
        assert!(!inspector.exists("../etc"));
    }

    #[test]
    fn test_fs_scanner_reads_categories() {
        let tmp = tempfile::tempdir().unwrap();
        let folder = tmp.path().join("output_SPH_Oct");
        std::fs::create_dir_all(folder.join("protected")).unwrap();
        std::fs::create_dir_all(folder.join("unprotected")).unwrap();
        std::fs::create_dir_all(folder.join("combined")).unwrap();
        for name in ["a.pdf", "b.PDF"] {
            std::fs::write(folder.join("protected").join(name), b"%PDF").unwrap();
            std::fs::write(folder.join("unprotected").join(name), b"%PDF").unwrap();
        }
        std::fs::write(folder.join("combined/all.pdf"), b"%PDF").unwrap();
        std::fs::write(folder.join("notes.txt"), b"x").unwrap();
        std::fs::create_dir_all(tmp.path().join("temp_uploads")).unwrap();

        let inspector = FolderStateInspector::for_root(tmp.path());
        let status = inspector.inspect("output_SPH_Oct");
        assert_eq!(
            status.per_category_counts,
            CategoryCounts {
                main: 0,
                protected: 2,
                unprotected: 2,
                combined: 1,
            }
        );
        assert_eq!(status.primary_artifact_count, 2);
        assert_eq!(status.derived_status, DerivedStatus::Complete);
        assert_eq!(status.template.as_deref(), Some("SPH"));
        assert!(status.last_modified_at.is_some());

        let names: Vec<String> = inspector.list().unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["output_SPH_Oct".to_string()]);
    }

    proptest! {
        #[test]
        fn prop_up_to_date_iff_counts_equal(recorded in 0usize..500, current in 0usize..500) {
            let verdict = link_freshness(Some(recorded), current);
            prop_assert_eq!(verdict == LinkFreshness::UpToDate, recorded == current);
        }

        #[test]
        fn prop_no_index_is_never_up_to_date(current in 0usize..500) {
            prop_assert_eq!(link_freshness(None, current), LinkFreshness::NeverGenerated);
        }

        #[test]
        fn prop_equal_pair_is_complete(n in 1usize..200, main in 0usize..200) {
            prop_assert_eq!(derive_status(&counts(main, n, n)), DerivedStatus::Complete);
        }
    }
}
