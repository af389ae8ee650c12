//! Directory scanner: indexes experiment folders into a repository.
//!
//! Each folder under the scan root runs through a small state machine:
//!
//! ```text
//! Discovered
//!   └─ name/date gate fails ──────────► Excluded (silent)
//!   └─ no journal file ───────────────► Excluded (silent, never indexed)
//!   └─ already indexed, not forced ──► SkippedCached
//!   └─ otherwise ─────────────────────► Scanned ─► Upserted
//! ```
//!
//! Folders are processed strictly sequentially. A failure inside one folder
//! is appended to the report and scanning continues; only an inaccessible
//! scan root aborts the run.

use crate::error::{AppResult, WeldError};
use crate::readers::{detect_format, is_journal_file, is_video_file};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Experiment folder naming convention: `J<yy>-<mm>-<dd>(<run>)`.
static FOLDER_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)] // pattern is a compile-time constant
    Regex::new(r"^J(\d{2})-(\d{2})-(\d{2})\((\d+)\)$").unwrap()
});

/// Which sensor exports an experiment folder carries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFlags {
    pub has_journal: bool,
    pub has_position_data: bool,
    pub has_tensile_data: bool,
    pub has_temperature_data: bool,
    pub has_hdf5_data: bool,
    pub has_video: bool,
}

/// Index record for one experiment folder.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExperimentRecord {
    pub id: String,
    pub folder: PathBuf,
    pub experiment_date: NaiveDate,
    pub flags: FileFlags,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// External store the scanner writes through.
#[async_trait]
pub trait ExperimentRepository: Send + Sync {
    async fn experiment_exists(&self, id: &str) -> AppResult<bool>;
    async fn upsert_experiment(&self, record: ExperimentRecord) -> AppResult<()>;
}

/// Recursive folder listing the scanner reads through. Extracted as a trait
/// so tests can fail individual folders.
pub trait ScanFs: Send + Sync {
    /// Immediate sub-directories of the scan root.
    fn list_dirs(&self, root: &Path) -> AppResult<Vec<PathBuf>>;
    /// Every file anywhere under the folder.
    fn list_files_recursive(&self, dir: &Path) -> AppResult<Vec<PathBuf>>;
}

/// Standard-filesystem implementation.
#[derive(Debug, Default)]
pub struct StdFs;

impl ScanFs for StdFs {
    fn list_dirs(&self, root: &Path) -> AppResult<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        for entry in std::fs::read_dir(root)? {
            let path = entry?.path();
            if path.is_dir() {
                dirs.push(path);
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    fn list_files_recursive(&self, dir: &Path) -> AppResult<Vec<PathBuf>> {
        crate::service::list_files_recursive(dir)
    }
}

/// Simple in-memory repository, used by the CLI and the tests.
#[derive(Default)]
pub struct InMemoryRepository {
    records: tokio::sync::Mutex<BTreeMap<String, ExperimentRecord>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<ExperimentRecord> {
        self.records.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl ExperimentRepository for InMemoryRepository {
    async fn experiment_exists(&self, id: &str) -> AppResult<bool> {
        Ok(self.records.lock().await.contains_key(id))
    }

    async fn upsert_experiment(&self, record: ExperimentRecord) -> AppResult<()> {
        let mut records = self.records.lock().await;
        match records.get_mut(&record.id) {
            Some(existing) => {
                let created_at = existing.created_at;
                *existing = ExperimentRecord {
                    created_at,
                    ..record
                };
            }
            None => {
                records.insert(record.id.clone(), record);
            }
        }
        Ok(())
    }
}

/// Outcome counters and per-folder failures of one scan run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScanReport {
    pub discovered: usize,
    pub excluded: usize,
    pub skipped_cached: usize,
    pub upserted: usize,
    /// (folder name, error message) per failed folder.
    pub errors: Vec<(String, String)>,
}

/// Sequential folder-indexing scanner.
pub struct DirectoryScanner {
    fs: Box<dyn ScanFs>,
    cutoff_date: NaiveDate,
}

impl DirectoryScanner {
    pub fn new(cutoff_date: NaiveDate) -> Self {
        Self::with_fs(Box::new(StdFs), cutoff_date)
    }

    pub fn with_fs(fs: Box<dyn ScanFs>, cutoff_date: NaiveDate) -> Self {
        Self { fs, cutoff_date }
    }

    /// Parses `J<yy>-<mm>-<dd>(<run>)` into the embedded experiment date.
    ///
    /// Returns `None` for any folder name that is not a valid experiment id,
    /// including syntactically matching names with an impossible date.
    pub fn parse_folder_name(name: &str) -> Option<(String, NaiveDate)> {
        let caps = FOLDER_RE.captures(name)?;
        let year: i32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let day: u32 = caps[3].parse().ok()?;
        let date = NaiveDate::from_ymd_opt(2000 + year, month, day)?;
        Some((name.to_string(), date))
    }

    /// Evaluates the file-availability predicates over a recursive listing.
    pub fn detect_flags(files: &[PathBuf]) -> FileFlags {
        use crate::channel::SourceFormat;
        let mut flags = FileFlags::default();
        for file in files {
            if is_journal_file(file) {
                flags.has_journal = true;
            }
            if is_video_file(file) {
                flags.has_video = true;
            }
            match detect_format(file) {
                Some(SourceFormat::Position) => flags.has_position_data = true,
                Some(SourceFormat::Tensile) => flags.has_tensile_data = true,
                Some(SourceFormat::Temperature) => flags.has_temperature_data = true,
                Some(SourceFormat::Hdf5) => flags.has_hdf5_data = true,
                None => {}
            }
        }
        flags
    }

    /// Scans the root and upserts an index record per qualifying folder.
    ///
    /// `force` re-scans folders that are already indexed; it never overrides
    /// the name/date or journal gates.
    pub async fn scan(
        &self,
        root: &Path,
        repository: &dyn ExperimentRepository,
        force: bool,
    ) -> AppResult<ScanReport> {
        let folders = self.fs.list_dirs(root).map_err(|e| {
            WeldError::ScanAborted(format!("cannot list scan root '{}': {}", root.display(), e))
        })?;

        let mut report = ScanReport::default();
        for folder in folders {
            report.discovered += 1;
            let name = match folder.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => {
                    report.excluded += 1;
                    continue;
                }
            };

            // Gate 1: folder name and embedded date. Failures are silent.
            let Some((id, date)) = Self::parse_folder_name(&name) else {
                debug!(folder = %name, "excluded: name does not match experiment pattern");
                report.excluded += 1;
                continue;
            };
            if date < self.cutoff_date {
                debug!(folder = %name, %date, "excluded: before cutoff date");
                report.excluded += 1;
                continue;
            }

            match self
                .scan_folder(&folder, &id, date, repository, force)
                .await
            {
                Ok(FolderOutcome::Excluded) => report.excluded += 1,
                Ok(FolderOutcome::SkippedCached) => report.skipped_cached += 1,
                Ok(FolderOutcome::Upserted) => report.upserted += 1,
                Err(e) => {
                    warn!(folder = %name, "scan failed: {}", e);
                    report.errors.push((name, e.to_string()));
                }
            }
        }

        info!(
            discovered = report.discovered,
            excluded = report.excluded,
            skipped = report.skipped_cached,
            upserted = report.upserted,
            failed = report.errors.len(),
            "scan finished"
        );
        Ok(report)
    }

    async fn scan_folder(
        &self,
        folder: &Path,
        id: &str,
        date: NaiveDate,
        repository: &dyn ExperimentRepository,
        force: bool,
    ) -> AppResult<FolderOutcome> {
        let files = self.fs.list_files_recursive(folder)?;
        let flags = Self::detect_flags(&files);

        // Gate 2: the journal file. Checked before the index lookup so a
        // journal-less folder is never upserted, forced or not.
        if !flags.has_journal {
            debug!(folder = %folder.display(), "excluded: no journal file");
            return Ok(FolderOutcome::Excluded);
        }

        if !force && repository.experiment_exists(id).await? {
            debug!(folder = %folder.display(), "already indexed, skipping");
            return Ok(FolderOutcome::SkippedCached);
        }

        let now = Utc::now();
        repository
            .upsert_experiment(ExperimentRecord {
                id: id.to_string(),
                folder: folder.to_path_buf(),
                experiment_date: date,
                flags,
                created_at: now,
                updated_at: now,
            })
            .await?;
        Ok(FolderOutcome::Upserted)
    }
}

enum FolderOutcome {
    Excluded,
    SkippedCached,
    Upserted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_name_parsing() {
        let (id, date) = DirectoryScanner::parse_folder_name("J23-09-06(1)").unwrap();
        assert_eq!(id, "J23-09-06(1)");
        assert_eq!(date, NaiveDate::from_ymd_opt(2023, 9, 6).unwrap());

        // Invalid month: matches the pattern but not the calendar.
        assert!(DirectoryScanner::parse_folder_name("J99-13-40(1)").is_none());
        assert!(DirectoryScanner::parse_folder_name("K23-09-06(1)").is_none());
        assert!(DirectoryScanner::parse_folder_name("J23-09-06").is_none());
    }

    #[test]
    fn flag_detection_over_listing() {
        let files = vec![
            PathBuf::from("J23-09-06(1)/Schweissjournal.txt"),
            PathBuf::from("J23-09-06(1)/messung/Wegmessung_1.txt"),
            PathBuf::from("J23-09-06(1)/scope/trace.h5"),
            PathBuf::from("J23-09-06(1)/cam/weld.avi"),
            PathBuf::from("J23-09-06(1)/notes.txt"),
        ];
        let flags = DirectoryScanner::detect_flags(&files);
        assert!(flags.has_journal);
        assert!(flags.has_position_data);
        assert!(flags.has_hdf5_data);
        assert!(flags.has_video);
        assert!(!flags.has_tensile_data);
        assert!(!flags.has_temperature_data);
    }
}
