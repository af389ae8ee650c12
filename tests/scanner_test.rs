//! Directory scanner integration tests.
//!
//! Exercises the per-folder state machine over real temp-dir trees: the
//! name/date gate, the journal gate, cached skips, forced re-scans and the
//! error-accumulation policy.

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use weld_daq::error::{AppResult, WeldError};
use weld_daq::scan::{
    DirectoryScanner, ExperimentRepository, InMemoryRepository, ScanFs, StdFs,
};

fn cutoff() -> chrono::NaiveDate {
    chrono::NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()
}

fn make_folder(root: &Path, name: &str, files: &[&str]) {
    let folder = root.join(name);
    for file in files {
        let path = folder.join(file);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "x").unwrap();
    }
    fs::create_dir_all(&folder).unwrap();
}

#[tokio::test]
async fn qualifying_folder_is_upserted_with_flags() {
    let dir = TempDir::new().unwrap();
    make_folder(
        dir.path(),
        "J23-09-06(1)",
        &[
            "Schweissjournal.txt",
            "messung/Wegmessung_1.txt",
            "Zugversuch_1.csv",
            "cam/weld.mp4",
        ],
    );

    let scanner = DirectoryScanner::new(cutoff());
    let repository = InMemoryRepository::new();
    let report = scanner.scan(dir.path(), &repository, false).await.unwrap();

    assert_eq!(report.discovered, 1);
    assert_eq!(report.upserted, 1);
    assert!(report.errors.is_empty());

    let records = repository.records().await;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.id, "J23-09-06(1)");
    assert_eq!(
        record.experiment_date,
        chrono::NaiveDate::from_ymd_opt(2023, 9, 6).unwrap()
    );
    assert!(record.flags.has_journal);
    assert!(record.flags.has_position_data);
    assert!(record.flags.has_tensile_data);
    assert!(record.flags.has_video);
    assert!(!record.flags.has_temperature_data);
    assert!(!record.flags.has_hdf5_data);
}

#[tokio::test]
async fn invalid_month_is_silently_excluded() {
    let dir = TempDir::new().unwrap();
    make_folder(dir.path(), "J99-13-40(1)", &["Schweissjournal.txt"]);

    let scanner = DirectoryScanner::new(cutoff());
    let repository = InMemoryRepository::new();
    let report = scanner.scan(dir.path(), &repository, false).await.unwrap();

    assert_eq!(report.excluded, 1);
    assert_eq!(report.upserted, 0);
    assert_eq!(report.skipped_cached, 0);
    assert!(report.errors.is_empty());
    assert!(repository.records().await.is_empty());
}

#[tokio::test]
async fn pre_cutoff_folders_are_excluded() {
    let dir = TempDir::new().unwrap();
    make_folder(dir.path(), "J19-06-12(1)", &["Schweissjournal.txt"]);

    let scanner = DirectoryScanner::new(cutoff());
    let repository = InMemoryRepository::new();
    let report = scanner.scan(dir.path(), &repository, false).await.unwrap();

    assert_eq!(report.excluded, 1);
    assert!(repository.records().await.is_empty());
}

#[tokio::test]
async fn journal_gate_holds_even_when_forced() {
    let dir = TempDir::new().unwrap();
    make_folder(
        dir.path(),
        "J23-09-06(1)",
        &["Wegmessung_1.txt", "Zugversuch_1.csv"],
    );

    let scanner = DirectoryScanner::new(cutoff());
    let repository = InMemoryRepository::new();

    for force in [false, true] {
        let report = scanner.scan(dir.path(), &repository, force).await.unwrap();
        assert_eq!(report.excluded, 1, "force={}", force);
        assert_eq!(report.upserted, 0, "force={}", force);
        assert!(report.errors.is_empty());
    }
    assert!(repository.records().await.is_empty());
}

#[tokio::test]
async fn second_scan_skips_indexed_folders_unless_forced() {
    let dir = TempDir::new().unwrap();
    make_folder(dir.path(), "J23-09-06(1)", &["Schweissjournal.txt"]);

    let scanner = DirectoryScanner::new(cutoff());
    let repository = InMemoryRepository::new();

    let first = scanner.scan(dir.path(), &repository, false).await.unwrap();
    assert_eq!(first.upserted, 1);

    let second = scanner.scan(dir.path(), &repository, false).await.unwrap();
    assert_eq!(second.upserted, 0);
    assert_eq!(second.skipped_cached, 1);

    // A new export appeared; a forced scan refreshes the flags.
    make_folder(dir.path(), "J23-09-06(1)", &["Temperaturlog.csv"]);
    let forced = scanner.scan(dir.path(), &repository, true).await.unwrap();
    assert_eq!(forced.upserted, 1);
    let record = &repository.records().await[0];
    assert!(record.flags.has_temperature_data);
    assert!(record.created_at <= record.updated_at);
}

#[tokio::test]
async fn missing_root_aborts_the_run() {
    let scanner = DirectoryScanner::new(cutoff());
    let repository = InMemoryRepository::new();
    let err = scanner
        .scan(Path::new("/definitely/not/here"), &repository, false)
        .await
        .unwrap_err();
    assert!(matches!(err, WeldError::ScanAborted(_)));
}

/// Filesystem wrapper that fails the recursive listing for one folder.
struct FailingFs {
    inner: StdFs,
    poison: String,
}

impl ScanFs for FailingFs {
    fn list_dirs(&self, root: &Path) -> AppResult<Vec<PathBuf>> {
        self.inner.list_dirs(root)
    }

    fn list_files_recursive(&self, dir: &Path) -> AppResult<Vec<PathBuf>> {
        if dir.file_name().and_then(|n| n.to_str()) == Some(self.poison.as_str()) {
            return Err(WeldError::Repository("disk on fire".to_string()));
        }
        self.inner.list_files_recursive(dir)
    }
}

#[tokio::test]
async fn per_folder_failure_is_collected_and_scan_continues() {
    let dir = TempDir::new().unwrap();
    make_folder(dir.path(), "J23-09-06(1)", &["Schweissjournal.txt"]);
    make_folder(dir.path(), "J23-09-07(1)", &["Schweissjournal.txt"]);

    let scanner = DirectoryScanner::with_fs(
        Box::new(FailingFs {
            inner: StdFs,
            poison: "J23-09-06(1)".to_string(),
        }),
        cutoff(),
    );
    let repository = InMemoryRepository::new();
    let report = scanner.scan(dir.path(), &repository, false).await.unwrap();

    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].0, "J23-09-06(1)");
    assert_eq!(report.upserted, 1);
    assert!(repository.experiment_exists("J23-09-07(1)").await.unwrap());
}
