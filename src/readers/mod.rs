//! Format readers for the sensor-export files found in experiment folders.
//!
//! Each reader implements the shared [`FormatReader`] contract: a cheap
//! structural `validate` pass, then an all-or-nothing `load` that either
//! produces a complete [`ChannelSet`] or fails without exposing partial
//! state. Format-specific parsing stays behind independent adapters selected
//! by filename pattern, never by inheritance.
//!
//! Per-row parse failures during a load are tolerated: each row's outcome is
//! a `Result<Row, SkipReason>`, counted by [`RowAccounting`], and only a load
//! in which *zero* rows survive fails (with `ParseFailure`).

pub mod position;
pub mod tensile;
pub mod temperature;

#[cfg(feature = "format_hdf5")]
pub mod hdf5;

use crate::channel::{ChannelSet, SourceFormat};
use crate::config::Settings;
use crate::derived;
use crate::error::{AppResult, WeldError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// How many skipped-row reasons are logged per load before the rest are only
/// counted.
pub const ROW_LOG_CAP: usize = 5;

/// Journal file whose presence marks a folder as a real experiment.
pub const JOURNAL_FILE: &str = "schweissjournal.txt";

/// Cooperative cancellation for a running load.
///
/// Readers check the flag between row batches; once observed, no further I/O
/// is issued and partially read buffers are discarded.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Returns `Err(Cancelled)` once the flag is set.
    pub fn check(&self) -> AppResult<()> {
        if self.is_cancelled() {
            Err(WeldError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Result of a structural pre-parse check.
#[derive(Clone, Debug)]
pub struct ValidationReport {
    pub ok: bool,
    pub diagnostics: Vec<String>,
}

impl ValidationReport {
    pub fn passed() -> Self {
        Self {
            ok: true,
            diagnostics: Vec::new(),
        }
    }

    pub fn failed(diagnostics: Vec<String>) -> Self {
        Self {
            ok: false,
            diagnostics,
        }
    }

    /// Converts a failed report into a `Validation` error.
    pub fn into_result(self) -> AppResult<ValidationReport> {
        if self.ok {
            Ok(self)
        } else {
            Err(WeldError::Validation(self.diagnostics))
        }
    }
}

/// Why a single row was dropped during a load.
#[derive(Clone, Debug)]
pub struct SkipReason {
    pub line: usize,
    pub detail: String,
}

/// Tally of row outcomes for one load, with capped logging.
#[derive(Debug, Default)]
pub struct RowAccounting {
    pub valid: usize,
    pub skipped: usize,
}

impl RowAccounting {
    pub fn record_valid(&mut self) {
        self.valid += 1;
    }

    pub fn record_skip(&mut self, reason: SkipReason) {
        if self.skipped < ROW_LOG_CAP {
            warn!(line = reason.line, "skipping row: {}", reason.detail);
        }
        self.skipped += 1;
    }

    /// Fails the load when nothing survived.
    pub fn require_rows(&self, path: &Path) -> AppResult<()> {
        if self.valid == 0 {
            Err(WeldError::ParseFailure(format!(
                "'{}' ({} rows skipped)",
                path.display(),
                self.skipped
            )))
        } else {
            Ok(())
        }
    }

    pub fn summary(&self) -> String {
        format!("{} rows parsed, {} skipped", self.valid, self.skipped)
    }
}

/// Shared contract implemented by every format adapter.
pub trait FormatReader: Send {
    fn format(&self) -> SourceFormat;

    fn path(&self) -> &Path;

    /// Structural/size check before any real parsing.
    fn validate(&self) -> AppResult<ValidationReport>;

    /// Deterministic single-pass load. Either a complete channel set comes
    /// back or an error does; nothing partial is ever exposed.
    fn load(&self, cancel: &CancelFlag) -> AppResult<ChannelSet>;
}

/// Classifies a file by the naming conventions of the rig exports.
pub fn detect_format(path: &Path) -> Option<SourceFormat> {
    let name = path.file_name()?.to_str()?.to_lowercase();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);
    match ext.as_deref() {
        Some("h5") | Some("hdf5") => return Some(SourceFormat::Hdf5),
        _ => {}
    }
    if name.contains("wegmessung") {
        Some(SourceFormat::Position)
    } else if name.contains("zugversuch") {
        Some(SourceFormat::Tensile)
    } else if name.contains("temperatur") {
        Some(SourceFormat::Temperature)
    } else {
        None
    }
}

/// True when the file looks like a recording of the welding video camera.
pub fn is_video_file(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .as_deref(),
        Some("avi") | Some("mp4") | Some("mov")
    )
}

/// True when the file is the experiment journal.
pub fn is_journal_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.eq_ignore_ascii_case(JOURNAL_FILE))
        .unwrap_or(false)
}

/// Builds the adapter for a format.
///
/// The HDF5 adapter is only available with the `format_hdf5` feature; without
/// it this returns `FeatureNotEnabled` so callers get an actionable message
/// instead of a missing-file error.
pub fn reader_for(
    format: SourceFormat,
    path: PathBuf,
    settings: &Settings,
) -> AppResult<Box<dyn FormatReader>> {
    match format {
        SourceFormat::Position => Ok(Box::new(position::PositionReader::new(path))),
        SourceFormat::Tensile => Ok(Box::new(tensile::TensileReader::new(path))),
        SourceFormat::Temperature => Ok(Box::new(temperature::TemperatureReader::new(path))),
        #[cfg(feature = "format_hdf5")]
        SourceFormat::Hdf5 => Ok(Box::new(hdf5::Hdf5Reader::new(
            path,
            settings.resample.hdf5_stride,
        ))),
        #[cfg(not(feature = "format_hdf5"))]
        SourceFormat::Hdf5 => {
            let _ = (path, settings);
            Err(WeldError::FeatureNotEnabled("format_hdf5".to_string()))
        }
    }
}

/// Validates, loads and merges the derived channels for one source file.
///
/// This is the single entry point the service layer uses; the derived
/// catalogue is applied here so a returned set always carries both raw and
/// calculated channels.
pub fn load_channel_set(
    format: SourceFormat,
    path: PathBuf,
    settings: &Settings,
    cancel: &CancelFlag,
) -> AppResult<ChannelSet> {
    let reader = reader_for(format, path, settings)?;
    reader.validate()?.into_result()?;
    let mut set = reader.load(cancel)?;
    derived::apply(&mut set);
    Ok(set)
}

/// Shared pre-parse checks: existence and a non-empty file.
pub(crate) fn validate_file(path: &Path) -> AppResult<ValidationReport> {
    if !path.is_file() {
        return Err(WeldError::NotFound(path.display().to_string()));
    }
    let size = std::fs::metadata(path)?.len();
    if size == 0 {
        return Ok(ValidationReport::failed(vec![format!(
            "'{}' is empty",
            path.display()
        )]));
    }
    Ok(ValidationReport::passed())
}

/// Builds the common metadata block for a loaded file.
pub(crate) fn file_metadata(
    path: &Path,
    format: SourceFormat,
) -> AppResult<crate::channel::ReaderMetadata> {
    let file_size_bytes = std::fs::metadata(path)?.len();
    Ok(crate::channel::ReaderMetadata {
        path: path.to_path_buf(),
        file_size_bytes,
        processed_at: chrono::Utc::now(),
        format,
        diagnostics: Vec::new(),
        downsampling_stride: None,
    })
}
