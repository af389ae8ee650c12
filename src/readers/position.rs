//! Reader for the position-sensor export.
//!
//! Tab-delimited, no header, `#`-prefixed comment lines. Three columns:
//! wall-clock datetime (`yyyy-MM-dd HH:mm:ss.ffffff`), unix epoch seconds
//! with fraction, raw position counts. The raw counts are converted to
//! millimetres of travel via [`crate::calibration::position_mm`], and the
//! time axis is made relative to the first sample.

use crate::calibration::position_mm;
use crate::channel::{Channel, ChannelKind, ChannelSet, SourceFormat};
use crate::error::AppResult;
use crate::readers::{
    file_metadata, validate_file, CancelFlag, FormatReader, RowAccounting, SkipReason,
    ValidationReport,
};
use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};

/// Datetime layout of the first column.
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Rows between cancellation checks.
const CANCEL_CHECK_INTERVAL: usize = 1024;

pub struct PositionReader {
    path: PathBuf,
}

impl PositionReader {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn csv_reader(&self) -> AppResult<csv::Reader<std::fs::File>> {
        Ok(csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .comment(Some(b'#'))
            .flexible(true)
            .from_path(&self.path)?)
    }

    fn parse_row(record: &csv::StringRecord, line: usize) -> Result<(f64, f64), SkipReason> {
        if record.len() != 3 {
            return Err(SkipReason {
                line,
                detail: format!("expected 3 columns, got {}", record.len()),
            });
        }
        NaiveDateTime::parse_from_str(record[0].trim(), DATETIME_FORMAT).map_err(|e| {
            SkipReason {
                line,
                detail: format!("bad datetime '{}': {}", &record[0], e),
            }
        })?;
        let unix: f64 = record[1].trim().parse().map_err(|_| SkipReason {
            line,
            detail: format!("bad unix timestamp '{}'", &record[1]),
        })?;
        let raw: f64 = record[2].trim().parse().map_err(|_| SkipReason {
            line,
            detail: format!("bad raw position '{}'", &record[2]),
        })?;
        Ok((unix, raw))
    }
}

impl FormatReader for PositionReader {
    fn format(&self) -> SourceFormat {
        SourceFormat::Position
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn validate(&self) -> AppResult<ValidationReport> {
        validate_file(&self.path)
    }

    fn load(&self, cancel: &CancelFlag) -> AppResult<ChannelSet> {
        let mut reader = self.csv_reader()?;
        let mut accounting = RowAccounting::default();

        let mut first_unix: Option<f64> = None;
        let mut last_rel: f64 = f64::NEG_INFINITY;
        let mut time = Vec::new();
        let mut values = Vec::new();

        for (idx, record) in reader.records().enumerate() {
            if idx % CANCEL_CHECK_INTERVAL == 0 {
                cancel.check()?;
            }
            let line = idx + 1;
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    accounting.record_skip(SkipReason {
                        line,
                        detail: e.to_string(),
                    });
                    continue;
                }
            };
            match Self::parse_row(&record, line) {
                Ok((unix, raw)) => {
                    let first = *first_unix.get_or_insert(unix);
                    let rel = (unix - first) * 1000.0;
                    if rel < last_rel {
                        accounting.record_skip(SkipReason {
                            line,
                            detail: format!("timestamp regression ({} < {})", rel, last_rel),
                        });
                        continue;
                    }
                    last_rel = rel;
                    time.push(rel);
                    values.push(position_mm(raw));
                    accounting.record_valid();
                }
                Err(reason) => accounting.record_skip(reason),
            }
        }

        accounting.require_rows(&self.path)?;

        let mut metadata = file_metadata(&self.path, SourceFormat::Position)?;
        metadata.diagnostics.push(accounting.summary());
        if let Some(first) = first_unix {
            metadata
                .diagnostics
                .push(format!("first sample at unix {}", first));
        }

        let mut set = ChannelSet::new(metadata);
        set.insert(Channel {
            id: "position".to_string(),
            label: "Slide position".to_string(),
            unit: "mm".to_string(),
            kind: ChannelKind::TimeSeries,
            time,
            values,
            sample_rate_hz: None,
        });
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WeldError;
    use std::io::Write;

    fn write_fixture(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .prefix("Wegmessung_")
            .suffix(".txt")
            .tempfile()
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn parses_rows_and_applies_transform() {
        let file = write_fixture(
            "# Wegmessung Export\n\
             2023-09-06 12:19:03.250000\t1693995543.25\t10.0\n\
             2023-09-06 12:19:03.750000\t1693995543.75\t12.5\n",
        );
        let reader = PositionReader::new(file.path().to_path_buf());
        let set = reader.load(&CancelFlag::new()).unwrap();
        let ch = set.channel("position").unwrap();
        assert_eq!(ch.time, vec![0.0, 500.0]);
        assert!((ch.values[0] - 39.73).abs() < 1e-9);
        assert!((ch.values[1] - 37.23).abs() < 1e-9);
    }

    #[test]
    fn bad_rows_are_skipped_not_fatal() {
        let file = write_fixture(
            "2023-09-06 12:19:03.250000\t1693995543.25\t10.0\n\
             not-a-date\t1693995543.50\t11.0\n\
             2023-09-06 12:19:03.750000\t1693995543.75\t12.0\n",
        );
        let reader = PositionReader::new(file.path().to_path_buf());
        let set = reader.load(&CancelFlag::new()).unwrap();
        assert_eq!(set.channel("position").unwrap().len(), 2);
    }

    #[test]
    fn all_rows_bad_is_parse_failure() {
        let file = write_fixture("garbage\nmore garbage\n");
        let reader = PositionReader::new(file.path().to_path_buf());
        assert!(matches!(
            reader.load(&CancelFlag::new()),
            Err(WeldError::ParseFailure(_))
        ));
    }

    #[test]
    fn cancelled_load_stops_immediately() {
        let file = write_fixture("2023-09-06 12:19:03.250000\t1693995543.25\t10.0\n");
        let reader = PositionReader::new(file.path().to_path_buf());
        let cancel = CancelFlag::new();
        cancel.cancel();
        assert!(matches!(
            reader.load(&cancel),
            Err(WeldError::Cancelled)
        ));
    }
}
