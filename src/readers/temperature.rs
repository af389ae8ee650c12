//! Reader for the temperature-logger export.
//!
//! Comma-delimited with a header row; numeric fields use the German decimal
//! comma and are therefore quoted. Column 0 is a unix timestamp. Remaining
//! columns are matched against the header by substring rules: columns whose
//! header mentions the welding zone (`Schweisszone`) are averaged into a
//! single `temp_avg` channel, columns with a numbered probe (`Kanal 3`,
//! `Channel 12`) become `temp_<n>` channels, and everything else is ignored.

use crate::calibration::parse_decimal_comma;
use crate::channel::{Channel, ChannelKind, ChannelSet, SourceFormat};
use crate::error::AppResult;
use crate::readers::{
    file_metadata, validate_file, CancelFlag, FormatReader, RowAccounting, SkipReason,
    ValidationReport,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

/// Header substring marking a welding-zone column (case-insensitive).
const ZONE_MARKER: &str = "schweisszone";

/// Numbered probe headers, e.g. `Kanal 3` or `Channel 12`.
static PROBE_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)] // pattern is a compile-time constant
    Regex::new(r"(?i)(?:kanal|channel)\s*(\d+)\s*$").unwrap()
});

/// Rows between cancellation checks.
const CANCEL_CHECK_INTERVAL: usize = 1024;

/// What a header column contributes to.
#[derive(Clone, Debug, PartialEq, Eq)]
enum ColumnRole {
    WeldingZone,
    Probe(u32),
    Ignored,
}

fn classify_header(header: &str) -> ColumnRole {
    if header.to_lowercase().contains(ZONE_MARKER) {
        ColumnRole::WeldingZone
    } else if let Some(caps) = PROBE_RE.captures(header) {
        match caps[1].parse() {
            Ok(n) => ColumnRole::Probe(n),
            Err(_) => ColumnRole::Ignored,
        }
    } else {
        ColumnRole::Ignored
    }
}

pub struct TemperatureReader {
    path: PathBuf,
}

impl TemperatureReader {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn csv_reader(&self) -> AppResult<csv::Reader<std::fs::File>> {
        Ok(csv::ReaderBuilder::new()
            .delimiter(b',')
            .has_headers(true)
            .flexible(true)
            .from_path(&self.path)?)
    }
}

impl FormatReader for TemperatureReader {
    fn format(&self) -> SourceFormat {
        SourceFormat::Temperature
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn validate(&self) -> AppResult<ValidationReport> {
        let report = validate_file(&self.path)?;
        if !report.ok {
            return Ok(report);
        }
        let mut reader = self.csv_reader()?;
        let headers = reader.headers()?.clone();
        let matched = headers
            .iter()
            .skip(1)
            .filter(|h| classify_header(h) != ColumnRole::Ignored)
            .count();
        if matched == 0 {
            return Ok(ValidationReport::failed(vec![
                "no welding-zone or numbered probe columns in header".to_string(),
            ]));
        }
        Ok(ValidationReport::passed())
    }

    fn load(&self, cancel: &CancelFlag) -> AppResult<ChannelSet> {
        let mut reader = self.csv_reader()?;
        let headers = reader.headers()?.clone();
        let roles: Vec<ColumnRole> = headers.iter().skip(1).map(classify_header).collect();

        let zone_columns: Vec<usize> = roles
            .iter()
            .enumerate()
            .filter(|(_, r)| **r == ColumnRole::WeldingZone)
            .map(|(i, _)| i + 1)
            .collect();
        let mut probe_columns: Vec<(u32, usize)> = roles
            .iter()
            .enumerate()
            .filter_map(|(i, r)| match r {
                ColumnRole::Probe(n) => Some((*n, i + 1)),
                _ => None,
            })
            .collect();
        probe_columns.sort_unstable();

        let mut accounting = RowAccounting::default();
        let mut first_unix: Option<f64> = None;
        let mut last_rel = f64::NEG_INFINITY;
        let mut time = Vec::new();
        let mut zone_avg = Vec::new();
        let mut probes: Vec<Vec<f64>> = vec![Vec::new(); probe_columns.len()];

        for (idx, record) in reader.records().enumerate() {
            if idx % CANCEL_CHECK_INTERVAL == 0 {
                cancel.check()?;
            }
            let line = idx + 2; // past the header row
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

            let Some(unix) = record.get(0).and_then(parse_decimal_comma) else {
                accounting.record_skip(SkipReason {
                    line,
                    detail: format!("bad timestamp '{}'", record.get(0).unwrap_or("")),
                });
                continue;
            };

            let zone_values: Option<Vec<f64>> = zone_columns
                .iter()
                .map(|&col| record.get(col).and_then(parse_decimal_comma))
                .collect();
            let probe_values: Option<Vec<f64>> = probe_columns
                .iter()
                .map(|&(_, col)| record.get(col).and_then(parse_decimal_comma))
                .collect();
            let (Some(zone_values), Some(probe_values)) = (zone_values, probe_values) else {
                accounting.record_skip(SkipReason {
                    line,
                    detail: "unparseable temperature cell".to_string(),
                });
                continue;
            };

            let first = *first_unix.get_or_insert(unix);
            let rel = unix - first;
            if rel < last_rel {
                accounting.record_skip(SkipReason {
                    line,
                    detail: format!("timestamp regression ({} < {})", rel, last_rel),
                });
                continue;
            }
            last_rel = rel;

            time.push(rel);
            if !zone_values.is_empty() {
                zone_avg.push(zone_values.iter().sum::<f64>() / zone_values.len() as f64);
            }
            for (series, value) in probes.iter_mut().zip(probe_values) {
                series.push(value);
            }
            accounting.record_valid();
        }

        accounting.require_rows(&self.path)?;

        let mut metadata = file_metadata(&self.path, SourceFormat::Temperature)?;
        metadata.diagnostics.push(accounting.summary());
        metadata.diagnostics.push(format!(
            "{} welding-zone columns, {} numbered probes",
            zone_columns.len(),
            probe_columns.len()
        ));

        let mut set = ChannelSet::new(metadata);
        if !zone_columns.is_empty() {
            set.insert(Channel {
                id: "temp_avg".to_string(),
                label: "Average welding-zone temperature".to_string(),
                unit: "°C".to_string(),
                kind: ChannelKind::TimeSeries,
                time: time.clone(),
                values: zone_avg,
                sample_rate_hz: None,
            });
        }
        for ((n, _), values) in probe_columns.iter().zip(probes) {
            set.insert(Channel {
                id: format!("temp_{}", n),
                label: format!("Probe {} temperature", n),
                unit: "°C".to_string(),
                kind: ChannelKind::TimeSeries,
                time: time.clone(),
                values,
                sample_rate_hz: None,
            });
        }
        Ok(set)
    }
}
