//! Reader for the tensile-test machine export.
//!
//! Semicolon-delimited with a fixed prelude: rows 0 and 1 are a metadata
//! field/value header (German field names, e.g. `Pruefnummer`, `Werkstoff`,
//! `Pruefgeschwindigkeit`), row 2 is an empty separator, row 3 carries the
//! three section labels. Every data row holds three `{X=<num>, Y=<num>}`
//! coordinate-pair tokens, one per section, which decompose into a
//! (force kN, displacement mm, time s) triple. The three pairs describe the
//! same sample, so force/time/displacement must agree across them within a
//! small epsilon; a mismatch is logged as a warning, never a failure.

use crate::channel::{Channel, ChannelKind, ChannelSet, SourceFormat};
use crate::error::AppResult;
use crate::readers::{
    file_metadata, validate_file, CancelFlag, FormatReader, RowAccounting, SkipReason,
    ValidationReport, ROW_LOG_CAP,
};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Expected row-3 section labels, in order.
const SECTION_LABELS: [&str; 3] = ["FORCE/WAY DATA", "FORCE/TIME DATA", "WAY/TIME DATA"];

/// Agreement tolerance for the cross-pair consistency check.
const CROSS_CHECK_EPS: f64 = 1e-3;

/// Rows between cancellation checks.
const CANCEL_CHECK_INTERVAL: usize = 512;

pub struct TensileReader {
    path: PathBuf,
}

/// One sample of the tensile curve.
struct Triple {
    force_kn: f64,
    displacement_mm: f64,
    time_s: f64,
}

impl TensileReader {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn lines(&self) -> AppResult<impl Iterator<Item = std::io::Result<String>>> {
        Ok(BufReader::new(File::open(&self.path)?).lines())
    }

    /// Checks the fixed prelude and returns its findings.
    fn check_prelude(rows: &[String]) -> Vec<String> {
        let mut problems = Vec::new();
        if rows.len() < 4 {
            problems.push(format!(
                "file has only {} rows, expected metadata header, separator and section labels",
                rows.len()
            ));
            return problems;
        }
        if !rows[2].trim().trim_matches(';').is_empty() {
            problems.push("row 2 is not an empty separator".to_string());
        }
        let labels: Vec<&str> = rows[3].split(';').map(str::trim).collect();
        for (i, expected) in SECTION_LABELS.iter().enumerate() {
            match labels.get(i) {
                Some(found) if found.eq_ignore_ascii_case(expected) => {}
                Some(found) => problems.push(format!(
                    "section label {} is '{}', expected '{}'",
                    i, found, expected
                )),
                None => problems.push(format!("section label '{}' is missing", expected)),
            }
        }
        problems
    }

    /// Pairs up the German metadata header (row 0 names, row 1 values).
    fn header_fields(rows: &[String]) -> Vec<String> {
        let names: Vec<&str> = rows.first().map(|r| r.split(';').collect()).unwrap_or_default();
        let values: Vec<&str> = rows.get(1).map(|r| r.split(';').collect()).unwrap_or_default();
        names
            .iter()
            .zip(values.iter())
            .filter(|(n, _)| !n.trim().is_empty())
            .map(|(n, v)| format!("{}={}", n.trim(), v.trim()))
            .collect()
    }

    fn parse_row(row: &str, line: usize) -> Result<(Triple, bool), SkipReason> {
        let tokens: Vec<&str> = row.split(';').map(str::trim).collect();
        if tokens.len() < 3 {
            return Err(SkipReason {
                line,
                detail: format!("expected 3 coordinate pairs, got {}", tokens.len()),
            });
        }
        let force_way = parse_coordinate_pair(tokens[0]).ok_or_else(|| SkipReason {
            line,
            detail: format!("bad FORCE/WAY pair '{}'", tokens[0]),
        })?;
        let force_time = parse_coordinate_pair(tokens[1]).ok_or_else(|| SkipReason {
            line,
            detail: format!("bad FORCE/TIME pair '{}'", tokens[1]),
        })?;
        let way_time = parse_coordinate_pair(tokens[2]).ok_or_else(|| SkipReason {
            line,
            detail: format!("bad WAY/TIME pair '{}'", tokens[2]),
        })?;

        // FORCE/WAY: (way, force); FORCE/TIME: (time, force); WAY/TIME: (time, way)
        let consistent = (force_way.1 - force_time.1).abs() <= CROSS_CHECK_EPS
            && (force_way.0 - way_time.1).abs() <= CROSS_CHECK_EPS
            && (force_time.0 - way_time.0).abs() <= CROSS_CHECK_EPS;

        Ok((
            Triple {
                force_kn: force_time.1,
                displacement_mm: way_time.1,
                time_s: force_time.0,
            },
            consistent,
        ))
    }
}

/// Parses one `{X=<num>, Y=<num>}` token.
pub fn parse_coordinate_pair(token: &str) -> Option<(f64, f64)> {
    let inner = token.trim().strip_prefix('{')?.strip_suffix('}')?;
    let mut x = None;
    let mut y = None;
    for part in inner.split(',') {
        let (key, value) = part.split_once('=')?;
        let parsed: f64 = value.trim().parse().ok()?;
        match key.trim() {
            "X" => x = Some(parsed),
            "Y" => y = Some(parsed),
            _ => return None,
        }
    }
    Some((x?, y?))
}

impl FormatReader for TensileReader {
    fn format(&self) -> SourceFormat {
        SourceFormat::Tensile
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn validate(&self) -> AppResult<ValidationReport> {
        let report = validate_file(&self.path)?;
        if !report.ok {
            return Ok(report);
        }
        let mut prelude = Vec::with_capacity(4);
        for line in self.lines()?.take(4) {
            prelude.push(line?);
        }
        let problems = Self::check_prelude(&prelude);
        if problems.is_empty() {
            Ok(ValidationReport::passed())
        } else {
            Ok(ValidationReport::failed(problems))
        }
    }

    fn load(&self, cancel: &CancelFlag) -> AppResult<ChannelSet> {
        let mut rows = Vec::new();
        for (idx, line) in self.lines()?.enumerate() {
            if idx % CANCEL_CHECK_INTERVAL == 0 {
                cancel.check()?;
            }
            rows.push(line?);
        }

        let mut accounting = RowAccounting::default();
        let mut mismatches = 0usize;
        let mut last_time = f64::NEG_INFINITY;
        let mut triples: Vec<Triple> = Vec::new();

        for (idx, row) in rows.iter().enumerate().skip(4) {
            if row.trim().trim_matches(';').is_empty() {
                continue;
            }
            let line = idx + 1;
            match Self::parse_row(row, line) {
                Ok((triple, consistent)) => {
                    if !consistent {
                        if mismatches < ROW_LOG_CAP {
                            warn!(
                                line,
                                "coordinate pairs disagree beyond {} at t={}",
                                CROSS_CHECK_EPS,
                                triple.time_s
                            );
                        }
                        mismatches += 1;
                    }
                    if triple.time_s < last_time {
                        accounting.record_skip(SkipReason {
                            line,
                            detail: format!(
                                "timestamp regression ({} < {})",
                                triple.time_s, last_time
                            ),
                        });
                        continue;
                    }
                    last_time = triple.time_s;
                    triples.push(triple);
                    accounting.record_valid();
                }
                Err(reason) => accounting.record_skip(reason),
            }
        }

        accounting.require_rows(&self.path)?;

        let mut metadata = file_metadata(&self.path, SourceFormat::Tensile)?;
        metadata.diagnostics.extend(Self::header_fields(&rows));
        metadata.diagnostics.push(accounting.summary());
        if mismatches > 0 {
            metadata
                .diagnostics
                .push(format!("{} rows with cross-pair mismatch", mismatches));
        }

        let time: Vec<f64> = triples.iter().map(|t| t.time_s).collect();
        let force: Vec<f64> = triples.iter().map(|t| t.force_kn).collect();
        let displacement: Vec<f64> = triples.iter().map(|t| t.displacement_mm).collect();

        let mut set = ChannelSet::new(metadata);
        set.insert(Channel {
            id: "force_time".to_string(),
            label: "Force".to_string(),
            unit: "kN".to_string(),
            kind: ChannelKind::TimeSeries,
            time: time.clone(),
            values: force.clone(),
            sample_rate_hz: None,
        });
        set.insert(Channel {
            id: "displacement_time".to_string(),
            label: "Displacement".to_string(),
            unit: "mm".to_string(),
            kind: ChannelKind::TimeSeries,
            time,
            values: displacement.clone(),
            sample_rate_hz: None,
        });
        set.insert(Channel {
            id: "force_displacement".to_string(),
            label: "Force over displacement".to_string(),
            unit: "kN".to_string(),
            kind: ChannelKind::XyRelationship,
            time: displacement,
            values: force,
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

    const PRELUDE: &str = "Pruefnummer;Werkstoff;Probenbreite;Pruefgeschwindigkeit;Datum\n\
                           J23-09-06(1);S355;30 mm;10 mm/min;06.09.2023\n\
                           ;;;;\n\
                           FORCE/WAY DATA;FORCE/TIME DATA;WAY/TIME DATA\n";

    fn write_fixture(data_rows: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .prefix("Zugversuch_")
            .suffix(".csv")
            .tempfile()
            .unwrap();
        file.write_all(PRELUDE.as_bytes()).unwrap();
        file.write_all(data_rows.as_bytes()).unwrap();
        file
    }

    #[test]
    fn coordinate_pair_literals() {
        assert_eq!(
            parse_coordinate_pair("{X=0.013733, Y=2.268685}"),
            Some((0.013733, 2.268685))
        );
        assert_eq!(parse_coordinate_pair("{X=1, Ybroken}"), None);
        assert_eq!(parse_coordinate_pair("X=1, Y=2"), None);
    }

    #[test]
    fn decomposes_rows_into_three_channels() {
        let file = write_fixture(
            "{X=0.01, Y=2.5};{X=0.0, Y=2.5};{X=0.0, Y=0.01}\n\
             {X=0.02, Y=5.0};{X=0.1, Y=5.0};{X=0.1, Y=0.02}\n",
        );
        let reader = TensileReader::new(file.path().to_path_buf());
        let set = reader.load(&CancelFlag::new()).unwrap();

        let force = set.channel("force_time").unwrap();
        assert_eq!(force.time, vec![0.0, 0.1]);
        assert_eq!(force.values, vec![2.5, 5.0]);

        let way = set.channel("displacement_time").unwrap();
        assert_eq!(way.values, vec![0.01, 0.02]);

        let fw = set.channel("force_displacement").unwrap();
        assert_eq!(fw.kind, ChannelKind::XyRelationship);
        assert_eq!(fw.time, vec![0.01, 0.02]);
        assert_eq!(fw.values, vec![2.5, 5.0]);
    }

    #[test]
    fn cross_pair_mismatch_is_a_warning_not_a_failure() {
        let file = write_fixture("{X=0.01, Y=9.9};{X=0.0, Y=2.5};{X=0.0, Y=0.01}\n");
        let reader = TensileReader::new(file.path().to_path_buf());
        let set = reader.load(&CancelFlag::new()).unwrap();
        assert_eq!(set.channel("force_time").unwrap().len(), 1);
        assert!(set
            .metadata
            .diagnostics
            .iter()
            .any(|d| d.contains("cross-pair mismatch")));
    }

    #[test]
    fn broken_pair_skips_the_row() {
        let file = write_fixture(
            "{X=1, Ybroken};{X=0.0, Y=2.5};{X=0.0, Y=0.01}\n\
             {X=0.02, Y=5.0};{X=0.1, Y=5.0};{X=0.1, Y=0.02}\n",
        );
        let reader = TensileReader::new(file.path().to_path_buf());
        let set = reader.load(&CancelFlag::new()).unwrap();
        assert_eq!(set.channel("force_time").unwrap().len(), 1);
    }

    #[test]
    fn header_fields_land_in_diagnostics() {
        let file = write_fixture("{X=0.01, Y=2.5};{X=0.0, Y=2.5};{X=0.0, Y=0.01}\n");
        let reader = TensileReader::new(file.path().to_path_buf());
        let set = reader.load(&CancelFlag::new()).unwrap();
        assert!(set
            .metadata
            .diagnostics
            .iter()
            .any(|d| d == "Werkstoff=S355"));
    }

    #[test]
    fn missing_section_labels_fail_validation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"a;b\n1;2\n;\nWRONG;LABELS;HERE\n").unwrap();
        let reader = TensileReader::new(file.path().to_path_buf());
        let report = reader.validate().unwrap();
        assert!(!report.ok);
        assert!(matches!(
            report.into_result(),
            Err(WeldError::Validation(_))
        ));
    }
}
