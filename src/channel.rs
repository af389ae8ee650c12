//! Core channel data types shared by every format reader.
//!
//! A [`Channel`] is a named, unit-tagged sequence of samples, either indexed
//! by time (`TimeSeries`) or paired against another quantity
//! (`XyRelationship`, e.g. force over displacement). A [`ChannelSet`] is the
//! all-or-nothing output of one loaded reader: raw and derived channels
//! merged, plus metadata about the source file.

use crate::error::{AppResult, WeldError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// How a channel's two sample arrays relate to each other.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    TimeSeries,
    XyRelationship,
}

/// The source file format a channel set was parsed from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Hdf5,
    Position,
    Tensile,
    Temperature,
}

impl std::fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SourceFormat::Hdf5 => "hdf5",
            SourceFormat::Position => "position",
            SourceFormat::Tensile => "tensile",
            SourceFormat::Temperature => "temperature",
        };
        f.write_str(name)
    }
}

/// A single named channel.
///
/// For `TimeSeries` channels `time` holds the time axis; for
/// `XyRelationship` channels it holds the x axis. Both arrays are always the
/// same length, and the time/x axis is monotonically non-decreasing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub label: String,
    pub unit: String,
    pub kind: ChannelKind,
    pub time: Vec<f64>,
    pub values: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate_hz: Option<f64>,
}

impl Channel {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// First and last entry of the time (or x) axis.
    pub fn time_range(&self) -> Option<TimeRange> {
        match (self.time.first(), self.time.last()) {
            (Some(&start), Some(&end)) => Some(TimeRange { start, end }),
            _ => None,
        }
    }

    /// Summary statistics for this channel.
    pub fn statistics(&self) -> ChannelStatistics {
        match self.kind {
            ChannelKind::TimeSeries => {
                let values = AxisStats::over(&self.values);
                let std_dev = std_dev(&self.values, values.mean);
                ChannelStatistics::TimeSeries {
                    min: values.min,
                    max: values.max,
                    mean: values.mean,
                    std_dev,
                    count: self.values.len(),
                }
            }
            ChannelKind::XyRelationship => {
                let peak = self
                    .values
                    .iter()
                    .copied()
                    .enumerate()
                    .fold(None::<(usize, f64)>, |best, (i, v)| match best {
                        Some((_, b)) if b >= v => best,
                        _ => Some((i, v)),
                    });
                let (peak_y, x_at_peak_y) = match peak {
                    Some((i, v)) => (v, self.time.get(i).copied().unwrap_or(f64::NAN)),
                    None => (f64::NAN, f64::NAN),
                };
                ChannelStatistics::Xy {
                    x: AxisStats::over(&self.time),
                    y: AxisStats::over(&self.values),
                    peak_y,
                    x_at_peak_y,
                    count: self.values.len(),
                }
            }
        }
    }
}

/// Inclusive bounds of a channel's time (or x) axis.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    fn union(self, other: TimeRange) -> TimeRange {
        TimeRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// Min/max/mean over one sample array.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct AxisStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl AxisStats {
    fn over(values: &[f64]) -> AxisStats {
        if values.is_empty() {
            return AxisStats {
                min: f64::NAN,
                max: f64::NAN,
                mean: f64::NAN,
            };
        }
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for &v in values {
            min = min.min(v);
            max = max.max(v);
            sum += v;
        }
        AxisStats {
            min,
            max,
            mean: sum / values.len() as f64,
        }
    }
}

fn std_dev(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Summary statistics for a channel, shaped per channel kind.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelStatistics {
    TimeSeries {
        min: f64,
        max: f64,
        mean: f64,
        std_dev: f64,
        count: usize,
    },
    Xy {
        x: AxisStats,
        y: AxisStats,
        peak_y: f64,
        x_at_peak_y: f64,
        count: usize,
    },
}

/// Metadata about one parse of one source file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReaderMetadata {
    pub path: PathBuf,
    pub file_size_bytes: u64,
    pub processed_at: DateTime<Utc>,
    pub format: SourceFormat,
    /// Format-specific notes collected during the parse (header fields,
    /// skipped-row counts, unavailable derived channels).
    pub diagnostics: Vec<String>,
    /// For the HDF5 container: the stride of the summary blocks the samples
    /// were read at. This is the finest resolution the data can be resampled
    /// to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downsampling_stride: Option<usize>,
}

/// The complete output of one loaded reader.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelSet {
    channels: BTreeMap<String, Channel>,
    pub metadata: ReaderMetadata,
}

impl ChannelSet {
    pub fn new(metadata: ReaderMetadata) -> Self {
        Self {
            channels: BTreeMap::new(),
            metadata,
        }
    }

    pub fn insert(&mut self, channel: Channel) {
        self.channels.insert(channel.id.clone(), channel);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.channels.contains_key(id)
    }

    pub fn channel(&self, id: &str) -> AppResult<&Channel> {
        self.channels
            .get(id)
            .ok_or_else(|| WeldError::InvalidChannel(id.to_string()))
    }

    pub fn all_channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Union of every channel's time range.
    pub fn time_range(&self) -> Option<TimeRange> {
        self.channels
            .values()
            .filter_map(Channel::time_range)
            .reduce(TimeRange::union)
    }
}
