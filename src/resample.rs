//! Resampler: bounds payload size for visualization.
//!
//! A request carries a `[start, end]` window and a point budget. When the
//! window holds no more points than the budget, the exact slice comes back
//! untouched: no interpolation, no data loss. Otherwise the slice is
//! decimated at a fixed stride of `ceil(count / max_points)`, starting at the
//! window's first in-range index. Xy channels stride both axes together so
//! point correspondence survives.

use crate::channel::{Channel, ChannelKind};
use serde::{Deserialize, Serialize};

/// Requested time (or x) window. `None` bounds mean "from the start" /
/// "to the end".
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct Window {
    pub start: Option<f64>,
    pub end: Option<f64>,
}

impl Window {
    pub fn new(start: Option<f64>, end: Option<f64>) -> Self {
        Self { start, end }
    }
}

/// Decimated view of one channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Resampled {
    pub channel_id: String,
    pub label: String,
    pub unit: String,
    pub kind: ChannelKind,
    pub time: Vec<f64>,
    pub values: Vec<f64>,
    /// Points actually returned.
    pub point_count: usize,
    /// Points that fell inside the window before decimation.
    pub total_in_window: usize,
    /// Stride used; 1 means the slice came back unchanged.
    pub step: usize,
}

/// Resamples one channel into at most `max_points` points.
///
/// `max_points` of 0 is treated as 1: the caller always gets at least the
/// chance of one point back.
pub fn resample(channel: &Channel, window: Window, max_points: usize) -> Resampled {
    let max_points = max_points.max(1);
    let (lo, hi) = window_indices(&channel.time, window, channel.kind);
    let count = hi - lo;

    let step = if count <= max_points {
        1
    } else {
        // ceil(count / max_points)
        (count + max_points - 1) / max_points
    };

    let time: Vec<f64> = channel.time[lo..hi].iter().copied().step_by(step).collect();
    let values: Vec<f64> = channel.values[lo..hi]
        .iter()
        .copied()
        .step_by(step)
        .collect();

    Resampled {
        channel_id: channel.id.clone(),
        label: channel.label.clone(),
        unit: channel.unit.clone(),
        kind: channel.kind,
        point_count: values.len(),
        total_in_window: count,
        step,
        time,
        values,
    }
}

/// Half-open index range of the samples inside the window.
///
/// Time-series axes are monotonically non-decreasing, so binary search
/// applies. Xy axes are not (displacement can regress under elastic
/// recovery), so the bounds come from a linear scan: the first sample at or
/// past `start` and the last sample at or before `end`.
fn window_indices(axis: &[f64], window: Window, kind: ChannelKind) -> (usize, usize) {
    let (lo, hi) = match kind {
        ChannelKind::TimeSeries => (
            match window.start {
                Some(start) => axis.partition_point(|&t| t < start),
                None => 0,
            },
            match window.end {
                Some(end) => axis.partition_point(|&t| t <= end),
                None => axis.len(),
            },
        ),
        ChannelKind::XyRelationship => (
            match window.start {
                Some(start) => axis
                    .iter()
                    .position(|&x| x >= start)
                    .unwrap_or(axis.len()),
                None => 0,
            },
            match window.end {
                Some(end) => axis
                    .iter()
                    .rposition(|&x| x <= end)
                    .map_or(0, |i| i + 1),
                None => axis.len(),
            },
        ),
    };
    (lo, hi.max(lo))
}
