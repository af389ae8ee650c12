//! Derived-channel engine.
//!
//! A fixed catalogue of calculated channels, each declaring one or two
//! source channel ids (raw or derived) and a formula. Evaluation repeats
//! passes over the catalogue until no further entry can be computed, so a
//! derived channel that references another derived channel is computed after
//! its dependency; the catalogue is acyclic, so this always terminates.
//!
//! An entry whose sources are missing from the active channel set is not an
//! error: the channel is simply unavailable for that format and omitted from
//! the output (the position export, for instance, carries no currents, and
//! the oscilloscope container carries no temperatures).

use crate::channel::{Channel, ChannelKind, ChannelSet};
use tracing::{debug, warn};

/// Winding ratio of the welding transformer, primary turns per secondary.
pub const TRANSFORMER_RATIO: f64 = 35.0;

/// The formulas in use. All operate element-wise on two equal-length
/// source channels `a` and `b`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Formula {
    /// Third conductor by Kirchhoff: `-(a + b)`.
    Differential,
    /// Rectified primary current referred to the secondary:
    /// `TRANSFORMER_RATIO * (|a| + |b| + |a + b|)`.
    AbsSumCurrent,
    /// Rectified secondary voltage referred to the primary:
    /// `(|a| + |b| + |a + b|) / TRANSFORMER_RATIO`.
    AbsSumVoltage,
}

impl Formula {
    fn compute(&self, a: f64, b: f64) -> f64 {
        match self {
            Formula::Differential => -(a + b),
            Formula::AbsSumCurrent => TRANSFORMER_RATIO * (a.abs() + b.abs() + (a + b).abs()),
            Formula::AbsSumVoltage => (a.abs() + b.abs() + (a + b).abs()) / TRANSFORMER_RATIO,
        }
    }
}

/// One catalogue entry.
#[derive(Clone, Copy, Debug)]
pub struct DerivedSpec {
    pub id: &'static str,
    pub label: &'static str,
    pub unit: &'static str,
    pub sources: [&'static str; 2],
    pub formula: Formula,
}

/// The fixed production catalogue.
pub const CATALOGUE: &[DerivedSpec] = &[
    DerivedSpec {
        id: "I_3",
        label: "Phase current L3",
        unit: "A",
        sources: ["I_1", "I_2"],
        formula: Formula::Differential,
    },
    DerivedSpec {
        id: "U_3",
        label: "Phase voltage L3",
        unit: "V",
        sources: ["U_1", "U_2"],
        formula: Formula::Differential,
    },
    DerivedSpec {
        id: "DCCurrent",
        label: "DC welding current",
        unit: "A",
        sources: ["I_1", "I_2"],
        formula: Formula::AbsSumCurrent,
    },
    DerivedSpec {
        id: "DCVoltage",
        label: "DC welding voltage",
        unit: "V",
        sources: ["U_1", "U_2"],
        formula: Formula::AbsSumVoltage,
    },
    DerivedSpec {
        id: "TempDelta",
        label: "Probe temperature differential",
        unit: "°C",
        sources: ["temp_1", "temp_2"],
        formula: Formula::Differential,
    },
];

/// Applies the production catalogue to a loaded channel set.
pub fn apply(set: &mut ChannelSet) {
    apply_catalogue(set, CATALOGUE);
}

/// Applies a catalogue to a channel set, in dependency order.
///
/// Entries whose sources never become available are recorded in the set's
/// diagnostics and logged at debug level.
pub fn apply_catalogue(set: &mut ChannelSet, catalogue: &[DerivedSpec]) {
    let mut remaining: Vec<&DerivedSpec> = catalogue.iter().collect();

    loop {
        let mut progressed = false;
        remaining.retain(|spec| {
            if set.contains(spec.id) {
                warn!(id = spec.id, "derived channel id already present, skipping");
                return false;
            }
            match compute(set, spec) {
                ComputeOutcome::Done(channel) => {
                    set.insert(channel);
                    progressed = true;
                    false
                }
                ComputeOutcome::SourcesMissing => true,
                ComputeOutcome::Broken => false,
            }
        });
        if !progressed {
            break;
        }
    }

    for spec in remaining {
        debug!(
            id = spec.id,
            sources = ?spec.sources,
            "derived channel unavailable for this format"
        );
        set.metadata
            .diagnostics
            .push(format!("derived channel '{}' unavailable", spec.id));
    }
}

enum ComputeOutcome {
    Done(Channel),
    SourcesMissing,
    Broken,
}

fn compute(set: &ChannelSet, spec: &DerivedSpec) -> ComputeOutcome {
    let (Ok(a), Ok(b)) = (set.channel(spec.sources[0]), set.channel(spec.sources[1])) else {
        return ComputeOutcome::SourcesMissing;
    };
    if a.len() != b.len() {
        warn!(
            id = spec.id,
            "source lengths differ ({} vs {}), channel unavailable",
            a.len(),
            b.len()
        );
        return ComputeOutcome::Broken;
    }
    if a.kind != ChannelKind::TimeSeries || b.kind != ChannelKind::TimeSeries {
        warn!(id = spec.id, "derived sources must be time series");
        return ComputeOutcome::Broken;
    }
    let values = a
        .values
        .iter()
        .zip(&b.values)
        .map(|(&x, &y)| spec.formula.compute(x, y))
        .collect();
    ComputeOutcome::Done(Channel {
        id: spec.id.to_string(),
        label: spec.label.to_string(),
        unit: spec.unit.to_string(),
        kind: ChannelKind::TimeSeries,
        time: a.time.clone(),
        values,
        sample_rate_hz: a.sample_rate_hz,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ReaderMetadata, SourceFormat};
    use chrono::Utc;
    use std::path::PathBuf;

    fn set_with(channels: &[(&str, Vec<f64>)]) -> ChannelSet {
        let mut set = ChannelSet::new(ReaderMetadata {
            path: PathBuf::from("test.h5"),
            file_size_bytes: 0,
            processed_at: Utc::now(),
            format: SourceFormat::Hdf5,
            diagnostics: Vec::new(),
            downsampling_stride: None,
        });
        for (id, values) in channels {
            set.insert(Channel {
                id: (*id).to_string(),
                label: (*id).to_string(),
                unit: String::new(),
                kind: ChannelKind::TimeSeries,
                time: (0..values.len()).map(|i| i as f64).collect(),
                values: values.clone(),
                sample_rate_hz: None,
            });
        }
        set
    }

    #[test]
    fn differential_and_dc_current_literals() {
        let mut set = set_with(&[("I_1", vec![3.0]), ("I_2", vec![4.0])]);
        apply(&mut set);
        assert_eq!(set.channel("I_3").unwrap().values, vec![-7.0]);
        assert_eq!(set.channel("DCCurrent").unwrap().values, vec![490.0]);
    }

    #[test]
    fn dc_voltage_divides_by_ratio() {
        let mut set = set_with(&[("U_1", vec![35.0]), ("U_2", vec![35.0])]);
        apply(&mut set);
        // (35 + 35 + 70) / 35
        assert_eq!(set.channel("DCVoltage").unwrap().values, vec![4.0]);
    }

    #[test]
    fn missing_sources_mark_channel_unavailable() {
        let mut set = set_with(&[("I_1", vec![1.0]), ("I_2", vec![2.0])]);
        apply(&mut set);
        assert!(set.channel("TempDelta").is_err());
        assert!(set
            .metadata
            .diagnostics
            .iter()
            .any(|d| d.contains("'TempDelta' unavailable")));
    }

    #[test]
    fn derived_on_derived_resolves_in_dependency_order() {
        // An entry listed before its derived dependency still computes.
        let catalogue = [
            DerivedSpec {
                id: "second",
                label: "second",
                unit: "",
                sources: ["first", "a"],
                formula: Formula::Differential,
            },
            DerivedSpec {
                id: "first",
                label: "first",
                unit: "",
                sources: ["a", "b"],
                formula: Formula::Differential,
            },
        ];
        let mut set = set_with(&[("a", vec![1.0]), ("b", vec![2.0])]);
        apply_catalogue(&mut set, &catalogue);
        assert_eq!(set.channel("first").unwrap().values, vec![-3.0]);
        // second = -(first + a) = -(-3 + 1)
        assert_eq!(set.channel("second").unwrap().values, vec![2.0]);
    }

    #[test]
    fn mismatched_source_lengths_are_not_fatal() {
        let mut set = set_with(&[("I_1", vec![1.0, 2.0]), ("I_2", vec![1.0])]);
        apply(&mut set);
        assert!(set.channel("I_3").is_err());
        assert!(set.channel("I_1").is_ok());
    }
}
