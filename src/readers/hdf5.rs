//! Reader for the structured-binary oscilloscope container (HDF5).
//!
//! The container layout is fixed: one measurement group holding one group per
//! channel, each with per-channel calibration attributes and a block group of
//! datasets:
//!
//! ```text
//! measurements/00000001/channels/<key>
//!     @binToVoltFactor @binToVoltConstant
//!     @voltToPhysicalFactor @voltToPhysicalConstant
//!     @name @physicalUnit @sampleRate
//!     blocks/00000001/raw            1-D full-rate stream (never read here)
//!     blocks/00000001/dataNNNNNNNN   2-D [n][2] min/max pairs, suffix = stride
//! ```
//!
//! Only the pre-aggregated min/max summary datasets are read, at the largest
//! stored stride not exceeding the requested one. Each raw count passes
//! through the two affine calibration stages in order. The stride actually
//! used is recorded in the reader metadata: it is the floor below which this
//! format cannot be resampled.

use crate::calibration::Calibration;
use crate::channel::{Channel, ChannelKind, ChannelSet, SourceFormat};
use crate::error::{AppResult, WeldError};
use crate::readers::{
    file_metadata, CancelFlag, FormatReader, ValidationReport,
};
use hdf5::types::VarLenUnicode;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Group holding one sub-group per channel.
const CHANNELS_GROUP: &str = "measurements/00000001/channels";

/// Block group under each channel.
const BLOCKS_GROUP: &str = "blocks/00000001";

/// The six channel keys stored by the oscilloscope.
pub const CHANNEL_KEYS: [&str; 6] = ["I_1", "I_2", "U_1", "U_2", "U_Netz", "I_Mag"];

pub struct Hdf5Reader {
    path: PathBuf,
    /// Requested summary-block stride; the reader picks the closest stored
    /// stride not exceeding it.
    stride: usize,
}

impl Hdf5Reader {
    pub fn new(path: PathBuf, stride: usize) -> Self {
        Self { path, stride }
    }

    fn open(&self) -> AppResult<hdf5::File> {
        if !self.path.is_file() {
            return Err(WeldError::NotFound(self.path.display().to_string()));
        }
        Ok(hdf5::File::open(&self.path)?)
    }

    fn calibration(group: &hdf5::Group) -> Calibration {
        let defaults = Calibration::default();
        Calibration {
            bin_to_volt_factor: read_f64_attr(group, "binToVoltFactor")
                .unwrap_or(defaults.bin_to_volt_factor),
            bin_to_volt_constant: read_f64_attr(group, "binToVoltConstant")
                .unwrap_or(defaults.bin_to_volt_constant),
            volt_to_physical_factor: read_f64_attr(group, "voltToPhysicalFactor")
                .unwrap_or(defaults.volt_to_physical_factor),
            volt_to_physical_constant: read_f64_attr(group, "voltToPhysicalConstant")
                .unwrap_or(defaults.volt_to_physical_constant),
        }
    }

    /// Picks the stored summary stride to read: the largest not exceeding the
    /// requested stride, or the smallest stored one when every stored stride
    /// is coarser than requested.
    fn pick_stride(available: &[usize], requested: usize) -> Option<usize> {
        available
            .iter()
            .copied()
            .filter(|&s| s <= requested)
            .max()
            .or_else(|| available.iter().copied().min())
    }

    /// Strides of the stored `dataNNNNNNNN` summary datasets.
    fn summary_strides(blocks: &hdf5::Group) -> AppResult<Vec<usize>> {
        let mut strides = Vec::new();
        for name in blocks.member_names()? {
            if let Some(suffix) = name.strip_prefix("data") {
                if let Ok(stride) = suffix.parse::<usize>() {
                    if stride >= 1 {
                        strides.push(stride);
                    }
                }
            }
        }
        Ok(strides)
    }

    fn load_channel(
        &self,
        channels: &hdf5::Group,
        key: &str,
    ) -> AppResult<Option<(Channel, usize)>> {
        if !channels.link_exists(key) {
            return Ok(None);
        }
        let group = channels.group(key)?;
        let calibration = Self::calibration(&group);
        let blocks = group.group(BLOCKS_GROUP)?;

        let strides = Self::summary_strides(&blocks)?;
        let Some(stride) = Self::pick_stride(&strides, self.stride) else {
            debug!(key, "channel has no summary datasets");
            return Ok(None);
        };

        let dataset = blocks.dataset(&format!("data{:08}", stride))?;
        let pairs = dataset.read_2d::<u16>()?;
        // Column 0 of each min/max pair carries the envelope minimum; the
        // plots follow that envelope.
        let values: Vec<f64> = pairs
            .column(0)
            .iter()
            .map(|&raw| calibration.apply(f64::from(raw)))
            .collect();

        let sample_rate = read_f64_attr(&group, "sampleRate").unwrap_or(1.0);
        let dt = stride as f64 / sample_rate;
        let time: Vec<f64> = (0..values.len()).map(|i| i as f64 * dt).collect();

        let label = read_str_attr(&group, "name")
            .or_else(|| read_str_attr(&group, "ChannelName"))
            .unwrap_or_else(|| key.to_string());
        let unit = read_str_attr(&group, "physicalUnit").unwrap_or_default();

        Ok(Some((
            Channel {
                id: key.to_string(),
                label,
                unit,
                kind: ChannelKind::TimeSeries,
                time,
                values,
                sample_rate_hz: Some(sample_rate / stride as f64),
            },
            stride,
        )))
    }
}

fn read_f64_attr(group: &hdf5::Group, name: &str) -> Option<f64> {
    group.attr(name).ok()?.read_scalar::<f64>().ok()
}

fn read_str_attr(group: &hdf5::Group, name: &str) -> Option<String> {
    let value = group.attr(name).ok()?.read_scalar::<VarLenUnicode>().ok()?;
    Some(value.to_string())
}

impl FormatReader for Hdf5Reader {
    fn format(&self) -> SourceFormat {
        SourceFormat::Hdf5
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn validate(&self) -> AppResult<ValidationReport> {
        let file = self.open()?;
        if file.group(CHANNELS_GROUP).is_err() {
            return Ok(ValidationReport::failed(vec![format!(
                "'{}' has no '{}' group",
                self.path.display(),
                CHANNELS_GROUP
            )]));
        }
        Ok(ValidationReport::passed())
    }

    fn load(&self, cancel: &CancelFlag) -> AppResult<ChannelSet> {
        let file = self.open()?;
        let channels = file.group(CHANNELS_GROUP)?;

        let mut metadata = file_metadata(&self.path, SourceFormat::Hdf5)?;
        let mut set_stride: Option<usize> = None;
        let mut loaded = Vec::new();

        for key in CHANNEL_KEYS {
            cancel.check()?;
            match self.load_channel(&channels, key)? {
                Some((channel, stride)) => {
                    // The coarsest stride in use bounds the whole set.
                    set_stride = Some(set_stride.map_or(stride, |s| s.max(stride)));
                    loaded.push(channel);
                }
                None => metadata
                    .diagnostics
                    .push(format!("channel '{}' not present", key)),
            }
        }

        if loaded.is_empty() {
            return Err(WeldError::ParseFailure(format!(
                "'{}' (none of the {} channel keys present)",
                self.path.display(),
                CHANNEL_KEYS.len()
            )));
        }

        metadata.downsampling_stride = set_stride;
        if let Some(stride) = set_stride {
            metadata
                .diagnostics
                .push(format!("summary stride {} (resampling floor)", stride));
        }

        let mut set = ChannelSet::new(metadata);
        for channel in loaded {
            set.insert(channel);
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_selection_prefers_finest_at_or_below_request() {
        assert_eq!(Hdf5Reader::pick_stride(&[2, 16, 64], 64), Some(64));
        assert_eq!(Hdf5Reader::pick_stride(&[2, 16, 64], 32), Some(16));
        // Everything stored is coarser than requested: the floor applies.
        assert_eq!(Hdf5Reader::pick_stride(&[16, 64], 4), Some(16));
        assert_eq!(Hdf5Reader::pick_stride(&[], 4), None);
    }
}
