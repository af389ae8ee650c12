//! Unit and calibration transforms shared by the format readers.
//!
//! All conversions here are pure functions; the readers own file access and
//! error handling.

/// Offset of the position slide's zero point, in millimetres.
pub const POSITION_OFFSET_MM: f64 = 49.73;

/// The position sensor counts toward the rig, the plots expect travel away
/// from it.
pub const POSITION_SCALE: f64 = -1.0;

/// Converts a raw position-sensor value to millimetres of travel.
pub fn position_mm(raw: f64) -> f64 {
    POSITION_SCALE * raw + POSITION_OFFSET_MM
}

/// Per-channel calibration attributes of the HDF5 container.
///
/// The container stores these as optional group attributes; absent attributes
/// fall back to the identity transform (factor 1, constant 0).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Calibration {
    pub bin_to_volt_factor: f64,
    pub bin_to_volt_constant: f64,
    pub volt_to_physical_factor: f64,
    pub volt_to_physical_constant: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            bin_to_volt_factor: 1.0,
            bin_to_volt_constant: 0.0,
            volt_to_physical_factor: 1.0,
            volt_to_physical_constant: 0.0,
        }
    }
}

impl Calibration {
    /// Applies the two affine stages in order: raw counts to volts, then
    /// volts to the channel's physical unit.
    pub fn apply(&self, raw: f64) -> f64 {
        let volts = raw * self.bin_to_volt_factor + self.bin_to_volt_constant;
        volts * self.volt_to_physical_factor + self.volt_to_physical_constant
    }
}

/// Parses a number written with a decimal comma (German locale), e.g.
/// `"1694007543,25"`.
///
/// Plain decimal-point numbers are accepted as well, since some logger
/// firmware revisions emit them.
pub fn parse_decimal_comma(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.replace(',', ".").parse::<f64>().ok()
}
