//! Settings sanity checks, run once at startup before any request is served.

use crate::config::Settings;
use crate::error::{AppResult, WeldError};
use std::time::Duration;

/// Validates that a duration is non-zero.
pub fn is_nonzero_duration(value: Duration) -> Result<(), &'static str> {
    if value > Duration::ZERO {
        Ok(())
    } else {
        Err("Duration must be greater than zero")
    }
}

/// Validates that a point budget is usable for decimation.
pub fn is_valid_point_budget(value: usize) -> Result<(), &'static str> {
    if value >= 1 {
        Ok(())
    } else {
        Err("Point budget must be at least 1")
    }
}

/// Validates that a summary-block stride is usable.
pub fn is_valid_stride(value: usize) -> Result<(), &'static str> {
    if value >= 1 {
        Ok(())
    } else {
        Err("Stride must be at least 1")
    }
}

/// Runs every settings check and returns the first failure as a
/// configuration error.
pub fn validate_settings(settings: &Settings) -> AppResult<()> {
    crate::logging::parse_log_level(&settings.log_level)
        .map_err(WeldError::Configuration)?;
    is_nonzero_duration(settings.cache.ttl)
        .map_err(|e| WeldError::Configuration(format!("cache.ttl: {}", e)))?;
    is_valid_point_budget(settings.resample.default_max_points)
        .map_err(|e| WeldError::Configuration(format!("resample.default_max_points: {}", e)))?;
    is_valid_stride(settings.resample.hdf5_stride)
        .map_err(|e| WeldError::Configuration(format!("resample.hdf5_stride: {}", e)))?;
    if !settings.data_root.is_dir() {
        return Err(WeldError::Configuration(format!(
            "data_root '{}' is not a directory",
            settings.data_root.display()
        )));
    }
    Ok(())
}
