//! Configuration management.
//!
//! Settings are loaded from a TOML file under `config/` (default
//! `config/default.toml`) with environment overrides prefixed `WELD_DAQ_`,
//! e.g. `WELD_DAQ_LOG_LEVEL=debug`.

use crate::error::{AppResult, WeldError};
use chrono::NaiveDate;
use config::Config;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub log_level: String,
    /// Root folder containing one sub-folder per experiment.
    pub data_root: PathBuf,
    pub cache: CacheSettings,
    pub scanner: ScannerSettings,
    pub resample: ResampleSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheSettings {
    /// Maximum age of a cached channel set before a re-parse is forced.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScannerSettings {
    /// Experiments dated before this are never indexed.
    pub cutoff_date: NaiveDate,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResampleSettings {
    /// Point budget applied when a request does not specify one.
    pub default_max_points: usize,
    /// Summary-block stride requested from the HDF5 container.
    pub hdf5_stride: usize,
}

impl Settings {
    pub fn new(config_name: Option<&str>) -> AppResult<Self> {
        let config_path = format!("config/{}", config_name.unwrap_or("default"));
        let s = Config::builder()
            .add_source(config::File::with_name(&config_path))
            .add_source(config::Environment::with_prefix("WELD_DAQ"))
            .build()
            .map_err(WeldError::Config)?;

        s.try_deserialize().map_err(WeldError::Config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn loads_default_file() {
        let settings = Settings::new(None).unwrap();
        assert_eq!(settings.cache.ttl, Duration::from_secs(600));
        assert_eq!(settings.resample.default_max_points, 2000);
    }

    #[test]
    #[serial]
    fn environment_overrides_file_values() {
        std::env::set_var("WELD_DAQ_LOG_LEVEL", "trace");
        let settings = Settings::new(None);
        std::env::remove_var("WELD_DAQ_LOG_LEVEL");
        assert_eq!(settings.unwrap().log_level, "trace");
    }

    #[test]
    fn ttl_accepts_humantime_strings() {
        let settings: CacheSettings = toml::from_str("ttl = \"10m\"").unwrap();
        assert_eq!(settings.ttl, Duration::from_secs(600));
    }

    #[test]
    fn cutoff_date_parses_iso() {
        let settings: ScannerSettings =
            toml::from_str("cutoff_date = \"2023-01-01\"").unwrap();
        assert_eq!(
            settings.cutoff_date,
            NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()
        );
    }
}
