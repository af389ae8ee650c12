//! Custom error types for the application.
//!
//! This module defines the primary error type, `WeldError`, for the entire
//! crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the failure modes of the ingestion pipeline:
//!
//! - **`Config` / `Configuration`**: file-level parse errors from the
//!   `config` crate versus semantic errors caught during settings validation.
//! - **`Validation`**: a structural pre-parse check failed; carries the
//!   accumulated diagnostics list so callers can report every finding at once.
//! - **`ParseFailure`**: a load finished with zero valid rows. Individual bad
//!   rows are tolerated and counted, so this only fires when nothing survives.
//! - **`NotFound`**: the source file (or experiment folder) does not exist.
//! - **`InvalidChannel`**: an unknown channel id was requested from a loaded
//!   channel set.
//! - **`Cancelled`**: a load observed its cancellation flag and stopped
//!   issuing further I/O; partial buffers are discarded.
//! - **`FeatureNotEnabled`**: functionality compiled out via cargo features
//!   (currently only the HDF5 container reader) was requested at runtime.
//!
//! Cache misses are an internal control-flow condition of the service layer
//! and deliberately have no variant here; they never cross the API boundary.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, WeldError>;

#[derive(Error, Debug)]
pub enum WeldError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("No valid rows survived parsing {0}")]
    ParseFailure(String),

    #[error("Source not found: {0}")]
    NotFound(String),

    #[error("Unknown channel id '{0}'")]
    InvalidChannel(String),

    #[error("Load cancelled")]
    Cancelled,

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Scan aborted: {0}")]
    ScanAborted(String),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    #[cfg(feature = "format_hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_joins_diagnostics() {
        let err = WeldError::Validation(vec!["too small".into(), "bad header".into()]);
        assert_eq!(err.to_string(), "Validation failed: too small; bad header");
    }

    #[test]
    fn feature_not_enabled_names_the_feature() {
        let err = WeldError::FeatureNotEnabled("format_hdf5".into());
        assert!(err.to_string().contains("--features format_hdf5"));
    }
}
