//! # Weld DAQ Core Library
//!
//! This crate is the sensor-data ingestion and channel-query engine behind
//! the weld-testing visualization stack. It turns the heterogeneous export
//! files an experiment folder accumulates (position sensor, tensile-test
//! machine, temperature logger, HDF5 oscilloscope container) into a uniform
//! channel model, enriches it with calculated channels, and serves windowed,
//! decimated slices of it through a per-experiment TTL cache.
//!
//! ## Crate Structure
//!
//! - **`calibration`**: pure unit/calibration transforms shared by the
//!   readers (two-stage affine conversion, position transform, German
//!   decimal parsing).
//! - **`channel`**: the channel data model — `Channel`, `ChannelSet`,
//!   reader metadata and summary statistics.
//! - **`config`**: TOML settings loaded via the `config` crate. See
//!   `config::Settings`.
//! - **`derived`**: the calculated-channel catalogue and its
//!   dependency-ordered evaluation.
//! - **`error`**: the central `WeldError` enum for the whole crate.
//! - **`logging`**: `tracing`-based logging setup.
//! - **`readers`**: the `FormatReader` contract and the four format
//!   adapters (the HDF5 adapter sits behind the `format_hdf5` feature).
//! - **`resample`**: window slicing and fixed-stride decimation.
//! - **`scan`**: the folder-indexing state machine and its repository /
//!   filesystem seams.
//! - **`service`**: the experiment cache and the channel-query operations
//!   consumed by the HTTP layer above this crate.
//! - **`validation`**: settings sanity checks run at startup.

pub mod calibration;
pub mod channel;
pub mod config;
pub mod derived;
pub mod error;
pub mod logging;
pub mod readers;
pub mod resample;
pub mod scan;
pub mod service;
pub mod validation;
