//! Reader integration tests.
//!
//! End-to-end coverage of the format adapters against fixture files written
//! into temp folders: format detection, calibration, derived-channel
//! merging, and the tolerated-row policy.

use std::fs;
use std::path::Path;
use tempfile::TempDir;
use weld_daq::channel::SourceFormat;
use weld_daq::config::{CacheSettings, ResampleSettings, ScannerSettings, Settings};
use weld_daq::error::WeldError;
use weld_daq::readers::{detect_format, load_channel_set, CancelFlag};

fn test_settings(data_root: &Path) -> Settings {
    Settings {
        log_level: "warn".to_string(),
        data_root: data_root.to_path_buf(),
        cache: CacheSettings {
            ttl: std::time::Duration::from_secs(600),
        },
        scanner: ScannerSettings {
            cutoff_date: chrono::NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
        },
        resample: ResampleSettings {
            default_max_points: 2000,
            hdf5_stride: 64,
        },
    }
}

const POSITION_FIXTURE: &str = "\
# Wegmessung Export v2
2023-09-06 12:19:03.250000\t1693995543.25\t10.0
2023-09-06 12:19:03.500000\t1693995543.50\t10.5
2023-09-06 12:19:03.750000\t1693995543.75\t11.0
";

const TENSILE_FIXTURE: &str = "\
Pruefnummer;Werkstoff;Probenbreite;Pruefgeschwindigkeit;Datum
J23-09-06(1);S355;30 mm;10 mm/min;06.09.2023
;;;;
FORCE/WAY DATA;FORCE/TIME DATA;WAY/TIME DATA
{X=0.013733, Y=2.268685};{X=0.0, Y=2.268685};{X=0.0, Y=0.013733}
{X=0.027466, Y=4.537370};{X=0.1, Y=4.537370};{X=0.1, Y=0.027466}
{X=0.041199, Y=6.806055};{X=0.2, Y=6.806055};{X=0.2, Y=0.041199}
";

const TEMPERATURE_FIXTURE: &str = "\
Zeit,Schweisszone links,Schweisszone rechts,Kanal 1,Kanal 2,Bemerkung
\"1694007543,0\",\"620,5\",\"640,5\",\"21,0\",\"22,0\",start
\"1694007544,0\",\"700,0\",\"720,0\",\"23,0\",\"25,0\",peak
\"1694007545,0\",\"650,0\",\"670,0\",\"22,0\",\"24,0\",cooling
";

#[test]
fn position_load_applies_transform_and_relative_time() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("Wegmessung_1.txt");
    fs::write(&path, POSITION_FIXTURE).unwrap();
    let settings = test_settings(dir.path());

    let set = load_channel_set(
        SourceFormat::Position,
        path,
        &settings,
        &CancelFlag::new(),
    )
    .unwrap();

    let ch = set.channel("position").unwrap();
    assert_eq!(ch.time, vec![0.0, 250.0, 500.0]);
    assert!((ch.values[0] - 39.73).abs() < 1e-9);
    // No currents in this export, so the electrical derived channels are
    // unavailable rather than failing the load.
    assert!(set.channel("DCCurrent").is_err());
    assert!(set
        .metadata
        .diagnostics
        .iter()
        .any(|d| d.contains("'DCCurrent' unavailable")));
}

#[test]
fn tensile_load_produces_three_consistent_channels() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("Zugversuch_1.csv");
    fs::write(&path, TENSILE_FIXTURE).unwrap();
    let settings = test_settings(dir.path());

    let set = load_channel_set(SourceFormat::Tensile, path, &settings, &CancelFlag::new())
        .unwrap();

    let force = set.channel("force_time").unwrap();
    let way = set.channel("displacement_time").unwrap();
    let fw = set.channel("force_displacement").unwrap();
    assert_eq!(force.len(), 3);
    assert_eq!(force.time, way.time);
    assert_eq!(fw.time, way.values);
    assert_eq!(fw.values, force.values);
    assert!((force.values[0] - 2.268685).abs() < 1e-12);

    let range = set.time_range().unwrap();
    assert_eq!(range.start, 0.0);
    // The xy channel's axis is displacement, which widens the union only if
    // it exceeds the time span; here time dominates.
    assert_eq!(range.end, 0.2);
}

#[test]
fn temperature_load_averages_zones_and_numbers_probes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("Temperaturlog.csv");
    fs::write(&path, TEMPERATURE_FIXTURE).unwrap();
    let settings = test_settings(dir.path());

    let set = load_channel_set(
        SourceFormat::Temperature,
        path,
        &settings,
        &CancelFlag::new(),
    )
    .unwrap();

    let avg = set.channel("temp_avg").unwrap();
    assert_eq!(avg.values, vec![630.5, 710.0, 660.0]);
    assert_eq!(avg.time, vec![0.0, 1.0, 2.0]);

    // temp_1 and temp_2 are present, so TempDelta resolves here.
    let delta = set.channel("TempDelta").unwrap();
    assert_eq!(delta.values, vec![-43.0, -48.0, -46.0]);

    // The free-text column never becomes a channel.
    assert!(matches!(
        set.channel("Bemerkung"),
        Err(WeldError::InvalidChannel(_))
    ));
}

#[test]
fn validation_failure_aborts_before_parsing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("Zugversuch_broken.csv");
    fs::write(&path, "only;one;line\n").unwrap();
    let settings = test_settings(dir.path());

    let err = load_channel_set(SourceFormat::Tensile, path, &settings, &CancelFlag::new())
        .unwrap_err();
    assert!(matches!(err, WeldError::Validation(_)));
}

#[test]
fn missing_file_is_not_found() {
    let dir = TempDir::new().unwrap();
    let settings = test_settings(dir.path());
    let err = load_channel_set(
        SourceFormat::Position,
        dir.path().join("Wegmessung_missing.txt"),
        &settings,
        &CancelFlag::new(),
    )
    .unwrap_err();
    assert!(matches!(err, WeldError::NotFound(_)));
}

#[test]
fn detection_covers_all_fixture_names() {
    assert_eq!(
        detect_format(Path::new("Wegmessung_1.txt")),
        Some(SourceFormat::Position)
    );
    assert_eq!(
        detect_format(Path::new("Zugversuch_1.csv")),
        Some(SourceFormat::Tensile)
    );
    assert_eq!(
        detect_format(Path::new("Temperaturlog.csv")),
        Some(SourceFormat::Temperature)
    );
    assert_eq!(
        detect_format(Path::new("trace.hdf5")),
        Some(SourceFormat::Hdf5)
    );
}

#[cfg(not(feature = "format_hdf5"))]
#[test]
fn hdf5_without_feature_reports_feature_not_enabled() {
    let dir = TempDir::new().unwrap();
    let settings = test_settings(dir.path());
    let err = load_channel_set(
        SourceFormat::Hdf5,
        dir.path().join("trace.h5"),
        &settings,
        &CancelFlag::new(),
    )
    .unwrap_err();
    assert!(matches!(err, WeldError::FeatureNotEnabled(_)));
}
