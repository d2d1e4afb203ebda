// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for settings and calibration files

use kinect_camera::calibration::{CalibrationFile, CalibrationProvider, provider_for};
use kinect_camera::{ConfigRequest, DriverSettings};

#[test]
fn test_settings_default() {
    let settings = DriverSettings::default();

    assert_eq!(settings.device_index, 0, "First sensor should be the default");
    assert!(
        settings.calibration_path.is_none(),
        "Factory calibration should be the default"
    );
    assert!(
        settings.initial_config.enable_color_stream,
        "Color should stream by default"
    );
}

#[test]
fn test_settings_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kinect-camera").join("settings.json");

    let settings = DriverSettings {
        device_index: 2,
        stream_switch_period_ms: 250,
        initial_config: ConfigRequest {
            roi_horiz_start: 10,
            roi_horiz_width: 100,
            ..Default::default()
        },
        ..Default::default()
    };
    settings.save(&path).unwrap();

    let loaded = DriverSettings::load_or_default(Some(&path)).unwrap();
    assert_eq!(loaded, settings);
}

#[test]
fn test_settings_partial_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, r#"{ "device_index": 1, "initial_config": { "depth_max": 3.5 } }"#)
        .unwrap();

    let loaded = DriverSettings::load(&path).unwrap();
    assert_eq!(loaded.device_index, 1);
    assert_eq!(loaded.initial_config.depth_max, 3.5);
    assert_eq!(loaded.initial_config.roi_horiz_width, 640);
    assert_eq!(loaded.depth_frame_id, DriverSettings::default().depth_frame_id);
}

#[test]
fn test_settings_malformed_file_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(DriverSettings::load(&path).is_err());
}

#[test]
fn test_calibration_file_provider() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("calibration.json");
    CalibrationFile::kinect_defaults().save(&path).unwrap();

    let provider = provider_for(Some(&path)).unwrap();
    let depth = provider.depth_info().expect("depth calibration present");
    assert_eq!(depth.width, 640);
    assert!((depth.intrinsics.fx - 594.21).abs() < 1e-9);
    assert!(provider.color_info().is_some());
}
