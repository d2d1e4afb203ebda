// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for sensor constants and the depth curve

use kinect_camera::constants::{
    DEPTH_MAX_M, DEPTH_MIN_M, DEPTH_RAW_NO_VALUE, FRAME_HEIGHT, FRAME_WIDTH, TILT_MAX_DEGREES,
    TILT_MIN_DEGREES,
};
use kinect_camera::geometry::{distance_from_reading, reading_for_distance};

#[test]
fn test_depth_range_ordering() {
    assert!(DEPTH_MIN_M > 0.0);
    assert!(DEPTH_MIN_M < DEPTH_MAX_M);
}

#[test]
fn test_usable_range_is_decodable() {
    // Both ends of the usable range must map to raw codes below the sentinel
    for meters in [DEPTH_MIN_M, DEPTH_MAX_M] {
        let raw = reading_for_distance(meters).expect("distance in curve domain");
        assert!(raw < DEPTH_RAW_NO_VALUE);
        let back = distance_from_reading(raw).unwrap();
        assert!(
            (back - meters).abs() / meters < 0.01,
            "{} m decoded back as {} m",
            meters,
            back
        );
    }
}

#[test]
fn test_depth_curve_monotonic() {
    let mut prev = 0.0;
    for raw in 0..1084u16 {
        if let Some(d) = distance_from_reading(raw) {
            assert!(d > prev, "raw {} did not increase distance", raw);
            prev = d;
        }
    }
}

#[test]
fn test_tilt_limits_symmetric() {
    assert_eq!(TILT_MIN_DEGREES, -TILT_MAX_DEGREES);
}

#[test]
fn test_frame_size() {
    assert_eq!((FRAME_WIDTH, FRAME_HEIGHT), (640, 480));
}
