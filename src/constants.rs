// SPDX-License-Identifier: GPL-3.0-only

//! Sensor constants - single source of truth
//!
//! Resolution, depth curve, range and motor limits for the Kinect v1 sensor.
//! Calibration defaults live in [`crate::geometry::intrinsics`].

use std::time::Duration;

/// Native depth/video resolution (medium resolution mode)
pub const FRAME_WIDTH: usize = 640;
pub const FRAME_HEIGHT: usize = 480;

/// Raw depth code the sensor reports for pixels without a return
pub const DEPTH_RAW_NO_VALUE: u16 = 2047;

/// Disparity-to-depth coefficient A
/// Used in formula: depth_m = 1.0 / (raw * DEPTH_COEFF_A + DEPTH_COEFF_B)
pub const DEPTH_COEFF_A: f64 = -0.0030711;
/// Disparity-to-depth coefficient B
/// Used in formula: depth_m = 1.0 / (raw * DEPTH_COEFF_A + DEPTH_COEFF_B)
pub const DEPTH_COEFF_B: f64 = 3.3309495;

/// Default depth range limits (meters)
/// Based on Xbox Kinect v1 sensor specifications
pub const DEPTH_MIN_M: f64 = 0.4;
pub const DEPTH_MAX_M: f64 = 5.0;

/// Tilt angle limits (in degrees)
pub const TILT_MIN_DEGREES: f64 = -27.0;
pub const TILT_MAX_DEGREES: f64 = 27.0;

/// Standard gravity, used by the simulated accelerometer
pub const GRAVITY: f64 = 9.80665;

/// Variance reported for each accelerometer axis (m/s^2)^2
pub const ACCEL_VARIANCE: f64 = 0.01;

/// Default period between color/infrared switches in calibration mode
pub const STREAM_SWITCH_PERIOD: Duration = Duration::from_secs(1);

/// Default TF frame ids
pub const DEPTH_FRAME_ID: &str = "kinect_depth_optical_frame";
pub const RGB_FRAME_ID: &str = "kinect_rgb_optical_frame";
pub const IMU_FRAME_ID: &str = "kinect_link";
