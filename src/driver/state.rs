// SPDX-License-Identifier: GPL-3.0-only

use crate::constants::{TILT_MAX_DEGREES, TILT_MIN_DEGREES};

/// Lifecycle of one device handle
///
/// ```text
/// Uninitialized --init--> Initialized --start--> Streaming
///                              ^                     |
///                              +-------stop----------+
/// any --(event error / shutdown)--> Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcquisitionState {
    #[default]
    Uninitialized,
    Initialized,
    Streaming,
    /// Terminal; the device handle has been released
    Stopped,
}

impl std::fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AcquisitionState::Uninitialized => write!(f, "uninitialized"),
            AcquisitionState::Initialized => write!(f, "initialized"),
            AcquisitionState::Streaming => write!(f, "streaming"),
            AcquisitionState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Latest accelerometer and tilt reading; no history is kept
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AccelTiltSample {
    /// m/s^2
    pub accel: [f64; 3],
    /// Degrees, within the motor range
    pub tilt_degrees: f64,
}

impl AccelTiltSample {
    /// Build a sample, clamping the tilt to what the motor can reach
    pub fn new(accel: [f64; 3], tilt_degrees: f64) -> Self {
        let tilt_degrees = if tilt_degrees.is_finite() {
            tilt_degrees.clamp(TILT_MIN_DEGREES, TILT_MAX_DEGREES)
        } else {
            0.0
        };
        Self {
            accel,
            tilt_degrees,
        }
    }
}
