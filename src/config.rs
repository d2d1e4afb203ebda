// SPDX-License-Identifier: GPL-3.0-only

//! Process-level driver settings
//!
//! Stored as JSON, by default in `<config dir>/kinect-camera/settings.json`.
//! Missing fields fall back to their defaults so older files keep loading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::constants::{DEPTH_FRAME_ID, IMU_FRAME_ID, RGB_FRAME_ID, STREAM_SWITCH_PERIOD};
use crate::driver::ConfigRequest;
use crate::errors::{DriverError, DriverResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverSettings {
    /// Index of the sensor to open
    pub device_index: usize,
    /// Frame id for depth, infrared and point cloud output
    pub depth_frame_id: String,
    /// Frame id for color output
    pub rgb_frame_id: String,
    /// Frame id for the accelerometer
    pub imu_frame_id: String,
    /// Period of the calibration-mode color/infrared switch
    pub stream_switch_period_ms: u64,
    /// Reconfiguration record applied before streaming starts
    pub initial_config: ConfigRequest,
    /// Calibration file; factory intrinsics when unset
    pub calibration_path: Option<PathBuf>,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            device_index: 0,
            depth_frame_id: DEPTH_FRAME_ID.to_string(),
            rgb_frame_id: RGB_FRAME_ID.to_string(),
            imu_frame_id: IMU_FRAME_ID.to_string(),
            stream_switch_period_ms: STREAM_SWITCH_PERIOD.as_millis() as u64,
            initial_config: ConfigRequest::default(),
            calibration_path: None,
        }
    }
}

impl DriverSettings {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("kinect-camera").join("settings.json"))
    }

    /// Zero falls back to the default period
    pub fn stream_switch_period(&self) -> Duration {
        if self.stream_switch_period_ms == 0 {
            STREAM_SWITCH_PERIOD
        } else {
            Duration::from_millis(self.stream_switch_period_ms)
        }
    }

    pub fn load(path: &Path) -> DriverResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&contents)?;
        info!(path = %path.display(), "Loaded driver settings");
        Ok(settings)
    }

    /// Load an explicit path, or the default path if it exists
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    pub fn load_or_default(path: Option<&Path>) -> DriverResult<Self> {
        if let Some(path) = path {
            return Self::load(path)
                .map_err(|e| DriverError::Io(format!("settings {}: {}", path.display(), e)));
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                debug!("No settings file, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn save(&self, path: &Path) -> DriverResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!(path = %path.display(), "Saved driver settings");
        Ok(())
    }
}
