// SPDX-License-Identifier: GPL-3.0-only

//! Calibration info providers
//!
//! The driver asks its provider for the depth and color calibration records
//! on every depth frame. A provider returning `None` for depth puts the
//! projection model into "not ready": clouds are withheld, images continue.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::{DriverError, DriverResult};
use crate::geometry::CalibrationInfo;
use crate::sync::lock;

/// Read-only source of intrinsic calibration
pub trait CalibrationProvider: Send + Sync {
    /// Calibration of the depth (and infrared) camera
    fn depth_info(&self) -> Option<CalibrationInfo>;

    /// Calibration of the color camera
    fn color_info(&self) -> Option<CalibrationInfo>;
}

/// Factory Kinect v1 intrinsics
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCalibration;

impl CalibrationProvider for DefaultCalibration {
    fn depth_info(&self) -> Option<CalibrationInfo> {
        Some(CalibrationInfo::kinect_depth())
    }

    fn color_info(&self) -> Option<CalibrationInfo> {
        Some(CalibrationInfo::kinect_rgb())
    }
}

/// On-disk calibration file: both cameras, either may be missing
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CalibrationFile {
    #[serde(default)]
    pub depth: Option<CalibrationInfo>,
    #[serde(default)]
    pub color: Option<CalibrationInfo>,
}

impl CalibrationFile {
    /// Factory values for both cameras
    pub fn kinect_defaults() -> Self {
        Self {
            depth: Some(CalibrationInfo::kinect_depth()),
            color: Some(CalibrationInfo::kinect_rgb()),
        }
    }

    /// Default location: `<config dir>/kinect-camera/calibration.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("kinect-camera").join("calibration.json"))
    }

    pub fn load(path: &Path) -> DriverResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let file: Self = serde_json::from_str(&contents)?;
        info!(
            path = %path.display(),
            depth = file.depth.is_some(),
            color = file.color.is_some(),
            "Loaded calibration file"
        );
        Ok(file)
    }

    pub fn save(&self, path: &Path) -> DriverResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), "Saved calibration file");
        Ok(())
    }
}

/// Calibration loaded once from a JSON file
#[derive(Debug, Clone)]
pub struct FileCalibration {
    path: PathBuf,
    contents: CalibrationFile,
}

impl FileCalibration {
    /// Load `path`; a missing or malformed file is an error
    pub fn open(path: impl Into<PathBuf>) -> DriverResult<Self> {
        let path = path.into();
        let contents = CalibrationFile::load(&path)?;
        Ok(Self { path, contents })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CalibrationProvider for FileCalibration {
    fn depth_info(&self) -> Option<CalibrationInfo> {
        self.contents.depth.clone()
    }

    fn color_info(&self) -> Option<CalibrationInfo> {
        self.contents.color.clone()
    }
}

/// In-memory calibration that can be replaced while the driver runs
#[derive(Debug, Default)]
pub struct StaticCalibration {
    contents: Mutex<CalibrationFile>,
}

impl StaticCalibration {
    pub fn new(depth: Option<CalibrationInfo>, color: Option<CalibrationInfo>) -> Self {
        Self {
            contents: Mutex::new(CalibrationFile { depth, color }),
        }
    }

    /// Provider that has no calibration at all
    pub fn empty() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CalibrationFile> {
        lock(&self.contents)
    }

    pub fn set_depth(&self, info: Option<CalibrationInfo>) {
        debug!(present = info.is_some(), "Depth calibration updated");
        self.lock().depth = info;
    }

    pub fn set_color(&self, info: Option<CalibrationInfo>) {
        debug!(present = info.is_some(), "Color calibration updated");
        self.lock().color = info;
    }
}

impl CalibrationProvider for StaticCalibration {
    fn depth_info(&self) -> Option<CalibrationInfo> {
        self.lock().depth.clone()
    }

    fn color_info(&self) -> Option<CalibrationInfo> {
        self.lock().color.clone()
    }
}

/// Pick a provider from an optional file path
///
/// Without a path the factory defaults are used.
pub fn provider_for(path: Option<&Path>) -> DriverResult<Box<dyn CalibrationProvider>> {
    match path {
        Some(path) => {
            let provider = FileCalibration::open(path).map_err(|e| {
                DriverError::Io(format!("calibration {}: {}", path.display(), e))
            })?;
            Ok(Box::new(provider))
        }
        None => Ok(Box::new(DefaultCalibration)),
    }
}
