// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the Kinect driver

use std::fmt;

/// Result type alias using DriverError
pub type DriverResult<T> = Result<T, DriverError>;

/// Driver error taxonomy
///
/// Device-level and event-loop errors propagate to the owner of the driver.
/// Configuration and calibration errors are reported but never stop streaming.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverError {
    /// No device exists at the requested index
    DeviceNotFound(usize),
    /// The device exists but could not be opened
    DeviceOpenFailed(String),
    /// The hardware event pump reported a terminal error
    EventProcessing(String),
    /// A reconfiguration field failed validation
    InvalidConfiguration(ConfigError),
    /// No intrinsic calibration is available for the depth camera
    MissingCalibration,
    /// Operation is not valid in the current acquisition state
    InvalidState(String),
    /// Starting or stopping a hardware stream failed
    Stream(String),
    /// Settings or calibration file could not be read or written
    Io(String),
}

/// A rejected reconfiguration field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    /// Name of the offending field, as it appears in the reconfiguration record
    pub field: &'static str,
    /// Human readable reason
    pub reason: String,
}

impl ConfigError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::DeviceNotFound(index) => write!(f, "No device at index {}", index),
            DriverError::DeviceOpenFailed(msg) => write!(f, "Failed to open device: {}", msg),
            DriverError::EventProcessing(msg) => write!(f, "Event processing failed: {}", msg),
            DriverError::InvalidConfiguration(e) => write!(f, "Invalid configuration: {}", e),
            DriverError::MissingCalibration => write!(f, "Depth calibration not available"),
            DriverError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            DriverError::Stream(msg) => write!(f, "Stream error: {}", msg),
            DriverError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

impl std::error::Error for DriverError {}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for DriverError {
    fn from(e: ConfigError) -> Self {
        DriverError::InvalidConfiguration(e)
    }
}

impl From<std::io::Error> for DriverError {
    fn from(e: std::io::Error) -> Self {
        DriverError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for DriverError {
    fn from(e: serde_json::Error) -> Self {
        DriverError::Io(e.to_string())
    }
}
