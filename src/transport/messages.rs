// SPDX-License-Identifier: GPL-3.0-only

//! Logical message records handed to the transport
//!
//! Field layout follows the usual robotics conventions (row-major K/P
//! matrices, -1 in the first covariance entry for "unknown") without
//! committing to any wire format.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::constants::ACCEL_VARIANCE;
use crate::geometry::{CalibrationInfo, Point3, StructuredCloud};

/// Common message header
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Header {
    /// Host time the message was assembled
    pub stamp: DateTime<Utc>,
    pub frame_id: String,
    /// Device clock of the underlying capture (0 for IMU samples)
    pub device_timestamp: u32,
    /// Frame sequence of the source buffer
    pub seq: u64,
}

impl Header {
    pub fn now(frame_id: &str, device_timestamp: u32, seq: u64) -> Self {
        Self {
            stamp: Utc::now(),
            frame_id: frame_id.to_string(),
            device_timestamp,
            seq,
        }
    }
}

/// Pixel encodings the driver publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Encoding {
    Rgb8,
    Mono8,
}

impl Encoding {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Encoding::Rgb8 => 3,
            Encoding::Mono8 => 1,
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Encoding::Rgb8 => write!(f, "rgb8"),
            Encoding::Mono8 => write!(f, "mono8"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageMessage {
    pub header: Header,
    pub width: usize,
    pub height: usize,
    pub encoding: Encoding,
    /// Bytes per row
    pub step: usize,
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl ImageMessage {
    pub fn new(header: Header, width: usize, height: usize, encoding: Encoding, data: Vec<u8>) -> Self {
        Self {
            header,
            width,
            height,
            encoding,
            step: width * encoding.bytes_per_pixel(),
            data,
        }
    }
}

/// Unordered cloud: valid points only
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointCloudMessage {
    pub header: Header,
    #[serde(skip)]
    pub points: Vec<Point3>,
}

impl PointCloudMessage {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Structured cloud: one entry per ROI pixel, NaN for invalid
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuredCloudMessage {
    pub header: Header,
    pub width: usize,
    pub height: usize,
    /// ROI origin in the depth image
    pub x_offset: usize,
    pub y_offset: usize,
    #[serde(skip)]
    pub cloud: StructuredCloud,
}

impl StructuredCloudMessage {
    pub fn new(header: Header, cloud: StructuredCloud) -> Self {
        Self {
            header,
            width: cloud.width(),
            height: cloud.height(),
            x_offset: cloud.roi.x,
            y_offset: cloud.roi.y,
            cloud,
        }
    }
}

/// Calibration record published next to each image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraInfoMessage {
    pub header: Header,
    pub width: usize,
    pub height: usize,
    pub distortion_model: String,
    pub d: Vec<f64>,
    pub k: [f64; 9],
    pub p: [f64; 12],
}

impl CameraInfoMessage {
    /// Record for a stream running at `width` x `height`
    pub fn from_calibration(header: Header, info: &CalibrationInfo, width: usize, height: usize) -> Self {
        let intrinsics = info.intrinsics_for(width, height);
        Self {
            header,
            width,
            height,
            distortion_model: info.distortion_model.clone(),
            d: info.distortion.clone(),
            k: intrinsics.camera_matrix(),
            p: intrinsics.projection_matrix(),
        }
    }
}

/// Accelerometer sample with the motor's tilt reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImuMessage {
    pub header: Header,
    /// m/s^2
    pub linear_acceleration: [f64; 3],
    pub linear_acceleration_covariance: [f64; 9],
    /// The sensor has no gyro or orientation estimate
    pub orientation_covariance: [f64; 9],
    pub angular_velocity_covariance: [f64; 9],
    pub tilt_degrees: f64,
}

const UNKNOWN_COVARIANCE: [f64; 9] = [-1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];

impl ImuMessage {
    pub fn new(header: Header, accel: [f64; 3], tilt_degrees: f64) -> Self {
        Self {
            header,
            linear_acceleration: accel,
            linear_acceleration_covariance: [
                ACCEL_VARIANCE, 0.0, 0.0, //
                0.0, ACCEL_VARIANCE, 0.0, //
                0.0, 0.0, ACCEL_VARIANCE,
            ],
            orientation_covariance: UNKNOWN_COVARIANCE,
            angular_velocity_covariance: UNKNOWN_COVARIANCE,
            tilt_degrees,
        }
    }
}

/// Everything the driver can publish, one variant per channel
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    ColorImage(ImageMessage),
    ColorInfo(CameraInfoMessage),
    InfraredImage(ImageMessage),
    InfraredInfo(CameraInfoMessage),
    DepthImage(ImageMessage),
    DepthInfo(CameraInfoMessage),
    Points(PointCloudMessage),
    StructuredPoints(StructuredCloudMessage),
    Imu(ImuMessage),
}

impl Message {
    /// Channel name, relative to the driver's namespace
    pub fn topic(&self) -> &'static str {
        match self {
            Message::ColorImage(_) => "rgb/image",
            Message::ColorInfo(_) => "rgb/camera_info",
            Message::InfraredImage(_) => "ir/image",
            Message::InfraredInfo(_) => "ir/camera_info",
            Message::DepthImage(_) => "depth/image",
            Message::DepthInfo(_) => "depth/camera_info",
            Message::Points(_) => "depth/points",
            Message::StructuredPoints(_) => "depth/points_structured",
            Message::Imu(_) => "imu",
        }
    }

    pub fn header(&self) -> &Header {
        match self {
            Message::ColorImage(m) | Message::InfraredImage(m) | Message::DepthImage(m) => &m.header,
            Message::ColorInfo(m) | Message::InfraredInfo(m) | Message::DepthInfo(m) => &m.header,
            Message::Points(m) => &m.header,
            Message::StructuredPoints(m) => &m.header,
            Message::Imu(m) => &m.header,
        }
    }
}
