// SPDX-License-Identifier: GPL-3.0-only

//! Sensor-to-geometry pipeline
//!
//! - [`intrinsics`]: pinhole calibration records and Kinect factory values
//! - [`projection`]: per-pixel ray table built from the depth intrinsics
//! - [`depth`]: raw disparity code to meters
//! - [`point_cloud`]: ROI-restricted unordered and structured clouds

pub mod depth;
pub mod intrinsics;
pub mod point_cloud;
pub mod projection;

pub use depth::{DepthRange, distance_from_reading, reading_for_distance};
pub use intrinsics::{CalibrationInfo, CameraIntrinsics};
pub use point_cloud::{PointCloudBuilder, RegionOfInterest, StructuredCloud};
pub use projection::{ModelStatus, ProjectionModel, ProjectionTable};

use serde::{Deserialize, Serialize};

/// 3D point or ray in the depth camera's optical frame (meters)
#[repr(C)]
#[derive(
    Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, bytemuck::Pod, bytemuck::Zeroable,
)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    /// Marker for structured cloud entries without a depth reading
    pub const INVALID: Point3 = Point3 {
        x: f32::NAN,
        y: f32::NAN,
        z: f32::NAN,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub fn scaled(&self, s: f32) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }

    pub fn is_valid(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}
