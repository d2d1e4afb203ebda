// SPDX-License-Identifier: GPL-3.0-only

//! Kinect camera intrinsics
//!
//! Reference resolution: 640x480 (medium resolution mode). Records loaded from
//! a calibration file may use another resolution; [`CalibrationInfo::intrinsics_for`]
//! rescales them to the stream that is actually running.

use serde::{Deserialize, Serialize};

/// Focal length X (pixels) of the depth camera at 640x480
pub const DEPTH_FX: f64 = 594.21;
/// Focal length Y (pixels) of the depth camera at 640x480
pub const DEPTH_FY: f64 = 591.04;
/// Principal point X (pixels) of the depth camera at 640x480
pub const DEPTH_CX: f64 = 339.5;
/// Principal point Y (pixels) of the depth camera at 640x480
pub const DEPTH_CY: f64 = 242.7;

/// Focal length X (pixels) of the color camera at 640x480
pub const RGB_FX: f64 = 529.22;
/// Focal length Y (pixels) of the color camera at 640x480
pub const RGB_FY: f64 = 525.56;
/// Principal point X (pixels) of the color camera at 640x480
pub const RGB_CX: f64 = 328.94;
/// Principal point Y (pixels) of the color camera at 640x480
pub const RGB_CY: f64 = 267.48;

/// Base width for intrinsics calculation
pub const BASE_WIDTH: usize = 640;
/// Base height for intrinsics calculation
pub const BASE_HEIGHT: usize = 480;

/// Pinhole intrinsics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraIntrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Factory intrinsics of the depth (IR) camera
    pub fn kinect_depth() -> Self {
        Self::new(DEPTH_FX, DEPTH_FY, DEPTH_CX, DEPTH_CY)
    }

    /// Factory intrinsics of the color camera
    pub fn kinect_rgb() -> Self {
        Self::new(RGB_FX, RGB_FY, RGB_CX, RGB_CY)
    }

    /// Focal lengths must be finite and non-zero for the rays to exist
    pub fn is_usable(&self) -> bool {
        self.fx.is_finite()
            && self.fy.is_finite()
            && self.cx.is_finite()
            && self.cy.is_finite()
            && self.fx != 0.0
            && self.fy != 0.0
    }

    /// Rescale from one resolution to another
    pub fn scaled(&self, from: (usize, usize), to: (usize, usize)) -> Self {
        if from == to || from.0 == 0 || from.1 == 0 {
            return *self;
        }
        let sx = to.0 as f64 / from.0 as f64;
        let sy = to.1 as f64 / from.1 as f64;
        Self {
            fx: self.fx * sx,
            fy: self.fy * sy,
            cx: self.cx * sx,
            cy: self.cy * sy,
        }
    }

    /// Row-major 3x3 camera matrix K
    pub fn camera_matrix(&self) -> [f64; 9] {
        [
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        ]
    }

    /// Row-major 3x4 projection matrix P (no stereo baseline)
    pub fn projection_matrix(&self) -> [f64; 12] {
        [
            self.fx, 0.0, self.cx, 0.0, //
            0.0, self.fy, self.cy, 0.0, //
            0.0, 0.0, 1.0, 0.0,
        ]
    }
}

/// Calibration record for one camera, as stored by the calibration manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationInfo {
    /// Resolution the intrinsics were estimated at
    pub width: usize,
    pub height: usize,
    pub intrinsics: CameraIntrinsics,
    /// Distortion model name (e.g. "plumb_bob")
    #[serde(default = "default_distortion_model")]
    pub distortion_model: String,
    /// Distortion coefficients, passed through to consumers untouched
    #[serde(default)]
    pub distortion: Vec<f64>,
}

fn default_distortion_model() -> String {
    "plumb_bob".to_string()
}

impl CalibrationInfo {
    pub fn new(width: usize, height: usize, intrinsics: CameraIntrinsics) -> Self {
        Self {
            width,
            height,
            intrinsics,
            distortion_model: default_distortion_model(),
            distortion: vec![0.0; 5],
        }
    }

    pub fn kinect_depth() -> Self {
        Self::new(BASE_WIDTH, BASE_HEIGHT, CameraIntrinsics::kinect_depth())
    }

    pub fn kinect_rgb() -> Self {
        Self::new(BASE_WIDTH, BASE_HEIGHT, CameraIntrinsics::kinect_rgb())
    }

    /// Intrinsics for a stream running at `width` x `height`
    pub fn intrinsics_for(&self, width: usize, height: usize) -> CameraIntrinsics {
        self.intrinsics
            .scaled((self.width, self.height), (width, height))
    }
}
