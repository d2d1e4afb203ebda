// SPDX-License-Identifier: GPL-3.0-only

//! Kinect hardware access abstraction
//!
//! The driver talks to the sensor through two traits:
//!
//! - [`KinectContext`]: the per-process library context. Enumerates and opens
//!   devices. Owned by the driver and passed around explicitly.
//! - [`KinectDevice`]: one opened sensor. Accepts frame callbacks, starts and
//!   stops streams, reports accelerometer/tilt state and pumps the USB event
//!   queue. Callbacks fire synchronously from inside
//!   [`KinectDevice::process_events`].
//!
//! ```text
//! ┌──────────────┐  open(index)  ┌──────────────┐
//! │ KinectContext├──────────────►│ KinectDevice │
//! └──────────────┘               └──────┬───────┘
//!                                       │ process_events()
//!                          depth / color / infrared callbacks
//!                                       ▼
//!                               driver frame buffers
//! ```
//!
//! Implementations:
//!
//! - `libfreenect` (feature `libfreenect`): physical sensors through the
//!   system libfreenect
//! - [`simulated`]: in-process sensor used by the tests and by default in
//!   `kinect-camera run`

#[cfg(feature = "libfreenect")]
pub mod libfreenect;
pub mod simulated;

#[cfg(feature = "libfreenect")]
pub use libfreenect::{FreenectContext, FreenectDevice};
pub use simulated::{SimulatedContext, SimulatedControl, SimulatedDevice, SimulatedScene};

use crate::errors::DriverResult;

/// Hardware streams of the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// 11-bit disparity stream
    Depth,
    /// Bayer/RGB color camera
    Color,
    /// Raw infrared camera (shares the video endpoint with color)
    Infrared,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Depth => write!(f, "depth"),
            StreamKind::Color => write!(f, "color"),
            StreamKind::Infrared => write!(f, "infrared"),
        }
    }
}

/// Physical state reported by the motor/accelerometer subdevice
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DeviceState {
    /// Accelerometer reading in m/s^2 (x, y, z)
    pub accel: [f64; 3],
    /// Tilt angle in degrees
    pub tilt_degrees: f64,
}

/// Depth frame callback: 11-bit codes (row-major) and device timestamp
pub type DepthCallback = Box<dyn FnMut(&[u16], u32) + Send>;
/// Video frame callback: packed RGB or 8-bit infrared and device timestamp
pub type VideoCallback = Box<dyn FnMut(&[u8], u32) + Send>;

/// Callbacks registered with an opened device
pub struct FrameCallbacks {
    pub depth: DepthCallback,
    pub color: VideoCallback,
    pub infrared: VideoCallback,
}

impl std::fmt::Debug for FrameCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FrameCallbacks")
    }
}

/// Library context; one per process
pub trait KinectContext: Send {
    /// Number of sensors attached
    fn device_count(&self) -> usize;

    /// Open the sensor at `index`
    ///
    /// # Returns
    /// * `Err(DriverError::DeviceNotFound)` - no sensor at that index
    /// * `Err(DriverError::DeviceOpenFailed)` - sensor present but busy or failing
    fn open_device(&mut self, index: usize) -> DriverResult<Box<dyn KinectDevice>>;
}

/// One opened sensor
pub trait KinectDevice: Send {
    /// Native frame resolution of the depth and video streams
    fn resolution(&self) -> (usize, usize);

    /// Register the frame callbacks, replacing any previous set
    fn set_callbacks(&mut self, callbacks: FrameCallbacks);

    /// Drop the registered callbacks
    fn clear_callbacks(&mut self);

    /// Begin delivering frames for `stream`
    ///
    /// Color and infrared share the video endpoint; starting one while the
    /// other runs is an error.
    fn start_stream(&mut self, stream: StreamKind) -> DriverResult<()>;

    /// Stop delivering frames for `stream`; stopping an idle stream is a no-op
    fn stop_stream(&mut self, stream: StreamKind) -> DriverResult<()>;

    /// Refresh and return the accelerometer/tilt state
    fn update_state(&mut self) -> DriverResult<DeviceState>;

    /// Pump the hardware event queue, invoking callbacks for pending frames
    ///
    /// Callbacks fire for the frames completed during the call; the driver
    /// keeps only the newest per stream. An error is terminal for the session.
    fn process_events(&mut self) -> DriverResult<()>;

    /// Release the device handle
    fn close(&mut self);
}
