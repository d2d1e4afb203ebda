// SPDX-License-Identifier: GPL-3.0-only

//! Kinect Camera - driver for Kinect-class structured-light depth cameras
//!
//! This library manages the acquisition lifecycle of the sensor, turns raw
//! depth, color and infrared buffers into images and point clouds, and hands
//! the results to a publish/subscribe transport.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Hardware access abstraction and the simulated sensor
//! - [`geometry`]: Projection table, depth decoding and point clouds
//! - [`driver`]: Acquisition state machine, frame buffers, live reconfiguration
//! - [`transport`]: Published message records and publisher implementations
//! - [`calibration`]: Intrinsic calibration providers
//! - [`media`]: Raw buffer to image conversion
//! - [`config`]: Process-level settings
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use kinect_camera::backends::kinect::{SimulatedContext, SimulatedScene};
//! use kinect_camera::calibration::DefaultCalibration;
//! use kinect_camera::transport::MemoryPublisher;
//! use kinect_camera::{DriverSettings, KinectDriver};
//!
//! let driver = KinectDriver::new(
//!     Box::new(SimulatedContext::new(1, SimulatedScene::default())),
//!     Arc::new(DefaultCalibration),
//!     Arc::new(MemoryPublisher::new()),
//!     DriverSettings::default(),
//! )?;
//! driver.init(0)?;
//! driver.start()?;
//! while driver.ok() {}
//! # Ok::<(), kinect_camera::DriverError>(())
//! ```

pub mod backends;
pub mod calibration;
pub mod config;
pub mod constants;
pub mod driver;
pub mod errors;
pub mod geometry;
pub mod media;
mod sync;
pub mod transport;

// Re-export commonly used types
pub use config::DriverSettings;
pub use driver::{AcquisitionState, ConfigRequest, KinectDriver};
pub use errors::{ConfigError, DriverError, DriverResult};
pub use geometry::{Point3, RegionOfInterest};
