// SPDX-License-Identifier: GPL-3.0-only

//! Media conversion utilities
//!
//! - [`format_converters`]: depth visualization and `image` buffer wrappers

pub mod format_converters;

pub use format_converters::{depth_to_mono8, mono8_image, rgb8_image, save_png};
