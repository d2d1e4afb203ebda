// SPDX-License-Identifier: GPL-3.0-only
//! Pixel format conversion for published images
//!
//! Raw sensor buffers become 8-bit images here: depth codes are decoded to
//! meters and mapped linearly onto a grayscale ramp, color and infrared are
//! wrapped into `image` buffers for snapshot export.

use std::path::Path;

use image::{DynamicImage, GrayImage, RgbImage};

use crate::errors::{DriverError, DriverResult};
use crate::geometry::distance_from_reading;

/// Convert raw depth codes to a mono8 visualization
///
/// Linear in metric distance: 0 m is black, `max_m` and beyond is white.
/// Pixels without a valid reading are 0.
pub fn depth_to_mono8(depth: &[u16], max_m: f64) -> Vec<u8> {
    if !(max_m.is_finite() && max_m > 0.0) {
        return vec![0; depth.len()];
    }
    depth
        .iter()
        .map(|&raw| match distance_from_reading(raw) {
            Some(d) => ((d / max_m).clamp(0.0, 1.0) * 255.0).round() as u8,
            None => 0,
        })
        .collect()
}

/// Wrap packed RGB bytes; `None` if the length does not match
pub fn rgb8_image(data: &[u8], width: usize, height: usize) -> Option<RgbImage> {
    if data.len() != width * height * 3 {
        return None;
    }
    RgbImage::from_raw(width as u32, height as u32, data.to_vec())
}

/// Wrap single channel bytes; `None` if the length does not match
pub fn mono8_image(data: &[u8], width: usize, height: usize) -> Option<GrayImage> {
    if data.len() != width * height {
        return None;
    }
    GrayImage::from_raw(width as u32, height as u32, data.to_vec())
}

/// Write an image buffer as PNG
pub fn save_png(image: &DynamicImage, path: &Path) -> DriverResult<()> {
    image
        .save_with_format(path, image::ImageFormat::Png)
        .map_err(|e| DriverError::Io(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DEPTH_RAW_NO_VALUE;
    use crate::geometry::reading_for_distance;

    #[test]
    fn test_depth_mono8_is_linear_to_max() {
        let one_m = reading_for_distance(1.0).unwrap();
        let two_m = reading_for_distance(2.0).unwrap();
        let gray = depth_to_mono8(&[one_m, two_m, DEPTH_RAW_NO_VALUE], 4.0);
        // Quarter and half of the ramp, within one code of rounding error
        assert!((gray[0] as i32 - 64).abs() <= 1, "got {}", gray[0]);
        assert!((gray[1] as i32 - 128).abs() <= 1, "got {}", gray[1]);
        assert_eq!(gray[2], 0);
    }

    #[test]
    fn test_depth_mono8_saturates_beyond_max() {
        let far = reading_for_distance(3.0).unwrap();
        assert_eq!(depth_to_mono8(&[far], 1.0), vec![255]);
    }

    #[test]
    fn test_depth_mono8_degenerate_max() {
        let one_m = reading_for_distance(1.0).unwrap();
        assert_eq!(depth_to_mono8(&[one_m], 0.0), vec![0]);
    }

    #[test]
    fn test_image_wrappers_check_length() {
        assert!(rgb8_image(&[0; 12], 2, 2).is_some());
        assert!(rgb8_image(&[0; 11], 2, 2).is_none());
        assert!(mono8_image(&[0; 4], 2, 2).is_some());
        assert!(mono8_image(&[0; 5], 2, 2).is_none());
    }

    #[test]
    fn test_save_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ir.png");
        let img = mono8_image(&[10, 20, 30, 40], 2, 2).unwrap();
        save_png(&DynamicImage::ImageLuma8(img), &path).unwrap();
        assert!(path.exists());
    }
}
