// SPDX-License-Identifier: GPL-3.0-only

//! Raw disparity to metric depth
//!
//! The Kinect reports an 11-bit disparity code per pixel. Distance follows
//! `1 / (raw * A + B)`, which grows with the raw code until the denominator
//! reaches zero. Codes at or past that pole, and the sensor's own
//! [`DEPTH_RAW_NO_VALUE`], have no metric meaning.

use crate::constants::{DEPTH_COEFF_A, DEPTH_COEFF_B, DEPTH_RAW_NO_VALUE};

/// Convert a raw depth reading to meters
///
/// Returns `None` for the no-return code and for codes beyond the curve.
#[inline]
pub fn distance_from_reading(raw: u16) -> Option<f64> {
    if raw >= DEPTH_RAW_NO_VALUE {
        return None;
    }
    let denom = raw as f64 * DEPTH_COEFF_A + DEPTH_COEFF_B;
    if denom <= 0.0 {
        return None;
    }
    Some(1.0 / denom)
}

/// Inverse of [`distance_from_reading`], rounded to the nearest code
///
/// Handy for synthesising frames at a known distance.
pub fn reading_for_distance(meters: f64) -> Option<u16> {
    if !(meters.is_finite() && meters > 0.0) {
        return None;
    }
    let raw = ((1.0 / meters) - DEPTH_COEFF_B) / DEPTH_COEFF_A;
    let raw = raw.round();
    if raw < 0.0 || raw >= DEPTH_RAW_NO_VALUE as f64 {
        return None;
    }
    Some(raw as u16)
}

/// Depth decoder bound to a metric range
///
/// Readings that decode but fall outside `[min, max]` are treated as invalid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthRange {
    pub min: f64,
    pub max: f64,
}

impl DepthRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Decode and range-check a single reading
    #[inline]
    pub fn decode(&self, raw: u16) -> Option<f64> {
        distance_from_reading(raw).filter(|d| *d >= self.min && *d <= self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_value_code_is_invalid() {
        assert_eq!(distance_from_reading(DEPTH_RAW_NO_VALUE), None);
        assert_eq!(distance_from_reading(u16::MAX), None);
    }

    #[test]
    fn test_past_pole_is_invalid() {
        // 1/(1100*A + B) has a negative denominator
        assert_eq!(distance_from_reading(1100), None);
        assert_eq!(distance_from_reading(2046), None);
    }

    #[test]
    fn test_decoding_preserves_order() {
        let mut last = 0.0;
        for raw in 0..DEPTH_RAW_NO_VALUE {
            if let Some(d) = distance_from_reading(raw) {
                assert!(d > last, "distance must grow with raw code ({})", raw);
                last = d;
            }
        }
        assert!(last > 100.0);
    }

    #[test]
    fn test_known_reading() {
        let d = distance_from_reading(759).unwrap();
        assert!((d - 1.0).abs() < 1e-3, "759 decodes to {}", d);
        assert_eq!(reading_for_distance(1.0), Some(759));
    }

    #[test]
    fn test_deterministic() {
        for raw in [0u16, 400, 759, 1000, 1084] {
            assert_eq!(distance_from_reading(raw), distance_from_reading(raw));
        }
    }

    #[test]
    fn test_range_filter() {
        let range = DepthRange::new(0.5, 2.0);
        assert!(range.decode(759).is_some());
        // ~0.30m at raw 0
        assert!(range.decode(0).is_none());
        assert!(range.decode(1050).is_none());
    }
}
