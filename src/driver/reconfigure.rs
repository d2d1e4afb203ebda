// SPDX-License-Identifier: GPL-3.0-only

//! Live reconfiguration
//!
//! [`ConfigRequest`] is the record delivered by the reconfiguration service.
//! [`ConfigGate`] validates it and swaps in a new immutable [`DriverConfig`]
//! snapshot. The publish path grabs one snapshot per frame, so a frame never
//! sees half of an update.
//!
//! The calibration-mode stream switch goes through the same gate
//! ([`ConfigGate::toggle_video`]), so a timer tick and a user update can never
//! disagree about which video stream is active.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backends::kinect::StreamKind;
use crate::constants::{DEPTH_MAX_M, DEPTH_MIN_M, FRAME_HEIGHT, FRAME_WIDTH};
use crate::errors::ConfigError;
use crate::geometry::{DepthRange, RegionOfInterest};
use crate::sync::lock;

/// Reconfiguration record, field names as exposed to the reconfiguration service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigRequest {
    pub roi_horiz_start: i32,
    pub roi_horiz_width: i32,
    pub roi_vert_start: i32,
    pub roi_vert_height: i32,
    /// Stream color (or infrared in calibration mode) at all
    pub enable_color_stream: bool,
    /// Closest depth kept in point clouds (meters)
    pub depth_min: f64,
    /// Farthest depth kept in point clouds, also the depth image's white point (meters)
    pub depth_max: f64,
    /// Alternate color and infrared for intrinsic calibration
    pub calibration_mode: bool,
}

impl Default for ConfigRequest {
    fn default() -> Self {
        Self {
            roi_horiz_start: 0,
            roi_horiz_width: FRAME_WIDTH as i32,
            roi_vert_start: 0,
            roi_vert_height: FRAME_HEIGHT as i32,
            enable_color_stream: true,
            depth_min: DEPTH_MIN_M,
            depth_max: DEPTH_MAX_M,
            calibration_mode: false,
        }
    }
}

/// Which stream owns the shared video endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoStream {
    Color,
    Infrared,
}

impl VideoStream {
    pub fn stream_kind(self) -> StreamKind {
        match self {
            VideoStream::Color => StreamKind::Color,
            VideoStream::Infrared => StreamKind::Infrared,
        }
    }

    pub fn other(self) -> Self {
        match self {
            VideoStream::Color => VideoStream::Infrared,
            VideoStream::Infrared => VideoStream::Color,
        }
    }
}

/// Immutable, versioned configuration snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct DriverConfig {
    /// Incremented on every accepted change
    pub version: u64,
    pub roi: RegionOfInterest,
    pub enable_color_stream: bool,
    pub depth_range: DepthRange,
    pub calibration_mode: bool,
    /// Stream that should own the video endpoint; `None` when video is disabled
    pub active_video: Option<VideoStream>,
}

impl DriverConfig {
    /// Initial snapshot for a `width` x `height` sensor
    pub fn initial(width: usize, height: usize) -> Self {
        Self {
            version: 0,
            roi: RegionOfInterest::full(width, height),
            enable_color_stream: true,
            depth_range: DepthRange::new(DEPTH_MIN_M, DEPTH_MAX_M),
            calibration_mode: false,
            active_video: Some(VideoStream::Color),
        }
    }

    /// The effective configuration as a reconfiguration record
    pub fn to_request(&self) -> ConfigRequest {
        ConfigRequest {
            roi_horiz_start: self.roi.x as i32,
            roi_horiz_width: self.roi.width as i32,
            roi_vert_start: self.roi.y as i32,
            roi_vert_height: self.roi.height as i32,
            enable_color_stream: self.enable_color_stream,
            depth_min: self.depth_range.min,
            depth_max: self.depth_range.max,
            calibration_mode: self.calibration_mode,
        }
    }
}

fn non_negative(field: &'static str, value: i32) -> Result<usize, ConfigError> {
    usize::try_from(value).map_err(|_| ConfigError::new(field, format!("{} is negative", value)))
}

/// Validate a request against a `width` x `height` frame
///
/// Returns the ROI and depth range it describes.
pub fn validate(
    request: &ConfigRequest,
    width: usize,
    height: usize,
) -> Result<(RegionOfInterest, DepthRange), ConfigError> {
    let roi = RegionOfInterest::new(
        non_negative("roi_horiz_start", request.roi_horiz_start)?,
        non_negative("roi_vert_start", request.roi_vert_start)?,
        non_negative("roi_horiz_width", request.roi_horiz_width)?,
        non_negative("roi_vert_height", request.roi_vert_height)?,
    );
    roi.validate(width, height)?;

    if !(request.depth_min.is_finite() && request.depth_min >= 0.0) {
        return Err(ConfigError::new(
            "depth_min",
            format!("{} is not a non-negative distance", request.depth_min),
        ));
    }
    if !(request.depth_max.is_finite() && request.depth_max >= 0.0) {
        return Err(ConfigError::new(
            "depth_max",
            format!("{} is not a non-negative distance", request.depth_max),
        ));
    }
    if request.depth_min > request.depth_max {
        return Err(ConfigError::new(
            "depth_min",
            format!(
                "{} exceeds depth_max {}",
                request.depth_min, request.depth_max
            ),
        ));
    }

    if request.calibration_mode && !request.enable_color_stream {
        return Err(ConfigError::new(
            "calibration_mode",
            "alternates color and infrared, requires enable_color_stream",
        ));
    }

    Ok((roi, DepthRange::new(request.depth_min, request.depth_max)))
}

#[derive(Debug)]
struct GateState {
    width: usize,
    height: usize,
    current: Arc<DriverConfig>,
}

/// Serialises configuration changes and hands out snapshots
#[derive(Debug)]
pub struct ConfigGate {
    state: Mutex<GateState>,
}

impl ConfigGate {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            state: Mutex::new(GateState {
                width,
                height,
                current: Arc::new(DriverConfig::initial(width, height)),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        lock(&self.state)
    }

    /// Currently active snapshot
    pub fn snapshot(&self) -> Arc<DriverConfig> {
        Arc::clone(&self.lock().current)
    }

    pub fn frame_size(&self) -> (usize, usize) {
        let state = self.lock();
        (state.width, state.height)
    }

    /// Default record for the current frame size: full-frame ROI, color on
    pub fn default_request(&self) -> ConfigRequest {
        let (width, height) = self.frame_size();
        ConfigRequest {
            roi_horiz_width: width as i32,
            roi_vert_height: height as i32,
            ..ConfigRequest::default()
        }
    }

    /// Validate `request` and make it the active configuration
    ///
    /// On error the previous snapshot stays active.
    pub fn apply(&self, request: &ConfigRequest) -> Result<Arc<DriverConfig>, ConfigError> {
        self.swap(request).map(|(_, next)| next)
    }

    /// Like [`ConfigGate::apply`], also returning the snapshot it replaced
    pub fn swap(
        &self,
        request: &ConfigRequest,
    ) -> Result<(Arc<DriverConfig>, Arc<DriverConfig>), ConfigError> {
        let mut state = self.lock();
        let (roi, depth_range) = match validate(request, state.width, state.height) {
            Ok(v) => v,
            Err(e) => {
                warn!(field = e.field, reason = %e.reason, "Rejected reconfiguration");
                return Err(e);
            }
        };

        let previous = &state.current;
        let active_video = if !request.enable_color_stream {
            None
        } else if request.calibration_mode && previous.calibration_mode {
            // Keep whatever the switch timer selected last
            previous.active_video.or(Some(VideoStream::Color))
        } else {
            Some(VideoStream::Color)
        };

        let next = Arc::new(DriverConfig {
            version: previous.version + 1,
            roi,
            enable_color_stream: request.enable_color_stream,
            depth_range,
            calibration_mode: request.calibration_mode,
            active_video,
        });
        info!(
            version = next.version,
            roi = ?next.roi,
            min = depth_range.min,
            max = depth_range.max,
            color = next.enable_color_stream,
            calibration = next.calibration_mode,
            "Applied reconfiguration"
        );
        let previous = std::mem::replace(&mut state.current, Arc::clone(&next));
        Ok((previous, next))
    }

    /// Put `previous` back if `applied` is still the active snapshot
    ///
    /// Returns the restored snapshot, or `None` when another change (a
    /// later update or a switch tick) already replaced `applied`.
    pub fn revert(
        &self,
        applied: &DriverConfig,
        previous: &DriverConfig,
    ) -> Option<Arc<DriverConfig>> {
        let mut state = self.lock();
        if state.current.version != applied.version {
            return None;
        }
        let restored = Arc::new(DriverConfig {
            version: applied.version + 1,
            ..previous.clone()
        });
        info!(
            version = restored.version,
            restored = previous.version,
            "Reverted reconfiguration"
        );
        state.current = Arc::clone(&restored);
        Some(restored)
    }

    /// Flip color/infrared if calibration mode is active
    ///
    /// Returns the new snapshot, or `None` when the mode is off (a late tick
    /// after the mode was disabled is ignored).
    pub fn toggle_video(&self) -> Option<Arc<DriverConfig>> {
        let mut state = self.lock();
        let previous = &state.current;
        if !previous.calibration_mode {
            return None;
        }
        let active = previous.active_video.unwrap_or(VideoStream::Infrared).other();
        let next = Arc::new(DriverConfig {
            version: previous.version + 1,
            active_video: Some(active),
            ..(**previous).clone()
        });
        debug!(version = next.version, video = ?active, "Toggled calibration stream");
        state.current = Arc::clone(&next);
        Some(next)
    }

    /// Adopt the resolution of the opened device
    ///
    /// An ROI that no longer fits is reset to the full frame.
    pub fn set_frame_size(&self, width: usize, height: usize) {
        let mut state = self.lock();
        if state.width == width && state.height == height {
            return;
        }
        state.width = width;
        state.height = height;
        if state.current.roi.validate(width, height).is_err() {
            warn!(
                roi = ?state.current.roi,
                width,
                height,
                "ROI does not fit device resolution, using full frame"
            );
            let next = DriverConfig {
                version: state.current.version + 1,
                roi: RegionOfInterest::full(width, height),
                ..(*state.current).clone()
            };
            state.current = Arc::new(next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(x: i32, w: i32, y: i32, h: i32) -> ConfigRequest {
        ConfigRequest {
            roi_horiz_start: x,
            roi_horiz_width: w,
            roi_vert_start: y,
            roi_vert_height: h,
            ..Default::default()
        }
    }

    #[test]
    fn test_accepts_and_bumps_version() {
        let gate = ConfigGate::new(640, 480);
        let next = gate.apply(&request(100, 200, 50, 100)).unwrap();
        assert_eq!(next.version, 1);
        assert_eq!(next.roi, RegionOfInterest::new(100, 50, 200, 100));
        assert_eq!(gate.snapshot(), next);
    }

    #[test]
    fn test_roi_overflow_rejected_and_unchanged() {
        let gate = ConfigGate::new(640, 480);
        let before = gate.snapshot();
        let err = gate.apply(&request(600, 100, 0, 480)).unwrap_err();
        assert_eq!(err.field, "roi_horiz_width");
        assert_eq!(gate.snapshot(), before);
    }

    #[test]
    fn test_negative_field_named() {
        let gate = ConfigGate::new(640, 480);
        let err = gate.apply(&request(0, 640, -1, 10)).unwrap_err();
        assert_eq!(err.field, "roi_vert_start");
    }

    #[test]
    fn test_depth_range_validation() {
        let gate = ConfigGate::new(640, 480);
        let inverted = ConfigRequest {
            depth_min: 3.0,
            depth_max: 1.0,
            ..Default::default()
        };
        assert_eq!(gate.apply(&inverted).unwrap_err().field, "depth_min");

        let negative = ConfigRequest {
            depth_max: -1.0,
            depth_min: 0.0,
            ..Default::default()
        };
        assert_eq!(gate.apply(&negative).unwrap_err().field, "depth_max");
        assert_eq!(gate.snapshot().version, 0);
    }

    #[test]
    fn test_calibration_mode_requires_video() {
        let gate = ConfigGate::new(640, 480);
        let req = ConfigRequest {
            enable_color_stream: false,
            calibration_mode: true,
            ..Default::default()
        };
        assert_eq!(gate.apply(&req).unwrap_err().field, "calibration_mode");
    }

    #[test]
    fn test_disabled_color_has_no_video() {
        let gate = ConfigGate::new(640, 480);
        let req = ConfigRequest {
            enable_color_stream: false,
            ..Default::default()
        };
        assert_eq!(gate.apply(&req).unwrap().active_video, None);
    }

    #[test]
    fn test_toggle_only_in_calibration_mode() {
        let gate = ConfigGate::new(640, 480);
        assert!(gate.toggle_video().is_none());

        let calib = ConfigRequest {
            calibration_mode: true,
            ..Default::default()
        };
        assert_eq!(gate.apply(&calib).unwrap().active_video, Some(VideoStream::Color));
        assert_eq!(
            gate.toggle_video().unwrap().active_video,
            Some(VideoStream::Infrared)
        );
        // Re-applying calibration mode keeps the timer's choice
        assert_eq!(
            gate.apply(&calib).unwrap().active_video,
            Some(VideoStream::Infrared)
        );
        // Leaving calibration mode returns to color and stops toggling
        assert_eq!(
            gate.apply(&ConfigRequest::default()).unwrap().active_video,
            Some(VideoStream::Color)
        );
        assert!(gate.toggle_video().is_none());
    }

    #[test]
    fn test_effective_request_round_trip() {
        let gate = ConfigGate::new(640, 480);
        let req = request(10, 20, 30, 40);
        assert_eq!(gate.apply(&req).unwrap().to_request(), req);
    }

    #[test]
    fn test_frame_size_resets_roi() {
        let gate = ConfigGate::new(640, 480);
        gate.apply(&request(300, 300, 0, 480)).unwrap();
        gate.set_frame_size(320, 240);
        assert_eq!(gate.snapshot().roi, RegionOfInterest::full(320, 240));
    }

    #[test]
    fn test_revert_restores_previous_fields() {
        let gate = ConfigGate::new(640, 480);
        let (previous, applied) = gate.swap(&request(100, 200, 50, 100)).unwrap();
        assert_eq!(previous.version, 0);

        let restored = gate.revert(&applied, &previous).unwrap();
        assert_eq!(restored.version, 2);
        assert_eq!(restored.roi, RegionOfInterest::full(640, 480));
        assert_eq!(gate.snapshot(), restored);
    }

    #[test]
    fn test_revert_skipped_after_newer_change() {
        let gate = ConfigGate::new(640, 480);
        let calib = ConfigRequest {
            calibration_mode: true,
            ..Default::default()
        };
        let (previous, applied) = gate.swap(&calib).unwrap();
        let toggled = gate.toggle_video().unwrap();

        assert!(gate.revert(&applied, &previous).is_none());
        assert_eq!(gate.snapshot(), toggled);
    }

    #[test]
    fn test_default_request_follows_frame_size() {
        let gate = ConfigGate::new(640, 480);
        gate.set_frame_size(8, 6);
        assert_eq!(gate.frame_size(), (8, 6));

        let req = gate.default_request();
        assert_eq!((req.roi_horiz_width, req.roi_vert_height), (8, 6));
        assert!(gate.apply(&req).is_ok());
        assert_eq!(
            gate.apply(&ConfigRequest::default()).unwrap_err().field,
            "roi_horiz_width"
        );
    }

    #[test]
    fn test_request_json_fills_defaults() {
        let req: ConfigRequest = serde_json::from_str(r#"{"roi_horiz_start": 5}"#).unwrap();
        assert_eq!(req.roi_horiz_start, 5);
        assert_eq!(req.roi_horiz_width, 640);
        assert!(req.enable_color_stream);
    }
}
