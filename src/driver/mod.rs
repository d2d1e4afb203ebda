// SPDX-License-Identifier: GPL-3.0-only

//! Kinect driver: acquisition lifecycle and the publish path
//!
//! [`KinectDriver`] is a cheap clonable handle. One thread drives
//! [`KinectDriver::ok`] in a loop; any other thread may call `stop`,
//! `reconfigure` or `shutdown` concurrently.
//!
//! # Locking
//!
//! - The session lock guards the device handle and the acquisition state. It
//!   is held across `process_events`, so the hardware callbacks only run
//!   while no other thread is changing streams.
//! - Each raw buffer has its own lock (see [`buffers`]).
//! - The configuration snapshot and the projection table are swapped, never
//!   mutated.
//! - The stream switch timer is never disarmed while the session lock is
//!   held, since a tick in flight may be waiting for it.

pub mod buffers;
pub mod reconfigure;
pub mod state;
pub mod stream_switch;

pub use buffers::{FrameBuffers, FrameSnapshot, RawBuffer};
pub use reconfigure::{ConfigGate, ConfigRequest, DriverConfig, VideoStream};
pub use state::{AccelTiltSample, AcquisitionState};
pub use stream_switch::{LoopAction, StreamSwitchTimer};

use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, error, info, warn};

use crate::backends::kinect::{FrameCallbacks, KinectContext, KinectDevice, StreamKind};
use crate::calibration::CalibrationProvider;
use crate::config::DriverSettings;
use crate::constants::{FRAME_HEIGHT, FRAME_WIDTH};
use crate::errors::{DriverError, DriverResult};
use crate::geometry::{ModelStatus, PointCloudBuilder, ProjectionModel};
use crate::media::format_converters::depth_to_mono8;
use crate::sync::lock;
use crate::transport::{
    CameraInfoMessage, Encoding, Header, ImageMessage, ImuMessage, Message, PointCloudMessage,
    Publisher, StructuredCloudMessage,
};

/// An opened device and what the driver knows about its streams
struct DeviceSlot {
    device: Box<dyn KinectDevice>,
    buffers: Arc<FrameBuffers>,
    depth_running: bool,
    /// Video stream currently running on the hardware
    running_video: Option<VideoStream>,
}

impl DeviceSlot {
    fn stop_streams(&mut self) {
        if self.depth_running {
            if let Err(e) = self.device.stop_stream(StreamKind::Depth) {
                warn!(error = %e, "Failed to stop depth stream");
            }
            self.depth_running = false;
            self.buffers.depth.discard();
        }
        self.stop_video();
    }

    fn stop_video(&mut self) {
        if let Some(video) = self.running_video.take() {
            if let Err(e) = self.device.stop_stream(video.stream_kind()) {
                warn!(error = %e, stream = %video.stream_kind(), "Failed to stop video stream");
            }
            self.buffer_for(video).discard();
        }
    }

    fn buffer_for(&self, video: VideoStream) -> &RawBuffer<u8> {
        match video {
            VideoStream::Color => &self.buffers.color,
            VideoStream::Infrared => &self.buffers.infrared,
        }
    }

    /// Bring the video endpoint in line with `desired`
    fn apply_video(&mut self, desired: Option<VideoStream>) -> DriverResult<()> {
        if self.running_video == desired {
            return Ok(());
        }
        // Color and infrared share the endpoint: stop before start
        self.stop_video();
        if let Some(video) = desired {
            self.device.start_stream(video.stream_kind())?;
            self.running_video = Some(video);
            debug!(stream = %video.stream_kind(), "Video stream started");
        }
        Ok(())
    }

    /// Reverse of init: stop streaming, release callbacks, close the device
    fn release(mut self) {
        self.stop_streams();
        self.device.clear_callbacks();
        self.device.close();
    }
}

#[derive(Default)]
struct Session {
    state: AcquisitionState,
    slot: Option<DeviceSlot>,
}

impl Session {
    fn teardown(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.release();
        }
        self.state = AcquisitionState::Stopped;
    }
}

struct DriverInner {
    context: Mutex<Box<dyn KinectContext>>,
    session: Mutex<Session>,
    gate: ConfigGate,
    projection: ProjectionModel,
    calibration: Arc<dyn CalibrationProvider>,
    publisher: Arc<dyn Publisher>,
    settings: DriverSettings,
    timer: Mutex<Option<StreamSwitchTimer>>,
    imu: Mutex<Option<AccelTiltSample>>,
}

impl Drop for DriverInner {
    fn drop(&mut self) {
        let taken = lock(&self.timer).take();
        if let Some(mut timer) = taken {
            timer.disarm();
        }
        let session = match self.session.get_mut() {
            Ok(session) => session,
            Err(poisoned) => poisoned.into_inner(),
        };
        if session.slot.is_some() {
            session.teardown();
        }
    }
}

/// Kinect driver handle
///
/// Clones share the same device. Every method takes `&self`.
#[derive(Clone)]
pub struct KinectDriver {
    inner: Arc<DriverInner>,
}

impl KinectDriver {
    /// Create a driver around a hardware context
    ///
    /// Applies `settings.initial_config`; an invalid initial record is an error.
    pub fn new(
        context: Box<dyn KinectContext>,
        calibration: Arc<dyn CalibrationProvider>,
        publisher: Arc<dyn Publisher>,
        settings: DriverSettings,
    ) -> DriverResult<Self> {
        let gate = ConfigGate::new(FRAME_WIDTH, FRAME_HEIGHT);
        gate.apply(&settings.initial_config)?;

        Ok(Self {
            inner: Arc::new(DriverInner {
                context: Mutex::new(context),
                session: Mutex::new(Session::default()),
                gate,
                projection: ProjectionModel::new(),
                calibration,
                publisher,
                settings,
                timer: Mutex::new(None),
                imu: Mutex::new(None),
            }),
        })
    }

    pub fn state(&self) -> AcquisitionState {
        lock(&self.inner.session).state
    }

    /// Active configuration snapshot
    pub fn config(&self) -> Arc<DriverConfig> {
        self.inner.gate.snapshot()
    }

    /// Last accelerometer/tilt sample, if one was read
    pub fn imu_sample(&self) -> Option<AccelTiltSample> {
        *lock(&self.inner.imu)
    }

    pub fn projection_status(&self) -> ModelStatus {
        self.inner.projection.status()
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.inner.settings
    }

    /// Number of sensors the hardware context sees
    pub fn device_count(&self) -> usize {
        lock(&self.inner.context).device_count()
    }

    /// Open the sensor at `index` and register the frame callbacks
    ///
    /// On failure the driver stays uninitialized.
    pub fn init(&self, index: usize) -> DriverResult<()> {
        let inner = &self.inner;
        let mut session = lock(&inner.session);
        if session.state != AcquisitionState::Uninitialized {
            return Err(DriverError::InvalidState(format!(
                "init called while {}",
                session.state
            )));
        }

        let mut device = match lock(&inner.context).open_device(index) {
            Ok(device) => device,
            Err(e) => {
                error!(device = index, error = %e, "Failed to open Kinect");
                return Err(e);
            }
        };

        let (width, height) = device.resolution();
        let buffers = Arc::new(FrameBuffers::new(width, height));
        device.set_callbacks(frame_callbacks(&buffers));

        inner.gate.set_frame_size(width, height);
        inner
            .projection
            .refresh(inner.calibration.depth_info().as_ref(), width, height);

        session.slot = Some(DeviceSlot {
            device,
            buffers,
            depth_running: false,
            running_video: None,
        });
        session.state = AcquisitionState::Initialized;
        info!(device = index, width, height, "Kinect initialized");
        Ok(())
    }

    /// Start depth and the configured video stream; no-op while streaming
    pub fn start(&self) -> DriverResult<()> {
        {
            let mut session = lock(&self.inner.session);
            match session.state {
                AcquisitionState::Streaming => {
                    debug!("start() while streaming, ignoring");
                    return Ok(());
                }
                AcquisitionState::Initialized => {}
                state => {
                    return Err(DriverError::InvalidState(format!(
                        "start called while {}",
                        state
                    )));
                }
            }

            let config = self.inner.gate.snapshot();
            let Some(slot) = session.slot.as_mut() else {
                return Err(DriverError::InvalidState("no device handle".to_string()));
            };

            if let Err(e) = slot.device.start_stream(StreamKind::Depth) {
                error!(error = %e, "Failed to start depth stream");
                return Err(e);
            }
            slot.depth_running = true;

            if let Err(e) = slot.apply_video(config.active_video) {
                error!(error = %e, "Failed to start video stream");
                slot.stop_streams();
                return Err(e);
            }

            session.state = AcquisitionState::Streaming;
            info!(video = ?config.active_video, "Streaming started");
        }
        self.sync_timer();
        Ok(())
    }

    /// Halt streaming; no-op unless streaming. Safe from any thread.
    pub fn stop(&self) {
        {
            let mut session = lock(&self.inner.session);
            if session.state != AcquisitionState::Streaming {
                debug!(state = %session.state, "stop() while not streaming, ignoring");
                return;
            }
            if let Some(slot) = session.slot.as_mut() {
                slot.stop_streams();
            }
            session.state = AcquisitionState::Initialized;
            info!("Streaming stopped");
        }
        self.sync_timer();
    }

    /// Stop streaming, release callbacks and close the device
    ///
    /// The driver is unusable afterwards.
    pub fn shutdown(&self) {
        self.disarm_timer();
        let mut session = lock(&self.inner.session);
        if session.state != AcquisitionState::Stopped {
            session.teardown();
            info!("Kinect shut down");
        }
    }

    /// Default reconfiguration record for the opened device's resolution
    pub fn default_request(&self) -> ConfigRequest {
        self.inner.gate.default_request()
    }

    /// Validate and apply a reconfiguration record
    ///
    /// Returns the effective configuration. On error the previous
    /// configuration is active again: a rejected record never takes effect,
    /// and a record whose video stream could not be started is rolled back.
    pub fn reconfigure(&self, request: &ConfigRequest) -> DriverResult<ConfigRequest> {
        let (previous, config) = self.inner.gate.swap(request)?;
        self.sync_timer();
        if let Err(e) = self.inner.reconcile_video() {
            error!(error = %e, version = config.version, "Failed to switch video stream, reverting");
            if self.inner.gate.revert(&config, &previous).is_some() {
                self.sync_timer();
                if let Err(e) = self.inner.reconcile_video() {
                    warn!(error = %e, "Failed to restore previous video stream");
                }
            }
            return Err(e);
        }
        Ok(config.to_request())
    }

    /// One polling step
    ///
    /// Samples accelerometer/tilt and publishes it, pumps the hardware event
    /// queue, then publishes every buffer that received a new frame. Returns
    /// `false` once the session is over (event error or shutdown).
    pub fn ok(&self) -> bool {
        let inner = &self.inner;
        let buffers = {
            let mut session = lock(&inner.session);
            match session.state {
                AcquisitionState::Initialized | AcquisitionState::Streaming => {}
                AcquisitionState::Uninitialized | AcquisitionState::Stopped => return false,
            }
            let Some(slot) = session.slot.as_mut() else {
                return false;
            };

            match slot.device.update_state() {
                Ok(device_state) => {
                    let sample = AccelTiltSample::new(device_state.accel, device_state.tilt_degrees);
                    *lock(&inner.imu) = Some(sample);
                    inner.publish_imu(&sample);
                }
                Err(e) => warn!(error = %e, "Failed to read accelerometer"),
            }

            if let Err(e) = slot.device.process_events() {
                error!(error = %e, "Hardware event processing failed, stopping");
                session.teardown();
                drop(session);
                self.disarm_timer();
                return false;
            }
            Arc::clone(&slot.buffers)
        };

        inner.publish_frames(&buffers);
        true
    }

    /// Arm or disarm the stream switch timer to match state and configuration
    ///
    /// Every state or configuration change ends with a call to this, so the
    /// last caller always sees the final configuration.
    fn sync_timer(&self) {
        let mut timer = lock(&self.inner.timer);
        let wanted = self.state() == AcquisitionState::Streaming
            && self.inner.gate.snapshot().calibration_mode;

        // A timer whose thread has exited is as good as none
        let finished = timer.as_ref().is_some_and(|t| !t.is_armed());
        let stale = if !wanted || finished { timer.take() } else { None };

        if wanted && timer.is_none() {
            let weak = Arc::downgrade(&self.inner);
            *timer = Some(StreamSwitchTimer::arm(
                self.inner.settings.stream_switch_period(),
                move || switch_tick(&weak),
            ));
        }
        drop(timer);

        if let Some(mut t) = stale {
            t.disarm();
        }
    }

    fn disarm_timer(&self) {
        let taken = lock(&self.inner.timer).take();
        if let Some(mut timer) = taken {
            timer.disarm();
        }
    }
}

/// One calibration-mode tick
///
/// With the mode off the tick does nothing; only `sync_timer` retires the
/// timer, so a concurrent off/on pair cannot leave the mode without one.
fn switch_tick(driver: &Weak<DriverInner>) -> LoopAction {
    let Some(inner) = driver.upgrade() else {
        return LoopAction::Stop;
    };
    if inner.gate.toggle_video().is_none() {
        return LoopAction::Continue;
    }
    if let Err(e) = inner.reconcile_video() {
        warn!(error = %e, "Calibration stream switch failed");
    }
    LoopAction::Continue
}

/// Callbacks writing into the driver's buffers
fn frame_callbacks(buffers: &Arc<FrameBuffers>) -> FrameCallbacks {
    let depth = Arc::clone(buffers);
    let color = Arc::clone(buffers);
    let infrared = Arc::clone(buffers);
    FrameCallbacks {
        depth: Box::new(move |data: &[u16], timestamp: u32| depth.depth.write(data, timestamp)),
        color: Box::new(move |data: &[u8], timestamp: u32| color.color.write(data, timestamp)),
        infrared: Box::new(move |data: &[u8], timestamp: u32| {
            infrared.infrared.write(data, timestamp)
        }),
    }
}

impl DriverInner {
    /// Switch the hardware video stream to the one the snapshot asks for
    fn reconcile_video(&self) -> DriverResult<()> {
        let mut session = lock(&self.session);
        if session.state != AcquisitionState::Streaming {
            return Ok(());
        }
        let desired = self.gate.snapshot().active_video;
        match session.slot.as_mut() {
            Some(slot) => slot.apply_video(desired),
            None => Ok(()),
        }
    }

    fn publish_imu(&self, sample: &AccelTiltSample) {
        let header = Header::now(&self.settings.imu_frame_id, 0, 0);
        self.publisher
            .publish(Message::Imu(ImuMessage::new(header, sample.accel, sample.tilt_degrees)));
    }

    /// Publish whatever arrived during the last pump
    ///
    /// One configuration snapshot is used for the whole step.
    fn publish_frames(&self, buffers: &FrameBuffers) {
        let config = self.gate.snapshot();
        let (width, height) = (buffers.width(), buffers.height());
        let depth_frame = self.settings.depth_frame_id.as_str();

        if let Some(depth) = buffers.depth.take_fresh() {
            let header = Header::now(depth_frame, depth.timestamp, depth.sequence);
            let calibration = self.calibration.depth_info();
            let table = self.projection.refresh(calibration.as_ref(), width, height);

            let gray = depth_to_mono8(&depth.data, config.depth_range.max);
            self.publisher.publish(Message::DepthImage(ImageMessage::new(
                header.clone(),
                width,
                height,
                Encoding::Mono8,
                gray,
            )));

            match table {
                Some(table) => {
                    let builder = PointCloudBuilder::new(
                        &depth.data,
                        Some(table.as_ref()),
                        config.roi,
                        config.depth_range,
                    );
                    self.publisher.publish(Message::Points(PointCloudMessage {
                        header: header.clone(),
                        points: builder.unordered(),
                    }));
                    self.publisher.publish(Message::StructuredPoints(
                        StructuredCloudMessage::new(header.clone(), builder.structured()),
                    ));
                }
                None => debug!(seq = depth.sequence, "{}, skipping clouds", DriverError::MissingCalibration),
            }

            if let Some(info) = calibration {
                self.publisher.publish(Message::DepthInfo(CameraInfoMessage::from_calibration(
                    header, &info, width, height,
                )));
            }
        }

        if let Some(color) = buffers.color.take_fresh() {
            let header = Header::now(&self.settings.rgb_frame_id, color.timestamp, color.sequence);
            self.publisher.publish(Message::ColorImage(ImageMessage::new(
                header.clone(),
                width,
                height,
                Encoding::Rgb8,
                color.data,
            )));
            if let Some(info) = self.calibration.color_info() {
                self.publisher.publish(Message::ColorInfo(CameraInfoMessage::from_calibration(
                    header, &info, width, height,
                )));
            }
        }

        // Infrared comes from the depth camera's sensor
        if let Some(ir) = buffers.infrared.take_fresh() {
            let header = Header::now(depth_frame, ir.timestamp, ir.sequence);
            self.publisher.publish(Message::InfraredImage(ImageMessage::new(
                header.clone(),
                width,
                height,
                Encoding::Mono8,
                ir.data,
            )));
            if let Some(info) = self.calibration.depth_info() {
                self.publisher.publish(Message::InfraredInfo(CameraInfoMessage::from_calibration(
                    header, &info, width, height,
                )));
            }
        }
    }
}
