// SPDX-License-Identifier: GPL-3.0-only

//! Simulated Kinect
//!
//! Deterministic in-process sensor: every call to `process_events` delivers one
//! synthetic frame per running stream. A shared [`SimulatedControl`] lets the
//! caller change the scene, inject failures and observe what the driver did
//! to the device.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

use super::{DeviceState, FrameCallbacks, KinectContext, KinectDevice, StreamKind};
use crate::constants::{FRAME_HEIGHT, FRAME_WIDTH, GRAVITY};
use crate::errors::{DriverError, DriverResult};
use crate::sync::lock;

/// Device clock ticks between frames (60 MHz clock at 30 fps)
const TICKS_PER_FRAME: u32 = 2_000_000;

/// Content the simulated sensor produces
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedScene {
    pub width: usize,
    pub height: usize,
    /// Raw depth frame, row-major; must hold `width * height` codes
    pub depth: Vec<u16>,
    /// Color delivered for every pixel
    pub color: [u8; 3],
    /// Infrared intensity delivered for every pixel
    pub infrared: u8,
    pub accel: [f64; 3],
    pub tilt_degrees: f64,
}

impl SimulatedScene {
    /// Flat wall: every depth pixel reports `raw`
    pub fn uniform(width: usize, height: usize, raw: u16) -> Self {
        Self {
            width,
            height,
            depth: vec![raw; width * height],
            color: [128, 128, 128],
            infrared: 64,
            accel: [0.0, GRAVITY, 0.0],
            tilt_degrees: 0.0,
        }
    }
}

impl Default for SimulatedScene {
    fn default() -> Self {
        Self::uniform(FRAME_WIDTH, FRAME_HEIGHT, 759)
    }
}

#[derive(Debug, Default)]
struct SimState {
    scene: SimulatedScene,
    running: HashSet<StreamKind>,
    open_devices: HashSet<usize>,
    fail_open: bool,
    fail_events: bool,
    fail_start: Option<StreamKind>,
    callback_registrations: usize,
    stream_starts: Vec<StreamKind>,
    events_pumped: u64,
    closed: usize,
}

/// Shared handle to the simulator's internal state
#[derive(Debug, Clone, Default)]
pub struct SimulatedControl {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedControl {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        lock(&self.state)
    }

    /// Replace the scene delivered from the next frame on
    pub fn set_scene(&self, scene: SimulatedScene) {
        self.lock().scene = scene;
    }

    /// Make the next `open_device` calls fail as if the device were busy
    pub fn set_fail_open(&self, fail: bool) {
        self.lock().fail_open = fail;
    }

    /// Make `process_events` report a terminal USB error
    pub fn set_fail_events(&self, fail: bool) {
        self.lock().fail_events = fail;
    }

    /// Make `start_stream` fail for `stream`; `None` clears the fault
    pub fn set_fail_start(&self, stream: Option<StreamKind>) {
        self.lock().fail_start = stream;
    }

    pub fn is_running(&self, stream: StreamKind) -> bool {
        self.lock().running.contains(&stream)
    }

    pub fn running_streams(&self) -> HashSet<StreamKind> {
        self.lock().running.clone()
    }

    /// How many times callbacks were registered
    pub fn callback_registrations(&self) -> usize {
        self.lock().callback_registrations
    }

    /// Every successful `start_stream`, in order
    pub fn stream_starts(&self) -> Vec<StreamKind> {
        self.lock().stream_starts.clone()
    }

    pub fn events_pumped(&self) -> u64 {
        self.lock().events_pumped
    }

    /// How many device handles were closed
    pub fn closed_count(&self) -> usize {
        self.lock().closed
    }
}

/// Simulated library context with `device_count` identical sensors
pub struct SimulatedContext {
    device_count: usize,
    control: SimulatedControl,
}

impl SimulatedContext {
    pub fn new(device_count: usize, scene: SimulatedScene) -> Self {
        let control = SimulatedControl::default();
        control.set_scene(scene);
        Self {
            device_count,
            control,
        }
    }

    pub fn control(&self) -> SimulatedControl {
        self.control.clone()
    }
}

impl KinectContext for SimulatedContext {
    fn device_count(&self) -> usize {
        self.device_count
    }

    fn open_device(&mut self, index: usize) -> DriverResult<Box<dyn KinectDevice>> {
        if index >= self.device_count {
            return Err(DriverError::DeviceNotFound(index));
        }

        let mut state = self.control.lock();
        if state.fail_open {
            return Err(DriverError::DeviceOpenFailed(format!(
                "simulated device {} is busy",
                index
            )));
        }
        if !state.open_devices.insert(index) {
            return Err(DriverError::DeviceOpenFailed(format!(
                "simulated device {} already open",
                index
            )));
        }
        drop(state);

        info!(device = index, "Opened simulated Kinect");
        Ok(Box::new(SimulatedDevice {
            index,
            control: self.control.clone(),
            callbacks: None,
            timestamp: 0,
            open: true,
        }))
    }
}

/// One opened simulated sensor
pub struct SimulatedDevice {
    index: usize,
    control: SimulatedControl,
    callbacks: Option<FrameCallbacks>,
    timestamp: u32,
    open: bool,
}

impl KinectDevice for SimulatedDevice {
    fn resolution(&self) -> (usize, usize) {
        let state = self.control.lock();
        (state.scene.width, state.scene.height)
    }

    fn set_callbacks(&mut self, callbacks: FrameCallbacks) {
        self.control.lock().callback_registrations += 1;
        self.callbacks = Some(callbacks);
    }

    fn clear_callbacks(&mut self) {
        self.callbacks = None;
    }

    fn start_stream(&mut self, stream: StreamKind) -> DriverResult<()> {
        let mut state = self.control.lock();
        if state.fail_start == Some(stream) {
            return Err(DriverError::Stream(format!(
                "simulated {} endpoint not responding",
                stream
            )));
        }
        let conflict = match stream {
            StreamKind::Color => Some(StreamKind::Infrared),
            StreamKind::Infrared => Some(StreamKind::Color),
            StreamKind::Depth => None,
        };
        if let Some(other) = conflict {
            if state.running.contains(&other) {
                return Err(DriverError::Stream(format!(
                    "cannot start {} while {} is running",
                    stream, other
                )));
            }
        }
        if state.running.insert(stream) {
            state.stream_starts.push(stream);
            debug!(device = self.index, %stream, "Simulated stream started");
        }
        Ok(())
    }

    fn stop_stream(&mut self, stream: StreamKind) -> DriverResult<()> {
        if self.control.lock().running.remove(&stream) {
            debug!(device = self.index, %stream, "Simulated stream stopped");
        }
        Ok(())
    }

    fn update_state(&mut self) -> DriverResult<DeviceState> {
        let state = self.control.lock();
        Ok(DeviceState {
            accel: state.scene.accel,
            tilt_degrees: state.scene.tilt_degrees,
        })
    }

    fn process_events(&mut self) -> DriverResult<()> {
        // Snapshot under the lock, deliver without it so callbacks may query
        // the control handle
        let (scene, running) = {
            let mut state = self.control.lock();
            if state.fail_events {
                return Err(DriverError::EventProcessing(
                    "simulated USB transfer error".to_string(),
                ));
            }
            state.events_pumped += 1;
            (state.scene.clone(), state.running.clone())
        };

        self.timestamp = self.timestamp.wrapping_add(TICKS_PER_FRAME);
        let Some(callbacks) = self.callbacks.as_mut() else {
            return Ok(());
        };

        let pixels = scene.width * scene.height;
        if running.contains(&StreamKind::Depth) {
            (callbacks.depth)(&scene.depth, self.timestamp);
        }
        if running.contains(&StreamKind::Color) {
            let rgb: Vec<u8> = scene.color.iter().copied().cycle().take(pixels * 3).collect();
            (callbacks.color)(&rgb, self.timestamp);
        }
        if running.contains(&StreamKind::Infrared) {
            let ir = vec![scene.infrared; pixels];
            (callbacks.infrared)(&ir, self.timestamp);
        }
        Ok(())
    }

    fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        self.callbacks = None;
        let mut state = self.control.lock();
        state.running.clear();
        state.open_devices.remove(&self.index);
        state.closed += 1;
        info!(device = self.index, "Closed simulated Kinect");
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_callbacks(counter: Arc<AtomicUsize>) -> FrameCallbacks {
        let depth_counter = Arc::clone(&counter);
        let color_counter = Arc::clone(&counter);
        FrameCallbacks {
            depth: Box::new(move |_: &[u16], _: u32| {
                depth_counter.fetch_add(1, Ordering::SeqCst);
            }),
            color: Box::new(move |_: &[u8], _: u32| {
                color_counter.fetch_add(1, Ordering::SeqCst);
            }),
            infrared: Box::new(move |_: &[u8], _: u32| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        }
    }

    #[test]
    fn test_open_out_of_range() {
        let mut ctx = SimulatedContext::new(1, SimulatedScene::uniform(4, 4, 700));
        assert_eq!(
            ctx.open_device(1).err(),
            Some(DriverError::DeviceNotFound(1))
        );
    }

    #[test]
    fn test_color_and_infrared_exclusive() {
        let mut ctx = SimulatedContext::new(1, SimulatedScene::uniform(4, 4, 700));
        let mut dev = ctx.open_device(0).unwrap();
        dev.start_stream(StreamKind::Color).unwrap();
        assert!(dev.start_stream(StreamKind::Infrared).is_err());
        dev.stop_stream(StreamKind::Color).unwrap();
        assert!(dev.start_stream(StreamKind::Infrared).is_ok());
    }

    #[test]
    fn test_one_callback_per_running_stream() {
        let mut ctx = SimulatedContext::new(1, SimulatedScene::uniform(4, 4, 700));
        let mut dev = ctx.open_device(0).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        dev.set_callbacks(counting_callbacks(Arc::clone(&counter)));
        dev.start_stream(StreamKind::Depth).unwrap();
        dev.start_stream(StreamKind::Color).unwrap();
        dev.process_events().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_start_failure_injection() {
        let mut ctx = SimulatedContext::new(1, SimulatedScene::uniform(4, 4, 700));
        let control = ctx.control();
        let mut dev = ctx.open_device(0).unwrap();
        control.set_fail_start(Some(StreamKind::Color));
        assert!(matches!(
            dev.start_stream(StreamKind::Color),
            Err(DriverError::Stream(_))
        ));
        assert!(dev.start_stream(StreamKind::Depth).is_ok());
        assert_eq!(control.stream_starts(), vec![StreamKind::Depth]);

        control.set_fail_start(None);
        assert!(dev.start_stream(StreamKind::Color).is_ok());
    }

    #[test]
    fn test_events_pumped_counts_calls() {
        let mut ctx = SimulatedContext::new(1, SimulatedScene::uniform(4, 4, 700));
        let control = ctx.control();
        let mut dev = ctx.open_device(0).unwrap();
        dev.process_events().unwrap();
        dev.process_events().unwrap();
        assert_eq!(control.events_pumped(), 2);

        control.set_fail_events(true);
        assert!(dev.process_events().is_err());
        assert_eq!(control.events_pumped(), 2);
    }

    #[test]
    fn test_close_releases_index() {
        let mut ctx = SimulatedContext::new(1, SimulatedScene::uniform(4, 4, 700));
        let control = ctx.control();
        let mut dev = ctx.open_device(0).unwrap();
        assert!(ctx.open_device(0).is_err());
        dev.close();
        assert_eq!(control.closed_count(), 1);
        drop(dev);
        assert_eq!(control.closed_count(), 1);
        assert!(ctx.open_device(0).is_ok());
    }
}
