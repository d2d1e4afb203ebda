// SPDX-License-Identifier: GPL-3.0-only

//! Physical Kinect through the system libfreenect
//!
//! The library context is shared between the [`FreenectContext`] and every
//! device opened from it, and is shut down once the last of them is gone.
//! Frame callbacks are registered with the library once per device and
//! dispatch through a heap slot into the driver's [`FrameCallbacks`]; they only
//! ever run inside `freenect_process_events`.
//!
//! Depth is delivered as 11-bit codes at 640x480. The video endpoint carries
//! either RGB or 8-bit infrared, switched by stopping video, changing the
//! mode and starting it again. Infrared frames are a few rows taller than
//! the depth image; only the top `width * height` pixels are delivered.

use std::collections::HashSet;
use std::ptr;
use std::sync::Arc;

use libc::{c_double, c_int, c_void};
use tracing::{debug, info, warn};

use super::{DeviceState, FrameCallbacks, KinectContext, KinectDevice, StreamKind};
use crate::errors::{DriverError, DriverResult};

mod ffi {
    use libc::{c_double, c_int, c_void};

    #[repr(C)]
    pub struct Context {
        _private: [u8; 0],
    }

    #[repr(C)]
    pub struct Device {
        _private: [u8; 0],
    }

    #[repr(C)]
    pub struct RawTiltState {
        _private: [u8; 0],
    }

    pub const DEVICE_MOTOR: c_int = 0x01;
    pub const DEVICE_CAMERA: c_int = 0x02;
    pub const RESOLUTION_MEDIUM: c_int = 1;
    pub const VIDEO_RGB: c_int = 0;
    pub const VIDEO_IR_8BIT: c_int = 2;
    pub const DEPTH_11BIT: c_int = 0;

    #[repr(C)]
    #[derive(Debug, Clone, Copy)]
    pub struct FrameMode {
        pub reserved: u32,
        pub resolution: c_int,
        /// Video or depth format, depending on the mode
        pub format: i32,
        pub bytes: i32,
        pub width: i16,
        pub height: i16,
        pub data_bits_per_pixel: i8,
        pub padding_bits_per_pixel: i8,
        pub framerate: i8,
        pub is_valid: i8,
    }

    pub type FrameCb = extern "C" fn(dev: *mut Device, data: *mut c_void, timestamp: u32);

    #[link(name = "freenect")]
    unsafe extern "C" {
        pub fn freenect_init(ctx: *mut *mut Context, usb_ctx: *mut c_void) -> c_int;
        pub fn freenect_shutdown(ctx: *mut Context) -> c_int;
        pub fn freenect_select_subdevices(ctx: *mut Context, subdevs: c_int);
        pub fn freenect_num_devices(ctx: *mut Context) -> c_int;
        pub fn freenect_process_events(ctx: *mut Context) -> c_int;

        pub fn freenect_open_device(ctx: *mut Context, dev: *mut *mut Device, index: c_int)
        -> c_int;
        pub fn freenect_close_device(dev: *mut Device) -> c_int;
        pub fn freenect_set_user(dev: *mut Device, user: *mut c_void);
        pub fn freenect_get_user(dev: *mut Device) -> *mut c_void;

        pub fn freenect_set_depth_callback(dev: *mut Device, cb: Option<FrameCb>);
        pub fn freenect_set_video_callback(dev: *mut Device, cb: Option<FrameCb>);
        pub fn freenect_find_depth_mode(resolution: c_int, format: c_int) -> FrameMode;
        pub fn freenect_find_video_mode(resolution: c_int, format: c_int) -> FrameMode;
        pub fn freenect_set_depth_mode(dev: *mut Device, mode: FrameMode) -> c_int;
        pub fn freenect_set_video_mode(dev: *mut Device, mode: FrameMode) -> c_int;
        pub fn freenect_start_depth(dev: *mut Device) -> c_int;
        pub fn freenect_stop_depth(dev: *mut Device) -> c_int;
        pub fn freenect_start_video(dev: *mut Device) -> c_int;
        pub fn freenect_stop_video(dev: *mut Device) -> c_int;

        pub fn freenect_update_tilt_state(dev: *mut Device) -> c_int;
        pub fn freenect_get_tilt_state(dev: *mut Device) -> *mut RawTiltState;
        pub fn freenect_get_tilt_degs(state: *mut RawTiltState) -> c_double;
        pub fn freenect_get_mks_accel(
            state: *mut RawTiltState,
            x: *mut c_double,
            y: *mut c_double,
            z: *mut c_double,
        );
    }
}

/// Owned libfreenect context
struct ContextHandle(*mut ffi::Context);

// SAFETY: the context pointer is only handed to libfreenect calls. The driver
// serializes device calls and event processing behind its session lock.
unsafe impl Send for ContextHandle {}
unsafe impl Sync for ContextHandle {}

impl Drop for ContextHandle {
    fn drop(&mut self) {
        // SAFETY: created by freenect_init; every device holding a clone of
        // the handle has been closed by now
        unsafe {
            ffi::freenect_shutdown(self.0);
        }
        debug!("libfreenect context shut down");
    }
}

/// Library context over the system libfreenect
pub struct FreenectContext {
    handle: Arc<ContextHandle>,
}

impl FreenectContext {
    /// Initialize libfreenect with the camera and motor subdevices
    pub fn new() -> DriverResult<Self> {
        let mut ctx: *mut ffi::Context = ptr::null_mut();
        // SAFETY: ctx is a valid out pointer; a null USB context lets the
        // library create its own
        let rc = unsafe { ffi::freenect_init(&mut ctx, ptr::null_mut()) };
        if rc < 0 || ctx.is_null() {
            return Err(DriverError::DeviceOpenFailed(format!(
                "freenect_init failed ({})",
                rc
            )));
        }
        // SAFETY: ctx was just initialized
        unsafe {
            ffi::freenect_select_subdevices(ctx, ffi::DEVICE_MOTOR | ffi::DEVICE_CAMERA);
        }
        info!("libfreenect context initialized");
        Ok(Self {
            handle: Arc::new(ContextHandle(ctx)),
        })
    }
}

impl KinectContext for FreenectContext {
    fn device_count(&self) -> usize {
        // SAFETY: the handle stays valid while self exists
        let count = unsafe { ffi::freenect_num_devices(self.handle.0) };
        usize::try_from(count).unwrap_or(0)
    }

    fn open_device(&mut self, index: usize) -> DriverResult<Box<dyn KinectDevice>> {
        if index >= self.device_count() {
            return Err(DriverError::DeviceNotFound(index));
        }
        let c_index = c_int::try_from(index).map_err(|_| DriverError::DeviceNotFound(index))?;

        let mut dev: *mut ffi::Device = ptr::null_mut();
        // SAFETY: valid context and out pointer
        let rc = unsafe { ffi::freenect_open_device(self.handle.0, &mut dev, c_index) };
        if rc < 0 || dev.is_null() {
            return Err(DriverError::DeviceOpenFailed(format!(
                "freenect_open_device({}) failed ({})",
                index, rc
            )));
        }

        // SAFETY: pure lookup in the library's mode table
        let depth_mode =
            unsafe { ffi::freenect_find_depth_mode(ffi::RESOLUTION_MEDIUM, ffi::DEPTH_11BIT) };
        // SAFETY: dev was opened above
        let rc = if depth_mode.is_valid != 0 {
            unsafe { ffi::freenect_set_depth_mode(dev, depth_mode) }
        } else {
            -1
        };
        if rc < 0 {
            // SAFETY: dev was opened above and is not used afterwards
            unsafe {
                ffi::freenect_close_device(dev);
            }
            return Err(DriverError::DeviceOpenFailed(format!(
                "device {} rejected the 11-bit depth mode",
                index
            )));
        }

        let width = depth_mode.width.max(0) as usize;
        let height = depth_mode.height.max(0) as usize;
        let slot = Box::into_raw(Box::new(CallbackSlot {
            callbacks: None,
            video: None,
            depth_len: width * height,
            video_len: 0,
        }));
        // SAFETY: the slot outlives the registration; FreenectDevice::close
        // unregisters before the slot is freed in Drop
        unsafe {
            ffi::freenect_set_user(dev, slot.cast::<c_void>());
            ffi::freenect_set_depth_callback(dev, Some(depth_trampoline));
            ffi::freenect_set_video_callback(dev, Some(video_trampoline));
        }

        info!(device = index, width, height, "Opened Kinect via libfreenect");
        Ok(Box::new(FreenectDevice {
            index,
            dev,
            slot,
            width,
            height,
            running: HashSet::new(),
            context: Arc::clone(&self.handle),
        }))
    }
}

/// Per-device state reachable from the C callbacks
struct CallbackSlot {
    callbacks: Option<FrameCallbacks>,
    /// Stream the video endpoint currently carries
    video: Option<StreamKind>,
    depth_len: usize,
    video_len: usize,
}

extern "C" fn depth_trampoline(dev: *mut ffi::Device, data: *mut c_void, timestamp: u32) {
    // SAFETY: the user pointer is the device's CallbackSlot, alive while the
    // callback is registered. libfreenect hands over a depth_len u16 frame.
    let slot = unsafe { &mut *ffi::freenect_get_user(dev).cast::<CallbackSlot>() };
    let Some(callbacks) = slot.callbacks.as_mut() else {
        return;
    };
    let frame = unsafe { std::slice::from_raw_parts(data.cast::<u16>(), slot.depth_len) };
    (callbacks.depth)(frame, timestamp);
}

extern "C" fn video_trampoline(dev: *mut ffi::Device, data: *mut c_void, timestamp: u32) {
    // SAFETY: as in depth_trampoline; the active video mode holds at least
    // video_len bytes (checked when the stream starts)
    let slot = unsafe { &mut *ffi::freenect_get_user(dev).cast::<CallbackSlot>() };
    let (Some(callbacks), Some(video)) = (slot.callbacks.as_mut(), slot.video) else {
        return;
    };
    let frame = unsafe { std::slice::from_raw_parts(data.cast::<u8>(), slot.video_len) };
    match video {
        StreamKind::Color => (callbacks.color)(frame, timestamp),
        StreamKind::Infrared => (callbacks.infrared)(frame, timestamp),
        StreamKind::Depth => {}
    }
}

fn check(rc: c_int, what: &str) -> DriverResult<()> {
    if rc < 0 {
        Err(DriverError::Stream(format!("{} failed ({})", what, rc)))
    } else {
        Ok(())
    }
}

/// One opened physical sensor
pub struct FreenectDevice {
    index: usize,
    /// Null once closed
    dev: *mut ffi::Device,
    slot: *mut CallbackSlot,
    width: usize,
    height: usize,
    running: HashSet<StreamKind>,
    /// Declared last so the context is released after the device
    context: Arc<ContextHandle>,
}

// SAFETY: the raw pointers are owned by this value and only used through
// &mut self; libfreenect devices are not tied to the opening thread
unsafe impl Send for FreenectDevice {}

impl FreenectDevice {
    fn handle(&self) -> DriverResult<*mut ffi::Device> {
        if self.dev.is_null() {
            Err(DriverError::InvalidState(format!(
                "device {} is closed",
                self.index
            )))
        } else {
            Ok(self.dev)
        }
    }

    fn start_video(&mut self, stream: StreamKind) -> DriverResult<()> {
        let dev = self.handle()?;
        let (format, bytes_per_pixel) = match stream {
            StreamKind::Infrared => (ffi::VIDEO_IR_8BIT, 1),
            _ => (ffi::VIDEO_RGB, 3),
        };
        // SAFETY: pure lookup in the library's mode table
        let mode = unsafe { ffi::freenect_find_video_mode(ffi::RESOLUTION_MEDIUM, format) };
        let video_len = self.width * self.height * bytes_per_pixel;
        if mode.is_valid == 0 || (mode.bytes.max(0) as usize) < video_len {
            return Err(DriverError::Stream(format!(
                "no {} mode at {}x{}",
                stream, self.width, self.height
            )));
        }

        // SAFETY: the slot is alive and no callback runs outside process_events
        unsafe {
            (*self.slot).video = Some(stream);
            (*self.slot).video_len = video_len;
        }
        // SAFETY: dev is open and video is stopped
        let result = check(unsafe { ffi::freenect_set_video_mode(dev, mode) }, "set_video_mode")
            .and_then(|()| check(unsafe { ffi::freenect_start_video(dev) }, "start_video"));
        if result.is_err() {
            // SAFETY: as above
            unsafe {
                (*self.slot).video = None;
            }
        }
        result
    }
}

impl KinectDevice for FreenectDevice {
    fn resolution(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn set_callbacks(&mut self, callbacks: FrameCallbacks) {
        // SAFETY: the slot is alive and no callback runs outside process_events
        unsafe {
            (*self.slot).callbacks = Some(callbacks);
        }
    }

    fn clear_callbacks(&mut self) {
        // SAFETY: as in set_callbacks
        unsafe {
            (*self.slot).callbacks = None;
        }
    }

    fn start_stream(&mut self, stream: StreamKind) -> DriverResult<()> {
        let conflict = match stream {
            StreamKind::Color => Some(StreamKind::Infrared),
            StreamKind::Infrared => Some(StreamKind::Color),
            StreamKind::Depth => None,
        };
        if let Some(other) = conflict.filter(|other| self.running.contains(other)) {
            return Err(DriverError::Stream(format!(
                "cannot start {} while {} is running",
                stream, other
            )));
        }
        if self.running.contains(&stream) {
            return Ok(());
        }

        match stream {
            StreamKind::Depth => {
                let dev = self.handle()?;
                // SAFETY: dev is open
                check(unsafe { ffi::freenect_start_depth(dev) }, "start_depth")?;
            }
            StreamKind::Color | StreamKind::Infrared => self.start_video(stream)?,
        }
        self.running.insert(stream);
        debug!(device = self.index, %stream, "Stream started");
        Ok(())
    }

    fn stop_stream(&mut self, stream: StreamKind) -> DriverResult<()> {
        if !self.running.remove(&stream) {
            return Ok(());
        }
        let dev = self.handle()?;
        match stream {
            // SAFETY: dev is open and the stream is running
            StreamKind::Depth => check(unsafe { ffi::freenect_stop_depth(dev) }, "stop_depth")?,
            StreamKind::Color | StreamKind::Infrared => {
                // SAFETY: as above; the slot is alive
                unsafe {
                    (*self.slot).video = None;
                }
                check(unsafe { ffi::freenect_stop_video(dev) }, "stop_video")?;
            }
        }
        debug!(device = self.index, %stream, "Stream stopped");
        Ok(())
    }

    fn update_state(&mut self) -> DriverResult<DeviceState> {
        let dev = self.handle()?;
        // SAFETY: dev is open
        check(
            unsafe { ffi::freenect_update_tilt_state(dev) },
            "update_tilt_state",
        )?;
        // SAFETY: dev is open; the state lives inside the device
        let state = unsafe { ffi::freenect_get_tilt_state(dev) };
        if state.is_null() {
            return Err(DriverError::Stream("no tilt state".to_string()));
        }

        let (mut x, mut y, mut z): (c_double, c_double, c_double) = (0.0, 0.0, 0.0);
        // SAFETY: state is non-null; out pointers are valid
        let tilt_degrees = unsafe {
            ffi::freenect_get_mks_accel(state, &mut x, &mut y, &mut z);
            ffi::freenect_get_tilt_degs(state)
        };
        Ok(DeviceState {
            accel: [x, y, z],
            tilt_degrees,
        })
    }

    fn process_events(&mut self) -> DriverResult<()> {
        self.handle()?;
        // SAFETY: the context outlives this device; callbacks only touch the
        // slot, which nothing else borrows during the call
        let rc = unsafe { ffi::freenect_process_events(self.context.0) };
        if rc < 0 {
            return Err(DriverError::EventProcessing(format!(
                "freenect_process_events failed ({})",
                rc
            )));
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.dev.is_null() {
            return;
        }
        let streams: Vec<StreamKind> = self.running.iter().copied().collect();
        for stream in streams {
            if let Err(e) = self.stop_stream(stream) {
                warn!(device = self.index, %stream, error = %e, "Failed to stop stream on close");
            }
        }
        // SAFETY: dev is open; after unregistering, no callback refers to the slot
        unsafe {
            ffi::freenect_set_depth_callback(self.dev, None);
            ffi::freenect_set_video_callback(self.dev, None);
            ffi::freenect_set_user(self.dev, ptr::null_mut());
            ffi::freenect_close_device(self.dev);
            (*self.slot).callbacks = None;
        }
        self.dev = ptr::null_mut();
        info!(device = self.index, "Closed Kinect");
    }
}

impl Drop for FreenectDevice {
    fn drop(&mut self) {
        self.close();
        // SAFETY: allocated with Box::into_raw in open_device, unregistered by close
        drop(unsafe { Box::from_raw(self.slot) });
    }
}
