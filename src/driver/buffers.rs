// SPDX-License-Identifier: GPL-3.0-only

//! Raw frame buffers shared between the hardware callbacks and the publish path
//!
//! Each stream has its own lock. A write overwrites the whole buffer and marks
//! it fresh; [`RawBuffer::take_fresh`] copies the pixels out and clears the
//! flag. Both hold the lock only for the copy itself.

use std::sync::{Mutex, MutexGuard};

use crate::sync::lock;

/// Snapshot of one buffer handed to the publish path
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSnapshot<T> {
    pub data: Vec<T>,
    /// Device timestamp of the capture
    pub timestamp: u32,
    /// Running count of frames written to this buffer
    pub sequence: u64,
}

#[derive(Debug)]
struct Slot<T> {
    data: Vec<T>,
    timestamp: u32,
    sequence: u64,
    fresh: bool,
}

/// One raw buffer with write/consume semantics
#[derive(Debug)]
pub struct RawBuffer<T> {
    slot: Mutex<Slot<T>>,
}

impl<T: Copy + Default> RawBuffer<T> {
    pub fn new(len: usize) -> Self {
        Self {
            slot: Mutex::new(Slot {
                data: vec![T::default(); len],
                timestamp: 0,
                sequence: 0,
                fresh: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        lock(&self.slot)
    }

    /// Producer side: overwrite with a new frame
    ///
    /// A frame of a different size replaces the buffer's length.
    pub fn write(&self, frame: &[T], timestamp: u32) {
        let mut slot = self.lock();
        if slot.data.len() == frame.len() {
            slot.data.copy_from_slice(frame);
        } else {
            slot.data.clear();
            slot.data.extend_from_slice(frame);
        }
        slot.timestamp = timestamp;
        slot.sequence += 1;
        slot.fresh = true;
    }

    /// Consumer side: copy the frame out if it has not been consumed yet
    pub fn take_fresh(&self) -> Option<FrameSnapshot<T>> {
        let mut slot = self.lock();
        if !slot.fresh {
            return None;
        }
        slot.fresh = false;
        Some(FrameSnapshot {
            data: slot.data.clone(),
            timestamp: slot.timestamp,
            sequence: slot.sequence,
        })
    }

    /// Copy the last frame regardless of freshness, if any frame arrived
    pub fn snapshot(&self) -> Option<FrameSnapshot<T>> {
        let slot = self.lock();
        if slot.sequence == 0 {
            return None;
        }
        Some(FrameSnapshot {
            data: slot.data.clone(),
            timestamp: slot.timestamp,
            sequence: slot.sequence,
        })
    }

    pub fn has_fresh(&self) -> bool {
        self.lock().fresh
    }

    /// Drop the fresh flag without copying (stream stopped or switched)
    pub fn discard(&self) {
        self.lock().fresh = false;
    }
}

/// The three raw buffers of one device
#[derive(Debug)]
pub struct FrameBuffers {
    pub depth: RawBuffer<u16>,
    pub color: RawBuffer<u8>,
    pub infrared: RawBuffer<u8>,
    width: usize,
    height: usize,
}

impl FrameBuffers {
    pub fn new(width: usize, height: usize) -> Self {
        let pixels = width * height;
        Self {
            depth: RawBuffer::new(pixels),
            color: RawBuffer::new(pixels * 3),
            infrared: RawBuffer::new(pixels),
            width,
            height,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_nothing_before_first_write() {
        let buffers = FrameBuffers::new(4, 2);
        assert!(buffers.depth.take_fresh().is_none());
        assert!(buffers.color.snapshot().is_none());
    }

    #[test]
    fn test_take_consumes() {
        let buffer = RawBuffer::<u16>::new(3);
        buffer.write(&[1, 2, 3], 42);
        let snap = buffer.take_fresh().unwrap();
        assert_eq!(snap.data, vec![1, 2, 3]);
        assert_eq!(snap.timestamp, 42);
        assert_eq!(snap.sequence, 1);
        assert!(buffer.take_fresh().is_none());
        // Last frame is still available for inspection
        assert_eq!(buffer.snapshot().unwrap().data, vec![1, 2, 3]);
    }

    #[test]
    fn test_discard_suppresses_publish() {
        let buffer = RawBuffer::<u8>::new(2);
        buffer.write(&[9, 9], 1);
        buffer.discard();
        assert!(!buffer.has_fresh());
        assert!(buffer.take_fresh().is_none());
    }

    #[test]
    fn test_concurrent_writes_are_whole_frames() {
        let buffer = Arc::new(RawBuffer::<u16>::new(1024));
        let writer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                for i in 0..200u16 {
                    buffer.write(&vec![i; 1024], i as u32);
                }
            })
        };
        for _ in 0..200 {
            if let Some(snap) = buffer.snapshot() {
                let first = snap.data[0];
                assert!(snap.data.iter().all(|&v| v == first), "torn frame");
            }
        }
        writer.join().unwrap();
        assert_eq!(buffer.snapshot().unwrap().sequence, 200);
    }
}
