// SPDX-License-Identifier: GPL-3.0-only

//! Transport seam
//!
//! The driver hands finished messages to a [`Publisher`]. Publishing must not
//! block: the polling thread calls it between hardware pumps.

pub mod messages;

pub use messages::{
    CameraInfoMessage, Encoding, Header, ImageMessage, ImuMessage, Message, PointCloudMessage,
    StructuredCloudMessage,
};

use std::sync::{Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::debug;

use crate::sync::lock;

/// Sink for driver output
pub trait Publisher: Send + Sync {
    fn publish(&self, message: Message);
}

/// Forwards messages over an unbounded tokio channel
///
/// The receiving half is typically drained by an async task. Once the
/// receiver is gone, messages are dropped.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    sender: mpsc::UnboundedSender<Message>,
}

impl ChannelPublisher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Publisher for ChannelPublisher {
    fn publish(&self, message: Message) {
        let topic = message.topic();
        if self.sender.send(message).is_err() {
            debug!(topic, "Receiver closed, dropping message");
        }
    }
}

/// Keeps every message in memory
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    messages: Mutex<Vec<Message>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Message>> {
        lock(&self.messages)
    }

    /// Remove and return everything published so far
    pub fn take(&self) -> Vec<Message> {
        std::mem::take(&mut *self.lock())
    }

    /// Topics of the messages published so far, in order
    pub fn topics(&self) -> Vec<&'static str> {
        self.lock().iter().map(Message::topic).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Publisher for MemoryPublisher {
    fn publish(&self, message: Message) {
        self.lock().push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn imu() -> Message {
        Message::Imu(ImuMessage::new(Header::now("imu", 0, 0), [0.0; 3], 0.0))
    }

    #[test]
    fn test_channel_delivers_in_order() {
        let (publisher, mut rx) = ChannelPublisher::new();
        publisher.publish(imu());
        publisher.publish(imu());
        assert_eq!(rx.try_recv().unwrap().topic(), "imu");
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_survives_closed_receiver() {
        let (publisher, rx) = ChannelPublisher::new();
        drop(rx);
        publisher.publish(imu());
    }

    #[test]
    fn test_memory_publisher_take() {
        let publisher = MemoryPublisher::new();
        publisher.publish(imu());
        assert_eq!(publisher.topics(), vec!["imu"]);
        assert_eq!(publisher.take().len(), 1);
        assert!(publisher.is_empty());
    }
}
