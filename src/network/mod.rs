//! Network-facing state and the transport seam
//!
//! This module holds the device registry, the retried-command queue, ping
//! diagnostics, and the async runtime that wires a transport to the master.

mod connection;
pub mod diagnostics;
pub mod registry;
pub mod retry;

pub use self::connection::{InboundSender, MasterRuntime, OutboundReceiver};
pub use self::diagnostics::{PingSession, PingTracker};
pub use self::registry::{AddressState, DeviceInfo, DeviceManager, JoinSource};
pub use self::retry::{PendingCommand, RetryAction, RetryEngine};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::core::{DeviceId, Error, Result};

/// Where an outbound frame is addressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    Device(DeviceId),
    Broadcast,
}

/// Outbound half of the radio link.
///
/// Sends are fire-and-forget handoffs; implementations must not block.
pub trait Transport {
    fn send(&mut self, destination: Destination, frame: Bytes) -> Result<()>;
}

/// Transport that forwards frames into a bounded channel
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::Sender<(Destination, Bytes)>,
}

impl ChannelTransport {
    /// Creates a transport and the receiver the radio driver drains
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<(Destination, Bytes)>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ChannelTransport { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&mut self, destination: Destination, frame: Bytes) -> Result<()> {
        self.tx.try_send((destination, frame)).map_err(|e| match e {
            TrySendError::Full(_) => Error::network("Outbound queue full"),
            TrySendError::Closed(_) => Error::network("Outbound queue closed"),
        })
    }
}

/// Transport that records every frame, for host-side simulation
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sent: Vec<(Destination, Bytes)>,
    /// When set, every send fails as if the link were down
    pub offline: bool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        MemoryTransport::default()
    }

    /// Frames sent so far, oldest first
    pub fn sent(&self) -> &[(Destination, Bytes)] {
        &self.sent
    }

    /// Removes and returns every recorded frame
    pub fn take_sent(&mut self) -> Vec<(Destination, Bytes)> {
        std::mem::take(&mut self.sent)
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, destination: Destination, frame: Bytes) -> Result<()> {
        if self.offline {
            return Err(Error::network("Transport offline"));
        }
        self.sent.push((destination, frame));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_transport_forwards() {
        let (mut transport, mut rx) = ChannelTransport::new(1);
        let frame = Bytes::from_static(&[0x60, 0x00]);

        transport.send(Destination::Broadcast, frame.clone()).unwrap();
        // Queue holds a single frame
        assert!(matches!(
            transport.send(Destination::Broadcast, frame.clone()),
            Err(Error::Network(_))
        ));

        assert_eq!(rx.recv().await, Some((Destination::Broadcast, frame)));

        drop(rx);
        assert!(transport.send(Destination::Device(DeviceId(1)), Bytes::new()).is_err());
    }

    #[test]
    fn test_memory_transport_records() {
        let mut transport = MemoryTransport::new();
        transport.send(Destination::Device(DeviceId(3)), Bytes::from_static(&[1])).unwrap();
        assert_eq!(transport.sent().len(), 1);
        assert_eq!(transport.take_sent().len(), 1);
        assert!(transport.sent().is_empty());

        transport.offline = true;
        assert!(transport.send(Destination::Broadcast, Bytes::new()).is_err());
    }
}
