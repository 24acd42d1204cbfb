use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::core::{DeviceId, MasterConfig, Result, Timestamp};
use crate::server::{MasterEvent, MasterServer};
use crate::util;
use super::{ChannelTransport, Destination, Transport};

/// Frames handed to the runtime by the radio driver
pub type InboundSender = mpsc::Sender<(DeviceId, Bytes)>;

/// Frames the radio driver drains and puts on the air
pub type OutboundReceiver = mpsc::Receiver<(Destination, Bytes)>;

/// Async driver for a `MasterServer`.
///
/// Inbound frames and retry ticks are handled on one task, one at a time.
pub struct MasterRuntime<T: Transport> {
    server: MasterServer<T>,
    inbound: mpsc::Receiver<(DeviceId, Bytes)>,
    events: Option<mpsc::Sender<MasterEvent>>,
    started: Instant,
}

impl<T: Transport> MasterRuntime<T> {
    pub fn new(server: MasterServer<T>, inbound: mpsc::Receiver<(DeviceId, Bytes)>) -> Self {
        MasterRuntime {
            server,
            inbound,
            events: None,
            started: Instant::now(),
        }
    }

    /// Forwards every event the server raises into `events`
    pub fn with_events(mut self, events: mpsc::Sender<MasterEvent>) -> Self {
        self.events = Some(events);
        self
    }

    fn now(&self) -> Timestamp {
        let elapsed = self.started.elapsed().as_millis();
        Timestamp(u64::try_from(elapsed).unwrap_or(u64::MAX))
    }

    fn forward_events(&mut self) {
        let events = self.server.drain_events();
        let Some(tx) = &self.events else {
            return;
        };

        let mut closed = false;
        for event in events {
            match tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => warn!(?event, "event queue full, dropping event"),
                Err(TrySendError::Closed(_)) => {
                    closed = true;
                    break;
                }
            }
        }

        if closed {
            debug!("event receiver dropped");
            self.events = None;
        }
    }

    /// Runs until the inbound channel closes, then returns the server
    pub async fn run(mut self) -> Result<MasterServer<T>> {
        util::init_tracing(&self.server.state().config().log_level)?;

        let mut ticker = time::interval(self.server.state().config().tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("master runtime started");

        loop {
            tokio::select! {
                inbound = self.inbound.recv() => {
                    let Some((sender, frame)) = inbound else {
                        break;
                    };
                    let now = self.now();
                    self.server.on_message_received(sender, &frame, now);
                }

                _ = ticker.tick() => {
                    let now = self.now();
                    self.server.on_tick(now);
                }
            }

            self.forward_events();
        }

        info!(devices = self.server.devices().len(), "master runtime stopped");
        Ok(self.server)
    }
}

impl MasterRuntime<ChannelTransport> {
    /// Builds a server on a `ChannelTransport`, with both channels sized by
    /// `channel_capacity`.
    pub fn with_channels(config: MasterConfig) -> Result<(Self, InboundSender, OutboundReceiver)> {
        config.validate()?;
        let capacity = config.channel_capacity;

        let (transport, outbound) = ChannelTransport::new(capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let server = MasterServer::new(config, transport)?;

        Ok((MasterRuntime::new(server, inbound_rx), inbound_tx, outbound))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FirmwareVersion, ShortId};
    use crate::network::AddressState;
    use crate::protocol::{AnnounceMessage, Master2Slave, MasterToSlaveId, ShortIdAssignMessage, Slave2Master};

    #[tokio::test]
    async fn test_announce_produces_assignment() {
        let (transport, mut outbound) = ChannelTransport::new(8);
        let server = MasterServer::new(MasterConfig::default(), transport).unwrap();
        let (inbound_tx, inbound_rx) = mpsc::channel(8);
        let (event_tx, mut event_rx) = mpsc::channel(8);

        let id = DeviceId(0x0102_0304);
        let announce = Slave2Master::Announce(AnnounceMessage {
            device_id: id,
            version: FirmwareVersion::new(2, 1, 0),
        });
        inbound_tx.send((id, announce.encode())).await.unwrap();
        drop(inbound_tx);

        let server = MasterRuntime::new(server, inbound_rx)
            .with_events(event_tx)
            .run()
            .await
            .unwrap();

        let (destination, frame) = outbound.recv().await.unwrap();
        assert_eq!(destination, Destination::Device(id));
        assert_eq!(
            Master2Slave::decode(&frame).unwrap(),
            Master2Slave::ShortIdAssign(ShortIdAssignMessage { short_id: ShortId::MIN })
        );
        assert!(server.devices().has_device_info(id));

        assert!(matches!(event_rx.recv().await, Some(MasterEvent::DeviceJoined { .. })));
        assert!(matches!(event_rx.recv().await, Some(MasterEvent::ShortIdAssigned { .. })));
    }

    #[tokio::test]
    async fn test_channels_sized_from_config() {
        let mut config = MasterConfig::default();
        config.channel_capacity = 2;
        let (runtime, inbound, mut outbound) = MasterRuntime::with_channels(config).unwrap();
        assert_eq!(inbound.capacity(), 2);
        let handle = tokio::spawn(runtime.run());

        // Three assignments against a two-slot outbound queue
        for raw in 1..=3u32 {
            let id = DeviceId(raw);
            let announce = Slave2Master::Announce(AnnounceMessage {
                device_id: id,
                version: FirmwareVersion::default(),
            });
            inbound.send((id, announce.encode())).await.unwrap();
        }
        drop(inbound);

        let server = handle.await.unwrap().unwrap();
        assert_eq!(server.devices().len(), 3);
        assert_eq!(server.devices().address_state(DeviceId(3)), AddressState::AddressPending);
        assert!(outbound.recv().await.is_some());
        assert!(outbound.recv().await.is_some());
        assert!(outbound.try_recv().is_err());

        let mut config = MasterConfig::default();
        config.channel_capacity = 0;
        assert!(MasterRuntime::with_channels(config).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_drive_retransmission() {
        let (transport, mut outbound) = ChannelTransport::new(16);
        let server = MasterServer::new(MasterConfig::default(), transport).unwrap();
        let (inbound_tx, inbound_rx) = mpsc::channel(8);

        let id = DeviceId(7);
        let announce = Slave2Master::Announce(AnnounceMessage {
            device_id: id,
            version: FirmwareVersion::default(),
        });
        inbound_tx.send((id, announce.encode())).await.unwrap();

        let handle = tokio::spawn(MasterRuntime::new(server, inbound_rx).run());

        // Initial send, then one retransmission after the retry timeout
        assert!(outbound.recv().await.is_some());
        assert!(outbound.recv().await.is_some());

        drop(inbound_tx);
        let server = handle.await.unwrap().unwrap();
        assert!(server.state().retries().get(id, MasterToSlaveId::ShortIdAssign).is_some());
    }
}
