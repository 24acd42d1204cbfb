//! Master coordination context
//!
//! `MasterServer` is the single logical actor: inbound frames and retry ticks
//! both go through `&mut self`, so the device table, retry queue, ping
//! sessions and scheduler are never touched concurrently.

pub mod dispatcher;
pub mod handlers;

pub use self::dispatcher::Dispatcher;
pub use self::handlers::{HandlerContext, MessageHandler};

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::core::{DeviceId, Error, FirmwareVersion, MasterConfig, Result, ShortId, Timestamp};
use crate::network::{
    Destination,
    DeviceManager,
    PingSession,
    PingTracker,
    RetryAction,
    RetryEngine,
    Transport,
};
use crate::protocol::{Direction, Master2Slave, MasterToSlaveId, Message, Slave2Master, SyncMessage};
use crate::sync::TdmaScheduler;
use crate::util;

/// Notifications for collaborators outside the control plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MasterEvent {
    DeviceJoined { device_id: DeviceId, version: FirmwareVersion },
    ShortIdAssigned { device_id: DeviceId, short_id: ShortId },
    ShortIdConfirmed { device_id: DeviceId, short_id: ShortId },
    /// Device reported a failed confirmation, or echoed the wrong address
    ShortIdRejected { device_id: DeviceId, short_id: u8, status: u8 },
    /// No free short id; the device stays unassigned until it announces again
    AllocationExhausted { device_id: DeviceId },
    /// Every transmission of a retried command went unacknowledged
    DeliveryFailed { device_id: DeviceId, message_id: MasterToSlaveId, attempts: u8 },
    /// Status reported back for configuration tracking
    SlaveConfigResponse { device_id: DeviceId, message_id: u8, status: u8 },
}

/// Tables shared by every handler invocation
#[derive(Debug)]
pub struct MasterState {
    pub(crate) config: MasterConfig,
    pub(crate) devices: DeviceManager,
    pub(crate) retries: RetryEngine,
    pub(crate) pings: PingTracker,
    pub(crate) scheduler: TdmaScheduler,
    events: Vec<MasterEvent>,
}

impl MasterState {
    pub fn new(config: MasterConfig) -> Self {
        MasterState {
            devices: DeviceManager::new(),
            retries: RetryEngine::new(config.retry_timeout),
            pings: PingTracker::new(),
            scheduler: TdmaScheduler::new(&config.sync),
            events: Vec::new(),
            config,
        }
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    pub fn devices(&self) -> &DeviceManager {
        &self.devices
    }

    pub fn retries(&self) -> &RetryEngine {
        &self.retries
    }

    pub fn pings(&self) -> &PingTracker {
        &self.pings
    }

    pub fn scheduler(&self) -> &TdmaScheduler {
        &self.scheduler
    }

    pub(crate) fn push_event(&mut self, event: MasterEvent) {
        self.events.push(event);
    }

    /// Queues `message` for bounded retransmission and sends it right away.
    ///
    /// On a transport error the entry stays queued, so the next retry tick
    /// sends it again.
    pub fn send_command_to_slave_with_retry(
        &mut self,
        transport: &mut dyn Transport,
        device_id: DeviceId,
        message: Master2Slave,
        max_attempts: u8,
        now: Timestamp,
    ) -> Result<()> {
        let payload = self.retries.enqueue(device_id, &message, max_attempts, now);
        debug!(device = %device_id, message = message.type_name(), max_attempts, "sending retried command");
        transport.send(Destination::Device(device_id), payload)
    }

    /// Cancels the retry for an acknowledged command. Idempotent.
    pub fn remove_pending_command(&mut self, device_id: DeviceId, message_id: MasterToSlaveId) -> bool {
        self.retries.remove_pending_command(device_id, message_id)
    }
}

/// Master control plane bound to a transport
pub struct MasterServer<T: Transport> {
    dispatcher: Dispatcher,
    state: MasterState,
    transport: T,
}

impl<T: Transport> MasterServer<T> {
    /// Creates a server with the default slave->master handlers
    pub fn new(config: MasterConfig, transport: T) -> Result<Self> {
        config.validate()?;
        Ok(MasterServer {
            dispatcher: Dispatcher::default(),
            state: MasterState::new(config),
            transport,
        })
    }

    /// Replaces the handler table
    pub fn with_dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn state(&self) -> &MasterState {
        &self.state
    }

    pub fn devices(&self) -> &DeviceManager {
        &self.state.devices
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Entry point for frames received from a slave.
    ///
    /// Malformed frames are logged and dropped without touching state.
    pub fn on_message_received(&mut self, sender: DeviceId, frame: &[u8], now: Timestamp) -> Option<Master2Slave> {
        match Slave2Master::decode(frame) {
            Ok(message) => self.dispatch_message(sender, &Message::SlaveToMaster(message), now),
            Err(e) => {
                warn!(device = %sender, len = frame.len(), error = %e, "dropping undecodable frame");
                None
            }
        }
    }

    /// Routes an already decoded message of either direction
    pub fn dispatch_message(&mut self, sender: DeviceId, message: &Message, now: Timestamp) -> Option<Master2Slave> {
        self.dispatcher
            .dispatch(sender, message, &mut self.state, &mut self.transport, now)
    }

    /// Periodic work: retransmissions, delivery failures and due pings
    pub fn on_tick(&mut self, now: Timestamp) {
        let retry_due = self.state.retries.next_deadline().is_some_and(|deadline| deadline <= now);
        let actions = if retry_due { self.state.retries.poll(now) } else { Vec::new() };

        for action in actions {
            match action {
                RetryAction::Retransmit {
                    device_id,
                    message_id,
                    payload,
                    attempt,
                } => {
                    debug!(device = %device_id, ?message_id, attempt, "retransmitting");
                    match self.transport.send(Destination::Device(device_id), payload) {
                        Ok(()) if message_id == MasterToSlaveId::ShortIdAssign => {
                            // First send may have failed; the address is now on the air
                            if let Err(e) = self.state.devices.mark_short_id_sent(device_id) {
                                debug!(device = %device_id, error = %e, "resent assignment for untracked device");
                            }
                        }
                        Ok(()) => {}
                        Err(e) => warn!(device = %device_id, ?message_id, error = %e, "retransmission failed"),
                    }
                }
                RetryAction::Exhausted {
                    device_id,
                    message_id,
                    attempts,
                } => {
                    warn!(device = %device_id, ?message_id, attempts, "command delivery failed");
                    self.state.push_event(MasterEvent::DeliveryFailed {
                        device_id,
                        message_id,
                        attempts,
                    });
                }
            }
        }

        self.send_due_pings(now);
    }

    fn send_due_pings(&mut self, now: Timestamp) {
        let attempts = self.state.config.ping_attempts;
        for (device_id, ping) in self.state.pings.due_pings(now) {
            let message = Master2Slave::PingReq(ping);
            if let Err(e) =
                self.state
                    .send_command_to_slave_with_retry(&mut self.transport, device_id, message, attempts, now)
            {
                warn!(device = %device_id, error = %e, "failed to send ping request");
            }
        }
    }

    /// Sends a retried command outside of any handler
    pub fn send_command_to_slave_with_retry(
        &mut self,
        device_id: DeviceId,
        message: Master2Slave,
        max_attempts: u8,
        now: Timestamp,
    ) -> Result<()> {
        self.state
            .send_command_to_slave_with_retry(&mut self.transport, device_id, message, max_attempts, now)
    }

    pub fn remove_pending_command(&mut self, device_id: DeviceId, message_id: MasterToSlaveId) -> bool {
        self.state.remove_pending_command(device_id, message_id)
    }

    /// Starts a ping sequence towards a registered device; the first request goes out now
    pub fn start_ping_session(
        &mut self,
        target_id: DeviceId,
        total_count: u16,
        interval: Duration,
        now: Timestamp,
    ) -> Result<()> {
        if !self.state.devices.has_device_info(target_id) {
            return Err(Error::UnknownDevice(target_id));
        }
        info!(device = %target_id, total_count, "starting ping session");
        self.state.pings.start_session(target_id, total_count, interval, now);
        self.send_due_pings(now);
        Ok(())
    }

    pub fn ping_session(&self, target_id: DeviceId) -> Option<&PingSession> {
        self.state.pings.session(target_id)
    }

    pub fn retire_ping_session(&mut self, target_id: DeviceId) -> Option<PingSession> {
        let session = self.state.pings.retire_session(target_id)?;
        info!(
            device = %target_id,
            sent = session.attempt_count,
            answered = session.success_count,
            success_rate = session.success_rate(),
            "retired ping session"
        );
        Some(session)
    }

    /// Whether `device_id` sent a heartbeat within the configured timeout
    pub fn is_alive(&self, device_id: DeviceId, now: Timestamp) -> bool {
        self.state
            .devices
            .is_alive(device_id, now, self.state.config.heartbeat_timeout)
    }

    /// Registered devices silent for longer than the configured heartbeat timeout
    pub fn stale_devices(&self, now: Timestamp) -> Vec<DeviceId> {
        self.state
            .devices
            .stale_devices(now, self.state.config.heartbeat_timeout)
    }

    /// Flags a device for reset in the next sync round
    pub fn request_reset(&mut self, device_id: DeviceId) -> Result<()> {
        if !self.state.devices.has_device_info(device_id) {
            return Err(Error::UnknownDevice(device_id));
        }
        self.state.scheduler.request_reset(device_id);
        Ok(())
    }

    pub fn scheduler_mut(&mut self) -> &mut TdmaScheduler {
        &mut self.state.scheduler
    }

    /// Builds a sync round and broadcasts it once with explicit timestamps
    pub fn broadcast_sync_at(&mut self, current_time: u64, start_time: u64) -> Result<SyncMessage> {
        let sync = self
            .state
            .scheduler
            .build_sync(&mut self.state.devices, current_time, start_time);

        let frame = Master2Slave::Sync(sync.clone()).encode();
        self.transport.send(Destination::Broadcast, frame)?;
        info!(slaves = sync.slave_configs.len(), mode = ?sync.mode, "broadcast sync");
        Ok(sync)
    }

    /// Broadcasts a sync round starting `start_delay` from the wall clock
    pub fn broadcast_sync(&mut self, start_delay: Duration) -> Result<SyncMessage> {
        let current_time = util::epoch_micros();
        let delay = u64::try_from(start_delay.as_micros()).unwrap_or(u64::MAX);
        self.broadcast_sync_at(current_time, current_time.saturating_add(delay))
    }

    /// Hands queued events to the caller
    pub fn drain_events(&mut self) -> Vec<MasterEvent> {
        std::mem::take(&mut self.state.events)
    }

    /// Decodes a frame of either direction and routes it through the dispatcher
    pub fn inject(&mut self, direction: Direction, sender: DeviceId, frame: &[u8], now: Timestamp) -> Result<Option<Master2Slave>> {
        let message = Message::deserialize(direction, frame)?;
        Ok(self.dispatch_message(sender, &message, now))
    }
}
