use std::collections::HashMap;

use tracing::{debug, warn};

use crate::core::{DeviceId, Timestamp};
use crate::network::{Destination, Transport};
use crate::protocol::{Direction, Master2Slave, Message, SlaveToMasterId};
use super::handlers::{
    AnnounceHandler,
    HandlerContext,
    HeartbeatHandler,
    JoinRequestHandler,
    MessageHandler,
    PingResponseHandler,
    ResetResponseHandler,
    ShortIdConfirmHandler,
};
use super::MasterState;

/// Lookup table from (direction, message id) to a handler
pub struct Dispatcher {
    handlers: HashMap<(Direction, u8), Box<dyn MessageHandler>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        let mut dispatcher = Dispatcher::empty();
        let s2m = Direction::SlaveToMaster;
        dispatcher.register(s2m, SlaveToMasterId::Announce as u8, Box::new(AnnounceHandler));
        dispatcher.register(s2m, SlaveToMasterId::JoinRequest as u8, Box::new(JoinRequestHandler));
        dispatcher.register(s2m, SlaveToMasterId::ShortIdConfirm as u8, Box::new(ShortIdConfirmHandler));
        dispatcher.register(s2m, SlaveToMasterId::RstResponse as u8, Box::new(ResetResponseHandler));
        dispatcher.register(s2m, SlaveToMasterId::PingResponse as u8, Box::new(PingResponseHandler));
        dispatcher.register(s2m, SlaveToMasterId::Heartbeat as u8, Box::new(HeartbeatHandler));
        dispatcher
    }
}

impl Dispatcher {
    /// Dispatcher with no handlers registered
    pub fn empty() -> Self {
        Dispatcher {
            handlers: HashMap::new(),
        }
    }

    /// Installs a handler, returning the one it replaced
    pub fn register(
        &mut self,
        direction: Direction,
        message_id: u8,
        handler: Box<dyn MessageHandler>,
    ) -> Option<Box<dyn MessageHandler>> {
        self.handlers.insert((direction, message_id), handler)
    }

    pub fn has_handler(&self, direction: Direction, message_id: u8) -> bool {
        self.handlers.contains_key(&(direction, message_id))
    }

    /// Runs the handler for `message` and sends its reply back to `sender`.
    ///
    /// The reply is computed before any action executes. Messages without a
    /// handler are dropped.
    pub fn dispatch(
        &self,
        sender: DeviceId,
        message: &Message,
        state: &mut MasterState,
        transport: &mut dyn Transport,
        now: Timestamp,
    ) -> Option<Master2Slave> {
        let key = (message.direction(), message.message_id());
        let Some(handler) = self.handlers.get(&key) else {
            debug!(
                device = %sender,
                direction = %key.0,
                message = message.type_name(),
                "no handler registered"
            );
            return None;
        };

        let reply = handler.process_message(sender, message, state);

        let mut ctx = HandlerContext { state, transport, now };
        handler.execute_actions(sender, message, &mut ctx);

        if let Some(reply) = &reply {
            if let Err(e) = ctx.transport.send(Destination::Device(sender), reply.encode()) {
                warn!(device = %sender, message = reply.type_name(), error = %e, "failed to send reply");
            }
        }

        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{MasterConfig, ShortId};
    use crate::network::MemoryTransport;
    use crate::protocol::{HeartbeatMessage, PingReqMessage, ShortIdAssignMessage, Slave2Master};

    /// Answers every heartbeat with a ping and counts executions
    struct EchoPing;

    impl MessageHandler for EchoPing {
        fn process_message(&self, _sender: DeviceId, _message: &Message, state: &MasterState) -> Option<Master2Slave> {
            Some(Master2Slave::PingReq(PingReqMessage {
                sequence_number: state.devices().len() as u16,
                timestamp: 0,
            }))
        }

        fn execute_actions(&self, sender: DeviceId, _message: &Message, ctx: &mut HandlerContext<'_>) {
            ctx.state.devices.update_device_last_seen(sender, ctx.now);
        }
    }

    #[test]
    fn test_default_table_covers_slave_traffic() {
        let dispatcher = Dispatcher::default();
        for id in [0x30, 0x41, 0x50, 0x51, 0x52, 0x60] {
            assert!(dispatcher.has_handler(Direction::SlaveToMaster, id));
        }
        assert!(!dispatcher.has_handler(Direction::MasterToSlave, 0x00));
    }

    #[test]
    fn test_reply_is_sent_to_sender() {
        let mut dispatcher = Dispatcher::empty();
        assert!(dispatcher
            .register(Direction::SlaveToMaster, 0x60, Box::new(EchoPing))
            .is_none());

        let mut state = MasterState::new(MasterConfig::default());
        let mut transport = MemoryTransport::new();
        let heartbeat = Message::from(Slave2Master::Heartbeat(HeartbeatMessage { reserve: 0 }));

        let reply = dispatcher.dispatch(DeviceId(5), &heartbeat, &mut state, &mut transport, Timestamp(3));
        assert!(matches!(reply, Some(Master2Slave::PingReq(_))));
        assert_eq!(transport.sent().len(), 1);
        assert_eq!(transport.sent()[0].0, Destination::Device(DeviceId(5)));
    }

    #[test]
    fn test_unregistered_message_is_dropped() {
        let dispatcher = Dispatcher::default();
        let mut state = MasterState::new(MasterConfig::default());
        let mut transport = MemoryTransport::new();
        let assign = Message::from(Master2Slave::ShortIdAssign(ShortIdAssignMessage {
            short_id: ShortId::MIN,
        }));

        assert!(dispatcher
            .dispatch(DeviceId(1), &assign, &mut state, &mut transport, Timestamp(0))
            .is_none());
        assert!(transport.sent().is_empty());
    }
}
