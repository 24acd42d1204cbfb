//! Slave->master message handlers
//!
//! Every handler splits its work in two: `process_message` computes the reply
//! from read-only state, `execute_actions` applies the side effects. Replaying
//! a duplicate frame recomputes the same reply and leaves state unchanged
//! apart from timestamps.

use tracing::{debug, info, trace, warn};

use crate::core::{DeviceId, FirmwareVersion, Timestamp};
use crate::network::{JoinSource, Transport};
use crate::protocol::{Master2Slave, MasterToSlaveId, Message, ShortIdAssignMessage, Slave2Master};
use super::{MasterEvent, MasterState};

/// Mutable view handed to `execute_actions`
pub struct HandlerContext<'a> {
    pub state: &'a mut MasterState,
    pub transport: &'a mut dyn Transport,
    pub now: Timestamp,
}

/// Handler bound to one (direction, message id) pair
pub trait MessageHandler: Send {
    /// Reply to send back to `sender`, if any
    fn process_message(&self, _sender: DeviceId, _message: &Message, _state: &MasterState) -> Option<Master2Slave> {
        None
    }

    /// State mutations triggered by the message
    fn execute_actions(&self, sender: DeviceId, message: &Message, ctx: &mut HandlerContext<'_>);
}

fn mismatch(handler: &'static str, message: &Message) {
    warn!(handler, message = message.type_name(), "payload does not match handler");
}

/// Shared Announce/JoinRequest path: register, then allocate or resend
fn handle_join(ctx: &mut HandlerContext<'_>, device_id: DeviceId, version: FirmwareVersion, source: JoinSource) {
    let now = ctx.now;
    info!(device = %device_id, version = %version, ?source, "device requested membership");

    if ctx.state.devices.register_join(device_id, version, source, now) {
        ctx.state.push_event(MasterEvent::DeviceJoined { device_id, version });
    }

    let short_id = if ctx.state.devices.should_assign_short_id(device_id) {
        match ctx.state.devices.assign_short_id(device_id) {
            Ok(short_id) => {
                info!(device = %device_id, short_id = short_id.get(), "allocated short id");
                ctx.state.push_event(MasterEvent::ShortIdAssigned { device_id, short_id });
                short_id
            }
            Err(e) => {
                warn!(device = %device_id, error = %e, "short id allocation failed");
                ctx.state.push_event(MasterEvent::AllocationExhausted { device_id });
                return;
            }
        }
    } else {
        match ctx.state.devices.get_device_info(device_id).and_then(|d| d.short_id) {
            Some(short_id) => {
                info!(device = %device_id, short_id = short_id.get(), "re-sending existing short id");
                short_id
            }
            None => return,
        }
    };

    let assign = Master2Slave::ShortIdAssign(ShortIdAssignMessage { short_id });
    let attempts = ctx.state.config.short_id_assign_attempts;
    match ctx
        .state
        .send_command_to_slave_with_retry(&mut *ctx.transport, device_id, assign, attempts, now)
    {
        Ok(()) => {
            if let Err(e) = ctx.state.devices.mark_short_id_sent(device_id) {
                warn!(device = %device_id, error = %e, "could not mark short id as sent");
            }
        }
        // The pending entry stays queued, so the retry tick covers the loss
        Err(e) => warn!(device = %device_id, error = %e, "failed to send short id assignment"),
    }
}

pub struct AnnounceHandler;

impl MessageHandler for AnnounceHandler {
    fn execute_actions(&self, _sender: DeviceId, message: &Message, ctx: &mut HandlerContext<'_>) {
        let Message::SlaveToMaster(Slave2Master::Announce(announce)) = message else {
            return mismatch("announce", message);
        };
        handle_join(ctx, announce.device_id, announce.version, JoinSource::Announce);
    }
}

pub struct JoinRequestHandler;

impl MessageHandler for JoinRequestHandler {
    fn execute_actions(&self, _sender: DeviceId, message: &Message, ctx: &mut HandlerContext<'_>) {
        let Message::SlaveToMaster(Slave2Master::JoinRequest(join)) = message else {
            return mismatch("join_request", message);
        };
        handle_join(ctx, join.device_id, join.version, JoinSource::JoinRequest);
    }
}

pub struct ShortIdConfirmHandler;

impl MessageHandler for ShortIdConfirmHandler {
    fn execute_actions(&self, sender: DeviceId, message: &Message, ctx: &mut HandlerContext<'_>) {
        let Message::SlaveToMaster(Slave2Master::ShortIdConfirm(confirm)) = message else {
            return mismatch("short_id_confirm", message);
        };

        info!(device = %sender, short_id = confirm.short_id, status = confirm.status, "short id confirmation");

        if confirm.is_success() {
            match ctx.state.devices.confirm_short_id(sender, confirm.short_id) {
                Ok(true) => {
                    info!(device = %sender, short_id = confirm.short_id, "device joined network");
                    if let Some(short_id) = ctx.state.devices.get_device_info(sender).and_then(|d| d.short_id) {
                        ctx.state.push_event(MasterEvent::ShortIdConfirmed { device_id: sender, short_id });
                    }
                }
                Ok(false) => debug!(device = %sender, "duplicate short id confirmation"),
                Err(e) => {
                    warn!(device = %sender, error = %e, "rejected short id confirmation");
                    ctx.state.push_event(MasterEvent::ShortIdRejected {
                        device_id: sender,
                        short_id: confirm.short_id,
                        status: confirm.status,
                    });
                }
            }
        } else {
            // No re-allocation: the device keeps its unconfirmed address
            warn!(
                device = %sender,
                short_id = confirm.short_id,
                status = confirm.status,
                "device failed to confirm short id"
            );
            ctx.state.push_event(MasterEvent::ShortIdRejected {
                device_id: sender,
                short_id: confirm.short_id,
                status: confirm.status,
            });
        }

        ctx.state.remove_pending_command(sender, MasterToSlaveId::ShortIdAssign);
    }
}

pub struct ResetResponseHandler;

impl MessageHandler for ResetResponseHandler {
    fn execute_actions(&self, sender: DeviceId, message: &Message, ctx: &mut HandlerContext<'_>) {
        let Message::SlaveToMaster(Slave2Master::RstResponse(response)) = message else {
            return mismatch("reset_response", message);
        };

        trace!(device = %sender, status = response.status, "reset response");
        if response.status != 0 {
            warn!(device = %sender, status = response.status, "slave reported reset failure");
        }

        ctx.state.devices.clear_slave_reset_flag(sender);
        ctx.state.push_event(MasterEvent::SlaveConfigResponse {
            device_id: sender,
            message_id: message.message_id(),
            status: response.status,
        });
    }
}

pub struct PingResponseHandler;

impl MessageHandler for PingResponseHandler {
    fn execute_actions(&self, sender: DeviceId, message: &Message, ctx: &mut HandlerContext<'_>) {
        let Message::SlaveToMaster(Slave2Master::PingResponse(response)) = message else {
            return mismatch("ping_response", message);
        };

        trace!(device = %sender, seq = response.sequence_number, "ping response");
        ctx.state.pings.record_response(sender, response.sequence_number);
        ctx.state.remove_pending_command(sender, MasterToSlaveId::PingReq);
    }
}

pub struct HeartbeatHandler;

impl MessageHandler for HeartbeatHandler {
    fn execute_actions(&self, sender: DeviceId, message: &Message, ctx: &mut HandlerContext<'_>) {
        let Message::SlaveToMaster(Slave2Master::Heartbeat(heartbeat)) = message else {
            return mismatch("heartbeat", message);
        };

        trace!(device = %sender, reserve = heartbeat.reserve, "heartbeat");
        if !ctx.state.devices.update_device_last_seen(sender, ctx.now) {
            debug!(device = %sender, "heartbeat from unregistered device");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MasterConfig;
    use crate::network::MemoryTransport;
    use crate::protocol::{AnnounceMessage, HeartbeatMessage};

    #[test]
    fn test_handler_ignores_mismatched_payload() {
        let mut state = MasterState::new(MasterConfig::default());
        let mut transport = MemoryTransport::new();
        let heartbeat = Message::from(Slave2Master::Heartbeat(HeartbeatMessage { reserve: 0 }));

        let mut ctx = HandlerContext {
            state: &mut state,
            transport: &mut transport,
            now: Timestamp(1),
        };
        AnnounceHandler.execute_actions(DeviceId(1), &heartbeat, &mut ctx);
        ShortIdConfirmHandler.execute_actions(DeviceId(1), &heartbeat, &mut ctx);

        assert!(state.devices.is_empty());
        assert!(state.retries.is_empty());
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_default_reply_is_none() {
        let state = MasterState::new(MasterConfig::default());
        let announce = Message::from(Slave2Master::Announce(AnnounceMessage {
            device_id: DeviceId(1),
            version: FirmwareVersion::default(),
        }));
        assert!(AnnounceHandler.process_message(DeviceId(1), &announce, &state).is_none());
    }
}
