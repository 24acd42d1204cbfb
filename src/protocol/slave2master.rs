//! Slave->master message bodies

use bytes::{BufMut, Bytes, BytesMut};

use crate::core::{DecodeError, DeviceId, FirmwareVersion};
use super::codec::{finish, read_u16, read_u32, read_u8};
use super::message::{SlaveToMasterId, WireBody};

/// Status byte value meaning success in confirm/response messages
pub const STATUS_OK: u8 = 0;

/// Network membership request sent by a slave after power-up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnounceMessage {
    pub device_id: DeviceId,
    pub version: FirmwareVersion,
}

impl WireBody for AnnounceMessage {
    fn encode_body(&self, dst: &mut BytesMut) {
        dst.put_u32_le(self.device_id.0);
        dst.put_u8(self.version.major);
        dst.put_u8(self.version.minor);
        dst.put_u8(self.version.patch);
    }

    fn decode_body(src: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(AnnounceMessage {
            device_id: DeviceId(read_u32(src)?),
            version: FirmwareVersion::new(read_u8(src)?, read_u8(src)?, read_u8(src)?),
        })
    }
}

/// Same layout and handling as `AnnounceMessage`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinRequestMessage {
    pub device_id: DeviceId,
    pub version: FirmwareVersion,
}

impl WireBody for JoinRequestMessage {
    fn encode_body(&self, dst: &mut BytesMut) {
        AnnounceMessage::from(*self).encode_body(dst);
    }

    fn decode_body(src: &mut &[u8]) -> Result<Self, DecodeError> {
        let announce = AnnounceMessage::decode_body(src)?;
        Ok(JoinRequestMessage {
            device_id: announce.device_id,
            version: announce.version,
        })
    }
}

impl From<JoinRequestMessage> for AnnounceMessage {
    fn from(msg: JoinRequestMessage) -> Self {
        AnnounceMessage {
            device_id: msg.device_id,
            version: msg.version,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortIdConfirmMessage {
    /// Raw echo of the assigned address; zero is reported, not rejected
    pub short_id: u8,
    pub status: u8,
}

impl ShortIdConfirmMessage {
    pub fn is_success(&self) -> bool {
        self.status == STATUS_OK
    }
}

impl WireBody for ShortIdConfirmMessage {
    fn encode_body(&self, dst: &mut BytesMut) {
        dst.put_u8(self.short_id);
        dst.put_u8(self.status);
    }

    fn decode_body(src: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(ShortIdConfirmMessage {
            short_id: read_u8(src)?,
            status: read_u8(src)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RstResponseMessage {
    pub status: u8,
}

impl WireBody for RstResponseMessage {
    fn encode_body(&self, dst: &mut BytesMut) {
        dst.put_u8(self.status);
    }

    fn decode_body(src: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(RstResponseMessage {
            status: read_u8(src)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingRspMessage {
    pub sequence_number: u16,
}

impl WireBody for PingRspMessage {
    fn encode_body(&self, dst: &mut BytesMut) {
        dst.put_u16_le(self.sequence_number);
    }

    fn decode_body(src: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(PingRspMessage {
            sequence_number: read_u16(src)?,
        })
    }
}

/// Liveness-only beacon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatMessage {
    pub reserve: u8,
}

impl WireBody for HeartbeatMessage {
    fn encode_body(&self, dst: &mut BytesMut) {
        dst.put_u8(self.reserve);
    }

    fn decode_body(src: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(HeartbeatMessage {
            reserve: read_u8(src)?,
        })
    }
}

/// Every message a slave can send to the master
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slave2Master {
    Announce(AnnounceMessage),
    JoinRequest(JoinRequestMessage),
    ShortIdConfirm(ShortIdConfirmMessage),
    RstResponse(RstResponseMessage),
    PingResponse(PingRspMessage),
    Heartbeat(HeartbeatMessage),
}

impl Slave2Master {
    pub fn message_id(&self) -> SlaveToMasterId {
        match self {
            Slave2Master::Announce(_) => SlaveToMasterId::Announce,
            Slave2Master::JoinRequest(_) => SlaveToMasterId::JoinRequest,
            Slave2Master::ShortIdConfirm(_) => SlaveToMasterId::ShortIdConfirm,
            Slave2Master::RstResponse(_) => SlaveToMasterId::RstResponse,
            Slave2Master::PingResponse(_) => SlaveToMasterId::PingResponse,
            Slave2Master::Heartbeat(_) => SlaveToMasterId::Heartbeat,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Slave2Master::Announce(_) => "Announce",
            Slave2Master::JoinRequest(_) => "Join Request",
            Slave2Master::ShortIdConfirm(_) => "Short ID Confirm",
            Slave2Master::RstResponse(_) => "Reset Response",
            Slave2Master::PingResponse(_) => "Ping Response",
            Slave2Master::Heartbeat(_) => "Heartbeat",
        }
    }

    /// Encodes the id header followed by the body
    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(8);
        dst.put_u8(self.message_id() as u8);
        match self {
            Slave2Master::Announce(msg) => msg.encode_body(&mut dst),
            Slave2Master::JoinRequest(msg) => msg.encode_body(&mut dst),
            Slave2Master::ShortIdConfirm(msg) => msg.encode_body(&mut dst),
            Slave2Master::RstResponse(msg) => msg.encode_body(&mut dst),
            Slave2Master::PingResponse(msg) => msg.encode_body(&mut dst),
            Slave2Master::Heartbeat(msg) => msg.encode_body(&mut dst),
        }
        dst.freeze()
    }

    /// Decodes a full frame, rejecting unknown ids and trailing bytes
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        let (&id, mut src) = frame.split_first().ok_or(DecodeError::Empty)?;
        let msg = match SlaveToMasterId::try_from(id)? {
            SlaveToMasterId::Announce => Slave2Master::Announce(AnnounceMessage::decode_body(&mut src)?),
            SlaveToMasterId::JoinRequest => {
                Slave2Master::JoinRequest(JoinRequestMessage::decode_body(&mut src)?)
            }
            SlaveToMasterId::ShortIdConfirm => {
                Slave2Master::ShortIdConfirm(ShortIdConfirmMessage::decode_body(&mut src)?)
            }
            SlaveToMasterId::RstResponse => {
                Slave2Master::RstResponse(RstResponseMessage::decode_body(&mut src)?)
            }
            SlaveToMasterId::PingResponse => Slave2Master::PingResponse(PingRspMessage::decode_body(&mut src)?),
            SlaveToMasterId::Heartbeat => Slave2Master::Heartbeat(HeartbeatMessage::decode_body(&mut src)?),
        };
        finish(src)?;
        Ok(msg)
    }
}
