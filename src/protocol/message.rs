use std::fmt;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::core::DecodeError;
use super::master2slave::Master2Slave;
use super::slave2master::Slave2Master;

/// Which side of the link originated a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Direction {
    MasterToSlave,
    SlaveToMaster,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::MasterToSlave => f.write_str("master->slave"),
            Direction::SlaveToMaster => f.write_str("slave->master"),
        }
    }
}

/// Message ids for master->slave traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum MasterToSlaveId {
    Sync = 0x00,
    SetTime = 0x01,
    SlaveControl = 0x02,
    ConductionConfig = 0x10,
    ResistanceConfig = 0x11,
    ClipConfig = 0x12,
    Rst = 0x30,
    PingReq = 0x40,
    ShortIdAssign = 0x50,
}

impl TryFrom<u8> for MasterToSlaveId {
    type Error = DecodeError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Ok(match id {
            0x00 => MasterToSlaveId::Sync,
            0x01 => MasterToSlaveId::SetTime,
            0x02 => MasterToSlaveId::SlaveControl,
            0x10 => MasterToSlaveId::ConductionConfig,
            0x11 => MasterToSlaveId::ResistanceConfig,
            0x12 => MasterToSlaveId::ClipConfig,
            0x30 => MasterToSlaveId::Rst,
            0x40 => MasterToSlaveId::PingReq,
            0x50 => MasterToSlaveId::ShortIdAssign,
            _ => {
                return Err(DecodeError::UnknownMessageId {
                    direction: Direction::MasterToSlave,
                    id,
                })
            }
        })
    }
}

/// Message ids for slave->master traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum SlaveToMasterId {
    RstResponse = 0x30,
    PingResponse = 0x41,
    Announce = 0x50,
    ShortIdConfirm = 0x51,
    JoinRequest = 0x52,
    Heartbeat = 0x60,
}

impl TryFrom<u8> for SlaveToMasterId {
    type Error = DecodeError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Ok(match id {
            0x30 => SlaveToMasterId::RstResponse,
            0x41 => SlaveToMasterId::PingResponse,
            0x50 => SlaveToMasterId::Announce,
            0x51 => SlaveToMasterId::ShortIdConfirm,
            0x52 => SlaveToMasterId::JoinRequest,
            0x60 => SlaveToMasterId::Heartbeat,
            _ => {
                return Err(DecodeError::UnknownMessageId {
                    direction: Direction::SlaveToMaster,
                    id,
                })
            }
        })
    }
}

/// Test performed by slaves during a sync round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TestMode {
    Conduction = 0,
    Resistance = 1,
    Clip = 2,
}

impl TryFrom<u8> for TestMode {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TestMode::Conduction),
            1 => Ok(TestMode::Resistance),
            2 => Ok(TestMode::Clip),
            _ => Err(DecodeError::InvalidField {
                field: "mode",
                value: value.into(),
            }),
        }
    }
}

/// Fixed-layout message body that sits after the 1-byte id header
pub trait WireBody: Sized {
    /// Appends the little-endian body to `dst`
    fn encode_body(&self, dst: &mut BytesMut);

    /// Reads a body from `src`, advancing it past the consumed bytes
    fn decode_body(src: &mut &[u8]) -> Result<Self, DecodeError>;
}

/// A decoded message of either direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    MasterToSlave(Master2Slave),
    SlaveToMaster(Slave2Master),
}

impl Message {
    /// Direction the message travels in
    pub fn direction(&self) -> Direction {
        match self {
            Message::MasterToSlave(_) => Direction::MasterToSlave,
            Message::SlaveToMaster(_) => Direction::SlaveToMaster,
        }
    }

    /// Raw wire id, only unique within one direction
    pub fn message_id(&self) -> u8 {
        match self {
            Message::MasterToSlave(msg) => msg.message_id() as u8,
            Message::SlaveToMaster(msg) => msg.message_id() as u8,
        }
    }

    /// Human-readable name for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::MasterToSlave(msg) => msg.type_name(),
            Message::SlaveToMaster(msg) => msg.type_name(),
        }
    }

    /// Encodes the id header followed by the body
    pub fn serialize(&self) -> Bytes {
        match self {
            Message::MasterToSlave(msg) => msg.encode(),
            Message::SlaveToMaster(msg) => msg.encode(),
        }
    }

    /// Decodes a full frame whose direction is known from the receive path
    pub fn deserialize(direction: Direction, frame: &[u8]) -> Result<Self, DecodeError> {
        match direction {
            Direction::MasterToSlave => Master2Slave::decode(frame).map(Message::MasterToSlave),
            Direction::SlaveToMaster => Slave2Master::decode(frame).map(Message::SlaveToMaster),
        }
    }
}

impl From<Master2Slave> for Message {
    fn from(msg: Master2Slave) -> Self {
        Message::MasterToSlave(msg)
    }
}

impl From<Slave2Master> for Message {
    fn from(msg: Slave2Master) -> Self {
        Message::SlaveToMaster(msg)
    }
}
