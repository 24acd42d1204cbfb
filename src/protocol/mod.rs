//! Protocol implementation module
//!
//! This module defines the wire messages exchanged between the master and its
//! slaves, their byte-exact little-endian encodings, and stream framing.

pub mod codec;
pub mod master2slave;
pub mod message;
pub mod slave2master;

pub use self::codec::MessageCodec;
pub use self::master2slave::{
    Master2Slave,
    PingReqMessage,
    RstMessage,
    ShortIdAssignMessage,
    SlaveConfig,
    SyncMessage,
};
pub use self::message::{Direction, MasterToSlaveId, Message, SlaveToMasterId, TestMode, WireBody};
pub use self::slave2master::{
    AnnounceMessage,
    HeartbeatMessage,
    JoinRequestMessage,
    PingRspMessage,
    RstResponseMessage,
    ShortIdConfirmMessage,
    Slave2Master,
};

/// Largest frame accepted from a stream link: a sync for 255 slaves plus header
pub const MAX_FRAME_SIZE: usize = 1 + 20 + 255 * master2slave::SLAVE_CONFIG_SIZE;
