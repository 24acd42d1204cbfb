use std::io;
use thiserror::Error;

use super::types::DeviceId;
use crate::protocol::Direction;

/// Failures raised while decoding a frame received from the radio link
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty frame")]
    Empty,

    #[error("truncated frame: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("{0} trailing bytes after message body")]
    TrailingBytes(usize),

    #[error("unknown {direction} message id 0x{id:02X}")]
    UnknownMessageId { direction: Direction, id: u8 },

    #[error("invalid value {value} for field `{field}`")]
    InvalidField { field: &'static str, value: u64 },

    #[error("declared {declared} entries but buffer holds {available}")]
    CountMismatch { declared: usize, available: usize },

    #[error("frame of {0} bytes exceeds maximum frame size")]
    Oversized(usize),
}

/// Errors surfaced by the master control plane
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No free short id for device {0}")]
    AllocationExhausted(DeviceId),

    #[error("Unknown device {0}")]
    UnknownDevice(DeviceId),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Peer sent something that breaks the address or command protocol
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// Transport could not hand off a frame
    pub fn network(msg: impl Into<String>) -> Self {
        Error::Network(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Operation not valid for the device's current registry state
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }
}
