//! Core types and traits for the master control plane
//!
//! This module contains the fundamental building blocks used throughout the library.

pub mod error;
pub mod serde;
pub mod types;

pub use self::error::{DecodeError, Error, Result};
pub use self::types::{
    DeviceId,
    FirmwareVersion,
    MasterConfig,
    ShortId,
    SyncDefaults,
    Timestamp,
};

/// Transmissions used for a ShortIdAssign when no configuration overrides it
pub const DEFAULT_SHORT_ID_ASSIGN_ATTEMPTS: u8 = 3;

/// Number of assignable short ids (1..=255)
pub const SHORT_ID_CAPACITY: usize = 255;
