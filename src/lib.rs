//! WHTS master: control plane for a wireless hardware test network
//!
//! A single master keeps a registry of slave devices, hands out one-byte
//! short addresses, retries unacknowledged commands, tracks liveness through
//! heartbeats and broadcasts the TDMA schedule every slave tests against.
pub mod core;
pub mod network;
pub mod protocol;
pub mod server;
pub mod sync;
pub mod util;

// Re-export commonly used items
pub use crate::core::{DeviceId, Error, FirmwareVersion, MasterConfig, Result, ShortId, Timestamp};
pub use crate::network::{ChannelTransport, Destination, MasterRuntime, MemoryTransport, Transport};
pub use crate::protocol::{Master2Slave, Message, Slave2Master};
pub use crate::server::{MasterEvent, MasterServer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
