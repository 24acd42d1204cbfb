use std::fmt;
use std::num::NonZeroU8;
use std::ops::Add;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{Error, Result};
use crate::protocol::TestMode;

/// Permanent factory-provisioned device identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// Compact on-air address handed out by the master.
///
/// Zero is reserved on the wire, so the inner value is never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShortId(NonZeroU8);

impl ShortId {
    /// Smallest assignable address
    pub const MIN: ShortId = ShortId(NonZeroU8::MIN);

    /// Largest assignable address
    pub const MAX: ShortId = ShortId(NonZeroU8::MAX);

    /// Wraps a raw wire value, rejecting the reserved zero
    pub fn new(raw: u8) -> Option<Self> {
        NonZeroU8::new(raw).map(ShortId)
    }

    /// Returns the wire value
    pub fn get(&self) -> u8 {
        self.0.get()
    }
}

impl fmt::Display for ShortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Firmware version reported in Announce/JoinRequest
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl FirmwareVersion {
    pub fn new(major: u8, minor: u8, patch: u8) -> Self {
        FirmwareVersion { major, minor, patch }
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Milliseconds on the master's monotonic clock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Creates a timestamp from milliseconds
    pub fn from_millis(ms: u64) -> Self {
        Timestamp(ms)
    }

    /// Returns the timestamp in milliseconds
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Time elapsed since `earlier`, zero if `earlier` is in the future
    pub fn saturating_since(&self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        let ms = u64::try_from(rhs.as_millis()).unwrap_or(u64::MAX);
        Timestamp(self.0.saturating_add(ms))
    }
}

/// Defaults applied when building a TDMA sync round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncDefaults {
    /// Test mode broadcast in the sync message
    pub mode: TestMode,
    /// Sampling interval in milliseconds
    pub interval_ms: u8,
    /// Test count used for devices without an override
    pub default_test_count: u8,
}

impl Default for SyncDefaults {
    fn default() -> Self {
        SyncDefaults {
            mode: TestMode::Conduction,
            interval_ms: 10,
            default_test_count: 1,
        }
    }
}

/// Configuration for the master node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    /// Delay between retransmissions of an unacknowledged command
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub retry_timeout: Duration,
    /// Total transmissions for a ShortIdAssign, including the first
    pub short_id_assign_attempts: u8,
    /// Total transmissions for each ping request
    pub ping_attempts: u8,
    /// Silence after which a device is reported stale
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub heartbeat_timeout: Duration,
    /// Period of the retry/ping tick
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub tick_interval: Duration,
    /// TDMA sync defaults
    pub sync: SyncDefaults,
    /// Log filter level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Capacity of the runtime's inbound and outbound channels
    pub channel_capacity: usize,
}

impl Default for MasterConfig {
    fn default() -> Self {
        MasterConfig {
            retry_timeout: Duration::from_millis(500),
            short_id_assign_attempts: super::DEFAULT_SHORT_ID_ASSIGN_ATTEMPTS,
            ping_attempts: 1,
            heartbeat_timeout: Duration::from_secs(10),
            tick_interval: Duration::from_millis(50),
            sync: SyncDefaults::default(),
            log_level: "info".to_string(),
            channel_capacity: 64,
        }
    }
}

impl MasterConfig {
    /// Parses and validates a JSON configuration document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: MasterConfig = serde_json::from_str(json)
            .map_err(|e| Error::config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every field is usable
    pub fn validate(&self) -> Result<()> {
        if self.short_id_assign_attempts == 0 || self.ping_attempts == 0 {
            return Err(Error::config("attempt counts must be at least 1"));
        }
        if self.retry_timeout.is_zero() || self.tick_interval.is_zero() {
            return Err(Error::config("retry_timeout and tick_interval must be non-zero"));
        }
        if self.heartbeat_timeout.is_zero() {
            return Err(Error::config("heartbeat_timeout must be non-zero"));
        }
        if self.channel_capacity == 0 {
            return Err(Error::config("channel_capacity must be non-zero"));
        }
        self.log_level
            .parse::<tracing::Level>()
            .map_err(|_| Error::config(format!("invalid log level `{}`", self.log_level)))?;
        Ok(())
    }
}
