//! Master->slave message bodies
//!
//! `SyncMessage`, `ShortIdAssignMessage`, `RstMessage` and `PingReqMessage` are
//! the live command set. The config/control variants predate the unified TDMA
//! sync and are kept only so legacy frames still encode and decode.

use bytes::{BufMut, Bytes, BytesMut};

use crate::core::{DecodeError, DeviceId, ShortId};
use super::codec::{finish, read_u16, read_u32, read_u64, read_u8};
use super::message::{MasterToSlaveId, TestMode, WireBody};

/// Size of one encoded `SlaveConfig` entry
pub const SLAVE_CONFIG_SIZE: usize = 7;

fn read_flag(src: &mut &[u8], field: &'static str) -> Result<bool, DecodeError> {
    match read_u8(src)? {
        0 => Ok(false),
        1 => Ok(true),
        value => Err(DecodeError::InvalidField {
            field,
            value: value.into(),
        }),
    }
}

/// Per-slave slot assignment carried by a sync message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaveConfig {
    pub id: DeviceId,
    pub time_slot: u8,
    /// Slave performs a reset before this round
    pub reset: bool,
    /// Conduction/resistance/clip count, depending on the sync mode
    pub test_count: u8,
}

impl WireBody for SlaveConfig {
    fn encode_body(&self, dst: &mut BytesMut) {
        dst.put_u32_le(self.id.0);
        dst.put_u8(self.time_slot);
        dst.put_u8(self.reset as u8);
        dst.put_u8(self.test_count);
    }

    fn decode_body(src: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(SlaveConfig {
            id: DeviceId(read_u32(src)?),
            time_slot: read_u8(src)?,
            reset: read_flag(src, "reset")?,
            test_count: read_u8(src)?,
        })
    }
}

/// Unified TDMA schedule broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncMessage {
    pub mode: TestMode,
    /// Sampling interval in milliseconds
    pub interval: u8,
    /// Master clock at transmission, microseconds since the epoch
    pub current_time: u64,
    /// Round start, microseconds since the epoch
    pub start_time: u64,
    pub slave_configs: Vec<SlaveConfig>,
}

impl WireBody for SyncMessage {
    fn encode_body(&self, dst: &mut BytesMut) {
        let count = self.slave_configs.len().min(u16::MAX as usize);
        dst.reserve(20 + count * SLAVE_CONFIG_SIZE);
        dst.put_u8(self.mode as u8);
        dst.put_u8(self.interval);
        dst.put_u64_le(self.current_time);
        dst.put_u64_le(self.start_time);
        dst.put_u16_le(count as u16);
        for config in self.slave_configs.iter().take(count) {
            config.encode_body(dst);
        }
    }

    fn decode_body(src: &mut &[u8]) -> Result<Self, DecodeError> {
        let mode = TestMode::try_from(read_u8(src)?)?;
        let interval = read_u8(src)?;
        let current_time = read_u64(src)?;
        let start_time = read_u64(src)?;
        let declared = read_u16(src)? as usize;

        if src.len() != declared * SLAVE_CONFIG_SIZE {
            return Err(DecodeError::CountMismatch {
                declared,
                available: src.len() / SLAVE_CONFIG_SIZE,
            });
        }

        let mut slave_configs = Vec::with_capacity(declared);
        for _ in 0..declared {
            slave_configs.push(SlaveConfig::decode_body(src)?);
        }

        Ok(SyncMessage {
            mode,
            interval,
            current_time,
            start_time,
            slave_configs,
        })
    }
}

/// Deprecated: superseded by `SyncMessage`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetTimeMessage {
    /// Microseconds since the epoch
    pub timestamp: u64,
}

impl WireBody for SetTimeMessage {
    fn encode_body(&self, dst: &mut BytesMut) {
        dst.put_u64_le(self.timestamp);
    }

    fn decode_body(src: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(SetTimeMessage {
            timestamp: read_u64(src)?,
        })
    }
}

/// Deprecated: superseded by `SyncMessage`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaveControlMessage {
    pub mode: TestMode,
    pub enable: bool,
    /// Synchronized start, microseconds since the epoch
    pub start_time: u64,
}

impl WireBody for SlaveControlMessage {
    fn encode_body(&self, dst: &mut BytesMut) {
        dst.put_u8(self.mode as u8);
        dst.put_u8(self.enable as u8);
        dst.put_u64_le(self.start_time);
    }

    fn decode_body(src: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(SlaveControlMessage {
            mode: TestMode::try_from(read_u8(src)?)?,
            enable: read_flag(src, "enable")?,
            start_time: read_u64(src)?,
        })
    }
}

/// Deprecated: superseded by `SyncMessage`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConductionConfigMessage {
    pub time_slot: u8,
    pub interval: u8,
    pub total_conduction_num: u16,
    pub start_conduction_num: u16,
    pub conduction_num: u16,
}

impl WireBody for ConductionConfigMessage {
    fn encode_body(&self, dst: &mut BytesMut) {
        dst.put_u8(self.time_slot);
        dst.put_u8(self.interval);
        dst.put_u16_le(self.total_conduction_num);
        dst.put_u16_le(self.start_conduction_num);
        dst.put_u16_le(self.conduction_num);
    }

    fn decode_body(src: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(ConductionConfigMessage {
            time_slot: read_u8(src)?,
            interval: read_u8(src)?,
            total_conduction_num: read_u16(src)?,
            start_conduction_num: read_u16(src)?,
            conduction_num: read_u16(src)?,
        })
    }
}

/// Deprecated: superseded by `SyncMessage`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResistanceConfigMessage {
    pub time_slot: u8,
    pub interval: u8,
    pub total_num: u16,
    pub start_num: u16,
    pub num: u16,
}

impl WireBody for ResistanceConfigMessage {
    fn encode_body(&self, dst: &mut BytesMut) {
        dst.put_u8(self.time_slot);
        dst.put_u8(self.interval);
        dst.put_u16_le(self.total_num);
        dst.put_u16_le(self.start_num);
        dst.put_u16_le(self.num);
    }

    fn decode_body(src: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(ResistanceConfigMessage {
            time_slot: read_u8(src)?,
            interval: read_u8(src)?,
            total_num: read_u16(src)?,
            start_num: read_u16(src)?,
            num: read_u16(src)?,
        })
    }
}

/// Deprecated: superseded by `SyncMessage`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipConfigMessage {
    pub interval: u8,
    pub mode: u8,
    pub clip_pin: u16,
}

impl WireBody for ClipConfigMessage {
    fn encode_body(&self, dst: &mut BytesMut) {
        dst.put_u8(self.interval);
        dst.put_u8(self.mode);
        dst.put_u16_le(self.clip_pin);
    }

    fn decode_body(src: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(ClipConfigMessage {
            interval: read_u8(src)?,
            mode: read_u8(src)?,
            clip_pin: read_u16(src)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RstMessage {
    pub lock_status: u8,
    pub clip_led: u16,
}

impl WireBody for RstMessage {
    fn encode_body(&self, dst: &mut BytesMut) {
        dst.put_u8(self.lock_status);
        dst.put_u16_le(self.clip_led);
    }

    fn decode_body(src: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(RstMessage {
            lock_status: read_u8(src)?,
            clip_led: read_u16(src)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingReqMessage {
    pub sequence_number: u16,
    /// Low 32 bits of the master clock in milliseconds
    pub timestamp: u32,
}

impl WireBody for PingReqMessage {
    fn encode_body(&self, dst: &mut BytesMut) {
        dst.put_u16_le(self.sequence_number);
        dst.put_u32_le(self.timestamp);
    }

    fn decode_body(src: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(PingReqMessage {
            sequence_number: read_u16(src)?,
            timestamp: read_u32(src)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortIdAssignMessage {
    pub short_id: ShortId,
}

impl WireBody for ShortIdAssignMessage {
    fn encode_body(&self, dst: &mut BytesMut) {
        dst.put_u8(self.short_id.get());
    }

    fn decode_body(src: &mut &[u8]) -> Result<Self, DecodeError> {
        let raw = read_u8(src)?;
        let short_id = ShortId::new(raw).ok_or(DecodeError::InvalidField {
            field: "short_id",
            value: 0,
        })?;
        Ok(ShortIdAssignMessage { short_id })
    }
}

/// Every message the master can put on the air
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Master2Slave {
    Sync(SyncMessage),
    SetTime(SetTimeMessage),
    SlaveControl(SlaveControlMessage),
    ConductionConfig(ConductionConfigMessage),
    ResistanceConfig(ResistanceConfigMessage),
    ClipConfig(ClipConfigMessage),
    Rst(RstMessage),
    PingReq(PingReqMessage),
    ShortIdAssign(ShortIdAssignMessage),
}

impl Master2Slave {
    pub fn message_id(&self) -> MasterToSlaveId {
        match self {
            Master2Slave::Sync(_) => MasterToSlaveId::Sync,
            Master2Slave::SetTime(_) => MasterToSlaveId::SetTime,
            Master2Slave::SlaveControl(_) => MasterToSlaveId::SlaveControl,
            Master2Slave::ConductionConfig(_) => MasterToSlaveId::ConductionConfig,
            Master2Slave::ResistanceConfig(_) => MasterToSlaveId::ResistanceConfig,
            Master2Slave::ClipConfig(_) => MasterToSlaveId::ClipConfig,
            Master2Slave::Rst(_) => MasterToSlaveId::Rst,
            Master2Slave::PingReq(_) => MasterToSlaveId::PingReq,
            Master2Slave::ShortIdAssign(_) => MasterToSlaveId::ShortIdAssign,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Master2Slave::Sync(_) => "TDMA Sync",
            Master2Slave::SetTime(_) => "Set Time (DEPRECATED)",
            Master2Slave::SlaveControl(_) => "Slave Control (DEPRECATED)",
            Master2Slave::ConductionConfig(_) => "Conduction Config (DEPRECATED)",
            Master2Slave::ResistanceConfig(_) => "Resistance Config (DEPRECATED)",
            Master2Slave::ClipConfig(_) => "Clip Config (DEPRECATED)",
            Master2Slave::Rst(_) => "Reset",
            Master2Slave::PingReq(_) => "Ping Request",
            Master2Slave::ShortIdAssign(_) => "Short ID Assign",
        }
    }

    /// Encodes the id header followed by the body
    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(16);
        dst.put_u8(self.message_id() as u8);
        match self {
            Master2Slave::Sync(msg) => msg.encode_body(&mut dst),
            Master2Slave::SetTime(msg) => msg.encode_body(&mut dst),
            Master2Slave::SlaveControl(msg) => msg.encode_body(&mut dst),
            Master2Slave::ConductionConfig(msg) => msg.encode_body(&mut dst),
            Master2Slave::ResistanceConfig(msg) => msg.encode_body(&mut dst),
            Master2Slave::ClipConfig(msg) => msg.encode_body(&mut dst),
            Master2Slave::Rst(msg) => msg.encode_body(&mut dst),
            Master2Slave::PingReq(msg) => msg.encode_body(&mut dst),
            Master2Slave::ShortIdAssign(msg) => msg.encode_body(&mut dst),
        }
        dst.freeze()
    }

    /// Decodes a full frame, rejecting unknown ids and trailing bytes
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        let (&id, mut src) = frame.split_first().ok_or(DecodeError::Empty)?;
        let msg = match MasterToSlaveId::try_from(id)? {
            MasterToSlaveId::Sync => Master2Slave::Sync(SyncMessage::decode_body(&mut src)?),
            MasterToSlaveId::SetTime => Master2Slave::SetTime(SetTimeMessage::decode_body(&mut src)?),
            MasterToSlaveId::SlaveControl => {
                Master2Slave::SlaveControl(SlaveControlMessage::decode_body(&mut src)?)
            }
            MasterToSlaveId::ConductionConfig => {
                Master2Slave::ConductionConfig(ConductionConfigMessage::decode_body(&mut src)?)
            }
            MasterToSlaveId::ResistanceConfig => {
                Master2Slave::ResistanceConfig(ResistanceConfigMessage::decode_body(&mut src)?)
            }
            MasterToSlaveId::ClipConfig => Master2Slave::ClipConfig(ClipConfigMessage::decode_body(&mut src)?),
            MasterToSlaveId::Rst => Master2Slave::Rst(RstMessage::decode_body(&mut src)?),
            MasterToSlaveId::PingReq => Master2Slave::PingReq(PingReqMessage::decode_body(&mut src)?),
            MasterToSlaveId::ShortIdAssign => {
                Master2Slave::ShortIdAssign(ShortIdAssignMessage::decode_body(&mut src)?)
            }
        };
        finish(src)?;
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn sample_sync() -> SyncMessage {
        SyncMessage {
            mode: TestMode::Resistance,
            interval: 20,
            current_time: 1_700_000_000_000_000,
            start_time: 1_700_000_000_500_000,
            slave_configs: vec![
                SlaveConfig { id: DeviceId(0xAABBCCDD), time_slot: 0, reset: false, test_count: 16 },
                SlaveConfig { id: DeviceId(0x00000042), time_slot: 1, reset: true, test_count: 8 },
            ],
        }
    }

    fn all_variants() -> Vec<Master2Slave> {
        vec![
            Master2Slave::Sync(sample_sync()),
            Master2Slave::SetTime(SetTimeMessage { timestamp: u64::MAX }),
            Master2Slave::SlaveControl(SlaveControlMessage {
                mode: TestMode::Clip,
                enable: true,
                start_time: 77,
            }),
            Master2Slave::ConductionConfig(ConductionConfigMessage {
                time_slot: 3,
                interval: 5,
                total_conduction_num: 640,
                start_conduction_num: 64,
                conduction_num: 64,
            }),
            Master2Slave::ResistanceConfig(ResistanceConfigMessage {
                time_slot: 4,
                interval: 10,
                total_num: 100,
                start_num: 0,
                num: 25,
            }),
            Master2Slave::ClipConfig(ClipConfigMessage { interval: 1, mode: 2, clip_pin: 0x0F0F }),
            Master2Slave::Rst(RstMessage { lock_status: 1, clip_led: 0x8001 }),
            Master2Slave::PingReq(PingReqMessage { sequence_number: 9, timestamp: 123_456 }),
            Master2Slave::ShortIdAssign(ShortIdAssignMessage { short_id: ShortId::MAX }),
        ]
    }

    #[test]
    fn test_every_variant_roundtrips() {
        for msg in all_variants() {
            let frame = msg.encode();
            assert_eq!(frame[0], msg.message_id() as u8);
            assert_eq!(Master2Slave::decode(&frame), Ok(msg));
        }
    }

    #[test]
    fn test_sync_layout() {
        let frame = Master2Slave::Sync(sample_sync()).encode();
        assert_eq!(frame.len(), 1 + 20 + 2 * SLAVE_CONFIG_SIZE);
        assert_eq!(frame[1], TestMode::Resistance as u8);
        assert_eq!(&frame[19..21], &[0x02, 0x00]);
        assert_eq!(&frame[21..28], &[0xDD, 0xCC, 0xBB, 0xAA, 0, 0, 16]);
    }

    #[test]
    fn test_sync_count_must_match_buffer() {
        let mut frame = Master2Slave::Sync(sample_sync()).encode().to_vec();
        frame[19] = 3;
        assert_eq!(
            Master2Slave::decode(&frame),
            Err(DecodeError::CountMismatch { declared: 3, available: 2 })
        );

        let mut frame = Master2Slave::Sync(sample_sync()).encode().to_vec();
        frame.pop();
        assert!(matches!(
            Master2Slave::decode(&frame),
            Err(DecodeError::CountMismatch { declared: 2, .. })
        ));
    }

    #[test]
    fn test_invalid_fields_rejected() {
        assert_eq!(
            Master2Slave::decode(&[0x50, 0x00]),
            Err(DecodeError::InvalidField { field: "short_id", value: 0 })
        );
        assert_eq!(
            Master2Slave::decode(&[0x02, 0x07, 0x01, 0, 0, 0, 0, 0, 0, 0, 0]),
            Err(DecodeError::InvalidField { field: "mode", value: 7 })
        );
        assert_eq!(Master2Slave::decode(&[0x50, 0x05, 0x00]), Err(DecodeError::TrailingBytes(1)));
        assert_eq!(Master2Slave::decode(&[]), Err(DecodeError::Empty));
    }

    #[test]
    fn test_random_bytes_never_panic() {
        let mut rng = StdRng::seed_from_u64(0x5EED);
        for _ in 0..5000 {
            let len = rng.gen_range(0..48);
            let mut frame: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            // Bias towards known ids so bodies get exercised
            if let Some(first) = frame.first_mut() {
                *first = [0x00, 0x01, 0x02, 0x10, 0x11, 0x12, 0x30, 0x40, 0x50][*first as usize % 9];
            }

            if let Ok(msg) = Master2Slave::decode(&frame) {
                if let Master2Slave::Sync(sync) = &msg {
                    let declared = u16::from_le_bytes([frame[19], frame[20]]) as usize;
                    assert_eq!(sync.slave_configs.len(), declared);
                }
                assert_eq!(&msg.encode()[..], &frame[..]);
            }
        }
    }
}
