use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::core::{DeviceId, Error, FirmwareVersion, Result, ShortId, Timestamp};

/// Entry point a device used to request membership
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinSource {
    Announce,
    JoinRequest,
}

/// Short-address lifecycle of a single device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AddressState {
    /// Never announced
    Unknown,
    /// Registered, no address held
    Announced,
    /// Address reserved, assignment not yet handed to the transport
    AddressPending,
    /// Assignment sent, waiting for the device to confirm
    AddressAssigned,
    /// Device acknowledged its address
    Confirmed,
}

/// Everything the master knows about one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub device_id: DeviceId,
    pub version: FirmwareVersion,
    pub short_id: Option<ShortId>,
    /// ShortIdAssign was handed to the transport
    pub short_id_assigned: bool,
    /// Device confirmed the assignment
    pub short_id_confirmed: bool,
    /// Only ever written by heartbeats
    pub last_seen: Option<Timestamp>,
    pub last_announce_time: Option<Timestamp>,
    pub last_join_request_time: Option<Timestamp>,
    /// Reset requested through a sync, waiting for the reset response
    pub reset_pending: bool,
}

impl DeviceInfo {
    fn new(device_id: DeviceId, version: FirmwareVersion) -> Self {
        DeviceInfo {
            device_id,
            version,
            short_id: None,
            short_id_assigned: false,
            short_id_confirmed: false,
            last_seen: None,
            last_announce_time: None,
            last_join_request_time: None,
            reset_pending: false,
        }
    }

    pub fn address_state(&self) -> AddressState {
        match (self.short_id, self.short_id_assigned, self.short_id_confirmed) {
            (None, _, _) => AddressState::Announced,
            (Some(_), _, true) => AddressState::Confirmed,
            (Some(_), true, false) => AddressState::AddressAssigned,
            (Some(_), false, false) => AddressState::AddressPending,
        }
    }
}

/// Authoritative device table and short-address allocator.
///
/// Devices are never evicted; liveness is read from `last_seen`.
#[derive(Debug, Default)]
pub struct DeviceManager {
    devices: BTreeMap<DeviceId, DeviceInfo>,
    /// Held addresses, assigned or confirmed
    short_ids: BTreeMap<ShortId, DeviceId>,
}

impl DeviceManager {
    pub fn new() -> Self {
        DeviceManager::default()
    }

    pub fn has_device_info(&self, device_id: DeviceId) -> bool {
        self.devices.contains_key(&device_id)
    }

    pub fn get_device_info(&self, device_id: DeviceId) -> Option<&DeviceInfo> {
        self.devices.get(&device_id)
    }

    pub fn address_state(&self, device_id: DeviceId) -> AddressState {
        self.devices
            .get(&device_id)
            .map_or(AddressState::Unknown, DeviceInfo::address_state)
    }

    /// Creates or refreshes a device on Announce/JoinRequest.
    ///
    /// Returns `true` when the device was not known before.
    pub fn register_join(
        &mut self,
        device_id: DeviceId,
        version: FirmwareVersion,
        source: JoinSource,
        now: Timestamp,
    ) -> bool {
        let is_new = !self.devices.contains_key(&device_id);
        let device = self
            .devices
            .entry(device_id)
            .or_insert_with(|| DeviceInfo::new(device_id, version));

        if device.version != version {
            info!(device = %device_id, old = %device.version, new = %version, "firmware version changed");
            device.version = version;
        }

        match source {
            JoinSource::Announce => device.last_announce_time = Some(now),
            JoinSource::JoinRequest => device.last_join_request_time = Some(now),
        }

        is_new
    }

    /// True iff the device is known and holds no address yet
    pub fn should_assign_short_id(&self, device_id: DeviceId) -> bool {
        self.devices
            .get(&device_id)
            .is_some_and(|device| device.short_id.is_none())
    }

    /// Reserves the lowest free address in 1..=255 for the device
    pub fn assign_short_id(&mut self, device_id: DeviceId) -> Result<ShortId> {
        let device = self
            .devices
            .get_mut(&device_id)
            .ok_or(Error::UnknownDevice(device_id))?;

        if let Some(existing) = device.short_id {
            return Ok(existing);
        }

        let short_id = (ShortId::MIN.get()..=ShortId::MAX.get())
            .filter_map(ShortId::new)
            .find(|candidate| !self.short_ids.contains_key(candidate))
            .ok_or(Error::AllocationExhausted(device_id))?;

        device.short_id = Some(short_id);
        device.short_id_assigned = false;
        device.short_id_confirmed = false;
        self.short_ids.insert(short_id, device_id);

        debug!(device = %device_id, short_id = short_id.get(), "reserved short id");
        Ok(short_id)
    }

    /// Records that a ShortIdAssign left through the transport
    pub fn mark_short_id_sent(&mut self, device_id: DeviceId) -> Result<()> {
        let device = self
            .devices
            .get_mut(&device_id)
            .ok_or(Error::UnknownDevice(device_id))?;
        if device.short_id.is_none() {
            return Err(Error::invalid_state(format!("device {} holds no short id", device_id)));
        }
        device.short_id_assigned = true;
        Ok(())
    }

    /// Binds the address a device confirmed.
    ///
    /// The echoed address must be the one this device holds. Returns `true`
    /// on the transition to confirmed, `false` if it was already confirmed.
    pub fn confirm_short_id(&mut self, device_id: DeviceId, raw_short_id: u8) -> Result<bool> {
        let device = self
            .devices
            .get_mut(&device_id)
            .ok_or(Error::UnknownDevice(device_id))?;

        match device.short_id {
            Some(held) if held.get() == raw_short_id => {
                let newly = !device.short_id_confirmed;
                device.short_id_assigned = true;
                device.short_id_confirmed = true;
                Ok(newly)
            }
            // Binding the echoed value could collide with another device's address
            Some(held) => Err(Error::protocol(format!(
                "device {} confirmed short id {} but holds {}",
                device_id, raw_short_id, held
            ))),
            None => Err(Error::invalid_state(format!(
                "device {} confirmed short id {} without an assignment",
                device_id, raw_short_id
            ))),
        }
    }

    /// Updates liveness. Must only be driven by heartbeats.
    pub fn update_device_last_seen(&mut self, device_id: DeviceId, now: Timestamp) -> bool {
        match self.devices.get_mut(&device_id) {
            Some(device) => {
                device.last_seen = Some(now);
                true
            }
            None => false,
        }
    }

    pub fn set_reset_pending(&mut self, device_id: DeviceId) -> bool {
        match self.devices.get_mut(&device_id) {
            Some(device) => {
                device.reset_pending = true;
                true
            }
            None => false,
        }
    }

    /// Clears the reset flag; returns whether a reset was outstanding
    pub fn clear_slave_reset_flag(&mut self, device_id: DeviceId) -> bool {
        self.devices
            .get_mut(&device_id)
            .map(|device| std::mem::replace(&mut device.reset_pending, false))
            .unwrap_or(false)
    }

    /// Device currently holding `short_id`, if any
    pub fn device_by_short_id(&self, short_id: ShortId) -> Option<DeviceId> {
        self.short_ids.get(&short_id).copied()
    }

    /// Confirmed devices in ascending short id order
    pub fn confirmed_devices(&self) -> Vec<&DeviceInfo> {
        self.short_ids
            .values()
            .filter_map(|id| self.devices.get(id))
            .filter(|device| device.short_id_confirmed)
            .collect()
    }

    /// Whether a heartbeat arrived within `timeout` of `now`
    pub fn is_alive(&self, device_id: DeviceId, now: Timestamp, timeout: Duration) -> bool {
        self.devices
            .get(&device_id)
            .and_then(|device| device.last_seen)
            .is_some_and(|seen| now.saturating_since(seen) < timeout)
    }

    /// Devices with no heartbeat within `timeout`, including never-seen ones
    pub fn stale_devices(&self, now: Timestamp, timeout: Duration) -> Vec<DeviceId> {
        self.devices
            .keys()
            .copied()
            .filter(|id| !self.is_alive(*id, now, timeout))
            .collect()
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceInfo> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
