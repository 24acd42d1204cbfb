use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::core::{DeviceId, SyncDefaults};
use crate::network::DeviceManager;
use crate::protocol::{SlaveConfig, SyncMessage, TestMode};

/// Builds TDMA sync rounds from the confirmed device set.
///
/// Slots are handed out in ascending short id order starting at 0, so every
/// device listed in one sync message owns a distinct slot.
#[derive(Debug)]
pub struct TdmaScheduler {
    mode: TestMode,
    interval_ms: u8,
    default_test_count: u8,
    test_counts: HashMap<DeviceId, u8>,
    reset_requests: BTreeSet<DeviceId>,
}

impl TdmaScheduler {
    pub fn new(defaults: &SyncDefaults) -> Self {
        TdmaScheduler {
            mode: defaults.mode,
            interval_ms: defaults.interval_ms,
            default_test_count: defaults.default_test_count,
            test_counts: HashMap::new(),
            reset_requests: BTreeSet::new(),
        }
    }

    pub fn mode(&self) -> TestMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: TestMode) {
        self.mode = mode;
    }

    pub fn set_interval(&mut self, interval_ms: u8) {
        self.interval_ms = interval_ms;
    }

    /// Overrides the test count for one device
    pub fn set_test_count(&mut self, device_id: DeviceId, test_count: u8) {
        self.test_counts.insert(device_id, test_count);
    }

    pub fn clear_test_count(&mut self, device_id: DeviceId) {
        self.test_counts.remove(&device_id);
    }

    /// Queues a reset flag for the device's entry in the next sync
    pub fn request_reset(&mut self, device_id: DeviceId) {
        self.reset_requests.insert(device_id);
    }

    pub fn pending_resets(&self) -> impl Iterator<Item = &DeviceId> {
        self.reset_requests.iter()
    }

    /// Builds the next sync message.
    ///
    /// Devices flagged for reset get `reset_pending` set in the registry.
    /// Reset requests for devices not yet confirmed stay queued.
    pub fn build_sync(&mut self, devices: &mut DeviceManager, current_time: u64, start_time: u64) -> SyncMessage {
        let confirmed: Vec<DeviceId> = devices
            .confirmed_devices()
            .into_iter()
            .map(|device| device.device_id)
            .collect();

        let mut slave_configs = Vec::with_capacity(confirmed.len());
        for (time_slot, device_id) in (0..=u8::MAX).zip(confirmed) {
            let reset = self.reset_requests.remove(&device_id);
            if reset {
                devices.set_reset_pending(device_id);
            }

            slave_configs.push(SlaveConfig {
                id: device_id,
                time_slot,
                reset,
                test_count: self
                    .test_counts
                    .get(&device_id)
                    .copied()
                    .unwrap_or(self.default_test_count),
            });
        }

        debug!(slaves = slave_configs.len(), mode = ?self.mode, "built sync schedule");

        SyncMessage {
            mode: self.mode,
            interval: self.interval_ms,
            current_time,
            start_time,
            slave_configs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FirmwareVersion, Timestamp};
    use crate::network::JoinSource;
    use std::collections::HashSet;

    fn confirmed_registry(count: u32) -> DeviceManager {
        let mut devices = DeviceManager::new();
        for raw in 0..count {
            let id = DeviceId(0x1000 + raw);
            devices.register_join(id, FirmwareVersion::default(), JoinSource::Announce, Timestamp(0));
            let short_id = devices.assign_short_id(id).unwrap();
            devices.mark_short_id_sent(id).unwrap();
            devices.confirm_short_id(id, short_id.get()).unwrap();
        }
        devices
    }

    #[test]
    fn test_slots_are_disjoint() {
        let mut devices = confirmed_registry(40);
        let mut scheduler = TdmaScheduler::new(&SyncDefaults::default());
        let sync = scheduler.build_sync(&mut devices, 10, 20);

        assert_eq!(sync.slave_configs.len(), 40);
        let slots: HashSet<u8> = sync.slave_configs.iter().map(|c| c.time_slot).collect();
        assert_eq!(slots.len(), 40);
        assert_eq!(sync.current_time, 10);
        assert_eq!(sync.start_time, 20);
    }

    #[test]
    fn test_full_address_space_fits() {
        let mut devices = confirmed_registry(255);
        let mut scheduler = TdmaScheduler::new(&SyncDefaults::default());
        let sync = scheduler.build_sync(&mut devices, 0, 0);

        let slots: HashSet<u8> = sync.slave_configs.iter().map(|c| c.time_slot).collect();
        assert_eq!(slots.len(), 255);
    }

    #[test]
    fn test_unconfirmed_devices_excluded() {
        let mut devices = confirmed_registry(2);
        let pending = DeviceId(0x9999);
        devices.register_join(pending, FirmwareVersion::default(), JoinSource::Announce, Timestamp(0));
        devices.assign_short_id(pending).unwrap();

        let mut scheduler = TdmaScheduler::new(&SyncDefaults::default());
        let sync = scheduler.build_sync(&mut devices, 0, 0);
        assert!(sync.slave_configs.iter().all(|c| c.id != pending));
    }

    #[test]
    fn test_reset_marks_registry_once() {
        let mut devices = confirmed_registry(3);
        let target = DeviceId(0x1001);
        let later = DeviceId(0x2000);

        let mut scheduler = TdmaScheduler::new(&SyncDefaults::default());
        scheduler.request_reset(target);
        scheduler.request_reset(later);

        let sync = scheduler.build_sync(&mut devices, 0, 0);
        let flagged: Vec<DeviceId> = sync.slave_configs.iter().filter(|c| c.reset).map(|c| c.id).collect();
        assert_eq!(flagged, vec![target]);
        assert!(devices.get_device_info(target).unwrap().reset_pending);
        assert_eq!(scheduler.pending_resets().collect::<Vec<_>>(), vec![&later]);

        let next = scheduler.build_sync(&mut devices, 0, 0);
        assert!(next.slave_configs.iter().all(|c| !c.reset));
    }

    #[test]
    fn test_test_count_overrides() {
        let mut devices = confirmed_registry(2);
        let defaults = SyncDefaults {
            mode: TestMode::Clip,
            interval_ms: 5,
            default_test_count: 4,
        };
        let mut scheduler = TdmaScheduler::new(&defaults);
        scheduler.set_test_count(DeviceId(0x1000), 32);

        let sync = scheduler.build_sync(&mut devices, 0, 0);
        assert_eq!(sync.mode, TestMode::Clip);
        assert_eq!(sync.interval, 5);
        assert_eq!(sync.slave_configs[0].test_count, 32);
        assert_eq!(sync.slave_configs[1].test_count, 4);

        scheduler.clear_test_count(DeviceId(0x1000));
        scheduler.set_mode(TestMode::Resistance);
        let sync = scheduler.build_sync(&mut devices, 0, 0);
        assert_eq!(sync.mode, TestMode::Resistance);
        assert_eq!(sync.slave_configs[0].test_count, 4);
    }
}
