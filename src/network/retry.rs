use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::core::{DeviceId, Timestamp};
use crate::protocol::{Master2Slave, MasterToSlaveId};

/// Outbound command waiting for its acknowledgment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    pub device_id: DeviceId,
    pub message_id: MasterToSlaveId,
    /// Encoded frame, retransmitted verbatim
    pub payload: Bytes,
    /// Transmissions left after the ones already made
    pub attempts_remaining: u8,
    pub attempts_made: u8,
    pub next_retry_at: Timestamp,
}

/// Work produced by a retry tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryAction {
    /// Send `payload` again; `attempt` counts the first transmission as 1
    Retransmit {
        device_id: DeviceId,
        message_id: MasterToSlaveId,
        payload: Bytes,
        attempt: u8,
    },
    /// No acknowledgment after every attempt; the entry has been dropped
    Exhausted {
        device_id: DeviceId,
        message_id: MasterToSlaveId,
        attempts: u8,
    },
}

/// Per-device queue of retried commands, keyed by (device, message id).
///
/// Timers are cooperative: deadlines are only examined by `poll`.
#[derive(Debug)]
pub struct RetryEngine {
    timeout: Duration,
    pending: BTreeMap<(DeviceId, MasterToSlaveId), PendingCommand>,
}

impl RetryEngine {
    pub fn new(timeout: Duration) -> Self {
        RetryEngine {
            timeout,
            pending: BTreeMap::new(),
        }
    }

    /// Queues `message` for `device_id` and returns the frame to transmit now.
    ///
    /// An existing entry with the same key is replaced together with its
    /// attempt counter. `max_attempts` counts the first transmission and is
    /// clamped to at least one.
    pub fn enqueue(
        &mut self,
        device_id: DeviceId,
        message: &Master2Slave,
        max_attempts: u8,
        now: Timestamp,
    ) -> Bytes {
        let message_id = message.message_id();
        let payload = message.encode();
        let attempts = max_attempts.max(1);

        let command = PendingCommand {
            device_id,
            message_id,
            payload: payload.clone(),
            attempts_remaining: attempts - 1,
            attempts_made: 1,
            next_retry_at: now + self.timeout,
        };

        if self.pending.insert((device_id, message_id), command).is_some() {
            debug!(device = %device_id, message = message.type_name(), "replaced pending command");
        }

        payload
    }

    /// Drops the entry for this key. Removing a missing entry is a no-op.
    pub fn remove_pending_command(&mut self, device_id: DeviceId, message_id: MasterToSlaveId) -> bool {
        self.pending.remove(&(device_id, message_id)).is_some()
    }

    /// Collects retransmissions and exhaustions whose deadline has passed
    pub fn poll(&mut self, now: Timestamp) -> Vec<RetryAction> {
        let timeout = self.timeout;
        let mut actions = Vec::new();
        let mut exhausted = Vec::new();

        for (key, command) in self.pending.iter_mut() {
            if command.next_retry_at > now {
                continue;
            }

            if command.attempts_remaining == 0 {
                exhausted.push(*key);
                actions.push(RetryAction::Exhausted {
                    device_id: command.device_id,
                    message_id: command.message_id,
                    attempts: command.attempts_made,
                });
                continue;
            }

            command.attempts_remaining -= 1;
            command.attempts_made = command.attempts_made.saturating_add(1);
            command.next_retry_at = now + timeout;
            actions.push(RetryAction::Retransmit {
                device_id: command.device_id,
                message_id: command.message_id,
                payload: command.payload.clone(),
                attempt: command.attempts_made,
            });
        }

        for key in exhausted {
            self.pending.remove(&key);
        }

        actions
    }

    pub fn get(&self, device_id: DeviceId, message_id: MasterToSlaveId) -> Option<&PendingCommand> {
        self.pending.get(&(device_id, message_id))
    }

    /// Earliest deadline across all entries
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.pending.values().map(|command| command.next_retry_at).min()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ShortId;
    use crate::protocol::{PingReqMessage, ShortIdAssignMessage};

    const TIMEOUT: Duration = Duration::from_millis(100);

    fn assign(raw: u8) -> Master2Slave {
        Master2Slave::ShortIdAssign(ShortIdAssignMessage {
            short_id: ShortId::new(raw).unwrap(),
        })
    }

    #[test]
    fn test_exhaustion_after_max_attempts() {
        let mut engine = RetryEngine::new(TIMEOUT);
        let id = DeviceId(1);
        let first = engine.enqueue(id, &assign(5), 3, Timestamp(0));

        assert!(engine.poll(Timestamp(99)).is_empty());

        let mut retransmits = 0;
        let mut now = 0;
        let failure = loop {
            now += 100;
            let actions = engine.poll(Timestamp(now));
            match actions.as_slice() {
                [RetryAction::Retransmit { payload, attempt, .. }] => {
                    assert_eq!(payload, &first);
                    retransmits += 1;
                    assert_eq!(*attempt, retransmits + 1);
                }
                [RetryAction::Exhausted { attempts, .. }] => break *attempts,
                other => panic!("unexpected actions {:?}", other),
            }
        };

        assert_eq!(retransmits, 2);
        assert_eq!(failure, 3);
        assert!(engine.is_empty());
        assert!(engine.poll(Timestamp(now + 1000)).is_empty());
    }

    #[test]
    fn test_removal_cancels_retransmission() {
        let mut engine = RetryEngine::new(TIMEOUT);
        let id = DeviceId(2);
        engine.enqueue(id, &assign(5), 3, Timestamp(0));

        assert!(engine.remove_pending_command(id, MasterToSlaveId::ShortIdAssign));
        assert!(!engine.remove_pending_command(id, MasterToSlaveId::ShortIdAssign));
        assert!(engine.poll(Timestamp(10_000)).is_empty());
    }

    #[test]
    fn test_same_key_replaces_entry() {
        let mut engine = RetryEngine::new(TIMEOUT);
        let id = DeviceId(3);
        engine.enqueue(id, &assign(5), 3, Timestamp(0));
        assert_eq!(engine.poll(Timestamp(100)).len(), 1);

        let payload = engine.enqueue(id, &assign(6), 2, Timestamp(150));
        assert_eq!(engine.len(), 1);

        let pending = engine.get(id, MasterToSlaveId::ShortIdAssign).unwrap();
        assert_eq!(pending.payload, payload);
        assert_eq!(pending.attempts_remaining, 1);
        assert_eq!(pending.next_retry_at, Timestamp(250));
    }

    #[test]
    fn test_keys_are_independent() {
        let mut engine = RetryEngine::new(TIMEOUT);
        let ping = Master2Slave::PingReq(PingReqMessage { sequence_number: 1, timestamp: 0 });
        engine.enqueue(DeviceId(1), &assign(1), 2, Timestamp(0));
        engine.enqueue(DeviceId(1), &ping, 1, Timestamp(50));
        engine.enqueue(DeviceId(2), &assign(2), 2, Timestamp(0));
        assert_eq!(engine.len(), 3);
        assert_eq!(engine.next_deadline(), Some(Timestamp(100)));

        engine.remove_pending_command(DeviceId(1), MasterToSlaveId::ShortIdAssign);
        let actions = engine.poll(Timestamp(150));
        assert_eq!(actions.len(), 2);
        assert!(actions.contains(&RetryAction::Exhausted {
            device_id: DeviceId(1),
            message_id: MasterToSlaveId::PingReq,
            attempts: 1,
        }));
    }

    #[test]
    fn test_zero_attempts_still_transmits_once() {
        let mut engine = RetryEngine::new(TIMEOUT);
        engine.enqueue(DeviceId(9), &assign(1), 0, Timestamp(0));
        assert!(matches!(
            engine.poll(Timestamp(100)).as_slice(),
            [RetryAction::Exhausted { attempts: 1, .. }]
        ));
    }
}
