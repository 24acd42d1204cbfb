use std::time::Duration;

use serde::Serialize;
use tracing::{debug, trace};

use crate::core::{DeviceId, Timestamp};
use crate::protocol::PingReqMessage;

/// A caller-driven ping sequence towards one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PingSession {
    pub target_id: DeviceId,
    /// Sequence number of the most recent request
    pub sequence_number: u16,
    /// Requests to send in total
    pub total_count: u16,
    /// Requests sent so far
    pub attempt_count: u16,
    /// Distinct requests answered
    pub success_count: u16,
    #[serde(skip)]
    pub interval: Duration,
    pub next_ping_at: Option<Timestamp>,
    sent: Vec<u16>,
    acked: Vec<u16>,
}

impl PingSession {
    /// All requests have been sent
    pub fn is_complete(&self) -> bool {
        self.attempt_count >= self.total_count
    }

    /// Answered fraction of the requests sent so far
    pub fn success_rate(&self) -> f64 {
        if self.attempt_count == 0 {
            0.0
        } else {
            f64::from(self.success_count) / f64::from(self.attempt_count)
        }
    }
}

/// Active ping sessions, scanned linearly.
///
/// Lookups are O(n) in the session count, which stays in the tens.
#[derive(Debug, Default)]
pub struct PingTracker {
    sessions: Vec<PingSession>,
    next_sequence: u16,
}

impl PingTracker {
    pub fn new() -> Self {
        PingTracker::default()
    }

    /// Starts a session, replacing any earlier one for the same target.
    ///
    /// The first request is due immediately.
    pub fn start_session(&mut self, target_id: DeviceId, total_count: u16, interval: Duration, now: Timestamp) {
        let session = PingSession {
            target_id,
            sequence_number: 0,
            total_count,
            attempt_count: 0,
            success_count: 0,
            interval,
            next_ping_at: (total_count > 0).then_some(now),
            sent: Vec::with_capacity(total_count as usize),
            acked: Vec::new(),
        };

        match self.sessions.iter_mut().find(|s| s.target_id == target_id) {
            Some(existing) => {
                debug!(device = %target_id, "restarting ping session");
                *existing = session;
            }
            None => self.sessions.push(session),
        }
    }

    /// Requests whose send time has come, advancing each session
    pub fn due_pings(&mut self, now: Timestamp) -> Vec<(DeviceId, PingReqMessage)> {
        let mut due = Vec::new();

        for session in self.sessions.iter_mut() {
            match session.next_ping_at {
                Some(at) if at <= now => {}
                _ => continue,
            }

            let sequence_number = self.next_sequence;
            self.next_sequence = self.next_sequence.wrapping_add(1);

            session.sequence_number = sequence_number;
            session.attempt_count += 1;
            session.sent.push(sequence_number);
            let interval = session.interval;
            session.next_ping_at = (!session.is_complete()).then(|| now + interval);

            due.push((
                session.target_id,
                PingReqMessage {
                    sequence_number,
                    // Wire field is 32 bits wide
                    timestamp: now.as_millis() as u32,
                },
            ));
        }

        due
    }

    /// Counts a response for `sender`'s session.
    ///
    /// Returns `true` when the response answered a request not seen before.
    pub fn record_response(&mut self, sender: DeviceId, sequence_number: u16) -> bool {
        let Some(session) = self.sessions.iter_mut().find(|s| s.target_id == sender) else {
            debug!(device = %sender, seq = sequence_number, "ping response without session");
            return false;
        };

        if !session.sent.contains(&sequence_number) || session.acked.contains(&sequence_number) {
            trace!(device = %sender, seq = sequence_number, "ignoring stale or duplicate ping response");
            return false;
        }

        session.acked.push(sequence_number);
        session.success_count += 1;
        true
    }

    pub fn session(&self, target_id: DeviceId) -> Option<&PingSession> {
        self.sessions.iter().find(|s| s.target_id == target_id)
    }

    pub fn sessions(&self) -> &[PingSession] {
        &self.sessions
    }

    /// Removes and returns the session for `target_id`
    pub fn retire_session(&mut self, target_id: DeviceId) -> Option<PingSession> {
        let index = self.sessions.iter().position(|s| s.target_id == target_id)?;
        Some(self.sessions.remove(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(200);

    #[test]
    fn test_session_paces_requests() {
        let mut tracker = PingTracker::new();
        let target = DeviceId(0xAABBCCDD);
        tracker.start_session(target, 3, INTERVAL, Timestamp(1000));

        let first = tracker.due_pings(Timestamp(1000));
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].0, target);
        assert_eq!(first[0].1.timestamp, 1000);

        assert!(tracker.due_pings(Timestamp(1100)).is_empty());
        assert_eq!(tracker.due_pings(Timestamp(1200)).len(), 1);
        assert_eq!(tracker.due_pings(Timestamp(1400)).len(), 1);
        assert!(tracker.due_pings(Timestamp(5000)).is_empty());

        let session = tracker.session(target).unwrap();
        assert!(session.is_complete());
        assert_eq!(session.attempt_count, 3);
        assert_eq!(session.next_ping_at, None);
    }

    #[test]
    fn test_responses_count_once() {
        let mut tracker = PingTracker::new();
        let target = DeviceId(1);
        tracker.start_session(target, 2, INTERVAL, Timestamp(0));
        let seq = tracker.due_pings(Timestamp(0))[0].1.sequence_number;

        assert!(tracker.record_response(target, seq));
        assert!(!tracker.record_response(target, seq));
        assert!(!tracker.record_response(target, seq.wrapping_add(10)));
        assert!(!tracker.record_response(DeviceId(2), seq));

        let session = tracker.session(target).unwrap();
        assert_eq!(session.success_count, 1);
        assert!((session.success_rate() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_sessions_persist_until_retired() {
        let mut tracker = PingTracker::new();
        tracker.start_session(DeviceId(1), 1, INTERVAL, Timestamp(0));
        tracker.start_session(DeviceId(2), 1, INTERVAL, Timestamp(0));
        tracker.start_session(DeviceId(1), 5, INTERVAL, Timestamp(0));
        assert_eq!(tracker.sessions().len(), 2);
        assert_eq!(tracker.session(DeviceId(1)).unwrap().total_count, 5);

        tracker.due_pings(Timestamp(10_000));
        assert_eq!(tracker.sessions().len(), 2);

        let retired = tracker.retire_session(DeviceId(2)).unwrap();
        assert_eq!(retired.attempt_count, 1);
        assert!(tracker.retire_session(DeviceId(2)).is_none());
    }
}
