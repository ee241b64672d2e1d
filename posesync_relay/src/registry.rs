//! Connection registry.
//!
//! One record per live connection, holding only the latest pose. The
//! registry itself is plain data; [`crate::relay::RelayState`] owns it
//! behind a mutex so every mutation plus its broadcast is one atomic step.

use std::collections::HashMap;

use bytes::Bytes;
use posesync_shared::{
    error::SyncError,
    math::Pose,
    protocol::{ClientId, PlayerState},
};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Relay-side state for one connection.
#[derive(Debug)]
pub struct ConnectionRecord {
    pub id: ClientId,
    pub pose: Pose,
    /// Relay clock at the last update (or at connect).
    pub timestamp: u64,
    outbox: mpsc::Sender<Bytes>,
}

impl ConnectionRecord {
    pub fn player_state(&self) -> PlayerState {
        PlayerState::new(self.id.clone(), self.pose, self.timestamp)
    }

    /// False once the connection's writer has gone away.
    pub fn is_open(&self) -> bool {
        !self.outbox.is_closed()
    }
}

/// Outcome of handing one payload to one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Outbound queue full; the message is superseded by the next update.
    Dropped,
    /// Writer is gone.
    Failed,
}

/// Per-broadcast tally.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub queued: usize,
    pub dropped: usize,
    pub failed: Vec<ClientId>,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    records: HashMap<ClientId, ConnectionRecord>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a record with a default pose and returns its fresh id.
    pub fn register(&mut self, outbox: mpsc::Sender<Bytes>, now_ms: u64) -> ClientId {
        let mut id = ClientId::new_unique();
        while self.records.contains_key(&id) {
            id = ClientId::new_unique();
        }
        self.records.insert(
            id.clone(),
            ConnectionRecord {
                id: id.clone(),
                pose: Pose::default(),
                timestamp: now_ms,
                outbox,
            },
        );
        id
    }

    /// Overwrites the stored pose. Returns the new state, or `None` if the
    /// connection is no longer registered.
    pub fn update_pose(&mut self, id: &ClientId, pose: Pose, now_ms: u64) -> Option<PlayerState> {
        let record = self.records.get_mut(id)?;
        record.pose = pose;
        record.timestamp = now_ms;
        Some(record.player_state())
    }

    pub fn remove(&mut self, id: &ClientId) -> Option<ConnectionRecord> {
        self.records.remove(id)
    }

    pub fn get(&self, id: &ClientId) -> Option<&ConnectionRecord> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records sorted by id, for stable reporting.
    pub fn records(&self) -> Vec<&ConnectionRecord> {
        let mut out: Vec<_> = self.records.values().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Current state of every connection except `exclude`.
    pub fn others(&self, exclude: &ClientId) -> Vec<PlayerState> {
        self.records()
            .into_iter()
            .filter(|r| &r.id != exclude)
            .map(ConnectionRecord::player_state)
            .collect()
    }

    /// Queues a payload for one connection without waiting.
    pub fn send_to(&self, id: &ClientId, payload: &Bytes) -> Delivery {
        match self.records.get(id) {
            Some(record) => Self::deliver(record, payload),
            None => Delivery::Failed,
        }
    }

    /// Queues a payload for every connection except `exclude`.
    ///
    /// A full or closed connection never affects delivery to the others.
    pub fn broadcast(&self, payload: &Bytes, exclude: Option<&ClientId>) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for record in self.records.values() {
            if Some(&record.id) == exclude {
                continue;
            }
            match Self::deliver(record, payload) {
                Delivery::Queued => report.queued += 1,
                Delivery::Dropped => report.dropped += 1,
                Delivery::Failed => report.failed.push(record.id.clone()),
            }
        }
        report
    }

    fn deliver(record: &ConnectionRecord, payload: &Bytes) -> Delivery {
        match record.outbox.try_send(payload.clone()) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => {
                debug!(client_id = %record.id, "Outbound queue full, dropping message");
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                let err = SyncError::SendFailure("writer closed".to_string());
                warn!(client_id = %record.id, error = %err, "Delivery failed");
                Delivery::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use posesync_shared::math::{Euler, Vec3};

    fn channel(cap: usize) -> (mpsc::Sender<Bytes>, mpsc::Receiver<Bytes>) {
        mpsc::channel(cap)
    }

    #[test]
    fn broadcast_survives_a_closed_connection() {
        let mut reg = ConnectionRegistry::new();
        let (tx_a, _rx_a) = channel(4);
        let (tx_b, rx_b) = channel(4);
        let (tx_c, mut rx_c) = channel(4);
        let a = reg.register(tx_a, 0);
        let b = reg.register(tx_b, 0);
        let _c = reg.register(tx_c, 0);
        drop(rx_b);

        let payload = Bytes::from_static(b"update");
        let report = reg.broadcast(&payload, Some(&a));

        assert_eq!(report.queued, 1);
        assert_eq!(report.failed, vec![b]);
        assert_eq!(rx_c.try_recv().unwrap(), payload);
    }

    #[test]
    fn full_queue_drops_without_blocking_others() {
        let mut reg = ConnectionRegistry::new();
        let (tx_slow, _rx_slow) = channel(1);
        let (tx_fast, mut rx_fast) = channel(8);
        reg.register(tx_slow, 0);
        reg.register(tx_fast, 0);

        for _ in 0..3 {
            reg.broadcast(&Bytes::from_static(b"x"), None);
        }
        let mut received = 0;
        while rx_fast.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 3);
    }

    #[test]
    fn broadcast_excludes_originator() {
        let mut reg = ConnectionRegistry::new();
        let (tx_a, mut rx_a) = channel(4);
        let a = reg.register(tx_a, 0);
        let report = reg.broadcast(&Bytes::from_static(b"x"), Some(&a));
        assert_eq!(report, BroadcastReport::default());
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn update_keeps_only_latest_pose() {
        let mut reg = ConnectionRegistry::new();
        let (tx, _rx) = channel(1);
        let id = reg.register(tx, 10);
        assert_eq!(reg.get(&id).unwrap().pose, Pose::default());

        let p1 = Pose::new(Vec3::new(1.0, 0.0, 0.0), Euler::IDENTITY);
        let p2 = Pose::new(Vec3::new(2.0, 0.0, 0.0), Euler::new(0.0, 1.0, 0.0));
        reg.update_pose(&id, p1, 20);
        let state = reg.update_pose(&id, p2, 30).unwrap();

        assert_eq!(state.pose(), p2);
        assert_eq!(state.timestamp, 30);
        assert_eq!(reg.len(), 1);
        assert!(reg.update_pose(&ClientId::from("nope"), p1, 40).is_none());
    }

    #[test]
    fn others_omits_self_and_remove_forgets() {
        let mut reg = ConnectionRegistry::new();
        let (tx_a, _rx_a) = channel(1);
        let (tx_b, _rx_b) = channel(1);
        let a = reg.register(tx_a, 0);
        let b = reg.register(tx_b, 0);
        assert_ne!(a, b);

        let others = reg.others(&a);
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].id, b);

        assert!(reg.remove(&b).is_some());
        assert!(reg.others(&a).is_empty());
        assert_eq!(reg.send_to(&b, &Bytes::from_static(b"x")), Delivery::Failed);
    }
}
