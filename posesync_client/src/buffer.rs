//! Remote state buffering.
//!
//! Per remote entity, a short window of timestamped snapshots kept in origin
//! timestamp order. The network side writes here as messages arrive; the
//! render loop reads on its own cadence. This buffer is the only ordering
//! point between the two.
//!
//! Entity lifecycle: absent (unknown) -> present (active) -> dropped
//! (removed). A dropped id that shows up again starts over with an empty
//! buffer.

use std::collections::HashMap;

use posesync_shared::{math::Pose, protocol::ClientId};

/// One timestamped pose sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub pose: Pose,
    /// Sender-side (relay) clock.
    pub origin_ms: u64,
    /// Local clock at receipt.
    pub receipt_ms: u64,
}

/// Buffered history for one remote entity.
#[derive(Debug, Clone)]
pub struct RemoteEntity {
    id: ClientId,
    snapshots: Vec<Snapshot>,
    newest_ms: u64,
}

impl RemoteEntity {
    fn new(id: ClientId) -> Self {
        Self {
            id,
            snapshots: Vec::new(),
            newest_ms: 0,
        }
    }

    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Snapshots in ascending origin timestamp order.
    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    fn record(&mut self, snap: Snapshot, retention_ms: u64) {
        match self
            .snapshots
            .binary_search_by_key(&snap.origin_ms, |s| s.origin_ms)
        {
            Ok(i) => self.snapshots[i] = snap,
            Err(i) => self.snapshots.insert(i, snap),
        }
        self.newest_ms = self.newest_ms.max(snap.origin_ms);
        self.prune_before(self.newest_ms.saturating_sub(retention_ms));
    }

    /// Drops every snapshot older than `cutoff_ms`. Returns how many went.
    fn prune_before(&mut self, cutoff_ms: u64) -> usize {
        let n = self.snapshots.partition_point(|s| s.origin_ms < cutoff_ms);
        self.snapshots.drain(..n);
        n
    }
}

/// Snapshot windows for every known remote entity.
#[derive(Debug, Clone)]
pub struct RemoteStateBuffer {
    entities: HashMap<ClientId, RemoteEntity>,
    retention_ms: u64,
}

impl RemoteStateBuffer {
    pub fn new(retention_ms: u64) -> Self {
        Self {
            entities: HashMap::new(),
            retention_ms,
        }
    }

    pub fn retention_ms(&self) -> u64 {
        self.retention_ms
    }

    /// Appends or replaces the snapshot at `origin_ms`, then prunes relative
    /// to the newest timestamp seen for that entity.
    ///
    /// Returns `true` if this created the entity.
    pub fn record(&mut self, id: &ClientId, pose: Pose, origin_ms: u64, receipt_ms: u64) -> bool {
        let retention = self.retention_ms;
        let mut created = false;
        let entity = self.entities.entry(id.clone()).or_insert_with(|| {
            created = true;
            RemoteEntity::new(id.clone())
        });
        entity.record(
            Snapshot {
                pose,
                origin_ms,
                receipt_ms,
            },
            retention,
        );
        created
    }

    /// Live ordered snapshots for `id`.
    pub fn read(&self, id: &ClientId) -> Option<&[Snapshot]> {
        self.entities.get(id).map(RemoteEntity::snapshots)
    }

    pub fn contains(&self, id: &ClientId) -> bool {
        self.entities.contains_key(id)
    }

    /// Removes the entity entirely.
    pub fn remove(&mut self, id: &ClientId) -> bool {
        self.entities.remove(id).is_some()
    }

    pub fn clear(&mut self) {
        self.entities.clear();
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Known entity ids, sorted.
    pub fn ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<_> = self.entities.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Entities in id order.
    pub fn entities(&self) -> Vec<&RemoteEntity> {
        let mut out: Vec<_> = self.entities.values().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Prunes snapshots older than `cutoff_ms` from every entity and drops
    /// entities left with nothing. Returns the dropped ids.
    pub fn prune_expired(&mut self, cutoff_ms: u64) -> Vec<ClientId> {
        let mut stale = Vec::new();
        self.entities.retain(|id, entity| {
            entity.prune_before(cutoff_ms);
            if entity.snapshots.is_empty() {
                stale.push(id.clone());
                false
            } else {
                true
            }
        });
        stale.sort();
        stale
    }
}
