//! Interpolation.
//!
//! Remote poses are rendered at `now - delay`. With the default 200 ms delay
//! both neighbours of the render time have nearly always arrived, so the
//! client blends between known samples and never extrapolates past the last
//! one.

use std::collections::HashMap;

use posesync_shared::{math::Pose, protocol::ClientId};

use crate::buffer::{RemoteStateBuffer, Snapshot};

/// How a pose was derived from the buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    /// Blend between the snapshots around the render time.
    Blend { pose: Pose, alpha: f32 },
    /// Render time precedes every snapshot; use the earliest as-is.
    Snap(Pose),
    /// Render time is past every snapshot; hold the newest.
    Hold(Pose),
    Empty,
}

impl Sample {
    pub fn pose(self) -> Option<Pose> {
        match self {
            Sample::Blend { pose, .. } | Sample::Snap(pose) | Sample::Hold(pose) => Some(pose),
            Sample::Empty => None,
        }
    }
}

/// Samples an ordered snapshot window at `render_ms`.
///
/// A render time past the newest snapshot yields [`Sample::Hold`] with that
/// snapshot's pose. This differs from leaving the entity wherever the
/// previous frame put it: a lagging entity jumps to its newest known pose
/// and stays there until fresher data arrives.
pub fn sample(snapshots: &[Snapshot], render_ms: u64) -> Sample {
    let idx = snapshots.partition_point(|s| s.origin_ms < render_ms);
    match (idx.checked_sub(1).map(|i| &snapshots[i]), snapshots.get(idx)) {
        (Some(before), Some(after)) => {
            let span = after.origin_ms.saturating_sub(before.origin_ms);
            let alpha = if span == 0 {
                1.0
            } else {
                ((render_ms - before.origin_ms) as f64 / span as f64).clamp(0.0, 1.0) as f32
            };
            Sample::Blend {
                pose: before.pose.lerp(after.pose, alpha),
                alpha,
            }
        }
        (None, Some(after)) => Sample::Snap(after.pose),
        (Some(newest), None) => Sample::Hold(newest.pose),
        (None, None) => Sample::Empty,
    }
}

/// Result of one [`Interpolator::tick`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    /// Entities evicted because every snapshot expired.
    pub removed: Vec<ClientId>,
    /// One pose per remaining entity, in id order.
    pub poses: Vec<(ClientId, Pose)>,
}

/// Per-tick driver: prunes and samples every buffered entity.
#[derive(Debug, Clone)]
pub struct Interpolator {
    delay_ms: u64,
    last_rendered: HashMap<ClientId, Pose>,
}

impl Interpolator {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            last_rendered: HashMap::new(),
        }
    }

    pub fn render_timestamp(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.delay_ms)
    }

    /// Last pose pushed for `id`, if any.
    pub fn last_rendered(&self, id: &ClientId) -> Option<Pose> {
        self.last_rendered.get(id).copied()
    }

    /// Runs one render tick. `now_ms` must be in the same clock base as the
    /// buffered origin timestamps.
    ///
    /// Evicts expired snapshots and the entities they leave empty, then
    /// samples one pose per remaining entity. Results are not written back
    /// into the buffer.
    pub fn tick(&mut self, buffer: &mut RemoteStateBuffer, now_ms: u64) -> Frame {
        let cutoff = now_ms.saturating_sub(buffer.retention_ms());
        let removed = buffer.prune_expired(cutoff);
        for id in &removed {
            self.last_rendered.remove(id);
        }

        let render_ms = self.render_timestamp(now_ms);
        let mut poses = Vec::with_capacity(buffer.len());
        for entity in buffer.entities() {
            let pose = match sample(entity.snapshots(), render_ms).pose() {
                Some(pose) => pose,
                None => match self.last_rendered.get(entity.id()) {
                    Some(prev) => *prev,
                    None => continue,
                },
            };
            self.last_rendered.insert(entity.id().clone(), pose);
            poses.push((entity.id().clone(), pose));
        }
        Frame { removed, poses }
    }

    pub fn forget(&mut self, id: &ClientId) {
        self.last_rendered.remove(id);
    }

    pub fn clear(&mut self) {
        self.last_rendered.clear();
    }
}
