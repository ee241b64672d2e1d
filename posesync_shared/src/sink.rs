//! Rendering-side collaborator interface.
//!
//! This crate does not depend on a scene graph. The client pushes
//! interpolated poses and remote events through this trait once per render
//! tick, on the render thread.

use crate::{
    math::Pose,
    protocol::{ClientId, ShotEvent},
};

/// Receiver of synchronized state.
pub trait PoseSink {
    /// Interpolated pose for one remote entity, once per tick.
    fn on_pose(&mut self, id: &ClientId, pose: Pose);
    /// A remote player fired. Raycasts and effects are the consumer's job.
    fn on_remote_shot(&mut self, _shot: &ShotEvent) {}
    fn on_peer_joined(&mut self, _id: &ClientId) {}
    /// Entity left, or its buffer went stale.
    fn on_peer_removed(&mut self, _id: &ClientId) {}
    fn on_disconnected(&mut self) {}
}

/// A no-op sink useful for headless runs.
#[derive(Default)]
pub struct NullSink;

impl PoseSink for NullSink {
    fn on_pose(&mut self, _id: &ClientId, _pose: Pose) {}
}

/// Records every callback, for tests and tooling.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub poses: Vec<(ClientId, Pose)>,
    pub shots: Vec<ShotEvent>,
    pub joined: Vec<ClientId>,
    pub removed: Vec<ClientId>,
    pub disconnects: usize,
}

impl RecordingSink {
    /// Most recent pose delivered for `id`.
    pub fn last_pose(&self, id: &ClientId) -> Option<Pose> {
        self.poses
            .iter()
            .rev()
            .find(|(pid, _)| pid == id)
            .map(|(_, p)| *p)
    }
}

impl PoseSink for RecordingSink {
    fn on_pose(&mut self, id: &ClientId, pose: Pose) {
        self.poses.push((id.clone(), pose));
    }

    fn on_remote_shot(&mut self, shot: &ShotEvent) {
        self.shots.push(shot.clone());
    }

    fn on_peer_joined(&mut self, id: &ClientId) {
        self.joined.push(id.clone());
    }

    fn on_peer_removed(&mut self, id: &ClientId) {
        self.removed.push(id.clone());
    }

    fn on_disconnected(&mut self) {
        self.disconnects += 1;
    }
}
