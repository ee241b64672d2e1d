//! Client implementation.
//!
//! The client maintains:
//! - One framed connection to the relay, read by a background task
//! - A remote state buffer fed by that task as messages arrive
//! - A rate-limited outbound queue for local pose and shot publication
//! - Per-render-tick interpolation into a [`PoseSink`]
//!
//! The render loop never waits on network I/O. On transport close every
//! remote entity is discarded and queued publications are abandoned; there
//! is no retry or reconnection here.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use bytes::Bytes;
use parking_lot::Mutex;
use posesync_shared::{
    clock::{SharedClock, SystemClock},
    config::SyncConfig,
    error::SyncError,
    math::{Pose, Vec3},
    net::{self, TcpFrameReader},
    protocol::{self, ClientId, PlayerState, ShotEvent, WireMessage},
    sink::PoseSink,
};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::{AbortHandle, JoinHandle},
};
use tracing::{debug, info, warn};

use crate::{
    buffer::{RemoteStateBuffer, Snapshot},
    interp::{Frame, Interpolator},
    limiter::RateLimiter,
    offset::ClockOffset,
};

/// Network-side notification waiting for the next render tick.
#[derive(Debug, Clone, PartialEq)]
enum Pending {
    Joined(ClientId),
    Removed(ClientId),
    Shot(ShotEvent),
    Disconnected,
}

/// State shared between the receive task and the render loop.
struct Shared {
    self_id: ClientId,
    buffer: RemoteStateBuffer,
    offset: ClockOffset,
    pending: Vec<Pending>,
    connected: bool,
}

impl Shared {
    fn record(&mut self, player: &PlayerState, receipt_ms: u64) -> bool {
        self.offset.observe(receipt_ms, player.timestamp);
        self.buffer
            .record(&player.id, player.pose(), player.timestamp, receipt_ms)
    }

    fn apply(&mut self, msg: WireMessage, receipt_ms: u64) {
        match msg {
            WireMessage::PeerJoined { player } => {
                if player.id == self.self_id {
                    return;
                }
                self.record(&player, receipt_ms);
                self.pending.push(Pending::Joined(player.id));
            }
            WireMessage::PeerLeft { client_id } => {
                if self.buffer.remove(&client_id) {
                    self.pending.push(Pending::Removed(client_id));
                }
            }
            WireMessage::PeerState { player } => {
                if player.id == self.self_id {
                    return;
                }
                if self.record(&player, receipt_ms) {
                    self.pending.push(Pending::Joined(player.id));
                }
            }
            WireMessage::PlayerShot {
                client_id,
                origin,
                direction,
            } => {
                if client_id == self.self_id {
                    return;
                }
                self.pending.push(Pending::Shot(ShotEvent {
                    source: client_id,
                    origin,
                    direction,
                }));
            }
            other => {
                debug!(kind = other.kind(), "Ignoring client-bound message of relay kind");
            }
        }
    }

    fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        self.buffer.clear();
        self.offset.reset();
        self.pending.retain(|p| matches!(p, Pending::Disconnected));
        self.pending.push(Pending::Disconnected);
    }
}

/// Connected pose-sync client.
pub struct SyncClient {
    pub client_id: ClientId,
    pub cfg: SyncConfig,
    clock: SharedClock,
    shared: Arc<Mutex<Shared>>,
    outbound: mpsc::Sender<Bytes>,
    limiter: RateLimiter,
    interpolator: Interpolator,
    reader_task: JoinHandle<()>,
    writer_task: AbortHandle,
}

impl SyncClient {
    /// Connects with the process wall clock.
    pub async fn connect(cfg: &SyncConfig) -> anyhow::Result<Self> {
        Self::connect_with_clock(cfg, SystemClock::shared()).await
    }

    /// Connects and waits for the relay's `init`, giving up after
    /// `cfg.connect_timeout_ms`.
    pub async fn connect_with_clock(cfg: &SyncConfig, clock: SharedClock) -> anyhow::Result<Self> {
        let relay_addr: SocketAddr = cfg.relay_addr.parse().context("parse relay_addr")?;
        info!(relay = %relay_addr, "Connecting to relay");

        let (mut reader, mut writer) = net::connect(relay_addr, cfg.max_frame_len).await?;

        let init_timeout = Duration::from_millis(cfg.connect_timeout_ms);
        let (client_id, players) = tokio::time::timeout(init_timeout, await_init(&mut reader))
            .await
            .map_err(|_| anyhow::anyhow!("no init from relay within {init_timeout:?}"))??;

        let mut shared = Shared {
            self_id: client_id.clone(),
            buffer: RemoteStateBuffer::new(cfg.retention_ms),
            offset: ClockOffset::new(),
            pending: Vec::new(),
            connected: true,
        };
        let now = clock.now_ms();
        for player in players.iter().filter(|p| p.id != client_id) {
            shared.record(player, now);
            shared.pending.push(Pending::Joined(player.id.clone()));
        }
        info!(client_id = %client_id, peers = shared.buffer.len(), "Connected to relay");
        let shared = Arc::new(Mutex::new(shared));

        let (outbound, mut outbox) = mpsc::channel::<Bytes>(cfg.outbound_queue.max(1));
        let writer_task = tokio::spawn(async move {
            while let Some(payload) = outbox.recv().await {
                if let Err(e) = writer.send_frame(&payload).await {
                    debug!(error = %e, "Writer stopped");
                    break;
                }
            }
        })
        .abort_handle();

        let reader_task = tokio::spawn(receive_loop(
            reader,
            Arc::clone(&shared),
            Arc::clone(&clock),
            writer_task.clone(),
        ));

        Ok(Self {
            client_id,
            cfg: cfg.clone(),
            clock,
            shared,
            outbound,
            limiter: RateLimiter::new(cfg.publish_interval_ms),
            interpolator: Interpolator::new(cfg.interpolation_delay_ms),
            reader_task,
            writer_task,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }

    /// Publishes the local pose if the rate limiter allows it.
    ///
    /// Returns `true` if a `state-update` was queued.
    pub fn publish_local_pose(&mut self, pose: Pose) -> bool {
        if !self.is_connected() {
            return false;
        }
        let now = self.clock.now_ms();
        if !self.limiter.permits(now) {
            return false;
        }
        if !is_finite_pose(&pose) {
            warn!(?pose, "Refusing to publish non-finite pose");
            return false;
        }
        let msg = WireMessage::StateUpdate {
            position: pose.position,
            rotation: pose.rotation,
        };
        if self.enqueue(&msg) {
            self.limiter.mark_published(now);
            true
        } else {
            false
        }
    }

    /// Sends a shot notification. Not rate limited.
    pub fn send_shot(&mut self, origin: Vec3, direction: Vec3) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.enqueue(&WireMessage::Shoot { origin, direction })
    }

    fn enqueue(&self, msg: &WireMessage) -> bool {
        let payload = match protocol::encode(msg) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to encode outbound message");
                return false;
            }
        };
        match self.outbound.try_send(payload) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(kind = msg.kind(), "Outbound queue full, dropping message");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Runs one render tick: delivers queued notifications, then one
    /// interpolated pose per remote entity.
    pub fn render_tick(&mut self, sink: &mut dyn PoseSink) {
        render_frame(&self.shared, &mut self.interpolator, self.clock.now_ms(), sink);
    }

    /// Ids of every remote entity currently buffered.
    pub fn remote_ids(&self) -> Vec<ClientId> {
        self.shared.lock().buffer.ids()
    }

    /// Copy of one entity's buffered window, for inspection.
    pub fn snapshots(&self, id: &ClientId) -> Option<Vec<Snapshot>> {
        self.shared.lock().buffer.read(id).map(<[Snapshot]>::to_vec)
    }

    /// Closes the connection locally. Queued publications are abandoned.
    pub fn disconnect(&mut self) {
        self.reader_task.abort();
        self.writer_task.abort();
        self.shared.lock().disconnect();
        info!(client_id = %self.client_id, "Disconnected");
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

/// Reads until the relay's `init`, skipping kinds this build does not know.
async fn await_init(reader: &mut TcpFrameReader) -> anyhow::Result<(ClientId, Vec<PlayerState>)> {
    loop {
        match reader.recv().await {
            Ok(WireMessage::Init { client_id, players }) => return Ok((client_id, players)),
            Ok(other) => anyhow::bail!("expected init, got {}", other.kind()),
            Err(SyncError::UnsupportedMessageKind(kind)) => {
                debug!(%kind, "Skipping unsupported message kind before init");
            }
            Err(e) if e.is_terminal() => return Err(e).context("await init"),
            Err(e) => warn!(error = %e, "Dropping malformed message before init"),
        }
    }
}

/// Collects pending events and this tick's poses under the lock, then
/// releases it before any sink callback runs.
fn render_frame(
    shared: &Mutex<Shared>,
    interpolator: &mut Interpolator,
    local_now_ms: u64,
    sink: &mut dyn PoseSink,
) {
    let (events, frame) = {
        let mut shared = shared.lock();
        let events = std::mem::take(&mut shared.pending);
        for event in &events {
            match event {
                Pending::Removed(id) => interpolator.forget(id),
                Pending::Disconnected => interpolator.clear(),
                Pending::Joined(_) | Pending::Shot(_) => {}
            }
        }
        let frame = if shared.connected {
            let now = shared.offset.to_remote(local_now_ms);
            interpolator.tick(&mut shared.buffer, now)
        } else {
            Frame::default()
        };
        (events, frame)
    };

    for event in events {
        match event {
            Pending::Joined(id) => sink.on_peer_joined(&id),
            Pending::Removed(id) => sink.on_peer_removed(&id),
            Pending::Shot(shot) => sink.on_remote_shot(&shot),
            Pending::Disconnected => sink.on_disconnected(),
        }
    }
    for id in &frame.removed {
        sink.on_peer_removed(id);
    }
    for (id, pose) in &frame.poses {
        sink.on_pose(id, *pose);
    }
}

fn is_finite_pose(pose: &Pose) -> bool {
    let p = pose.position;
    let r = pose.rotation;
    [p.x, p.y, p.z, r.x, r.y, r.z].iter().all(|v| v.is_finite())
}

/// Applies inbound messages until the transport closes.
async fn receive_loop(
    mut reader: TcpFrameReader,
    shared: Arc<Mutex<Shared>>,
    clock: SharedClock,
    writer_task: AbortHandle,
) {
    loop {
        match reader.recv().await {
            Ok(msg) => {
                let receipt = clock.now_ms();
                shared.lock().apply(msg, receipt);
            }
            Err(SyncError::UnsupportedMessageKind(kind)) => {
                debug!(%kind, "Skipping unsupported message kind");
            }
            Err(e) if e.is_terminal() => {
                info!(error = %e, "Relay connection lost");
                break;
            }
            Err(e) => warn!(error = %e, "Dropping malformed message"),
        }
    }
    writer_task.abort();
    shared.lock().disconnect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use posesync_shared::{math::Euler, sink::RecordingSink};

    fn shared() -> Shared {
        Shared {
            self_id: ClientId::from("me"),
            buffer: RemoteStateBuffer::new(1_000),
            offset: ClockOffset::new(),
            pending: Vec::new(),
            connected: true,
        }
    }

    fn player(id: &str, x: f32, ts: u64) -> PlayerState {
        PlayerState::new(
            ClientId::from(id),
            Pose::new(Vec3::new(x, 0.0, 0.0), Euler::IDENTITY),
            ts,
        )
    }

    #[test]
    fn own_echoes_are_ignored() {
        let mut s = shared();
        s.apply(WireMessage::PeerState { player: player("me", 1.0, 10) }, 10);
        s.apply(
            WireMessage::PlayerShot {
                client_id: ClientId::from("me"),
                origin: Vec3::ZERO,
                direction: Vec3::ZERO,
            },
            10,
        );
        assert!(s.buffer.is_empty());
        assert!(s.pending.is_empty());
    }

    #[test]
    fn join_state_leave_lifecycle() {
        let mut s = shared();
        let other = ClientId::from("other");
        s.apply(WireMessage::PeerJoined { player: player("other", 0.0, 100) }, 100);
        s.apply(WireMessage::PeerState { player: player("other", 1.0, 150) }, 150);
        assert_eq!(s.buffer.read(&other).unwrap().len(), 2);

        s.apply(WireMessage::PeerLeft { client_id: other.clone() }, 200);
        s.apply(WireMessage::PeerLeft { client_id: other.clone() }, 200);
        assert!(!s.buffer.contains(&other));
        assert_eq!(
            s.pending,
            vec![Pending::Joined(other.clone()), Pending::Removed(other)]
        );
    }

    #[test]
    fn state_for_unknown_peer_recreates_it() {
        let mut s = shared();
        s.apply(WireMessage::PeerState { player: player("late", 1.0, 100) }, 100);
        assert_eq!(s.pending, vec![Pending::Joined(ClientId::from("late"))]);
    }

    #[test]
    fn disconnect_discards_everything_once() {
        let mut s = shared();
        s.apply(WireMessage::PeerJoined { player: player("other", 0.0, 100) }, 100);
        s.disconnect();
        s.disconnect();
        assert!(s.buffer.is_empty());
        assert_eq!(s.offset.offset_ms(), None);
        assert_eq!(s.pending, vec![Pending::Disconnected]);
    }

    /// Fails the test if a callback runs while the shared state is locked.
    struct LockCheckSink {
        shared: Arc<Mutex<Shared>>,
        poses: Vec<(ClientId, Pose)>,
        joined: Vec<ClientId>,
        callbacks_under_lock: usize,
    }

    impl LockCheckSink {
        fn check(&mut self) {
            if self.shared.try_lock().is_none() {
                self.callbacks_under_lock += 1;
            }
        }
    }

    impl PoseSink for LockCheckSink {
        fn on_pose(&mut self, id: &ClientId, pose: Pose) {
            self.check();
            self.poses.push((id.clone(), pose));
        }

        fn on_peer_joined(&mut self, id: &ClientId) {
            self.check();
            self.joined.push(id.clone());
        }
    }

    #[test]
    fn sink_callbacks_run_without_the_state_lock() {
        let shared = Arc::new(Mutex::new(shared()));
        {
            let mut s = shared.lock();
            s.apply(WireMessage::PeerJoined { player: player("other", 0.0, 100) }, 100);
            s.apply(WireMessage::PeerState { player: player("other", 10.0, 200) }, 200);
        }

        let mut interp = Interpolator::new(200);
        let mut sink = LockCheckSink {
            shared: Arc::clone(&shared),
            poses: Vec::new(),
            joined: Vec::new(),
            callbacks_under_lock: 0,
        };
        render_frame(&shared, &mut interp, 350, &mut sink);

        assert_eq!(sink.callbacks_under_lock, 0);
        assert_eq!(sink.joined, vec![ClientId::from("other")]);
        assert_eq!(sink.poses.len(), 1);
        assert_eq!(sink.poses[0].1.position, Vec3::new(5.0, 0.0, 0.0));
        assert!(shared.lock().pending.is_empty());
    }

    #[test]
    fn disconnected_frame_reports_once_and_renders_nothing() {
        let shared = Arc::new(Mutex::new(shared()));
        shared
            .lock()
            .apply(WireMessage::PeerJoined { player: player("other", 0.0, 100) }, 100);
        shared.lock().disconnect();

        let mut interp = Interpolator::new(200);
        let mut sink = RecordingSink::default();
        render_frame(&shared, &mut interp, 350, &mut sink);
        render_frame(&shared, &mut interp, 400, &mut sink);

        assert_eq!(sink.disconnects, 1);
        assert!(sink.poses.is_empty());
        assert!(sink.joined.is_empty());
    }

    #[test]
    fn non_finite_poses_are_rejected() {
        let ok = Pose::new(Vec3::new(1.0, 2.0, 3.0), Euler::IDENTITY);
        let bad = Pose::new(Vec3::new(f32::NAN, 0.0, 0.0), Euler::IDENTITY);
        assert!(is_finite_pose(&ok));
        assert!(!is_finite_pose(&bad));
    }
}
