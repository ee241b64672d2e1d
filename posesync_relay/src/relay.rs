//! Relay implementation.
//!
//! The relay accepts client connections, keeps the latest pose per
//! connection, and fans every update out to all other connections. It does
//! no simulation and no validation of movement.
//!
//! Concurrency model:
//! - One reader task and one writer task per connection.
//! - Registry mutation and the matching broadcast happen under one lock, so
//!   no partially applied record is ever sent.
//! - Broadcast only enqueues (`try_send`); a slow or dead connection never
//!   stalls the others.
//! - Delivery is at-most-once. Lost updates are superseded by the next one.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
};

use anyhow::Context;
use bytes::Bytes;
use parking_lot::Mutex;
use posesync_shared::{
    clock::{SharedClock, SystemClock},
    config::SyncConfig,
    error::SyncError,
    math::Pose,
    net::{self, Listener},
    protocol::{self, ClientId, WireMessage},
};
use tokio::{net::TcpStream, sync::mpsc};
use tracing::{debug, info, warn};

use crate::registry::{ConnectionRegistry, Delivery};

/// Shared relay state: the registry plus the relay's clock.
pub struct RelayState {
    registry: Mutex<ConnectionRegistry>,
    clock: SharedClock,
    outbound_queue: usize,
}

impl RelayState {
    pub fn new(clock: SharedClock, outbound_queue: usize) -> Self {
        Self {
            registry: Mutex::new(ConnectionRegistry::new()),
            clock,
            outbound_queue: outbound_queue.max(1),
        }
    }

    /// Registers a new connection, queues its `init`, and announces it.
    ///
    /// Returns the assigned id and the receiver its writer drains.
    pub fn connect(&self) -> (ClientId, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(self.outbound_queue);
        let mut registry = self.registry.lock();
        let id = registry.register(tx, self.clock.now_ms());

        let init = WireMessage::Init {
            client_id: id.clone(),
            players: registry.others(&id),
        };
        if let Some(payload) = encode_logged(&init) {
            if registry.send_to(&id, &payload) != Delivery::Queued {
                warn!(client_id = %id, "Could not queue init");
            }
        }

        if let Some(record) = registry.get(&id) {
            let joined = WireMessage::PeerJoined {
                player: record.player_state(),
            };
            if let Some(payload) = encode_logged(&joined) {
                registry.broadcast(&payload, Some(&id));
            }
        }
        (id, rx)
    }

    /// Applies one inbound client message.
    pub fn on_message(&self, from: &ClientId, msg: WireMessage) {
        match msg {
            WireMessage::StateUpdate { position, rotation } => {
                let mut registry = self.registry.lock();
                let now = self.clock.now_ms();
                let Some(player) = registry.update_pose(from, Pose::new(position, rotation), now)
                else {
                    return;
                };
                if let Some(payload) = encode_logged(&WireMessage::PeerState { player }) {
                    registry.broadcast(&payload, Some(from));
                }
            }
            WireMessage::Shoot { origin, direction } => {
                let shot = WireMessage::PlayerShot {
                    client_id: from.clone(),
                    origin,
                    direction,
                };
                let registry = self.registry.lock();
                if registry.get(from).is_none() {
                    return;
                }
                if let Some(payload) = encode_logged(&shot) {
                    registry.broadcast(&payload, Some(from));
                }
            }
            other => {
                debug!(client_id = %from, kind = other.kind(), "Ignoring relay-bound message of server kind");
            }
        }
    }

    /// Drops the connection's record and announces its departure.
    pub fn disconnect(&self, id: &ClientId) {
        let mut registry = self.registry.lock();
        if registry.remove(id).is_none() {
            return;
        }
        let left = WireMessage::PeerLeft {
            client_id: id.clone(),
        };
        if let Some(payload) = encode_logged(&left) {
            registry.broadcast(&payload, None);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Human-readable registry report.
    pub fn status_lines(&self) -> Vec<String> {
        let registry = self.registry.lock();
        let mut out = vec![format!("Connections: {}", registry.len())];
        for record in registry.records() {
            let p = record.pose.position;
            let r = record.pose.rotation;
            out.push(format!(
                "  {}: pos=({:.2}, {:.2}, {:.2}) rot=({:.2}, {:.2}, {:.2}) ts={} open={}",
                record.id,
                p.x,
                p.y,
                p.z,
                r.x,
                r.y,
                r.z,
                record.timestamp,
                record.is_open()
            ));
        }
        out
    }
}

fn encode_logged(msg: &WireMessage) -> Option<Bytes> {
    match protocol::encode(msg) {
        Ok(payload) => Some(payload),
        Err(e) => {
            warn!(kind = msg.kind(), error = %e, "Failed to encode message");
            None
        }
    }
}

/// Relay server: listener plus shared state.
pub struct Relay {
    pub cfg: SyncConfig,
    listener: Listener,
    state: Arc<RelayState>,
}

impl Relay {
    /// Binds the listener with the process wall clock.
    pub async fn bind(cfg: SyncConfig) -> anyhow::Result<Self> {
        Self::bind_with_clock(cfg, SystemClock::shared()).await
    }

    pub async fn bind_with_clock(cfg: SyncConfig, clock: SharedClock) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.relay_addr.parse().context("parse relay_addr")?;
        let listener = Listener::bind(addr).await?;
        let state = Arc::new(RelayState::new(clock, cfg.outbound_queue));
        Ok(Self {
            cfg,
            listener,
            state,
        })
    }

    /// Returns the local address (after binding).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> Arc<RelayState> {
        Arc::clone(&self.state)
    }

    /// Accepts exactly one connection and spawns its handler.
    pub async fn accept_one(&self) -> anyhow::Result<SocketAddr> {
        let (stream, peer) = self.listener.accept().await?;
        tokio::spawn(handle_connection(
            Arc::clone(&self.state),
            stream,
            peer,
            self.cfg.max_frame_len,
        ));
        Ok(peer)
    }

    /// Accept loop. Runs until the task is dropped.
    pub async fn serve(self) -> anyhow::Result<()> {
        loop {
            if let Err(e) = self.accept_one().await {
                warn!(error = %e, "Accept failed");
            }
        }
    }
}

/// Drives one connection from accept to close.
async fn handle_connection(
    state: Arc<RelayState>,
    stream: TcpStream,
    peer: SocketAddr,
    max_frame_len: usize,
) {
    let (mut reader, mut writer) = net::split(stream, max_frame_len);
    let (id, mut outbox) = state.connect();
    info!(client_id = %id, %peer, "Client connected");

    let writer_id = id.clone();
    let writer_task = tokio::spawn(async move {
        while let Some(payload) = outbox.recv().await {
            if let Err(e) = writer.send_frame(&payload).await {
                debug!(client_id = %writer_id, error = %e, "Writer stopped");
                break;
            }
        }
    });

    loop {
        match reader.recv().await {
            Ok(msg) => state.on_message(&id, msg),
            Err(SyncError::UnsupportedMessageKind(kind)) => {
                debug!(client_id = %id, %kind, "Skipping unsupported message kind");
            }
            Err(e) if e.is_terminal() => {
                debug!(client_id = %id, error = %e, "Read loop ended");
                break;
            }
            Err(e) => {
                warn!(client_id = %id, error = %e, "Dropping malformed message");
            }
        }
    }

    state.disconnect(&id);
    writer_task.abort();
    info!(client_id = %id, %peer, "Client disconnected");
}

/// Helper for tests: bind to an ephemeral loopback port.
pub async fn bind_ephemeral(clock: SharedClock) -> anyhow::Result<(Relay, SyncConfig)> {
    let cfg = SyncConfig {
        relay_addr: format!("{}:{}", IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        ..Default::default()
    };
    let mut relay = Relay::bind_with_clock(cfg, clock).await?;
    relay.cfg.relay_addr = relay.local_addr()?.to_string();
    let cfg = relay.cfg.clone();
    Ok((relay, cfg))
}
