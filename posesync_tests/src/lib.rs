//! Test harness shared by the integration tests.
//!
//! `RawPeer` speaks the wire protocol directly so tests can observe exactly
//! what the relay sends; `pump_until` drives a `SyncClient` render loop.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use posesync_client::SyncClient;
use posesync_relay::relay::{bind_ephemeral, RelayState};
use posesync_shared::{
    clock::SystemClock,
    config::SyncConfig,
    net::{self, TcpFrameReader, TcpFrameWriter},
    protocol::{ClientId, PlayerState, WireMessage},
    sink::RecordingSink,
};

/// Installs a test-friendly subscriber once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Spawns a relay on an ephemeral port. Returns its config and state.
pub async fn spawn_relay() -> anyhow::Result<(SyncConfig, Arc<RelayState>)> {
    let (relay, cfg) = bind_ephemeral(SystemClock::shared()).await?;
    let state = relay.state();
    tokio::spawn(relay.serve());
    Ok((cfg, state))
}

/// A protocol-level peer without any client-side smoothing.
pub struct RawPeer {
    pub id: ClientId,
    pub players: Vec<PlayerState>,
    reader: TcpFrameReader,
    writer: TcpFrameWriter,
}

impl RawPeer {
    pub async fn connect(cfg: &SyncConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.relay_addr.parse().context("parse relay_addr")?;
        let (mut reader, writer) = net::connect(addr, cfg.max_frame_len).await?;
        match reader.recv().await? {
            WireMessage::Init { client_id, players } => Ok(Self {
                id: client_id,
                players,
                reader,
                writer,
            }),
            other => anyhow::bail!("expected init, got {}", other.kind()),
        }
    }

    pub async fn send(&mut self, msg: &WireMessage) -> anyhow::Result<()> {
        Ok(self.writer.send(msg).await?)
    }

    pub async fn send_raw(&mut self, payload: &[u8]) -> anyhow::Result<()> {
        Ok(self.writer.send_frame(payload).await?)
    }

    /// Next message, or `None` on timeout.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> anyhow::Result<Option<WireMessage>> {
        match tokio::time::timeout(timeout, self.reader.recv()).await {
            Ok(res) => Ok(Some(res?)),
            Err(_) => Ok(None),
        }
    }

    /// Reads until `pred` matches or `timeout` elapses.
    pub async fn recv_until(
        &mut self,
        timeout: Duration,
        mut pred: impl FnMut(&WireMessage) -> bool,
    ) -> anyhow::Result<WireMessage> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.recv_timeout(left).await? {
                Some(msg) if pred(&msg) => return Ok(msg),
                Some(_) => {}
                None => anyhow::bail!("timed out waiting for message"),
            }
        }
    }

    /// Collects everything that arrives within `window`.
    pub async fn drain(&mut self, window: Duration) -> anyhow::Result<Vec<WireMessage>> {
        let deadline = tokio::time::Instant::now() + window;
        let mut out = Vec::new();
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            if left.is_zero() {
                return Ok(out);
            }
            match self.recv_timeout(left).await? {
                Some(msg) => out.push(msg),
                None => return Ok(out),
            }
        }
    }
}

/// Runs render ticks against `sink` until `done` holds or `timeout` elapses.
pub async fn pump_until(
    client: &mut SyncClient,
    sink: &mut RecordingSink,
    timeout: Duration,
    mut done: impl FnMut(&SyncClient, &RecordingSink) -> bool,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        client.render_tick(&mut *sink);
        if done(client, sink) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}
