//! Standalone headless client binary.
//!
//! Usage:
//!   cargo run -p posesync_client -- [--config client.json] [--addr 127.0.0.1:8081] [--delay 200] [--interval 50]
//!
//! The client connects to the relay, walks the local player around a circle,
//! fires a shot every couple of seconds, and logs what it sees of everyone
//! else. It exits when the relay goes away.

use std::env;
use std::time::Duration;

use anyhow::Context;
use posesync_client::SyncClient;
use posesync_shared::{
    config::SyncConfig,
    math::{Euler, Pose, Vec3},
    protocol::{ClientId, ShotEvent},
    sink::PoseSink,
};
use tracing::{debug, info};

/// Render frame spacing of the demo loop.
const FRAME: Duration = Duration::from_millis(8);

fn parse_args() -> anyhow::Result<SyncConfig> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => SyncConfig::from_file(&args[i + 1])?,
        _ => SyncConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.relay_addr = args[i + 1].clone();
                i += 2;
            }
            "--delay" if i + 1 < args.len() => {
                cfg.interpolation_delay_ms = args[i + 1].parse().unwrap_or(cfg.interpolation_delay_ms);
                i += 2;
            }
            "--interval" if i + 1 < args.len() => {
                cfg.publish_interval_ms = args[i + 1].parse().unwrap_or(cfg.publish_interval_ms);
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

/// Logs what the renderer would draw.
#[derive(Default)]
struct LogSink {
    frames: u64,
}

impl PoseSink for LogSink {
    fn on_pose(&mut self, id: &ClientId, pose: Pose) {
        if self.frames % 120 == 0 {
            let p = pose.position;
            debug!(client_id = %id, x = p.x, y = p.y, z = p.z, "Remote pose");
        }
    }

    fn on_remote_shot(&mut self, shot: &ShotEvent) {
        info!(client_id = %shot.source, origin = ?shot.origin, direction = ?shot.direction, "Remote shot");
    }

    fn on_peer_joined(&mut self, id: &ClientId) {
        info!(client_id = %id, "Peer joined");
    }

    fn on_peer_removed(&mut self, id: &ClientId) {
        info!(client_id = %id, "Peer removed");
    }

    fn on_disconnected(&mut self) {
        info!("Relay disconnected");
    }
}

/// Local player walks a 5 m circle, facing along the path.
fn circle_pose(t: f32) -> Pose {
    let angle = t * 0.5;
    Pose::new(
        Vec3::new(5.0 * angle.cos(), 1.6, 5.0 * angle.sin()),
        Euler::new(0.0, -angle, 0.0),
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args().context("load config")?;
    info!(relay = %cfg.relay_addr, delay_ms = cfg.interpolation_delay_ms, "Starting client");

    let mut client = SyncClient::connect(&cfg).await.context("connect")?;
    info!(client_id = %client.client_id, "Connected to relay");

    let mut sink = LogSink::default();
    let start = tokio::time::Instant::now();
    let mut next_shot = Duration::from_secs(2);
    let mut ticker = tokio::time::interval(FRAME);

    loop {
        ticker.tick().await;
        let elapsed = start.elapsed();
        let pose = circle_pose(elapsed.as_secs_f32());

        client.publish_local_pose(pose);
        if elapsed >= next_shot {
            let (s, c) = (-elapsed.as_secs_f32() * 0.5).sin_cos();
            client.send_shot(pose.position, Vec3::new(c, 0.0, s));
            next_shot += Duration::from_secs(2);
        }

        client.render_tick(&mut sink);
        sink.frames += 1;

        if !client.is_connected() {
            break;
        }
    }

    // Flush the disconnect notification.
    client.render_tick(&mut sink);
    Ok(())
}
