//! Configuration system.
//!
//! Loads relay/client configuration from JSON. Every field has a default so
//! partial files are accepted.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Root configuration shared by relay and client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Relay listen/connect address, e.g. `127.0.0.1:8081`.
    pub relay_addr: String,
    /// Minimum spacing between two local pose publications.
    pub publish_interval_ms: u64,
    /// Lag applied to the render clock before interpolating.
    pub interpolation_delay_ms: u64,
    /// Maximum snapshot age kept in a remote entity's buffer.
    pub retention_ms: u64,
    /// Per-connection outbound queue capacity; a full queue drops new messages.
    pub outbound_queue: usize,
    /// Largest accepted frame payload in bytes.
    pub max_frame_len: usize,
    /// How long a client waits for the relay's `init` after connecting.
    pub connect_timeout_ms: u64,
}

pub const DEFAULT_RELAY_ADDR: &str = "127.0.0.1:8081";

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            relay_addr: DEFAULT_RELAY_ADDR.to_string(),
            publish_interval_ms: 50,
            interpolation_delay_ms: 200,
            retention_ms: 1000,
            outbound_queue: 64,
            max_frame_len: 64 * 1024,
            connect_timeout_ms: 5_000,
        }
    }
}

impl SyncConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Reads and parses a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse config {}", path.display()))
    }
}
