//! Wire protocol and message codec.
//!
//! Messages are JSON objects carrying a `type` discriminator. Decoding is
//! forward-compatible:
//! - unknown fields are ignored,
//! - an unknown `type` yields [`SyncError::UnsupportedMessageKind`] so the
//!   caller can skip it instead of dropping the connection.
//!
//! Delivery is at-most-once. Nothing here acknowledges or retries.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{SyncError, SyncResult},
    math::{Euler, Pose, Vec3},
};

/// Opaque connection identifier assigned by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub String);

impl ClientId {
    /// Allocates a fresh identifier. Random v4 UUIDs are never reused.
    pub fn new_unique() -> Self {
        ClientId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        ClientId(s.to_string())
    }
}

/// Last known state of one player as published by the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub id: ClientId,
    pub position: Vec3,
    pub rotation: Euler,
    /// Relay clock, milliseconds.
    pub timestamp: u64,
}

impl PlayerState {
    pub fn new(id: ClientId, pose: Pose, timestamp: u64) -> Self {
        Self {
            id,
            position: pose.position,
            rotation: pose.rotation,
            timestamp,
        }
    }

    pub fn pose(&self) -> Pose {
        Pose::new(self.position, self.rotation)
    }
}

/// A shot fired by a remote player. Delivered once, never buffered.
#[derive(Debug, Clone, PartialEq)]
pub struct ShotEvent {
    pub source: ClientId,
    pub origin: Vec3,
    pub direction: Vec3,
}

/// Every message kind on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessage {
    /// Relay -> new client, once: own id plus everyone already connected.
    #[serde(rename = "init", rename_all = "camelCase")]
    Init {
        client_id: ClientId,
        players: Vec<PlayerState>,
    },
    /// Relay -> others when a connection opens.
    #[serde(rename = "peer-joined", alias = "playerJoined")]
    PeerJoined { player: PlayerState },
    /// Relay -> others when a connection closes.
    #[serde(rename = "peer-left", alias = "playerLeft", rename_all = "camelCase")]
    PeerLeft { client_id: ClientId },
    /// Client -> relay, rate limited.
    #[serde(rename = "state-update", alias = "updateState")]
    StateUpdate { position: Vec3, rotation: Euler },
    /// Relay -> others, mirrors a state-update with a relay timestamp.
    #[serde(rename = "peer-state", alias = "playerState")]
    PeerState { player: PlayerState },
    /// Client -> relay.
    #[serde(rename = "shoot")]
    Shoot { origin: Vec3, direction: Vec3 },
    /// Relay -> others.
    #[serde(rename = "playerShot", rename_all = "camelCase")]
    PlayerShot {
        client_id: ClientId,
        origin: Vec3,
        direction: Vec3,
    },
}

/// Kind tags accepted by [`decode`], canonical names and legacy aliases.
const KNOWN_KINDS: &[&str] = &[
    "init",
    "peer-joined",
    "playerJoined",
    "peer-left",
    "playerLeft",
    "state-update",
    "updateState",
    "peer-state",
    "playerState",
    "shoot",
    "playerShot",
];

impl WireMessage {
    /// Canonical kind tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Init { .. } => "init",
            WireMessage::PeerJoined { .. } => "peer-joined",
            WireMessage::PeerLeft { .. } => "peer-left",
            WireMessage::StateUpdate { .. } => "state-update",
            WireMessage::PeerState { .. } => "peer-state",
            WireMessage::Shoot { .. } => "shoot",
            WireMessage::PlayerShot { .. } => "playerShot",
        }
    }
}

/// Serializes a message into a JSON payload.
pub fn encode(msg: &WireMessage) -> SyncResult<Bytes> {
    serde_json::to_vec(msg)
        .map(Bytes::from)
        .map_err(|e| SyncError::MalformedMessage(format!("encode {}: {e}", msg.kind())))
}

/// Parses a JSON payload into a message.
pub fn decode(payload: &[u8]) -> SyncResult<WireMessage> {
    let value: Value =
        serde_json::from_slice(payload).map_err(|e| SyncError::MalformedMessage(e.to_string()))?;
    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        return Err(SyncError::MalformedMessage(
            "missing string `type` tag".to_string(),
        ));
    };
    if !KNOWN_KINDS.contains(&kind) {
        return Err(SyncError::UnsupportedMessageKind(kind.to_string()));
    }
    serde_json::from_value(value).map_err(|e| SyncError::MalformedMessage(e.to_string()))
}
