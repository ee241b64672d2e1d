//! `posesync_relay`
//!
//! Relay-side systems:
//! - Connection registry (latest pose per connection)
//! - Best-effort broadcast fan-out with per-connection isolation
//! - Join/leave notifications
//!
//! The relay is the timestamp authority for everything it forwards.

pub mod registry;
pub mod relay;

pub use relay::Relay;
