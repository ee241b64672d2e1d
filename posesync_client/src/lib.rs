//! `posesync_client`
//!
//! Client-side systems:
//! - Connection to the relay (background receive, queued send)
//! - Outgoing rate limiting of local pose publication
//! - Remote state buffer per remote entity
//! - Clock offset estimation into the relay's time base
//! - Delayed interpolation pushed to a rendering sink

pub mod buffer;
pub mod client;
pub mod interp;
pub mod limiter;
pub mod offset;

pub use client::SyncClient;
