//! `posesync_shared`
//!
//! Libraries used by both the relay and the client.
//!
//! Design goals:
//! - Keep the wire format explicit and forward-compatible.
//! - One clock source per process; only relative time deltas cross process boundaries.
//! - Clear separation of concerns (math, protocol, net, clock, config, sink).
//! - No `unsafe`.

pub mod clock;
pub mod config;
pub mod error;
pub mod math;
pub mod net;
pub mod protocol;
pub mod sink;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::clock::*;
    pub use crate::config::*;
    pub use crate::error::*;
    pub use crate::math::*;
    pub use crate::protocol::*;
}
