//! Clock offset estimation.
//!
//! Origin timestamps come from the relay's clock. To compare them against
//! "now" the client translates its local clock into the relay's base using
//! `local_receipt - origin` samples. The smallest sample is the one with the
//! least transit delay and wins.

/// Local-to-relay clock translation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClockOffset {
    offset_ms: Option<i64>,
}

impl ClockOffset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one sample.
    pub fn observe(&mut self, local_receipt_ms: u64, origin_ms: u64) {
        let sample = local_receipt_ms as i64 - origin_ms as i64;
        self.offset_ms = Some(match self.offset_ms {
            Some(current) => current.min(sample),
            None => sample,
        });
    }

    pub fn offset_ms(&self) -> Option<i64> {
        self.offset_ms
    }

    /// Converts a local timestamp into the relay's clock base. Identity until
    /// the first sample arrives.
    pub fn to_remote(&self, local_ms: u64) -> u64 {
        match self.offset_ms {
            Some(offset) => (local_ms as i64 - offset).max(0) as u64,
            None => local_ms,
        }
    }

    pub fn reset(&mut self) {
        self.offset_ms = None;
    }
}
