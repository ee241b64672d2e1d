//! Outgoing rate limiting.
//!
//! Render loops may run far faster (or slower) than the wire should carry.
//! The limiter bounds local pose publication to one per interval; suppressed
//! attempts are simply skipped since the next frame carries a newer pose.

/// Minimum-interval gate for outbound publishes.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    min_interval_ms: u64,
    last_publish_ms: Option<u64>,
}

impl RateLimiter {
    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            min_interval_ms,
            last_publish_ms: None,
        }
    }

    /// Whether a publish at `now_ms` is allowed.
    pub fn permits(&self, now_ms: u64) -> bool {
        match self.last_publish_ms {
            Some(last) => now_ms.saturating_sub(last) >= self.min_interval_ms,
            None => true,
        }
    }

    /// Records a successful publish.
    pub fn mark_published(&mut self, now_ms: u64) {
        self.last_publish_ms = Some(now_ms);
    }

    /// Checks and marks in one step.
    pub fn try_acquire(&mut self, now_ms: u64) -> bool {
        if !self.permits(now_ms) {
            return false;
        }
        self.mark_published(now_ms);
        true
    }

    pub fn reset(&mut self) {
        self.last_publish_ms = None;
    }
}
