//! Pause between poll cycles
//!
//! The regular interval doubles after every consecutive transient failure, up
//! to a cap, and resets once a cycle succeeds.

use std::time::Duration;

/// Exponential delay between poll cycles after consecutive transient failures
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    /// Delay after `failures` consecutive failed cycles; `base` when there
    /// were none
    pub fn delay(&self, failures: u32) -> Duration {
        let base_ms = self.base.as_millis().min(u128::from(u64::MAX)) as u64;
        let max_ms = self.max.as_millis().min(u128::from(u64::MAX)) as u64;
        let shift = failures.min(16);
        Duration::from_millis(base_ms.saturating_mul(1u64 << shift).min(max_ms))
    }
}
