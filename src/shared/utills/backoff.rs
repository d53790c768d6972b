//! Reconnect backoff
//!
//! Exponential backoff with a hard cap, used by station connections between
//! reconnect attempts. The wait observes a cancellation token so an explicit
//! disconnect during backoff aborts the pending attempt.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Exponential backoff policy: attempt `k` (1-based) waits
/// `min(base * 2^(k-1), max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectBackoff {
    /// Delay before the first reconnect attempt.
    pub base: Duration,
    /// Upper bound for any single delay.
    pub max: Duration,
}

impl ReconnectBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay to wait before reconnect attempt `attempt` (1-based).
    ///
    /// Attempt `0` is treated as attempt `1`. Overflow saturates at `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(60),
        }
    }
}

/// Sleep for `delay` unless `cancel` fires first.
///
/// Returns `true` when the full delay elapsed, `false` when cancelled.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
