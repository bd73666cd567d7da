//! Exponential backoff for transient store conflicts.

use super::StoreError;
use std::time::Duration;

/// Bounded exponential backoff.
///
/// The delay after failed attempt `n` is `base_delay * 2^(n-1)`, capped at
/// `max_delay`. A rate-limit hint from the store raises the delay, never
/// lowers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(500), Duration::from_secs(30))
    }
}

impl RetryPolicy {
    /// Create a policy. `max_attempts` counts the first attempt and is at least 1.
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: if max_attempts == 0 { 1 } else { max_attempts },
            base_delay,
            max_delay,
        }
    }

    /// Attempts per operation, the first included.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the first retry.
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Upper bound for a backoff delay.
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Backoff after failed attempt `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.max_delay)
    }

    /// Whether `error` on attempt `attempt` (1-based) earns another attempt.
    #[must_use]
    pub const fn should_retry(&self, error: &StoreError, attempt: u32) -> bool {
        error.is_transient() && attempt < self.max_attempts
    }

    /// Delay to wait after `error` ended attempt `attempt`.
    #[must_use]
    pub fn delay_after(&self, error: &StoreError, attempt: u32) -> Duration {
        let backoff = self.delay_for(attempt);
        error.retry_after().map_or(backoff, |hint| hint.max(backoff))
    }
}
