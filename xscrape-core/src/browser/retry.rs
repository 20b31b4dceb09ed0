use std::time::Duration;

use crate::config::RetrySection;

/// Exponential backoff: `base * 2^attempt`, capped at `max_delay`.
/// Validated configs keep every delay that can actually be used under the
/// cap, so consecutive retries always wait longer.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(config: &RetrySection) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            base_delay: Duration::from_millis(config.retry_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms.max(config.retry_delay_ms)),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether another attempt follows the zero-based `attempt` that just failed.
    pub fn can_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Longest backoff a run with these settings can wait, in milliseconds, or
/// `None` when it does not fit in a `u64`.
pub(crate) fn longest_backoff_ms(config: &RetrySection) -> Option<u64> {
    let last_retry = config.max_retries.saturating_sub(2);
    2u64.checked_pow(last_retry)
        .and_then(|factor| config.retry_delay_ms.checked_mul(factor))
}
