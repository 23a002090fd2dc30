//! Retry policy for server requests.

use std::time::Duration;

/// Longest wait between two attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(120);

/// Exponential backoff: the n-th retry waits `backoff_factor * 2^(n-1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum retries after the first attempt; `None` retries forever.
    max_retries: Option<u32>,
    backoff_factor: Duration,
    max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_retries(crate::config::DEFAULT_RETRIES)
    }
}

impl RetryPolicy {
    /// Build from the configured retry count, where `-1` means unlimited.
    pub fn from_retries(retries: i32) -> Self {
        Self {
            max_retries: u32::try_from(retries).ok(),
            backoff_factor: Duration::from_secs(1),
            max_backoff: MAX_BACKOFF,
        }
    }

    pub fn with_backoff_factor(mut self, factor: Duration) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Whether another attempt is allowed after `retries_done` retries.
    pub fn should_retry(&self, retries_done: u32) -> bool {
        self.max_retries.is_none_or(|max| retries_done < max)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let exp = retry.saturating_sub(1).min(31);
        self.backoff_factor
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff)
    }
}
