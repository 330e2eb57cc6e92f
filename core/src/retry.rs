//! Fixed-delay retry for requests that never received a response.
//!
//! Only transport failures are retried. A request that got any HTTP response,
//! error statuses included, is settled on the spot. The budget counts
//! redispatches, so a request is sent at most `1 + budget` times.

use std::time::Duration;

use crate::error::TransportFailure;

pub const DEFAULT_RETRY_COUNT: u32 = 2;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Remaining retry budget for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    remaining: u32,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_COUNT, DEFAULT_RETRY_DELAY)
    }
}

impl RetryPolicy {
    pub fn new(budget: u32, delay: Duration) -> Self {
        Self {
            remaining: budget,
            delay,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Consume one unit of budget for `failure`.
    ///
    /// Returns the delay to wait before redispatching, or `None` once the
    /// budget is spent or the failure is not retryable. A non-retryable
    /// failure leaves the budget untouched.
    pub fn next_delay(&mut self, failure: &TransportFailure) -> Option<Duration> {
        if self.remaining == 0 || !failure.kind.is_retryable() {
            return None;
        }
        self.remaining -= 1;
        tracing::debug!(kind = ?failure.kind, remaining = self.remaining, "retry budget consumed");
        Some(self.delay)
    }
}
