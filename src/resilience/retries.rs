//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether an attempt's result consumes retry budget
//! - Bound the number of attempts per request
//! - Space attempts with exponential backoff + jitter
//!
//! # Design Decisions
//! - Transport errors, timeouts and 5xx responses are retryable
//! - 4xx responses are final: the upstream answered
//! - Jittered backoff prevents thundering herd

use std::time::Duration;

use axum::http::StatusCode;
use rand::Rng;

use crate::config::RetryConfig;

/// Attempt budget and spacing for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first.
    pub retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(retries: u32, config: &RetryConfig) -> Self {
        Self {
            retries,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Delay before attempt `attempt + 1`, given `attempt` attempts so far:
    /// `base * 2^(attempt-1)` capped at `max_delay_ms`, plus up to 10% jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.base_delay_ms == 0 {
            return Duration::ZERO;
        }
        let factor = 1u64 << attempt.saturating_sub(1).min(63);
        let capped = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        let jitter = match capped / 10 {
            0 => 0,
            range => rand::thread_rng().gen_range(0..range),
        };
        Duration::from_millis(capped + jitter)
    }
}

/// Whether an upstream status should be retried (and counted as a failure).
pub fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
}
