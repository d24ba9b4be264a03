//! Declarative retry policy for tile-server requests.
//!
//! Call sites describe *how much* to retry and *which* failures qualify;
//! [`RetryPolicy::run`] owns the loop, the backoff and cancellation.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::IoError;

/// Default backoff before the first retry.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Which failures are worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOn {
    /// Connection resets and timeouts only
    ConnectionErrors,

    /// Connection-level errors plus HTTP 429 and 5xx
    TransientErrors,
}

impl RetryOn {
    fn matches(&self, error: &IoError) -> bool {
        match self {
            RetryOn::ConnectionErrors => error.is_connection_level(),
            RetryOn::TransientErrors => error.is_transient(),
        }
    }
}

/// Maximum attempts, exponential backoff and the set of retryable errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one (at least 1)
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles after each retry
    pub base_backoff: Duration,

    pub retry_on: RetryOn,
}

impl RetryPolicy {
    /// One retry on connection-level errors, never on 404.
    pub fn probe() -> Self {
        Self {
            max_attempts: 2,
            base_backoff: DEFAULT_RETRY_BACKOFF,
            retry_on: RetryOn::ConnectionErrors,
        }
    }

    /// `max_attempts` tries on transient errors.
    pub fn tiles(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_backoff: DEFAULT_RETRY_BACKOFF,
            retry_on: RetryOn::TransientErrors,
        }
    }

    pub fn with_backoff(mut self, base_backoff: Duration) -> Self {
        self.base_backoff = base_backoff;
        self
    }

    /// Delay before attempt `attempt + 1` (attempts are 1-based).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(1 << shift)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or attempts run out. Returns [`IoError::Cancelled`] as soon as
    /// `cancel` fires, including while waiting on an in-flight attempt.
    pub async fn run<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, IoError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, IoError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(IoError::Cancelled),
                result = operation(attempt) => result,
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_attempts && self.retry_on.matches(&e) => {
                    let backoff = self.backoff_after(attempt);
                    debug!(
                        attempt = attempt,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "Retrying request"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(IoError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    attempt += 1;
                }
                Err(e) => {
                    trace!(attempt = attempt, error = %e, "Giving up on request");
                    return Err(e);
                }
            }
        }
    }
}
