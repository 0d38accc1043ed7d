//! Exponential-backoff retry loop for gateway requests.

use std::thread;
use std::time::Duration;

use crate::{CancelToken, GatewayError};

/// Backoff parameters for retried gateway requests.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry; doubles on each subsequent attempt.
    pub base: Duration,
    /// Upper bound on the per-attempt delay.
    pub cap: Duration,
    /// Total number of attempts, including the first.
    pub attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            attempts: 10,
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.cap)
    }
}

/// Which failures a retried operation may recover from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum RetryOn {
    /// Transport errors plus the retryable HTTP statuses (5xx, 408, 429).
    RetryableStatus,
    /// Transport errors only; any HTTP status is final. Used for commit.
    TransportOnly,
}

pub(crate) fn with_retries<T>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    retry_on: RetryOn,
    context: &str,
    mut operation: impl FnMut() -> Result<T, GatewayError>,
) -> Result<T, GatewayError> {
    let mut attempt = 1;
    loop {
        if cancel.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }
        match operation() {
            Ok(value) => return Ok(value),
            Err(error) => {
                let recoverable = match retry_on {
                    RetryOn::RetryableStatus => error.is_retryable(),
                    RetryOn::TransportOnly => matches!(error, GatewayError::Transport { .. }),
                };
                if !recoverable || attempt >= policy.attempts {
                    return Err(error);
                }
                let delay = policy.delay(attempt);
                tracing::debug!(
                    "{context} failed on attempt {attempt}: {error}; retrying in {delay:?}"
                );
                thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}
