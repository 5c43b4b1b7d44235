//! Bounded retry with per-attempt timeout and linear backoff.
//!
//! Every pre-stream outbound call (embedding, vector query, opening the
//! completion stream) runs through [`RetryPolicy::execute`]. Attempt `i`
//! that fails is followed by a sleep of `i * backoff_unit`.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, ProviderError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Upper bound for a single attempt.
    pub attempt_timeout: Duration,
    /// Linear backoff step.
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(30),
            backoff_unit: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, attempt_timeout: Duration, backoff_unit: Duration) -> Self {
        Self {
            max_attempts,
            attempt_timeout,
            backoff_unit,
        }
    }

    /// Sleep inserted after the given failed attempt (1-indexed).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff_unit.saturating_mul(attempt)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `op` receives a child of `cancel` that is cancelled when its attempt
    /// times out. Cancelling `cancel` aborts the in-flight attempt or backoff
    /// and returns [`Error::Cancelled`].
    pub async fn execute<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        operation: &str,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = std::result::Result<T, ProviderError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let attempt_token = cancel.child_token();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                res = tokio::time::timeout(self.attempt_timeout, op(attempt_token.clone())) => res,
            };
            attempt_token.cancel();

            let err = match outcome {
                Ok(Ok(value)) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Ok(Err(e)) => e,
                Err(_) => ProviderError::Timeout(format!(
                    "{operation} attempt {attempt} exceeded {}ms",
                    self.attempt_timeout.as_millis()
                )),
            };

            if !err.is_retryable() {
                warn!(operation, attempt, error = %err, "Permanent failure, not retrying");
                return Err(Error::Provider(err));
            }

            if attempt >= max_attempts {
                warn!(operation, attempts = attempt, error = %err, "Retries exhausted");
                return Err(Error::RetryExhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = self.backoff_for(attempt);
            warn!(
                operation,
                attempt,
                max_attempts,
                backoff_ms = delay.as_millis() as u64,
                error = %err,
                "Attempt failed, backing off"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
