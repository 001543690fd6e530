use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::cancel::CancelToken;
use crate::error::{LedgerError, LedgerResult};

/// Bounded exponential backoff.
///
/// Attempt `n` (1-based) that fails with a retryable error is followed by a
/// wait of `initial_delay * multiplier^(n-1)`; no wait follows the last attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1000),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .saturating_pow(attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. Both failure paths surface as
    /// [`LedgerError::PermanentResolution`]; cancellation surfaces as
    /// [`LedgerError::Cancelled`].
    pub async fn run<T, F, Fut>(&self, target: &str, cancel: &CancelToken, mut op: F) -> LedgerResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = LedgerResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let err = match cancel.run(op()).await {
                Ok(value) => return Ok(value),
                Err(LedgerError::Cancelled) => return Err(LedgerError::Cancelled),
                Err(err) if !err.is_retryable() => {
                    return Err(LedgerError::PermanentResolution {
                        target: target.to_string(),
                        attempts: attempt,
                        reason: err.to_string(),
                    });
                }
                Err(err) => err,
            };

            if attempt >= max_attempts {
                return Err(LedgerError::PermanentResolution {
                    target: target.to_string(),
                    attempts: attempt,
                    reason: err.to_string(),
                });
            }

            let delay = self.delay_after(attempt);
            warn!(
                "Retrying {} after {}ms (attempt {}/{}): {}",
                target,
                delay.as_millis(),
                attempt,
                max_attempts,
                err
            );
            cancel.sleep(delay).await?;
        }
    }
}
