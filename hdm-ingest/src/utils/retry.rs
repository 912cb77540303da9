//! Retry policy for transient provider failures
//!
//! One policy object shared by every call site that retries (file
//! download, composite-document append). Callers supply the predicate
//! that decides which errors are worth another attempt.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Why a retried operation ultimately failed
#[derive(Debug, Error)]
pub enum RetryError<E: std::fmt::Display> {
    /// Non-retryable error, returned on the attempt that produced it
    #[error("{0}")]
    Fatal(E),

    /// Retryable error on every attempt up to the ceiling
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    /// Cancellation fired while waiting between attempts
    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

/// Exponential backoff with random jitter and a hard attempt ceiling
///
/// **Algorithm:**
/// 1. Call the operation
/// 2. Success → return it
/// 3. Error the predicate rejects → `Fatal` immediately
/// 4. Retryable error on the last allowed attempt → `Exhausted`
/// 5. Otherwise sleep `min(base * 2^(attempt-1), max) + jitter` and go to 1
///
/// The sleep races the cancellation token; cancellation ends the loop
/// with `Cancelled` without another call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total calls allowed, including the first (minimum 1)
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Jitter as a fraction of the computed delay (0.0 disables)
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter_ratio: 0.5,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            ..Default::default()
        }
    }

    /// Delay before the retry that follows `attempt` (1-based), jitter excluded
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let factor = 1u32 << exponent;
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter_ratio <= 0.0 || delay.is_zero() {
            return delay;
        }
        let max_extra = delay.as_secs_f64() * self.jitter_ratio;
        let extra = rand::thread_rng().gen_range(0.0..=max_extra);
        delay + Duration::from_secs_f64(extra)
    }

    /// Run `operation` under this policy
    pub async fn run<F, Fut, T, E, P>(
        &self,
        operation_name: &str,
        cancel: &CancellationToken,
        is_retryable: P,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled { attempts: attempt });
            }

            attempt += 1;
            if attempt > 1 {
                tracing::debug!(operation = operation_name, attempt, "Retrying operation");
            }

            let err = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(
                            operation = operation_name,
                            attempt,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !is_retryable(&err) {
                return Err(RetryError::Fatal(err));
            }

            if attempt >= max_attempts {
                tracing::error!(
                    operation = operation_name,
                    attempt,
                    error = %err,
                    "Operation failed: retry ceiling reached"
                );
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = self.jittered(self.backoff_for(attempt));
            tracing::warn!(
                operation = operation_name,
                attempt,
                backoff_ms = delay.as_millis() as u64,
                error = %err,
                "Transient failure, will retry after backoff"
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(RetryError::Cancelled { attempts: attempt });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
