//! # Retry Driver
//!
//! Policy-driven exponential backoff with random jitter around any fallible
//! async operation. Errors are classified by kind: only
//! [`EnrichError::is_retryable`] errors are retried, everything else
//! re-raises immediately.
//!
//! Backoff for attempt `k` (1-based) sleeps
//! `min(base · 2^(k-1), max) + uniform(0, 0.1 · delay)`. Sleeps run on the
//! tokio timer, so the ambient trace context survives them and cancellation
//! of the enclosing scope aborts the sleep instead of retrying.

use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

use crate::error::{EnrichError, EnrichResult};

/// HTTP statuses converted to a retryable error before classification
pub const RETRYABLE_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Check whether an HTTP status belongs to the retryable subset
pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUS_CODES.contains(&status)
}

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first (must be >= 1)
    pub max_attempts: u32,
    /// First backoff delay
    pub base_delay: Duration,
    /// Backoff ceiling (base_delay <= max_delay)
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Policy for outbound provider calls
    pub fn provider() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(20),
        }
    }

    /// Policy for callback delivery to the primary application
    pub fn callback() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }

    /// Exponential delay for a 1-based attempt number, without jitter
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let scaled = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exp));
        scaled.min(self.max_delay)
    }

    /// Delay plus uniform jitter in `[0, 0.1 · delay)`
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        let jitter = delay.mul_f64(0.1 * fastrand::f64());
        delay + jitter
    }
}

/// Retry an async operation with exponential backoff and jitter.
///
/// `operation_name` is used for logging only. The operation closure is
/// invoked once per attempt; a non-retryable error or exhausted attempts
/// return the last error to the caller.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut op: F,
) -> EnrichResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EnrichResult<T>>,
{
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => {
                warn!(
                    operation = operation_name,
                    error = %e,
                    kind = e.kind(),
                    "Non-retryable error, not retrying"
                );
                return Err(e);
            }
            Err(e) if attempt >= policy.max_attempts => {
                error!(
                    operation = operation_name,
                    attempts = attempt,
                    error = %e,
                    "All retry attempts failed"
                );
                return Err(e);
            }
            Err(e) => {
                let delay = policy.jittered_delay(attempt);
                warn!(
                    operation = operation_name,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after backoff"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
