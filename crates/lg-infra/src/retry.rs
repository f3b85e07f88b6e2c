//! Bounded retry with exponential backoff.
//!
//! Collaborator calls (storage, stores, scanner, demographics) are wrapped in
//! [`with_retry`]. Only errors the caller classifies as transient are retried; the last
//! error is returned once attempts are exhausted.

use lg_core::Config;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first call. Always at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.retry_max_attempts(),
            Duration::from_millis(config.retry_base_delay_ms()),
            Duration::from_millis(config.retry_max_delay_ms()),
        )
    }

    /// A single attempt with no delay.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }
}

/// Delay before retry number `retry_count` (0-based): exponential with cap.
pub fn compute_retry_backoff(policy: &RetryPolicy, retry_count: u32) -> Duration {
    let factor = 2_u32.saturating_pow(retry_count);
    policy
        .base_delay
        .checked_mul(factor)
        .unwrap_or(policy.max_delay)
        .min(policy.max_delay)
}

/// Run `op` until it succeeds, fails with a non-transient error, or the policy's
/// attempts are used up.
pub async fn with_retry<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    operation: &str,
    is_transient: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt: u32 = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_attempts && is_transient(&err) => {
                let delay = compute_retry_backoff(policy, attempt - 1);
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    backoff_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                if attempt > 1 {
                    tracing::error!(
                        operation,
                        attempts = attempt,
                        error = %err,
                        "Giving up after retries"
                    );
                }
                return Err(err);
            }
        }
    }
}
