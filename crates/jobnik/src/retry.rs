//! Exponential backoff for calls against the cluster API.
//!
//! The default policy mirrors the Kubernetes client's `DefaultBackoff`:
//! four attempts, starting at 10ms and multiplying by five, with 10% jitter.
//! Whether a given error is worth another attempt is decided by a caller
//! supplied classifier, so the same loop serves "retry everything" and
//! "stop on permanent errors" policies.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// Backoff parameters for a retried operation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after every failure
    pub factor: f64,
    /// Upper bound of extra random delay, as a fraction of the base delay
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(10),
            factor: 5.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Base delay (without jitter) slept after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        Duration::from_secs_f64(self.initial_delay.as_secs_f64() * self.factor.powi(exponent))
    }

    fn jittered(&self, base: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
        base + Duration::from_secs_f64(base.as_secs_f64() * extra)
    }
}

/// The error that ended a retry loop, with the number of attempts made.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub error: E,
}

/// Classifier that treats every error as retryable.
pub fn retry_always<E>(_: &E) -> bool {
    true
}

/// Run `operation` until it succeeds, the classifier rejects an error, or
/// `policy.max_attempts` is reached.
pub async fn retry_with_backoff<F, Fut, T, E, C>(
    policy: &RetryPolicy,
    operation_name: &str,
    should_retry: C,
    mut operation: F,
) -> Result<T, RetryExhausted<E>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    C: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt >= max_attempts || !should_retry(&e) {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed, giving up"
                    );
                    return Err(RetryExhausted { attempts: attempt, error: e });
                }

                let delay = policy.jittered(policy.delay_after(attempt));
                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
