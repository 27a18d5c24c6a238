//! Generic retry with exponential backoff and jitter.
//!
//! One retry loop serves every fallible external call in the application:
//! LLM requests, embedding requests, generic HTTP and database writes. The
//! caller supplies a predicate deciding which errors are retryable; anything
//! else surfaces immediately.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::{debug, warn};

/// Error returned when a retried operation ultimately fails.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every allowed attempt failed with a retryable error.
    #[error("retries exhausted after {attempts} attempts: {source}")]
    Exhausted { attempts: u32, source: E },

    /// The operation failed with an error the predicate declared permanent.
    #[error("non-retryable error: {source}")]
    NonRetryable { source: E },
}

impl<E> RetryError<E> {
    /// Unwrap the underlying error regardless of how the retry ended.
    pub fn into_source(self) -> E {
        match self {
            RetryError::Exhausted { source, .. } | RetryError::NonRetryable { source } => source,
        }
    }
}

/// Backoff configuration for a retried operation.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Number of retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Multiplier applied per retry.
    pub exponential_base: f64,
    /// Fractional jitter applied to each delay (0.1 = +/-10%).
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    /// Profile for language-model calls: 3 retries, 1s base, 30s cap.
    pub fn llm() -> Self {
        Self { max_retries: 3, max_delay: Duration::from_secs(30), ..Self::default() }
    }

    /// Profile for generic API calls: 5 retries, 500ms base, 30s cap.
    pub fn api() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.2,
            ..Self::default()
        }
    }

    /// Profile for database writes: 3 retries, 100ms base, 5s cap.
    pub fn database() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            ..Self::default()
        }
    }

    /// Compute the delay preceding retry number `retry` (1-based), with
    /// jitter applied and the configured cap enforced.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let raw = self.base_delay.as_secs_f64() * self.exponential_base.powi(exponent);
        let capped = raw.min(self.max_delay.as_secs_f64());

        let jittered = if self.jitter_factor > 0.0 {
            let spread = capped * self.jitter_factor;
            let offset = rand::thread_rng().gen_range(-spread..=spread);
            (capped + offset).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }
}

/// Run `operation` until it succeeds, the predicate rejects the error, or
/// the retry budget is spent.
///
/// `is_retryable` is consulted on every failure; returning `false` converts
/// the failure into [`RetryError::NonRetryable`] immediately.
pub async fn execute_with_retry<T, E, F, Fut, P>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
    is_retryable: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let total_attempts = config.max_retries + 1;

    for attempt in 1..=total_attempts {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !is_retryable(&err) => {
                return Err(RetryError::NonRetryable { source: err });
            }
            Err(err) if attempt == total_attempts => {
                warn!(
                    operation = operation_name,
                    attempts = total_attempts,
                    error = %err,
                    "retries exhausted"
                );
                return Err(RetryError::Exhausted { attempts: total_attempts, source: err });
            }
            Err(err) => {
                let delay = config.delay_for(attempt);
                debug!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after backoff"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    unreachable!("retry loop covers every attempt")
}
