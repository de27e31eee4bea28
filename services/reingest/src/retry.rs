//! Bounded exponential-backoff retries around collaborator calls.

use crate::error::SinkError;
use backoff::{backoff::Backoff, ExponentialBackoff};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// How often and how patiently to retry an operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_interval: Duration,
    /// Upper bound on the delay between retries
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            current_interval: self.initial_interval,
            max_interval: self.max_interval,
            // Bounded by attempts, not by elapsed time
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Errors that know whether repeating the call may help.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for SinkError {
    fn is_transient(&self) -> bool {
        SinkError::is_transient(self)
    }
}

/// The last error of an operation that did not succeed within its budget.
#[derive(Debug)]
pub struct RetryError<E> {
    /// Attempts made before giving up
    pub attempts: u32,
    /// Error returned by the final attempt
    pub source: E,
}

/// Run `op` until it succeeds, fails permanently, or exhausts the policy.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: Transient + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut backoff = policy.backoff();
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        match op().await {
            Ok(value) => {
                if attempts > 1 {
                    debug!(operation, attempts, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if !e.is_transient() => {
                warn!(operation, attempts, error = %e, "Permanent failure, not retrying");
                return Err(RetryError { attempts, source: e });
            }
            Err(e) if attempts >= policy.max_attempts => {
                warn!(operation, attempts, error = %e, "Retry budget exhausted");
                return Err(RetryError { attempts, source: e });
            }
            Err(e) => {
                let delay = backoff.next_backoff().unwrap_or(policy.max_interval);
                warn!(
                    operation,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
