//! Bounded retries with a cancellable delay

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Delay growth between attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Backoff {
    Fixed,
    Exponential { factor: f64, max_delay_secs: u64 },
}

/// How many times to try an operation and how long to wait in between.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_secs: u64,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay_secs: u64) -> Self {
        Self {
            max_attempts,
            delay_secs,
            backoff: Backoff::Fixed,
        }
    }

    pub fn exponential(max_attempts: u32, delay_secs: u64, factor: f64, max_delay_secs: u64) -> Self {
        Self {
            max_attempts,
            delay_secs,
            backoff: Backoff::Exponential {
                factor,
                max_delay_secs,
            },
        }
    }

    /// Wait after the `attempt`-th failure (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let base = self.delay_secs as f64;
        let secs = match &self.backoff {
            Backoff::Fixed => base,
            Backoff::Exponential {
                factor,
                max_delay_secs,
            } => {
                let grown = base * factor.powi(attempt.saturating_sub(1) as i32);
                grown.min(*max_delay_secs as f64)
            }
        };
        Duration::from_secs_f64(secs.max(0.0))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(3, 2)
    }
}

/// Why a retried operation gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed; carries the last error.
    Exhausted { attempts: u32, last: E },
    Cancelled,
}

impl<E: Display> Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryError::Exhausted { attempts, last } => {
                write!(f, "failed after {attempts} attempts: {last}")
            }
            RetryError::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Run `operation` until it succeeds, the policy is exhausted or `cancel`
/// fires. The closure receives the 1-based attempt number.
///
/// Cancellation is observed before each attempt, during each attempt and
/// while sleeping between attempts.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            outcome = operation(attempt) => outcome,
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= max_attempts => {
                tracing::error!(operation = label, attempts = attempt, error = %e, "giving up");
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: e,
                });
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    operation = label,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "attempt failed, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}
