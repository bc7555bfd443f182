//! Per-item retry with exponential backoff and a bounded per-attempt timeout.
//!
//! Used by the worker pool for every batch item and by stages for their
//! single, un-batched service calls. A timed-out attempt counts as a transient
//! failure; a non-transient error stops retrying immediately.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::error::Transient;

/// Backoff schedule for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Must be at least 1.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each later attempt.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Sets the number of attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Delay to wait before attempt number `attempt` (1-based; attempt 1 has none).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 2).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Why an item ultimately failed, after all attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    /// Message of the last error seen.
    pub reason: String,
    /// Number of attempts made.
    pub attempts: u32,
}

impl Display for ItemFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.attempts > 1 {
            write!(f, "{} (after {} attempts)", self.reason, self.attempts)
        } else {
            write!(f, "{}", self.reason)
        }
    }
}

/// Successful result together with the number of attempts it took.
#[derive(Debug, Clone)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// Runs `op` until it succeeds, fails non-transiently, or attempts run out.
///
/// Each attempt is bounded by `timeout`.
pub async fn retry_with_timeout<T, E, F, Fut>(
    policy: &RetryPolicy,
    timeout: Duration,
    mut op: F,
) -> Result<Attempted<T>, ItemFailure>
where
    E: Display + Transient,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_reason = String::from("no attempt made");

    for attempt in 1..=max_attempts {
        let delay = policy.delay_before(attempt);
        if !delay.is_zero() {
            tracing::debug!(
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying after transient failure"
            );
            tokio::time::sleep(delay).await;
        }

        match tokio::time::timeout(timeout, op()).await {
            Ok(Ok(value)) => {
                return Ok(Attempted {
                    value,
                    attempts: attempt,
                })
            }
            Ok(Err(err)) => {
                last_reason = err.to_string();
                if !err.is_transient() {
                    return Err(ItemFailure {
                        reason: last_reason,
                        attempts: attempt,
                    });
                }
                tracing::warn!(
                    attempt = attempt,
                    max_attempts = max_attempts,
                    error = %err,
                    "Transient error, will retry"
                );
            }
            Err(_) => {
                last_reason = format!("timed out after {} seconds", timeout.as_secs_f64());
                tracing::warn!(
                    attempt = attempt,
                    max_attempts = max_attempts,
                    timeout_secs = timeout.as_secs_f64(),
                    "Attempt timed out"
                );
            }
        }
    }

    Err(ItemFailure {
        reason: last_reason,
        attempts: max_attempts,
    })
}
