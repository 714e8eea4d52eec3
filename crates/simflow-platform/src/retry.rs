//! Bounded exponential retries for transient backend failures.

use std::thread;
use std::time::Duration;

use simflow_core::errors::FlowError;
use tracing::warn;

/// Retry schedule applied to retryable platform errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Delay ceiling.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Default delays with `max_attempts` attempts.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Retries without sleeping.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error or exhausts the policy.
///
/// The attempt number (1-based) is passed to `op`. The error returned after
/// the last attempt carries an `attempts` context entry.
pub fn with_retries<T, F>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T, FlowError>
where
    F: FnMut(u32) -> Result<T, FlowError>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(operation, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying platform call");
                thread::sleep(delay);
            }
            Err(err) if err.is_retryable() => {
                return Err(err.with_context("attempts", attempt.to_string()));
            }
            Err(err) => return Err(err),
        }
    }
}
