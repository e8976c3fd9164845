//! Retry policy for step dispatch.
//!
//! A policy value object (initial interval, backoff coefficient, max
//! interval, max attempts) handed to the dispatcher; step logic itself never
//! loops.

use crate::plan::RetryOverride;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Jitter applied on top of the computed backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// Exact backoff.
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_interval: Duration,
    /// Multiplier applied per further attempt.
    pub backoff_coefficient: f64,
    /// Upper bound on any single delay.
    pub max_interval: Duration,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter: JitterStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_secs(5),
            backoff_coefficient: 2.0,
            max_interval: Duration::from_secs(60),
            jitter: JitterStrategy::None,
        }
    }
}

impl RetryPolicy {
    /// Creates the default policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::default().with_max_attempts(1)
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the initial interval.
    #[must_use]
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// Sets the backoff coefficient.
    #[must_use]
    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    /// Sets the maximum interval.
    #[must_use]
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter = strategy;
        self
    }

    /// Applies a step's overrides field by field. Non-finite or negative
    /// values are ignored.
    #[must_use]
    pub fn with_override(mut self, overrides: &RetryOverride) -> Self {
        if let Some(attempts) = overrides.max_attempts {
            self.max_attempts = attempts;
        }
        if let Some(interval) = overrides.initial_interval_seconds.and_then(seconds) {
            self.initial_interval = interval;
        }
        if let Some(coefficient) = overrides
            .backoff_coefficient
            .filter(|c| c.is_finite() && *c >= 1.0)
        {
            self.backoff_coefficient = coefficient;
        }
        if let Some(interval) = overrides.max_interval_seconds.and_then(seconds) {
            self.max_interval = interval;
        }
        self
    }

    /// Attempts actually made; zero is treated as one.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Backoff before retry number `retry` (1 for the first retry), without
    /// jitter: `initial * coefficient^(retry-1)`, capped at the max interval.
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        let cap = self.max_interval.as_secs_f64();
        if !secs.is_finite() || secs >= cap {
            return self.max_interval;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Backoff before retry number `retry` with jitter applied.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let delay = self.backoff(retry);
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        let jittered = match self.jitter {
            JitterStrategy::None => millis,
            JitterStrategy::Full => {
                if millis == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=millis)
                }
            }
            JitterStrategy::Equal => {
                let half = millis / 2;
                if half == 0 {
                    millis
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };
        Duration::from_millis(jittered)
    }
}

fn seconds(value: f64) -> Option<Duration> {
    (value.is_finite() && value >= 0.0).then(|| Duration::from_secs_f64(value))
}

/// Runs `operation` until it succeeds, returns an error `is_retryable`
/// rejects, or the policy's attempts are exhausted.
///
/// `operation` receives the 1-based attempt number.
pub async fn with_retry<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    key: &str,
    is_retryable: R,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: Display,
{
    let attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts && is_retryable(&err) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    step_id = %key,
                    attempt,
                    max_attempts = attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Retrying step after error"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
