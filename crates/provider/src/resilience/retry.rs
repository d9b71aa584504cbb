//! Retry logic with exponential backoff for transient failures.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};

/// Configuration for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles per attempt.
    #[serde(with = "crate::serde_duration::millis", rename = "base_delay_ms")]
    pub base_delay: Duration,
    /// Cap on any single delay, jitter included.
    #[serde(with = "crate::serde_duration::millis", rename = "max_delay_ms")]
    pub max_delay: Duration,
    /// Scale each delay by a random factor in [0.75, 1.25].
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Backoff before retry number `attempt + 1`: `min(base * 2^attempt, max)`,
    /// optionally jittered by ±25% and clamped to `max` again.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        let exponential = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if self.jitter {
            let scale = 0.75 + fastrand::f64() * 0.5;
            exponential.mul_f64(scale).min(self.max_delay)
        } else {
            exponential
        }
    }
}

/// Outcome of a retried operation.
#[derive(Debug)]
pub struct RetryResult<T, E> {
    pub result: Result<T, E>,
    /// Attempts made (1 = no retries needed).
    pub attempts: u32,
    /// Sleeps taken between attempts, in order.
    pub delays: Vec<Duration>,
    pub total_duration: Duration,
}

impl<T, E> RetryResult<T, E> {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    pub fn into_result(self) -> Result<T, E> {
        self.result
    }
}

/// Run `operation` until it succeeds, returns an error `should_retry` rejects, or
/// `max_retries` retries are used up.
pub async fn execute_with_retry_async<T, E, F, Fut, R>(
    config: &RetryConfig,
    should_retry: R,
    mut operation: F,
) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let start = Instant::now();
    let mut delays = Vec::new();
    let mut attempt = 0;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                return RetryResult {
                    result: Ok(value),
                    attempts: attempt + 1,
                    delays,
                    total_duration: start.elapsed(),
                };
            }
            Err(error) => {
                if attempt >= config.max_retries || !should_retry(&error) {
                    return RetryResult {
                        result: Err(error),
                        attempts: attempt + 1,
                        delays,
                        total_duration: start.elapsed(),
                    };
                }

                let delay = config.delay_for(attempt);
                tracing::debug!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying after transient failure"
                );
                delays.push(delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
