//! Circuit breaker for the remote provider.
//!
//! Stops calling a failing dependency once `failure_threshold` consecutive failures
//! pile up, then admits trial calls after `open_timeout` to check if it recovered.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in CLOSED before opening.
    pub failure_threshold: u32,
    /// Consecutive HALF_OPEN successes required to close again.
    pub success_threshold: u32,
    /// How long OPEN rejects calls before admitting a trial.
    #[serde(with = "crate::serde_duration::secs", rename = "timeout_secs")]
    pub open_timeout: Duration,
    /// In CLOSED, failures older than this no longer count.
    #[serde(with = "crate::serde_duration::secs", rename = "reset_timeout_secs")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 2,
            open_timeout: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(300),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }
}

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Requests pass through.
    Closed,
    /// Requests are rejected without reaching the provider.
    Open,
    /// Trial requests are allowed.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    opened_at: Option<Instant>,
}

/// Point-in-time view for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    /// Seconds since the breaker last opened, if it ever did.
    pub opened_secs_ago: Option<f64>,
    pub total_rejected: u64,
    pub total_failures: u64,
    pub total_successes: u64,
}

/// Three-state breaker. Every transition happens under a single lock so the
/// counters and the state never disagree.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    total_rejected: AtomicU64,
    total_failures: AtomicU64,
    total_successes: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
                opened_at: None,
            }),
            total_rejected: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check if a request should be allowed through. OPEN moves to HALF_OPEN here
    /// once the open timeout has elapsed.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                self.expire_stale_failures(&mut inner);
                true
            }
            CircuitState::Open => {
                if self.open_timeout_elapsed(&inner) {
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    tracing::info!(
                        breaker_state = CircuitState::HalfOpen.as_str(),
                        "circuit breaker admitting trial request"
                    );
                    true
                } else {
                    self.total_rejected.fetch_add(1, Ordering::Relaxed);
                    false
                }
            }
            CircuitState::HalfOpen => true,
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.last_failure = None;
                    inner.opened_at = None;
                    tracing::info!(breaker_state = "CLOSED", "circuit breaker closed");
                }
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.lock();
        let now = Instant::now();
        match inner.state {
            CircuitState::Closed => {
                self.expire_stale_failures(&mut inner);
                inner.failure_count += 1;
                inner.last_failure = Some(now);
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                    tracing::warn!(
                        breaker_state = "OPEN",
                        failures = inner.failure_count,
                        "circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.last_failure = Some(now);
                inner.success_count = 0;
                tracing::warn!(breaker_state = "OPEN", "trial request failed, circuit reopened");
            }
            CircuitState::Open => {
                inner.last_failure = Some(now);
            }
        }
    }

    fn expire_stale_failures(&self, inner: &mut BreakerInner) {
        if inner.failure_count == 0 {
            return;
        }
        if let Some(last) = inner.last_failure {
            if last.elapsed() >= self.config.reset_timeout {
                inner.failure_count = 0;
            }
        }
    }

    fn open_timeout_elapsed(&self, inner: &BreakerInner) -> bool {
        inner.opened_at.map(|t| t.elapsed()).unwrap_or_default() >= self.config.open_timeout
    }

    /// Stored state without side effects. OPEN stays OPEN here until a call
    /// goes through [`allow_request`](Self::allow_request).
    pub fn current_state(&self) -> CircuitState {
        self.lock().state
    }

    /// State as seen by the next caller: OPEN past its timeout reads as
    /// HALF_OPEN because the next request will be admitted as a trial.
    pub fn effective_state(&self) -> CircuitState {
        let inner = self.lock();
        match inner.state {
            CircuitState::Open if self.open_timeout_elapsed(&inner) => CircuitState::HalfOpen,
            state => state,
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.lock();
        let state = match inner.state {
            CircuitState::Open if self.open_timeout_elapsed(&inner) => CircuitState::HalfOpen,
            state => state,
        };
        CircuitBreakerSnapshot {
            state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            opened_secs_ago: inner.opened_at.map(|t| t.elapsed().as_secs_f64()),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
