//! Rate limiting for the remote provider.
//!
//! Token bucket sized to requests-per-minute, refilled continuously. A rolling
//! one-minute admission log caps the burst a full bucket would otherwise allow on
//! top of the steady refill.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);

/// Configuration for rate limiting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Bucket capacity and the ceiling over any rolling minute.
    pub requests_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 3000,
        }
    }
}

impl RateLimitConfig {
    pub fn with_requests_per_minute(mut self, rpm: u32) -> Self {
        self.requests_per_minute = rpm;
        self
    }

    fn refill_per_sec(&self) -> f64 {
        self.requests_per_minute as f64 / 60.0
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    admitted: VecDeque<(Instant, u32)>,
    admitted_in_window: u64,
}

/// Token bucket rate limiter.
#[derive(Debug)]
pub struct TokenBucket {
    config: RateLimitConfig,
    state: Mutex<BucketState>,
    total_requests: AtomicU64,
    total_rejected: AtomicU64,
}

impl TokenBucket {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BucketState {
                tokens: config.requests_per_minute as f64,
                last_refill: Instant::now(),
                admitted: VecDeque::new(),
                admitted_in_window: 0,
            }),
            total_requests: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
        }
    }

    /// Try to take `n` tokens without waiting. Refill, check and consume happen
    /// under one lock.
    pub fn try_acquire_n(&self, n: u32) -> bool {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let capacity = self.config.requests_per_minute;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();

        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.last_refill = now;
        state.tokens = (state.tokens + elapsed * self.config.refill_per_sec()).min(capacity as f64);

        while let Some(&(at, count)) = state.admitted.front() {
            if now.duration_since(at) >= WINDOW {
                state.admitted.pop_front();
                state.admitted_in_window -= count as u64;
            } else {
                break;
            }
        }

        let fits_bucket = state.tokens >= n as f64;
        let fits_window = state.admitted_in_window + n as u64 <= capacity as u64;
        if fits_bucket && fits_window {
            state.tokens -= n as f64;
            state.admitted.push_back((now, n));
            state.admitted_in_window += n as u64;
            true
        } else {
            self.total_rejected.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.try_acquire_n(1)
    }

    pub fn stats(&self) -> RateLimitStats {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        RateLimitStats {
            available_tokens: state.tokens,
            admitted_last_minute: state.admitted_in_window,
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
        }
    }
}

/// Statistics for rate limiter.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RateLimitStats {
    pub available_tokens: f64,
    pub admitted_last_minute: u64,
    pub total_requests: u64,
    pub total_rejected: u64,
}

impl RateLimitStats {
    /// Rejection rate (0.0 to 1.0).
    pub fn rejection_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_rejected as f64 / self.total_requests as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn token_bucket_basic() {
        let bucket = TokenBucket::new(RateLimitConfig::default().with_requests_per_minute(5));

        for _ in 0..5 {
            assert!(bucket.try_acquire());
        }
        assert!(!bucket.try_acquire());

        let stats = bucket.stats();
        assert_eq!(stats.total_requests, 6);
        assert_eq!(stats.total_rejected, 1);
    }

    #[test]
    fn multi_token_request_needs_all_tokens() {
        let bucket = TokenBucket::new(RateLimitConfig::default().with_requests_per_minute(10));
        assert!(bucket.try_acquire_n(7));
        assert!(!bucket.try_acquire_n(4));
        assert!(bucket.try_acquire_n(3));
    }

    #[test]
    fn refill_is_capped_by_rolling_window() {
        // 6000 rpm refills 100 tokens/sec, so the bucket is full again well before
        // a minute passes. The window still holds the count at capacity.
        let bucket = TokenBucket::new(RateLimitConfig::default().with_requests_per_minute(6000));
        assert!(bucket.try_acquire_n(6000));

        std::thread::sleep(Duration::from_millis(100));
        assert!(bucket.stats().available_tokens >= 0.0);
        assert!(!bucket.try_acquire());
        assert_eq!(bucket.stats().admitted_last_minute, 6000);
    }

    #[test]
    fn concurrent_acquires_never_exceed_capacity() {
        let bucket = Arc::new(TokenBucket::new(
            RateLimitConfig::default().with_requests_per_minute(50),
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let bucket = Arc::clone(&bucket);
                std::thread::spawn(move || (0..20).filter(|_| bucket.try_acquire()).count())
            })
            .collect();

        let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(accepted, 50);
        assert!((bucket.stats().rejection_rate() - 110.0 / 160.0).abs() < 1e-9);
    }
}
