//! Resilience patterns for the remote provider: circuit breaker, rate limiting and
//! retry, composed by [`ResilientProvider`].

mod circuit_breaker;
mod rate_limit;
mod retry;
mod wrapper;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState,
};
pub use rate_limit::{RateLimitConfig, RateLimitStats, TokenBucket};
pub use retry::{execute_with_retry_async, RetryConfig, RetryResult};
pub use wrapper::{ResilienceConfig, ResilientProvider};
