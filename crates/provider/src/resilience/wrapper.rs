use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RateLimitConfig, RateLimitStats};
use super::{execute_with_retry_async, RetryConfig, TokenBucket};
use crate::config::RemoteProviderConfig;
use crate::{
    EmbeddingError, EmbeddingProvider, EmbeddingResult, HealthStatus, ProviderHealth,
    ProviderInfo, ProviderKind,
};

/// Everything the wrapper needs, usually lifted from [`RemoteProviderConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResilienceConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
    #[serde(with = "crate::serde_duration::millis")]
    pub call_timeout: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&RemoteProviderConfig> for ResilienceConfig {
    fn from(cfg: &RemoteProviderConfig) -> Self {
        Self {
            circuit_breaker: cfg.circuit_breaker,
            rate_limit: cfg.rate_limit,
            retry: cfg.retry,
            call_timeout: cfg.timeout,
        }
    }
}

/// Wraps a provider with breaker, bucket, retry and a per-attempt timeout.
///
/// One logical `generate` call takes one rate-limit token and records exactly one
/// breaker outcome, however many attempts the retry loop makes.
pub struct ResilientProvider<P> {
    inner: P,
    breaker: CircuitBreaker,
    limiter: TokenBucket,
    retry: RetryConfig,
    call_timeout: Duration,
}

impl<P: EmbeddingProvider> ResilientProvider<P> {
    pub fn new(inner: P, config: ResilienceConfig) -> Self {
        Self {
            inner,
            breaker: CircuitBreaker::new(config.circuit_breaker),
            limiter: TokenBucket::new(config.rate_limit),
            retry: config.retry,
            call_timeout: config.call_timeout,
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn rate_limit_stats(&self) -> RateLimitStats {
        self.limiter.stats()
    }
}

#[async_trait]
impl<P: EmbeddingProvider> EmbeddingProvider for ResilientProvider<P> {
    fn kind(&self) -> ProviderKind {
        self.inner.kind()
    }

    fn info(&self) -> &ProviderInfo {
        self.inner.info()
    }

    async fn initialize(&self) -> Result<(), EmbeddingError> {
        self.inner.initialize().await
    }

    async fn generate(&self, texts: &[String]) -> Result<Vec<EmbeddingResult>, EmbeddingError> {
        let name = &self.inner.info().name;

        if !self.breaker.allow_request() {
            tracing::debug!(provider = %name, "short-circuited by open breaker");
            return Err(EmbeddingError::CircuitOpen(name.clone()));
        }
        if !self.limiter.try_acquire() {
            tracing::warn!(provider = %name, "local rate limit reached");
            return Err(EmbeddingError::RateLimited(name.clone()));
        }

        let inner = &self.inner;
        let deadline = self.call_timeout;
        let outcome = execute_with_retry_async(
            &self.retry,
            EmbeddingError::is_retryable,
            move |_attempt| async move {
                match tokio::time::timeout(deadline, inner.generate(texts)).await {
                    Ok(result) => result,
                    Err(_) => Err(EmbeddingError::Timeout(deadline)),
                }
            },
        )
        .await;

        let attempts = outcome.attempts;
        match outcome.into_result() {
            Ok(results) => {
                self.breaker.record_success();
                Ok(results)
            }
            Err(err) => {
                self.breaker.record_failure();
                tracing::warn!(
                    provider = %name,
                    attempts,
                    error = %err,
                    breaker_state = self.breaker.current_state().as_str(),
                    "remote embedding failed"
                );
                Err(err)
            }
        }
    }

    async fn health_check(&self) -> ProviderHealth {
        match self.breaker.effective_state() {
            CircuitState::Open => {
                ProviderHealth::unhealthy(self.kind(), "circuit breaker open")
            }
            CircuitState::HalfOpen => {
                let mut health = self.inner.health_check().await;
                if health.status == HealthStatus::Healthy {
                    health.status = HealthStatus::Degraded;
                    health.message = Some("circuit breaker half-open".into());
                }
                health
            }
            CircuitState::Closed => self.inner.health_check().await,
        }
    }

    fn circuit_state(&self) -> Option<CircuitState> {
        Some(self.breaker.effective_state())
    }
}
