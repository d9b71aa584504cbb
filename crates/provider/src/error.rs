use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by embedding providers and the resilience layer.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EmbeddingError {
    /// Model artifact or credentials are missing. Fatal at initialization.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// A single remote attempt exceeded its deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// Connection-level failure (reset, refused, DNS).
    #[error("transient remote failure: {0}")]
    Transient(String),
    /// Non-success HTTP status from the remote API.
    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: String },
    /// The response could not be interpreted as embeddings.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    /// Rejected locally by the token bucket before any provider call.
    #[error("rate limit exceeded for provider '{0}'")]
    RateLimited(String),
    /// Short-circuited by an open circuit breaker.
    #[error("circuit breaker is open for provider '{0}'")]
    CircuitOpen(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid provider config: {0}")]
    InvalidConfig(String),
    /// Local tokenizer or model failures.
    #[error("inference failure: {0}")]
    Inference(String),
}

impl EmbeddingError {
    /// Whether the retry policy may attempt the call again.
    ///
    /// Timeouts, connection failures, 408, 429 and 5xx are transient. Everything
    /// else, including malformed bodies, fails fast.
    pub fn is_retryable(&self) -> bool {
        match self {
            EmbeddingError::Timeout(_) | EmbeddingError::Transient(_) => true,
            EmbeddingError::Http { status, .. } => {
                *status == 408 || *status == 429 || (500..600).contains(status)
            }
            _ => false,
        }
    }

    /// Short machine-friendly label used for metrics and the recent-error buffer.
    pub fn kind(&self) -> &'static str {
        match self {
            EmbeddingError::ProviderUnavailable(_) => "provider_unavailable",
            EmbeddingError::Timeout(_) => "timeout",
            EmbeddingError::Transient(_) => "transient",
            EmbeddingError::Http { .. } => "http",
            EmbeddingError::MalformedResponse(_) => "malformed_response",
            EmbeddingError::RateLimited(_) => "rate_limited",
            EmbeddingError::CircuitOpen(_) => "circuit_open",
            EmbeddingError::InvalidInput(_) => "invalid_input",
            EmbeddingError::InvalidConfig(_) => "invalid_config",
            EmbeddingError::Inference(_) => "inference",
        }
    }
}
