//! Embedding providers behind one async contract.
//!
//! Two implementations ship here:
//!
//! - [`LocalProvider`] runs an in-process encoder. It is free, loads lazily and
//!   keeps CPU work on the blocking pool.
//! - [`RemoteProvider`] calls a metered OpenAI-compatible API. It should always be
//!   used through [`ResilientProvider`], which adds a circuit breaker, a token
//!   bucket, backoff retry and a per-attempt timeout.
//!
//! ```no_run
//! use provider::{EmbeddingProvider, LocalProvider, LocalProviderConfig};
//!
//! # async fn run() -> Result<(), provider::EmbeddingError> {
//! let local = LocalProvider::new(LocalProviderConfig::default())?;
//! local.initialize().await?;
//! let results = local.generate(&["hello world".to_string()]).await?;
//! assert_eq!(results[0].dimension, 384);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;

pub mod config;
pub mod error;
pub mod resilience;
pub mod types;

mod hashing;
mod local;
pub mod normalize;
#[cfg(feature = "onnx")]
mod onnx_backend;
mod remote;
pub mod serde_duration;

pub use config::{LocalBackendKind, LocalProviderConfig, RemoteProviderConfig};
pub use error::EmbeddingError;
pub use local::LocalProvider;
pub use remote::RemoteProvider;
pub use resilience::{CircuitState, ResilienceConfig, ResilientProvider};
pub use types::{
    estimate_tokens, EmbeddingResult, EmbeddingVector, HealthStatus, ProviderHealth,
    ProviderInfo, ProviderKind,
};

/// Uniform contract every embedding provider implements.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn info(&self) -> &ProviderInfo;

    /// Verify credentials and artifacts. Failures here are fatal and never retried.
    async fn initialize(&self) -> Result<(), EmbeddingError>;

    /// Embed `texts`, returning one result per input in the same order.
    async fn generate(&self, texts: &[String]) -> Result<Vec<EmbeddingResult>, EmbeddingError>;

    async fn health_check(&self) -> ProviderHealth;

    /// Breaker state when the provider sits behind one.
    fn circuit_state(&self) -> Option<CircuitState> {
        None
    }
}

/// Reject blank inputs before they reach a model or the network.
pub(crate) fn validate_texts(texts: &[String]) -> Result<(), EmbeddingError> {
    if let Some(pos) = texts.iter().position(|t| t.trim().is_empty()) {
        return Err(EmbeddingError::InvalidInput(format!(
            "text at position {pos} is empty"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_texts_points_at_blank_entry() {
        let err = validate_texts(&["a".into(), "".into()]).unwrap_err();
        assert_eq!(err.to_string(), "invalid input: text at position 1 is empty");
        assert!(validate_texts(&[]).is_ok());
    }

    #[test]
    fn provider_trait_is_object_safe() {
        fn assert_dyn(_: &dyn EmbeddingProvider) {}
        let local = LocalProvider::new(LocalProviderConfig::default()).unwrap();
        assert_dyn(&local);
    }
}
