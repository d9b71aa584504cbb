use cache::CacheError;
use provider::EmbeddingError;
use thiserror::Error;

use crate::config::ConfigLoadError;

/// Errors returned by [`HybridEmbeddingService`](crate::HybridEmbeddingService).
///
/// An embedding call yields either every result or exactly one of these.
#[derive(Debug, Error)]
pub enum HybridError {
    #[error(transparent)]
    Config(#[from] ConfigLoadError),

    /// The last provider failure after routing and any fallback.
    #[error(transparent)]
    Provider(#[from] EmbeddingError),

    /// Cache construction failed. Lookups never produce this.
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("{0} is disabled")]
    Disabled(&'static str),
}

impl HybridError {
    /// The provider error behind this failure, if there is one.
    pub fn as_provider_error(&self) -> Option<&EmbeddingError> {
        match self {
            HybridError::Provider(e) => Some(e),
            _ => None,
        }
    }
}

impl From<HybridError> for EmbeddingError {
    fn from(e: HybridError) -> Self {
        match e {
            HybridError::Provider(inner) => inner,
            HybridError::Config(inner) => EmbeddingError::InvalidConfig(inner.to_string()),
            other => EmbeddingError::ProviderUnavailable(other.to_string()),
        }
    }
}
