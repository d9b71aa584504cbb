use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::resilience::{CircuitBreakerConfig, RateLimitConfig, RetryConfig};
use crate::EmbeddingError;

/// Encoder behind the local provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LocalBackendKind {
    /// Deterministic feature-hashing encoder. No artifacts required.
    #[default]
    Hashing,
    /// ONNX transformer. Needs the `onnx` feature plus model and tokenizer files.
    Onnx,
}

/// Runtime configuration for the in-process provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LocalProviderConfig {
    pub enabled: bool,
    pub backend: LocalBackendKind,
    /// Label surfaced on every result and baked into cache keys.
    pub model_name: String,
    pub dimension: usize,
    pub max_tokens: usize,
    /// Texts per inference chunk.
    pub max_batch_size: usize,
    /// Upper bound on concurrently running blocking inference jobs.
    pub inference_workers: usize,
    pub model_path: Option<PathBuf>,
    pub tokenizer_path: Option<PathBuf>,
}

impl Default for LocalProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: LocalBackendKind::Hashing,
            model_name: "all-MiniLM-L6-v2".into(),
            dimension: 384,
            max_tokens: 256,
            max_batch_size: 32,
            inference_workers: 2,
            model_path: None,
            tokenizer_path: None,
        }
    }
}

impl LocalProviderConfig {
    pub fn validate(&self) -> Result<(), EmbeddingError> {
        if self.dimension == 0 {
            return Err(EmbeddingError::InvalidConfig(
                "local dimension must be > 0".into(),
            ));
        }
        if self.max_batch_size == 0 || self.inference_workers == 0 {
            return Err(EmbeddingError::InvalidConfig(
                "local max_batch_size and inference_workers must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Runtime configuration for the metered API provider and its resilience wrapper.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RemoteProviderConfig {
    pub enabled: bool,
    /// Provider label, e.g. `"openai"`.
    pub name: String,
    /// Base URL; requests go to `{base_url}/embeddings`.
    pub base_url: String,
    /// Bearer token. Falls back to `HYBRID_EMBED_REMOTE_API_KEY` when unset.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model_name: String,
    pub dimension: usize,
    pub max_tokens: usize,
    /// Provider-side batch ceiling; larger requests are split.
    pub max_batch_size: usize,
    /// Published USD price per 1000 tokens.
    pub cost_per_1k_tokens: f64,
    /// Send `dimensions` in the request body (OpenAI v3 models support shortening).
    pub send_dimensions: bool,
    /// Per-attempt deadline.
    #[serde(with = "crate::serde_duration::secs", rename = "timeout_secs")]
    pub timeout: Duration,
    pub rate_limit: RateLimitConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
}

impl Default for RemoteProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: "openai".into(),
            base_url: "https://api.openai.com/v1".into(),
            api_key: None,
            model_name: "text-embedding-3-small".into(),
            dimension: 1536,
            max_tokens: 8191,
            max_batch_size: 2048,
            cost_per_1k_tokens: 0.00002,
            send_dimensions: false,
            timeout: Duration::from_secs(30),
            rate_limit: RateLimitConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl RemoteProviderConfig {
    pub const API_KEY_ENV: &'static str = "HYBRID_EMBED_REMOTE_API_KEY";

    /// The configured key, or the environment fallback. Empty strings count as missing.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(Self::API_KEY_ENV).ok())
            .filter(|k| !k.trim().is_empty())
    }

    pub fn validate(&self) -> Result<(), EmbeddingError> {
        if self.base_url.is_empty() {
            return Err(EmbeddingError::InvalidConfig("remote base_url is empty".into()));
        }
        if self.dimension == 0 || self.max_batch_size == 0 {
            return Err(EmbeddingError::InvalidConfig(
                "remote dimension and max_batch_size must be > 0".into(),
            ));
        }
        if self.cost_per_1k_tokens < 0.0 {
            return Err(EmbeddingError::InvalidConfig(
                "remote cost_per_1k_tokens must be non-negative".into(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(EmbeddingError::InvalidConfig("remote timeout must be > 0".into()));
        }
        Ok(())
    }
}
