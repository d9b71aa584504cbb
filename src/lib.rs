//! Hybrid text embeddings for semantic search.
//!
//! This crate stitches the workspace together behind one entry point,
//! [`HybridEmbeddingService`]: a free in-process model and a metered remote
//! API, a two-tier cache in front of both, a router that weighs PII, spend,
//! health, batch size and caller context, and a monitor with threshold
//! alerting. A shadow comparator lets the service run next to a legacy
//! embedding path before taking over.
//!
//! ```no_run
//! use hybrid_embed::{EmbedOptions, EmbeddingContext, HybridConfig, HybridEmbeddingService};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), hybrid_embed::HybridError> {
//! let config = HybridConfig::from_file("config/hybrid-embed.yaml")?;
//! let service = Arc::new(HybridEmbeddingService::new(config).await?);
//! service.start_background_tasks();
//!
//! let texts = vec!["How much should I keep in an emergency fund?".to_string()];
//! let options = EmbedOptions::new().with_context(EmbeddingContext::Realtime);
//! let results = service.embed(&texts, &options).await?;
//! println!("{} dims from {}", results[0].dimension, results[0].provider);
//!
//! service.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
mod error;
mod service;
pub mod warmup;

pub use config::{ConfigLoadError, HybridConfig};
pub use error::HybridError;
pub use service::{EmbedOptions, HybridEmbeddingService, ServiceHealth, ServiceMetrics};

pub use cache::{BackendKind, CacheConfig, CacheStats, CacheTier};
pub use monitor::{Alert, AlertConfig, AlertLevel, AlertSummary, AlertType, MetricsSnapshot};
pub use provider::resilience::{CircuitBreakerConfig, RateLimitConfig, RetryConfig};
pub use provider::{
    CircuitState, EmbeddingError, EmbeddingProvider, EmbeddingResult, HealthStatus,
    LocalProviderConfig, ProviderHealth, ProviderInfo, ProviderKind, RemoteProviderConfig,
    ResilienceConfig, ResilientProvider,
};
pub use router::{EmbeddingContext, ReasonCode, RoutingPolicy};
pub use shadow::{Embedder, MigrationRecommendation, ShadowConfig, ShadowStats};
