use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Fixed-length vector produced by a provider. Never mutated after creation.
pub type EmbeddingVector = Vec<f32>;

/// The closed set of providers the router can choose between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// In-process model, zero marginal cost.
    Local,
    /// Metered external API.
    Remote,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Local => "local",
            ProviderKind::Remote => "remote",
        }
    }

    /// The other provider, used as a fallback target.
    pub fn other(&self) -> ProviderKind {
        match self {
            ProviderKind::Local => ProviderKind::Remote,
            ProviderKind::Remote => ProviderKind::Local,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(ProviderKind::Local),
            "remote" | "api" => Ok(ProviderKind::Remote),
            other => Err(format!("unknown provider '{other}'")),
        }
    }
}

/// One embedded text. A value object; it has no lifecycle of its own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingResult {
    pub vector: EmbeddingVector,
    pub provider: ProviderKind,
    pub model: String,
    pub dimension: usize,
    #[serde(with = "crate::serde_duration::millis")]
    pub latency: Duration,
    #[serde(default)]
    pub tokens: Option<u32>,
    /// USD. `None` when the provider does not meter usage.
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub cache_hit: bool,
}

impl EmbeddingResult {
    /// Copy of this result marked as served from cache with the given lookup latency.
    pub fn as_cache_hit(&self, latency: Duration) -> Self {
        Self {
            latency,
            cache_hit: true,
            ..self.clone()
        }
    }
}

/// Static description every provider declares.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderInfo {
    pub name: String,
    pub model: String,
    pub dimension: usize,
    pub max_tokens: usize,
    pub cost_per_1k_tokens: f64,
    pub max_batch_size: usize,
    /// Requests per minute, when the provider is rate limited.
    pub rate_limit_rpm: Option<u32>,
}

impl ProviderInfo {
    /// Projected USD cost for `tokens` tokens.
    pub fn cost_for_tokens(&self, tokens: u64) -> f64 {
        tokens as f64 / 1000.0 * self.cost_per_1k_tokens
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_usable(&self) -> bool {
        !matches!(self, HealthStatus::Unhealthy)
    }
}

/// Result of a provider health probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderHealth {
    pub provider: ProviderKind,
    pub status: HealthStatus,
    #[serde(with = "crate::serde_duration::millis")]
    pub latency: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl ProviderHealth {
    pub fn healthy(provider: ProviderKind, latency: Duration) -> Self {
        Self {
            provider,
            status: HealthStatus::Healthy,
            latency,
            message: None,
            checked_at: Utc::now(),
        }
    }

    pub fn unhealthy(provider: ProviderKind, message: impl Into<String>) -> Self {
        Self {
            provider,
            status: HealthStatus::Unhealthy,
            latency: Duration::ZERO,
            message: Some(message.into()),
            checked_at: Utc::now(),
        }
    }
}

/// Rough token estimate used where the provider does not report usage: one token per
/// four characters, rounded up, at least one.
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count() as u32;
    chars.div_ceil(4).max(1)
}
