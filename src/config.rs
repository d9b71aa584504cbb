//! YAML configuration for the hybrid embedding service.
//!
//! Every section is optional; missing fields take their defaults. Feature
//! flags at the top level switch whole subsystems on or off, and are read
//! once when the service is built.
//!
//! ## Example YAML Configuration
//!
//! ```yaml
//! version: "1.0"
//! enabled: true
//! caching: true
//! routing: true
//! monitoring: true
//! shadow_mode: false
//!
//! local:
//!   backend: "hashing"
//!   model_name: "all-MiniLM-L6-v2"
//!   dimension: 384
//!
//! remote:
//!   enabled: true
//!   base_url: "https://api.openai.com/v1"
//!   model_name: "text-embedding-3-small"
//!   dimension: 1536
//!   cost_per_1k_tokens: 0.00002
//!   timeout_secs: 30
//!   rate_limit:
//!     requests_per_minute: 3000
//!
//! cache:
//!   l1_capacity: 10000
//!   backend: "redb"
//!   path: "data/embedding_cache.redb"
//!   local_ttl_secs: 86400
//!   remote_ttl_secs: 604800
//!
//! routing_policy:
//!   daily_budget_usd: 10.0
//!   max_cost_per_request_usd: 1.0
//!   large_batch_threshold: 100
//!   realtime_latency_threshold_ms: 100
//!
//! alerts:
//!   budget_warning: 0.8
//!   budget_critical: 0.95
//!   cooldown_secs: 300
//!   poll_interval_secs: 60
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use cache::CacheConfig;
use monitor::{AlertConfig, MonitorConfig};
use provider::{LocalProviderConfig, RemoteProviderConfig};
use router::RoutingPolicy;
use serde::{Deserialize, Serialize};
use shadow::ShadowConfig;
use thiserror::Error;

/// Environment variables applied on top of the file at load time.
pub const ENV_REMOTE_API_KEY: &str = RemoteProviderConfig::API_KEY_ENV;
pub const ENV_DAILY_BUDGET: &str = "HYBRID_EMBED_DAILY_BUDGET";
pub const ENV_CACHE_PATH: &str = "HYBRID_EMBED_CACHE_PATH";

/// Errors that can occur when loading YAML configuration files
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unsupported config version: {0}")]
    UnsupportedVersion(String),
}

/// Top-level configuration for [`HybridEmbeddingService`](crate::HybridEmbeddingService).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HybridConfig {
    /// Configuration format version
    #[serde(default = "default_version")]
    pub version: String,

    /// When false every call goes straight to the local provider.
    #[serde(default = "true_value")]
    pub enabled: bool,

    #[serde(default = "true_value")]
    pub caching: bool,

    /// When false the local provider serves everything unless the caller
    /// explicitly asks for remote.
    #[serde(default = "true_value")]
    pub routing: bool,

    /// Background alert polling and alert handlers. Spend tracking stays on
    /// regardless because the budget rule reads it.
    #[serde(default = "true_value")]
    pub monitoring: bool,

    #[serde(default)]
    pub shadow_mode: bool,

    #[serde(default)]
    pub local: LocalProviderConfig,

    #[serde(default)]
    pub remote: RemoteProviderConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub routing_policy: RoutingPolicy,

    #[serde(default)]
    pub alerts: AlertConfig,

    #[serde(default)]
    pub shadow: ShadowConfig,
}

impl HybridConfig {
    /// Load a YAML configuration file from the given path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse YAML, apply process environment overrides and validate.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigLoadError> {
        Self::from_yaml_with_env(yaml, |name| std::env::var(name).ok())
    }

    /// Like [`from_yaml`](Self::from_yaml) with an explicit variable lookup.
    pub fn from_yaml_with_env<F>(yaml: &str, env: F) -> Result<Self, ConfigLoadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config: HybridConfig = serde_yaml::from_str(yaml)?;
        config.apply_env_overrides(env)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `HYBRID_EMBED_*` overrides. Blank values are ignored.
    pub fn apply_env_overrides<F>(&mut self, env: F) -> Result<(), ConfigLoadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| env(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = var(ENV_REMOTE_API_KEY) {
            self.remote.api_key = Some(key);
        }
        if let Some(raw) = var(ENV_DAILY_BUDGET) {
            self.routing_policy.daily_budget_usd = raw.trim().parse().map_err(|_| {
                ConfigLoadError::Validation(format!("{ENV_DAILY_BUDGET} is not a number: {raw}"))
            })?;
        }
        if let Some(path) = var(ENV_CACHE_PATH) {
            self.cache.path = PathBuf::from(path);
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        match self.version.as_str() {
            "1.0" | "1" => Ok(()),
            v => Err(ConfigLoadError::UnsupportedVersion(v.to_string())),
        }?;

        if !self.local.enabled {
            return Err(ConfigLoadError::Validation(
                "local.enabled must be true; the local provider is the fallback for everything"
                    .to_string(),
            ));
        }
        self.local
            .validate()
            .map_err(|e| section_error("local", e))?;
        if self.remote.enabled {
            self.remote
                .validate()
                .map_err(|e| section_error("remote", e))?;
        }
        self.cache
            .validate()
            .map_err(|e| section_error("cache", e))?;
        self.routing_policy
            .validate()
            .map_err(|e| section_error("routing_policy", e))?;
        self.alerts
            .validate()
            .map_err(|e| section_error("alerts", e))?;
        self.shadow
            .validate()
            .map_err(|e| section_error("shadow", e))?;

        Ok(())
    }

    /// Monitor settings derived from the routing budget.
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            daily_budget_usd: self.routing_policy.daily_budget_usd,
            ..MonitorConfig::default()
        }
    }
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            enabled: true,
            caching: true,
            routing: true,
            monitoring: true,
            shadow_mode: false,
            local: LocalProviderConfig::default(),
            remote: RemoteProviderConfig::default(),
            cache: CacheConfig::default(),
            routing_policy: RoutingPolicy::default(),
            alerts: AlertConfig::default(),
            shadow: ShadowConfig::default(),
        }
    }
}

fn section_error(section: &str, e: impl std::fmt::Display) -> ConfigLoadError {
    ConfigLoadError::Validation(format!("{section}: {e}"))
}

// Helper functions for serde defaults
fn default_version() -> String {
    "1.0".to_string()
}
fn true_value() -> bool {
    true
}
