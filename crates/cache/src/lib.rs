//! Two-tier embedding cache.
//!
//! L1 is a bounded in-process LRU; L2 is a [`CacheBackend`] (redb on disk by
//! default) holding bincode envelopes with an absolute expiry. Lookups walk L1
//! then L2 and promote L2 hits. Writes go to both tiers.
//!
//! Backend and codec failures never surface from [`TwoTierCache::get`] or
//! [`TwoTierCache::set`]: they are logged and the cache behaves as a miss.
//!
//! ```no_run
//! use cache::{CacheConfig, CacheKey, TwoTierCache};
//! use provider::ProviderKind;
//!
//! # async fn demo() -> Result<(), cache::CacheError> {
//! let cache = TwoTierCache::new(CacheConfig::default())?;
//! let key = CacheKey::new("quarterly revenue", ProviderKind::Local, "all-MiniLM-L6-v2", 384);
//! if let Some(hit) = cache.get(&key).await {
//!     println!("served from {:?}", hit.tier);
//! }
//! # Ok(())
//! # }
//! ```

mod backend;
mod error;
mod key;
mod l1;

pub use backend::{BackendConfig, BackendKind, CacheBackend, InMemoryBackend};
#[cfg(feature = "backend-redb")]
pub use backend::RedbBackend;
pub use error::CacheError;
pub use key::CacheKey;

use chrono::Utc;
use l1::L1Cache;
use provider::{EmbeddingResult, ProviderKind};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub l1_capacity: usize,
    pub backend: BackendKind,
    /// Database file for the redb backend.
    pub path: PathBuf,
    #[serde(with = "provider::serde_duration::secs", rename = "local_ttl_secs")]
    pub local_ttl: Duration,
    #[serde(with = "provider::serde_duration::secs", rename = "remote_ttl_secs")]
    pub remote_ttl: Duration,
    /// Pre-populate the cache at service startup.
    pub warm_up: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_capacity: 10_000,
            backend: BackendKind::InMemory,
            path: PathBuf::from("data/embedding_cache.redb"),
            local_ttl: Duration::from_secs(24 * 60 * 60),
            remote_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            warm_up: false,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.l1_capacity == 0 {
            return Err(CacheError::InvalidConfig("l1_capacity must be > 0".into()));
        }
        if self.local_ttl.is_zero() || self.remote_ttl.is_zero() {
            return Err(CacheError::InvalidConfig("cache TTLs must be > 0".into()));
        }
        if self.local_ttl > MAX_TTL || self.remote_ttl > MAX_TTL {
            return Err(CacheError::InvalidConfig(format!(
                "cache TTLs must be at most {} seconds",
                MAX_TTL.as_secs()
            )));
        }
        if self.backend == BackendKind::Redb && self.path.as_os_str().is_empty() {
            return Err(CacheError::InvalidConfig("redb backend requires a path".into()));
        }
        Ok(())
    }

    pub fn backend_config(&self) -> BackendConfig {
        match self.backend {
            BackendKind::InMemory => BackendConfig::InMemory,
            BackendKind::Redb => BackendConfig::redb(self.path.clone()),
        }
    }

    pub fn ttl_for(&self, provider: ProviderKind) -> Duration {
        match provider {
            ProviderKind::Local => self.local_ttl,
            ProviderKind::Remote => self.remote_ttl,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    L1,
    L2,
}

impl CacheTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTier::L1 => "l1",
            CacheTier::L2 => "l2",
        }
    }
}

/// A cache hit. `result.cache_hit` is always `true`.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheLookup {
    pub result: EmbeddingResult,
    pub tier: CacheTier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub l1_len: usize,
    pub l1_capacity: usize,
    /// `None` when the backend could not be counted.
    pub l2_len: Option<usize>,
}

/// What L2 stores under each key.
#[derive(Serialize, Deserialize)]
struct StoredEntry {
    expires_at_ms: i64,
    result: EmbeddingResult,
}

impl StoredEntry {
    fn encode(&self) -> Result<Vec<u8>, CacheError> {
        Ok(bincode::serde::encode_to_vec(self, bincode::config::standard())?)
    }

    fn decode(bytes: &[u8]) -> Result<Self, CacheError> {
        let (entry, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
        Ok(entry)
    }
}

/// Longest TTL a config may ask for: ten years.
pub const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// `now + ttl` for the L1 tier, saturating instead of overflowing.
fn expiry_after(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl.min(MAX_TTL)).unwrap_or(now)
}

fn ttl_ms(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

pub struct TwoTierCache {
    config: CacheConfig,
    l1: L1Cache,
    l2: Arc<dyn CacheBackend>,
}

impl TwoTierCache {
    pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
        config.validate()?;
        let backend = config.backend_config().build()?;
        Self::with_backend(config, backend)
    }

    /// Use an already constructed L2 store; `config.backend` and `config.path` are ignored.
    pub fn with_backend(
        config: CacheConfig,
        backend: Arc<dyn CacheBackend>,
    ) -> Result<Self, CacheError> {
        config.validate()?;
        let capacity = NonZeroUsize::new(config.l1_capacity)
            .ok_or_else(|| CacheError::InvalidConfig("l1_capacity must be > 0".into()))?;
        Ok(Self {
            l1: L1Cache::new(capacity),
            l2: backend,
            config,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub async fn get(&self, key: &CacheKey) -> Option<CacheLookup> {
        let started = Instant::now();
        let rendered = key.render();

        if let Some(result) = self.l1.get(&rendered, started) {
            return Some(CacheLookup {
                result: result.as_cache_hit(started.elapsed()),
                tier: CacheTier::L1,
            });
        }

        let l2 = Arc::clone(&self.l2);
        let lookup_key = rendered.clone();
        let bytes = match tokio::task::spawn_blocking(move || l2.get(&lookup_key)).await {
            Ok(Ok(Some(bytes))) => bytes,
            Ok(Ok(None)) => return None,
            Ok(Err(e)) => {
                warn!(key = %rendered, error = %e, "l2 lookup failed; treating as miss");
                return None;
            }
            Err(e) => {
                warn!(key = %rendered, error = %e, "l2 lookup task failed; treating as miss");
                return None;
            }
        };

        let entry = match StoredEntry::decode(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %rendered, error = %e, "corrupt l2 entry; dropping");
                self.delete_l2(rendered).await;
                return None;
            }
        };

        let remaining_ms = entry.expires_at_ms - now_ms();
        if remaining_ms <= 0 {
            debug!(key = %rendered, "l2 entry expired");
            self.delete_l2(rendered).await;
            return None;
        }

        let expires_at = expiry_after(Instant::now(), Duration::from_millis(remaining_ms as u64));
        self.l1.put(rendered, entry.result.clone(), expires_at);
        Some(CacheLookup {
            result: entry.result.as_cache_hit(started.elapsed()),
            tier: CacheTier::L2,
        })
    }

    /// Store `result` in both tiers with the TTL of its provider.
    pub async fn set(&self, key: &CacheKey, result: &EmbeddingResult) {
        let ttl = self.config.ttl_for(key.provider());
        let rendered = key.render();
        let mut stored = result.clone();
        stored.cache_hit = false;

        self.l1
            .put(rendered.clone(), stored.clone(), expiry_after(Instant::now(), ttl));

        let entry = StoredEntry {
            expires_at_ms: now_ms().saturating_add(ttl_ms(ttl)),
            result: stored,
        };
        let bytes = match entry.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %rendered, error = %e, "failed to encode cache entry; skipping l2 write");
                return;
            }
        };

        let l2 = Arc::clone(&self.l2);
        let write_key = rendered.clone();
        match tokio::task::spawn_blocking(move || l2.put(&write_key, &bytes)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(key = %rendered, error = %e, "l2 write failed"),
            Err(e) => warn!(key = %rendered, error = %e, "l2 write task failed"),
        }
    }

    pub async fn invalidate(&self, key: &CacheKey) {
        let rendered = key.render();
        self.l1.remove(&rendered);
        self.delete_l2(rendered).await;
    }

    pub async fn clear(&self) -> Result<(), CacheError> {
        self.l1.clear();
        let l2 = Arc::clone(&self.l2);
        tokio::task::spawn_blocking(move || l2.clear())
            .await
            .map_err(CacheError::backend)?
    }

    pub async fn stats(&self) -> CacheStats {
        let l2 = Arc::clone(&self.l2);
        let l2_len = match tokio::task::spawn_blocking(move || l2.len()).await {
            Ok(Ok(len)) => Some(len),
            Ok(Err(e)) => {
                warn!(error = %e, "failed to count l2 entries");
                None
            }
            Err(e) => {
                warn!(error = %e, "l2 count task failed");
                None
            }
        };
        CacheStats {
            l1_len: self.l1.len(),
            l1_capacity: self.l1.capacity(),
            l2_len,
        }
    }

    /// Drop expired and undecodable entries from both tiers. Returns the number
    /// of L2 entries removed.
    pub async fn purge_expired(&self) -> Result<usize, CacheError> {
        self.l1.purge_expired(Instant::now());

        let l2 = Arc::clone(&self.l2);
        let removed = tokio::task::spawn_blocking(move || -> Result<usize, CacheError> {
            let now = now_ms();
            let mut stale = Vec::new();
            l2.scan(&mut |key, bytes| {
                let expired = match StoredEntry::decode(bytes) {
                    Ok(entry) => entry.expires_at_ms <= now,
                    Err(_) => true,
                };
                if expired {
                    stale.push(key.to_string());
                }
                Ok(())
            })?;
            for key in &stale {
                l2.delete(key)?;
            }
            Ok(stale.len())
        })
        .await
        .map_err(CacheError::backend)??;

        if removed > 0 {
            debug!(removed, "purged expired l2 entries");
        }
        Ok(removed)
    }

    async fn delete_l2(&self, key: String) {
        let l2 = Arc::clone(&self.l2);
        let delete_key = key.clone();
        match tokio::task::spawn_blocking(move || l2.delete(&delete_key)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(key = %key, error = %e, "l2 delete failed"),
            Err(e) => warn!(key = %key, error = %e, "l2 delete task failed"),
        }
    }
}
