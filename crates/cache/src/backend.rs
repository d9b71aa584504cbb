use crate::CacheError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

#[cfg(feature = "backend-redb")]
mod redb;
#[cfg(feature = "backend-redb")]
pub use self::redb::RedbBackend;

/// Key-value store behind the L2 tier.
///
/// Calls are blocking; [`TwoTierCache`](crate::TwoTierCache) moves them onto the
/// blocking pool. Expiry lives in the stored envelope, not in the backend.
pub trait CacheBackend: Send + Sync {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), CacheError>;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;
    fn delete(&self, key: &str) -> Result<(), CacheError>;
    /// Visit every entry. Used for expiry sweeps.
    fn scan(
        &self,
        visitor: &mut dyn FnMut(&str, &[u8]) -> Result<(), CacheError>,
    ) -> Result<(), CacheError>;
    fn len(&self) -> Result<usize, CacheError>;
    fn clear(&self) -> Result<(), CacheError>;
}

/// Which store backs the L2 tier, as written in config.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    InMemory,
    Redb,
}

/// A resolved L2 store choice.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum BackendConfig {
    /// Persistent embedded database at `path`.
    Redb { path: PathBuf },
    /// Process-local map, lost on restart.
    #[default]
    InMemory,
}

impl BackendConfig {
    pub fn in_memory() -> Self {
        BackendConfig::InMemory
    }

    pub fn redb<P: Into<PathBuf>>(path: P) -> Self {
        BackendConfig::Redb { path: path.into() }
    }

    pub fn build(&self) -> Result<Arc<dyn CacheBackend>, CacheError> {
        match self {
            BackendConfig::InMemory => Ok(Arc::new(InMemoryBackend::new())),
            BackendConfig::Redb { path } => {
                #[cfg(feature = "backend-redb")]
                {
                    Ok(Arc::new(RedbBackend::open(path)?))
                }
                #[cfg(not(feature = "backend-redb"))]
                {
                    let _ = path;
                    Err(CacheError::InvalidConfig(
                        "redb backend disabled at compile time".into(),
                    ))
                }
            }
        }
    }
}

/// An in-memory backend using a `RwLock` around a `HashMap`.
#[derive(Default)]
pub struct InMemoryBackend {
    records: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheBackend for InMemoryBackend {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        let mut guard = self.records.write().map_err(CacheError::backend)?;
        guard.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let guard = self.records.read().map_err(CacheError::backend)?;
        Ok(guard.get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut guard = self.records.write().map_err(CacheError::backend)?;
        guard.remove(key);
        Ok(())
    }

    fn scan(
        &self,
        visitor: &mut dyn FnMut(&str, &[u8]) -> Result<(), CacheError>,
    ) -> Result<(), CacheError> {
        let guard = self.records.read().map_err(CacheError::backend)?;
        for (key, value) in guard.iter() {
            visitor(key, value)?;
        }
        Ok(())
    }

    fn len(&self) -> Result<usize, CacheError> {
        Ok(self.records.read().map_err(CacheError::backend)?.len())
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.records.write().map_err(CacheError::backend)?.clear();
        Ok(())
    }
}
