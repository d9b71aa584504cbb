use thiserror::Error;

/// Errors raised by cache backends and the entry codec.
///
/// [`TwoTierCache`](crate::TwoTierCache) never returns these from lookups; it logs
/// them and degrades to a miss. They surface only from construction and direct
/// backend use.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("cache entry codec error: {0}")]
    Codec(String),
    #[error("invalid cache config: {0}")]
    InvalidConfig(String),
}

impl CacheError {
    pub fn backend<E: ToString>(e: E) -> Self {
        CacheError::Backend(e.to_string())
    }
}

impl From<bincode::error::EncodeError> for CacheError {
    fn from(e: bincode::error::EncodeError) -> Self {
        CacheError::Codec(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for CacheError {
    fn from(e: bincode::error::DecodeError) -> Self {
        CacheError::Codec(e.to_string())
    }
}
