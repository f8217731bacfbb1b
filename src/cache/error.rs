//! Façade construction errors.

use thiserror::Error;

use crate::backend::BackendError;
use crate::config::{BackendKind, ConfigError};

/// Errors that stop the cache from starting.
///
/// Only construction can fail. Once a [`CacheService`](super::CacheService)
/// exists, backend problems surface as misses.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Configuration was rejected.
    #[error("cache configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The configured backend could not be reached at startup.
    #[error("{backend} cache backend unreachable: {source}")]
    BackendUnreachable {
        backend: BackendKind,
        #[source]
        source: BackendError,
    },
}

/// Result type for façade construction.
pub type CacheResult<T> = Result<T, CacheError>;
