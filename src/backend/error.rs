use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
/// Errors returned by cache backends.
///
/// The façade never surfaces these to callers; every one of them degrades to a
/// cache miss (or a `false` write result).
pub enum BackendError {
    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored record could not be encoded or decoded.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Redis transport or protocol error.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The backend did not answer within the configured timeout.
    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),

    /// The backend cannot perform the requested operation.
    #[error("{backend} backend does not support {operation}")]
    Unsupported {
        /// Backend name.
        backend: &'static str,
        /// Operation name.
        operation: &'static str,
    },

    /// A blocking worker task panicked or was cancelled.
    #[error("blocking task failed: {0}")]
    Join(String),
}

impl From<tokio::task::JoinError> for BackendError {
    fn from(e: tokio::task::JoinError) -> Self {
        BackendError::Join(e.to_string())
    }
}

/// Convenience result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
