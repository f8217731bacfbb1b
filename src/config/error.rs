//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Backend selector did not name a known backend.
    #[error("wrong type of caching '{value}': expected file, memory or local")]
    UnknownBackend { value: String },

    /// A numeric variable could not be parsed.
    #[error("failed to parse {name}='{value}': {source}")]
    NumberParseError {
        name: &'static str,
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },

    /// A boolean variable was neither truthy nor falsy.
    #[error("failed to parse {name}='{value}': expected true/false, 1/0, yes/no or on/off")]
    BoolParseError { name: &'static str, value: String },

    /// The distributed-memory backend was selected without any node.
    #[error("no cache nodes configured (set TAGCACHE_NODES)")]
    NoNodes,

    /// A node address is not a `redis://` or `rediss://` URL.
    #[error("invalid cache node address '{value}'")]
    InvalidNode { value: String },

    /// Hashed directory level is outside the supported range.
    #[error("invalid directory level {value}: must be between 0 and {max}")]
    InvalidDirectoryLevel { value: u8, max: u8 },

    /// Path exists but is not a directory (when a directory was expected).
    #[error("path is not a directory: {path}")]
    NotADirectory { path: PathBuf },
}
