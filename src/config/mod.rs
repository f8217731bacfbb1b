//! Environment-backed configuration.
//!
//! Every setting has a default. Override with `TAGCACHE_*` environment variables.

pub mod error;


pub use error::ConfigError;

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{
    DEFAULT_BACKEND_TIMEOUT_MS, DEFAULT_KEY_PREFIX, DEFAULT_LOCAL_CAPACITY,
    DEFAULT_SWEEP_INTERVAL_SECS, DEFAULT_SWEEP_ODDS, MAX_DIRECTORY_LEVEL,
};

/// Storage engine selection, decided once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// One file per entry on local disk. Supports tags natively.
    #[default]
    File,
    /// Redis nodes with client-side sharding.
    DistributedMemory,
    /// In-process memory, lost on restart.
    ProcessLocal,
}

impl BackendKind {
    /// Returns the canonical config spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::File => "file",
            BackendKind::DistributedMemory => "memory",
            BackendKind::ProcessLocal => "local",
        }
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "file" => Ok(Self::File),
            "memory" | "distributed-memory" | "redis" => Ok(Self::DistributedMemory),
            "local" | "process-local" => Ok(Self::ProcessLocal),
            _ => Err(ConfigError::UnknownBackend {
                value: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache configuration loaded from environment variables.
///
/// Use [`Config::from_env`] to read `TAGCACHE_*` overrides on top of defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Master switch. A disabled cache reports every lookup as a miss. Default: `true`.
    pub enabled: bool,

    /// Storage engine. Default: [`BackendKind::File`].
    pub backend: BackendKind,

    /// Prefix mixed into every logical name before hashing. Default: `tagcache_`.
    pub key_prefix: String,

    /// Root directory of the file backend. Default: `./.cache`.
    pub cache_dir: PathBuf,

    /// Hashed sub-directory levels of the file backend. Default: `0`.
    pub directory_level: u8,

    /// Redis node URLs of the distributed-memory backend.
    pub nodes: Vec<String>,

    /// Redis key namespace. Default: `tagcache:`.
    pub namespace: String,

    /// Per-command timeout of the distributed-memory backend. Default: 250ms.
    pub backend_timeout: Duration,

    /// Max entries of the process-local backend. Default: `100_000`.
    pub local_capacity: u64,

    /// One-in-N odds of sweeping expired entries at construction (`0` = never). Default: `50`.
    pub sweep_odds: u32,

    /// Janitor period (`0` = no janitor). Default: 300s.
    pub sweep_interval: Duration,

    /// Cache id lists as one composite entry instead of one entry per id. Default: `false`.
    pub solid: bool,
}

/// Default Redis node used when `TAGCACHE_NODES` is not set.
pub const DEFAULT_NODE: &str = "redis://127.0.0.1:6379";

/// Default Redis key namespace.
pub const DEFAULT_NAMESPACE: &str = "tagcache:";

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: BackendKind::default(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            cache_dir: PathBuf::from("./.cache"),
            directory_level: 0,
            nodes: vec![DEFAULT_NODE.to_string()],
            namespace: DEFAULT_NAMESPACE.to_string(),
            backend_timeout: Duration::from_millis(DEFAULT_BACKEND_TIMEOUT_MS),
            local_capacity: DEFAULT_LOCAL_CAPACITY,
            sweep_odds: DEFAULT_SWEEP_ODDS,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            solid: false,
        }
    }
}

impl Config {
    const ENV_ENABLED: &'static str = "TAGCACHE_ENABLED";
    const ENV_BACKEND: &'static str = "TAGCACHE_BACKEND";
    const ENV_PREFIX: &'static str = "TAGCACHE_PREFIX";
    const ENV_DIR: &'static str = "TAGCACHE_DIR";
    const ENV_DIRECTORY_LEVEL: &'static str = "TAGCACHE_DIRECTORY_LEVEL";
    const ENV_NODES: &'static str = "TAGCACHE_NODES";
    const ENV_NAMESPACE: &'static str = "TAGCACHE_NAMESPACE";
    const ENV_TIMEOUT_MS: &'static str = "TAGCACHE_TIMEOUT_MS";
    const ENV_LOCAL_CAPACITY: &'static str = "TAGCACHE_LOCAL_CAPACITY";
    const ENV_SWEEP_ODDS: &'static str = "TAGCACHE_SWEEP_ODDS";
    const ENV_SWEEP_INTERVAL_SECS: &'static str = "TAGCACHE_SWEEP_INTERVAL_SECS";
    const ENV_SOLID: &'static str = "TAGCACHE_SOLID";

    /// Loads configuration from environment variables (falling back to defaults).
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let enabled = Self::parse_bool_from_env(Self::ENV_ENABLED, defaults.enabled)?;
        let backend = match env::var(Self::ENV_BACKEND) {
            Ok(value) => value.parse()?,
            Err(_) => defaults.backend,
        };
        let key_prefix = Self::parse_string_from_env(Self::ENV_PREFIX, defaults.key_prefix);
        let cache_dir = Self::parse_path_from_env(Self::ENV_DIR, defaults.cache_dir);
        let directory_level =
            Self::parse_number_from_env(Self::ENV_DIRECTORY_LEVEL, defaults.directory_level)?;
        let nodes = Self::parse_list_from_env(Self::ENV_NODES).unwrap_or(defaults.nodes);
        let namespace = Self::parse_string_from_env(Self::ENV_NAMESPACE, defaults.namespace);
        let backend_timeout = Self::parse_number_from_env(
            Self::ENV_TIMEOUT_MS,
            defaults.backend_timeout.as_millis() as u64,
        )
        .map(Duration::from_millis)?;
        let local_capacity =
            Self::parse_number_from_env(Self::ENV_LOCAL_CAPACITY, defaults.local_capacity)?;
        let sweep_odds = Self::parse_number_from_env(Self::ENV_SWEEP_ODDS, defaults.sweep_odds)?;
        let sweep_interval = Self::parse_number_from_env(
            Self::ENV_SWEEP_INTERVAL_SECS,
            defaults.sweep_interval.as_secs(),
        )
        .map(Duration::from_secs)?;
        let solid = Self::parse_bool_from_env(Self::ENV_SOLID, defaults.solid)?;

        Ok(Self {
            enabled,
            backend,
            key_prefix,
            cache_dir,
            directory_level,
            nodes,
            namespace,
            backend_timeout,
            local_capacity,
            sweep_odds,
            sweep_interval,
            solid,
        })
    }

    /// Validates the settings relevant to the selected backend (does not create directories).
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.backend {
            BackendKind::File => {
                if self.cache_dir.exists() && !self.cache_dir.is_dir() {
                    return Err(ConfigError::NotADirectory {
                        path: self.cache_dir.clone(),
                    });
                }
                if self.directory_level > MAX_DIRECTORY_LEVEL {
                    return Err(ConfigError::InvalidDirectoryLevel {
                        value: self.directory_level,
                        max: MAX_DIRECTORY_LEVEL,
                    });
                }
            }
            BackendKind::DistributedMemory => {
                if self.nodes.is_empty() {
                    return Err(ConfigError::NoNodes);
                }
                if let Some(bad) = self
                    .nodes
                    .iter()
                    .find(|n| !n.starts_with("redis://") && !n.starts_with("rediss://"))
                {
                    return Err(ConfigError::InvalidNode { value: bad.clone() });
                }
            }
            BackendKind::ProcessLocal => {}
        }

        Ok(())
    }

    /// Returns the janitor period, or `None` when the janitor is disabled.
    pub fn janitor_interval(&self) -> Option<Duration> {
        (!self.sweep_interval.is_zero()).then_some(self.sweep_interval)
    }

    fn parse_bool_from_env(var_name: &'static str, default: bool) -> Result<bool, ConfigError> {
        match env::var(var_name) {
            Ok(value) => match value.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::BoolParseError {
                    name: var_name,
                    value,
                }),
            },
            Err(_) => Ok(default),
        }
    }

    fn parse_number_from_env<T>(var_name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr<Err = std::num::ParseIntError>,
    {
        match env::var(var_name) {
            Ok(value) => value
                .trim()
                .parse()
                .map_err(|e| ConfigError::NumberParseError {
                    name: var_name,
                    value,
                    source: e,
                }),
            Err(_) => Ok(default),
        }
    }

    fn parse_path_from_env(var_name: &str, default: PathBuf) -> PathBuf {
        env::var(var_name).map(PathBuf::from).unwrap_or(default)
    }

    fn parse_string_from_env(var_name: &str, default: String) -> String {
        env::var(var_name).unwrap_or(default)
    }

    fn parse_list_from_env(var_name: &str) -> Option<Vec<String>> {
        env::var(var_name).ok().map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
    }
}
