//! Cache façade: hashed names, serde encoding, smart shadows and sweeps.

pub mod error;
pub mod janitor;
pub mod life;
pub mod stats;


pub use error::{CacheError, CacheResult};
pub use janitor::Janitor;
pub use life::LifeStore;
pub use stats::{CacheStats, StatsSnapshot};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use crate::backend::{
    CacheBackend, CleanMode, ProcessLocalBackend, Profiled, TagEmulation, build_backend,
};
use crate::config::Config;
use crate::constants::{SMART_SHADOW_EXTRA_TTL, SMART_SHADOW_PREFIX};
use crate::hashing::physical_key;

struct Inner {
    backend: Option<Arc<dyn CacheBackend>>,
    key_prefix: String,
    stats: Arc<CacheStats>,
}

#[derive(Clone)]
/// Public cache API handed to every component that reads or writes cached data.
///
/// Cheap to clone; clones share the backend and the stats. Logical names are
/// hashed with the configured prefix before they reach the backend, and values
/// are stored as JSON.
///
/// No method returns a storage error. A failed read is a miss, a failed write
/// returns `false`, and a disabled cache behaves as permanently empty.
pub struct CacheService {
    inner: Arc<Inner>,
}

impl CacheService {
    /// Builds the service described by `config`.
    ///
    /// Fails if the configuration is invalid or the backend is unreachable.
    /// Runs the one-in-`sweep_odds` expired-entry sweep before returning.
    pub async fn from_config(config: &Config) -> CacheResult<Self> {
        config.validate()?;

        if !config.enabled {
            info!("Cache disabled by configuration");
            return Ok(Self::disabled());
        }

        let stats = Arc::new(CacheStats::new());
        let backend = build_backend(config, stats.clone()).await?;
        let service = Self::new(backend, config.key_prefix.clone(), stats);

        service.sweep_with_odds(config.sweep_odds).await;
        Ok(service)
    }

    /// Wraps an already-built backend. `stats` should be the sink its profiler reports to.
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        key_prefix: impl Into<String>,
        stats: Arc<CacheStats>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend: Some(backend),
                key_prefix: key_prefix.into(),
                stats,
            }),
        }
    }

    /// A cache that stores nothing and reports every lookup as a miss.
    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(Inner {
                backend: None,
                key_prefix: String::new(),
                stats: Arc::new(CacheStats::new()),
            }),
        }
    }

    /// In-process cache with emulated tags, mainly for tests and single-process tools.
    pub fn process_local(capacity: u64, key_prefix: impl Into<String>) -> Self {
        let stats = Arc::new(CacheStats::new());
        let backend = TagEmulation::new(Profiled::new(
            ProcessLocalBackend::new(capacity),
            stats.clone(),
        ));
        Self::new(Arc::new(backend), key_prefix, stats)
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.backend.is_some()
    }

    pub fn key_prefix(&self) -> &str {
        &self.inner.key_prefix
    }

    /// Name of the active backend, or `"disabled"`.
    pub fn backend_name(&self) -> &'static str {
        self.inner
            .backend
            .as_ref()
            .map_or("disabled", |backend| backend.name())
    }

    /// Physical key for a logical name.
    pub fn physical_key(&self, name: &str) -> String {
        physical_key(&self.inner.key_prefix, name)
    }

    /// Returns `true` if the backend answers.
    pub async fn ping(&self) -> bool {
        let Some(backend) = self.backend() else {
            return false;
        };
        match backend.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!(backend = backend.name(), error = %e, "Cache ping failed");
                false
            }
        }
    }

    /// Returns the value stored under `name`.
    #[instrument(level = "debug", skip(self))]
    pub async fn get<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let backend = self.backend()?;
        let key = self.physical_key(name);

        match backend.load(&key).await {
            Ok(Some(bytes)) => {
                debug!("Cache hit");
                decode(name, &bytes)
            }
            Ok(None) => {
                debug!("Cache miss");
                None
            }
            Err(e) => {
                warn!(error = %e, "Cache read failed; treating as miss");
                None
            }
        }
    }

    /// Looks up several names at once.
    ///
    /// Returns `None` when nothing was found, otherwise a map holding only the
    /// names that were found.
    #[instrument(level = "debug", skip_all, fields(requested = names.len()))]
    pub async fn get_many<T, S>(&self, names: &[S]) -> Option<HashMap<String, T>>
    where
        T: DeserializeOwned,
        S: AsRef<str>,
    {
        let backend = self.backend()?;
        if names.is_empty() {
            return None;
        }

        let mut by_key: HashMap<String, &str> = HashMap::with_capacity(names.len());
        let mut keys = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            let key = self.physical_key(name);
            if by_key.insert(key.clone(), name).is_none() {
                keys.push(key);
            }
        }

        let raw = if backend.capabilities().multi_load {
            match backend.load_many(&keys).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(error = %e, "Cache multi-read failed; treating as miss");
                    return None;
                }
            }
        } else {
            let mut raw = HashMap::with_capacity(keys.len());
            for key in &keys {
                match backend.load(key).await {
                    Ok(Some(bytes)) => {
                        raw.insert(key.clone(), bytes);
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Cache read failed; treating as miss"),
                }
            }
            raw
        };

        let found: HashMap<String, T> = raw
            .into_iter()
            .filter_map(|(key, bytes)| {
                let name = *by_key.get(&key)?;
                decode(name, &bytes).map(|value| (name.to_string(), value))
            })
            .collect();

        debug!(found = found.len(), "Cache multi-read");
        (!found.is_empty()).then_some(found)
    }

    /// Stores `value` under `name`. `ttl = None` keeps it until deleted or cleaned.
    #[instrument(level = "debug", skip(self, value))]
    pub async fn set<T>(&self, value: &T, name: &str, tags: &[&str], ttl: Option<Duration>) -> bool
    where
        T: Serialize + ?Sized,
    {
        let Some(backend) = self.backend() else {
            return false;
        };

        let payload = match serde_json::to_vec(value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Cache value could not be encoded");
                return false;
            }
        };
        let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();

        match backend
            .save(&payload, &self.physical_key(name), &tags, ttl)
            .await
        {
            Ok(saved) => saved,
            Err(e) => {
                warn!(error = %e, "Cache write failed");
                false
            }
        }
    }

    /// Removes `name`. Returns `false` if it was not cached.
    #[instrument(level = "debug", skip(self))]
    pub async fn delete(&self, name: &str) -> bool {
        let Some(backend) = self.backend() else {
            return false;
        };
        match backend.remove(&self.physical_key(name)).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(error = %e, "Cache delete failed");
                false
            }
        }
    }

    /// Removes the entries selected by `mode`.
    #[instrument(level = "debug", skip(self, mode), fields(mode = mode.as_str()))]
    pub async fn clean(&self, mode: CleanMode) -> bool {
        let Some(backend) = self.backend() else {
            return false;
        };
        match backend.clean(&mode).await {
            Ok(cleaned) => cleaned,
            Err(e) => {
                warn!(error = %e, "Cache clean failed");
                false
            }
        }
    }

    /// Like [`get`](Self::get), but falls back to the shadow copy written by
    /// [`smart_set`](Self::smart_set) once the primary has expired.
    ///
    /// Never writes. The caller recomputes and calls `smart_set` on a miss of
    /// the primary, while other readers keep getting the shadow.
    pub async fn smart_get<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        if let Some(value) = self.get(name).await {
            return Some(value);
        }
        let value = self.get(&shadow_name(name)).await;
        if value.is_some() {
            debug!(name, "Served from smart shadow");
        }
        value
    }

    /// Writes the untagged shadow copy (living 60s longer) and then the primary.
    pub async fn smart_set<T>(
        &self,
        value: &T,
        name: &str,
        tags: &[&str],
        ttl: Option<Duration>,
    ) -> bool
    where
        T: Serialize + ?Sized,
    {
        let shadow_ttl = ttl.map(|ttl| ttl.saturating_add(SMART_SHADOW_EXTRA_TTL));
        if !self.set(value, &shadow_name(name), &[], shadow_ttl).await {
            debug!(name, "Smart shadow write failed");
        }
        self.set(value, name, tags, ttl).await
    }

    /// Snapshot of the backend call counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Purges expired entries.
    pub async fn sweep(&self) -> bool {
        let cleaned = self.clean(CleanMode::Old).await;
        info!(backend = self.backend_name(), cleaned, "Expired cache entries swept");
        cleaned
    }

    /// Sweeps with probability `1 / odds`; `0` never sweeps. Returns whether a sweep ran.
    pub async fn sweep_with_odds(&self, odds: u32) -> bool {
        if odds == 0 || !self.is_enabled() {
            return false;
        }
        let roll = rand::thread_rng().gen_ratio(1, odds);
        if roll {
            self.sweep().await;
        }
        roll
    }

    /// Starts a [`Janitor`] sweeping every `period`.
    pub fn spawn_janitor(&self, period: Duration) -> Janitor {
        Janitor::spawn(self.clone(), period)
    }

    fn backend(&self) -> Option<&Arc<dyn CacheBackend>> {
        self.inner.backend.as_ref()
    }
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("backend", &self.backend_name())
            .field("key_prefix", &self.inner.key_prefix)
            .finish()
    }
}

/// Logical name of the shadow copy of `name`.
pub fn shadow_name(name: &str) -> String {
    format!("{SMART_SHADOW_PREFIX}{name}")
}

fn decode<T: DeserializeOwned>(name: &str, bytes: &[u8]) -> Option<T> {
    match serde_json::from_slice(bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(name, error = %e, "Cached value could not be decoded; treating as miss");
            None
        }
    }
}
