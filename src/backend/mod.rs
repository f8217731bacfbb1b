//! Storage backends and the decorators layered on top of them.
//!
//! Every engine implements [`CacheBackend`]. Engines without native tag
//! support are wrapped in [`TagEmulation`]; every engine is wrapped in
//! [`Profiled`] so the façade can keep call statistics. The chain is built
//! once at startup by [`build_backend`].

pub mod distributed;
pub mod error;
pub mod factory;
pub mod file;
pub mod local;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod profiler;
pub mod record;
pub mod tagging;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use distributed::DistributedMemoryBackend;
pub use error::{BackendError, BackendResult};
pub use factory::build_backend;
pub use file::FileBackend;
pub use local::ProcessLocalBackend;
#[cfg(any(test, feature = "mock"))]
pub use mock::FlakyBackend;
pub use profiler::{BackendOp, ProfileSink, Profiled};
pub use record::StoredRecord;
pub use tagging::TagEmulation;

/// Which entries a [`CacheBackend::clean`] call removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanMode {
    /// Every entry (and every tag index).
    All,
    /// Only entries that have already expired.
    Old,
    /// Entries carrying at least one of the tags.
    MatchingTag(Vec<String>),
    /// Entries carrying none of the tags.
    NotMatchingTag(Vec<String>),
}

impl CleanMode {
    /// Builds [`CleanMode::MatchingTag`] from borrowed tags.
    pub fn matching<S: AsRef<str>>(tags: &[S]) -> Self {
        CleanMode::MatchingTag(tags.iter().map(|t| t.as_ref().to_string()).collect())
    }

    /// Builds [`CleanMode::NotMatchingTag`] from borrowed tags.
    pub fn not_matching<S: AsRef<str>>(tags: &[S]) -> Self {
        CleanMode::NotMatchingTag(tags.iter().map(|t| t.as_ref().to_string()).collect())
    }

    /// Short name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            CleanMode::All => "all",
            CleanMode::Old => "old",
            CleanMode::MatchingTag(_) => "matching_tag",
            CleanMode::NotMatchingTag(_) => "not_matching_tag",
        }
    }
}

/// Optional features a backend provides natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// `save` honors tags and `clean` supports the tag modes.
    pub native_tags: bool,
    /// `load_many` is a single round-trip rather than a loop.
    pub multi_load: bool,
}

#[async_trait]
/// Uniform interface over storage engines.
///
/// Keys are already hashed by the façade. Adapters report transport problems
/// as [`BackendError`] and never panic on them.
pub trait CacheBackend: Send + Sync {
    /// Short backend name for logs and errors.
    fn name(&self) -> &'static str;

    /// Optional features this backend provides.
    fn capabilities(&self) -> Capabilities;

    /// Checks that the physical store is reachable.
    async fn ping(&self) -> BackendResult<()>;

    /// Returns the stored payload, or `None` if absent or expired.
    async fn load(&self, key: &str) -> BackendResult<Option<Vec<u8>>>;

    /// Returns the payloads of every present key. Absent keys are left out.
    async fn load_many(&self, keys: &[String]) -> BackendResult<HashMap<String, Vec<u8>>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(payload) = self.load(key).await? {
                found.insert(key.clone(), payload);
            }
        }
        Ok(found)
    }

    /// Stores `payload` under `key`. `ttl = None` means no expiry.
    async fn save(
        &self,
        payload: &[u8],
        key: &str,
        tags: &[String],
        ttl: Option<Duration>,
    ) -> BackendResult<bool>;

    /// Deletes `key` (and any set stored under it). Returns `false` if nothing was there.
    async fn remove(&self, key: &str) -> BackendResult<bool>;

    /// Removes the entries selected by `mode`.
    async fn clean(&self, mode: &CleanMode) -> BackendResult<bool>;

    /// Adds `members` to the set stored under `key`, without losing concurrent adds.
    async fn add_to_set(&self, key: &str, members: &[String]) -> BackendResult<bool>;

    /// Returns the members of the set stored under `key` (empty if absent).
    async fn load_set(&self, key: &str) -> BackendResult<Vec<String>>;

    /// Empties the set stored under `key` and returns what it held, as one step.
    ///
    /// A member added concurrently ends up either in the returned list or in
    /// the set left behind, never in neither.
    async fn take_set(&self, key: &str) -> BackendResult<Vec<String>>;
}

#[async_trait]
impl<B: CacheBackend + ?Sized> CacheBackend for Arc<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn capabilities(&self) -> Capabilities {
        (**self).capabilities()
    }

    async fn ping(&self) -> BackendResult<()> {
        (**self).ping().await
    }

    async fn load(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        (**self).load(key).await
    }

    async fn load_many(&self, keys: &[String]) -> BackendResult<HashMap<String, Vec<u8>>> {
        (**self).load_many(keys).await
    }

    async fn save(
        &self,
        payload: &[u8],
        key: &str,
        tags: &[String],
        ttl: Option<Duration>,
    ) -> BackendResult<bool> {
        (**self).save(payload, key, tags, ttl).await
    }

    async fn remove(&self, key: &str) -> BackendResult<bool> {
        (**self).remove(key).await
    }

    async fn clean(&self, mode: &CleanMode) -> BackendResult<bool> {
        (**self).clean(mode).await
    }

    async fn add_to_set(&self, key: &str, members: &[String]) -> BackendResult<bool> {
        (**self).add_to_set(key, members).await
    }

    async fn load_set(&self, key: &str) -> BackendResult<Vec<String>> {
        (**self).load_set(key).await
    }

    async fn take_set(&self, key: &str) -> BackendResult<Vec<String>> {
        (**self).take_set(key).await
    }
}
