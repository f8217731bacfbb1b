//! Process-local backend backed by `moka`.
//!
//! Shared memory between worker processes has no portable Rust equivalent, so
//! this engine is scoped to the current process. Every task in the process
//! sees the same entries.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::ops::compute::{CompResult, Op};
use moka::sync::Cache;

use super::error::{BackendError, BackendResult};
use super::record::{StoredRecord, now_millis};
use super::{CacheBackend, Capabilities, CleanMode};

type MemberSet = Arc<BTreeSet<String>>;

#[derive(Clone)]
/// In-process store with a bounded entry count.
///
/// Expiry is checked on read and by [`CleanMode::Old`]; once capacity is
/// reached `moka` evicts the least useful entries. Sets are not bounded, so
/// a tag index only disappears through a tag clean or a flush.
pub struct ProcessLocalBackend {
    entries: Cache<String, Arc<StoredRecord>>,
    sets: Cache<String, MemberSet>,
}

impl ProcessLocalBackend {
    pub fn new(capacity: u64) -> Self {
        Self {
            entries: Cache::builder().max_capacity(capacity).build(),
            sets: Cache::builder().build(),
        }
    }

    /// Approximate number of stored entries (sets excluded).
    pub fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    fn live(&self, key: &str, now_ms: i64) -> Option<Arc<StoredRecord>> {
        let record = self.entries.get(key)?;
        if record.is_expired(now_ms) {
            self.entries.invalidate(key);
            return None;
        }
        Some(record)
    }
}

impl std::fmt::Debug for ProcessLocalBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessLocalBackend")
            .field("entries", &self.entries.entry_count())
            .field("sets", &self.sets.entry_count())
            .finish()
    }
}

#[async_trait]
impl CacheBackend for ProcessLocalBackend {
    fn name(&self) -> &'static str {
        "process-local"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    async fn ping(&self) -> BackendResult<()> {
        Ok(())
    }

    async fn load(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        Ok(self
            .live(key, now_millis())
            .map(|record| record.payload.clone()))
    }

    async fn load_many(&self, keys: &[String]) -> BackendResult<HashMap<String, Vec<u8>>> {
        let now_ms = now_millis();
        Ok(keys
            .iter()
            .filter_map(|key| {
                self.live(key, now_ms)
                    .map(|record| (key.clone(), record.payload.clone()))
            })
            .collect())
    }

    async fn save(
        &self,
        payload: &[u8],
        key: &str,
        tags: &[String],
        ttl: Option<Duration>,
    ) -> BackendResult<bool> {
        let record = StoredRecord::new(payload, tags, ttl, now_millis());
        self.entries.insert(key.to_string(), Arc::new(record));
        Ok(true)
    }

    async fn remove(&self, key: &str) -> BackendResult<bool> {
        let entry = self.entries.remove(key).is_some();
        let set = self.sets.remove(key).is_some();
        Ok(entry || set)
    }

    async fn clean(&self, mode: &CleanMode) -> BackendResult<bool> {
        match mode {
            CleanMode::All => {
                self.entries.invalidate_all();
                self.sets.invalidate_all();
            }
            CleanMode::Old => {
                let now_ms = now_millis();
                let expired: Vec<Arc<String>> = self
                    .entries
                    .iter()
                    .filter(|(_, record)| record.is_expired(now_ms))
                    .map(|(key, _)| key)
                    .collect();
                for key in expired {
                    self.entries.invalidate(key.as_str());
                }
            }
            CleanMode::MatchingTag(_) | CleanMode::NotMatchingTag(_) => {
                return Err(BackendError::Unsupported {
                    backend: self.name(),
                    operation: mode.as_str(),
                });
            }
        }
        Ok(true)
    }

    async fn add_to_set(&self, key: &str, members: &[String]) -> BackendResult<bool> {
        self.sets
            .entry(key.to_string())
            .and_upsert_with(|existing| {
                let mut set = existing
                    .map(|entry| entry.into_value().as_ref().clone())
                    .unwrap_or_default();
                set.extend(members.iter().cloned());
                Arc::new(set)
            });
        Ok(true)
    }

    async fn load_set(&self, key: &str) -> BackendResult<Vec<String>> {
        Ok(self
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn take_set(&self, key: &str) -> BackendResult<Vec<String>> {
        // Same per-key lock as `add_to_set`, so an add lands before or after the take.
        let result = self
            .sets
            .entry(key.to_string())
            .and_compute_with(|existing| match existing {
                Some(_) => Op::Remove,
                None => Op::Nop,
            });
        Ok(match result {
            CompResult::Removed(entry) => entry.into_value().iter().cloned().collect(),
            _ => Vec::new(),
        })
    }
}
