//! Tag support for engines that only store plain values.
//!
//! Each tag gets an index set under `tag::<tag>` listing the keys saved with
//! it, and the set `tag::*registry` lists every tag that has an index. A
//! tag clean takes the index in one step and then deletes its members. A key
//! indexed while the clean runs lands in the fresh index, so the next clean
//! of that tag still reaches it.
//!
//! Indices are append-only between cleans: a key that expires or is
//! overwritten untagged stays listed until its tag is cleaned or the whole
//! store is flushed. Removing such a key again is harmless.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::error::{BackendError, BackendResult};
use super::{CacheBackend, Capabilities, CleanMode};
use crate::constants::TAG_REGISTRY_KEY;
use crate::hashing::{is_reserved_key, tag_index_key};

pub struct TagEmulation<B> {
    inner: B,
}

impl<B: CacheBackend> TagEmulation<B> {
    pub fn new(inner: B) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    async fn index(&self, key: &str, tags: &[String]) -> BackendResult<()> {
        let member = vec![key.to_string()];
        for tag in tags {
            self.inner.add_to_set(&tag_index_key(tag), &member).await?;
        }
        self.inner.add_to_set(TAG_REGISTRY_KEY, tags).await?;
        Ok(())
    }

    async fn clean_matching(&self, tags: &[String]) -> BackendResult<usize> {
        let mut removed = 0usize;
        for tag in tags {
            let index = tag_index_key(tag);
            let members = self.inner.take_set(&index).await?;
            for (done, key) in members.iter().enumerate() {
                match self.inner.remove(key).await {
                    Ok(true) => removed += 1,
                    Ok(false) => {}
                    Err(e) => {
                        // Undrained members go back to the index for the next clean.
                        let rest = &members[done..];
                        if let Err(restore) = self.inner.add_to_set(&index, rest).await {
                            warn!(error = %restore, tag = %tag, "Could not restore tag index");
                        }
                        return Err(e);
                    }
                }
            }
        }
        Ok(removed)
    }

    async fn drop_all_indices(&self) -> BackendResult<()> {
        for tag in self.inner.load_set(TAG_REGISTRY_KEY).await? {
            self.inner.remove(&tag_index_key(&tag)).await?;
        }
        self.inner.remove(TAG_REGISTRY_KEY).await?;
        Ok(())
    }
}

#[async_trait]
impl<B: CacheBackend> CacheBackend for TagEmulation<B> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            native_tags: true,
            ..self.inner.capabilities()
        }
    }

    async fn ping(&self) -> BackendResult<()> {
        self.inner.ping().await
    }

    async fn load(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        self.inner.load(key).await
    }

    async fn load_many(&self, keys: &[String]) -> BackendResult<HashMap<String, Vec<u8>>> {
        self.inner.load_many(keys).await
    }

    async fn save(
        &self,
        payload: &[u8],
        key: &str,
        tags: &[String],
        ttl: Option<Duration>,
    ) -> BackendResult<bool> {
        if !tags.is_empty() && is_reserved_key(key) {
            return Err(BackendError::Unsupported {
                backend: self.name(),
                operation: "tagging a reserved key",
            });
        }
        if !self.inner.save(payload, key, &[], ttl).await? {
            return Ok(false);
        }
        if tags.is_empty() {
            return Ok(true);
        }
        // Every tagged key must be listed in its indices.
        if let Err(e) = self.index(key, tags).await {
            warn!(error = %e, "Tag index update failed; removing untracked entry");
            let _ = self.inner.remove(key).await;
            return Err(e);
        }
        Ok(true)
    }

    async fn remove(&self, key: &str) -> BackendResult<bool> {
        self.inner.remove(key).await
    }

    async fn clean(&self, mode: &CleanMode) -> BackendResult<bool> {
        match mode {
            CleanMode::MatchingTag(tags) => {
                let removed = self.clean_matching(tags).await?;
                debug!(backend = self.name(), removed, ?tags, "Emulated tag clean");
                Ok(true)
            }
            CleanMode::NotMatchingTag(_) => Err(BackendError::Unsupported {
                backend: self.name(),
                operation: mode.as_str(),
            }),
            CleanMode::All => {
                self.drop_all_indices().await?;
                self.inner.clean(mode).await
            }
            CleanMode::Old => self.inner.clean(mode).await,
        }
    }

    async fn add_to_set(&self, key: &str, members: &[String]) -> BackendResult<bool> {
        self.inner.add_to_set(key, members).await
    }

    async fn load_set(&self, key: &str) -> BackendResult<Vec<String>> {
        self.inner.load_set(key).await
    }

    async fn take_set(&self, key: &str) -> BackendResult<Vec<String>> {
        self.inner.take_set(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ProcessLocalBackend;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn emulated() -> TagEmulation<ProcessLocalBackend> {
        TagEmulation::new(ProcessLocalBackend::new(1_000))
    }

    #[test]
    fn test_emulation_advertises_tags_and_keeps_multi_load() {
        let backend = emulated();
        let caps = backend.capabilities();
        assert!(caps.native_tags);
        assert!(!caps.multi_load);
    }

    #[tokio::test]
    async fn test_save_writes_index_and_registry() {
        let backend = emulated();

        backend
            .save(b"v", "k1", &tags(&["topic_update", "blog_1"]), None)
            .await
            .unwrap();

        assert_eq!(
            backend.load_set("tag::topic_update").await.unwrap(),
            tags(&["k1"])
        );
        assert_eq!(backend.load_set("tag::blog_1").await.unwrap(), tags(&["k1"]));
        let mut registry = backend.load_set(TAG_REGISTRY_KEY).await.unwrap();
        registry.sort();
        assert_eq!(registry, tags(&["blog_1", "topic_update"]));
    }

    #[tokio::test]
    async fn test_untagged_save_leaves_no_index() {
        let backend = emulated();
        backend.save(b"v", "k", &[], None).await.unwrap();
        assert!(backend.load_set(TAG_REGISTRY_KEY).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_matching_clean_removes_members_and_index() {
        let backend = emulated();

        backend
            .save(b"a", "a", &tags(&["topic_update"]), None)
            .await
            .unwrap();
        backend
            .save(b"b", "b", &tags(&["topic_update", "x"]), None)
            .await
            .unwrap();
        backend.save(b"c", "c", &tags(&["x"]), None).await.unwrap();
        backend.save(b"d", "d", &[], None).await.unwrap();

        backend
            .clean(&CleanMode::matching(&["topic_update"]))
            .await
            .unwrap();

        assert!(backend.load("a").await.unwrap().is_none());
        assert!(backend.load("b").await.unwrap().is_none());
        assert!(backend.load("c").await.unwrap().is_some());
        assert!(backend.load("d").await.unwrap().is_some());
        assert!(backend.load_set("tag::topic_update").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clean_for_unknown_tag_is_a_no_op() {
        let backend = emulated();
        backend.save(b"a", "a", &tags(&["t"]), None).await.unwrap();

        assert!(backend
            .clean(&CleanMode::matching(&["never_used"]))
            .await
            .unwrap());
        assert!(backend.load("a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reserved_keys_cannot_be_tagged() {
        let backend = emulated();
        assert!(matches!(
            backend.save(b"v", "tag::t", &tags(&["t"]), None).await,
            Err(BackendError::Unsupported { .. })
        ));
        assert!(backend.load("tag::t").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_not_matching_is_unsupported() {
        let backend = emulated();
        assert!(matches!(
            backend.clean(&CleanMode::not_matching(&["t"])).await,
            Err(BackendError::Unsupported { .. })
        ));
    }

    #[tokio::test]
    async fn test_clean_all_drops_indices() {
        let backend = emulated();
        backend.save(b"a", "a", &tags(&["t"]), None).await.unwrap();

        backend.clean(&CleanMode::All).await.unwrap();

        assert!(backend.load("a").await.unwrap().is_none());
        assert!(backend.load_set("tag::t").await.unwrap().is_empty());
        assert!(backend.load_set(TAG_REGISTRY_KEY).await.unwrap().is_empty());
    }

    /// Local store that lets another writer tag two keys right after an index is taken.
    struct SaveDuringDrain {
        inner: ProcessLocalBackend,
        fired: AtomicBool,
    }

    #[async_trait]
    impl CacheBackend for SaveDuringDrain {
        fn name(&self) -> &'static str {
            self.inner.name()
        }

        fn capabilities(&self) -> Capabilities {
            self.inner.capabilities()
        }

        async fn ping(&self) -> BackendResult<()> {
            self.inner.ping().await
        }

        async fn load(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
            self.inner.load(key).await
        }

        async fn save(
            &self,
            payload: &[u8],
            key: &str,
            tags: &[String],
            ttl: Option<Duration>,
        ) -> BackendResult<bool> {
            self.inner.save(payload, key, tags, ttl).await
        }

        async fn remove(&self, key: &str) -> BackendResult<bool> {
            self.inner.remove(key).await
        }

        async fn clean(&self, mode: &CleanMode) -> BackendResult<bool> {
            self.inner.clean(mode).await
        }

        async fn add_to_set(&self, key: &str, members: &[String]) -> BackendResult<bool> {
            self.inner.add_to_set(key, members).await
        }

        async fn load_set(&self, key: &str) -> BackendResult<Vec<String>> {
            self.inner.load_set(key).await
        }

        async fn take_set(&self, key: &str) -> BackendResult<Vec<String>> {
            let taken = self.inner.take_set(key).await?;
            if key == "tag::T" && !self.fired.swap(true, Ordering::SeqCst) {
                let writer = TagEmulation::new(self.inner.clone());
                writer.save(b"new", "early", &tags(&["T"]), None).await?;
                writer.save(b"late", "late", &tags(&["T"]), None).await?;
            }
            Ok(taken)
        }
    }

    #[tokio::test]
    async fn test_keys_tagged_during_a_clean_stay_reachable() {
        let backend = TagEmulation::new(SaveDuringDrain {
            inner: ProcessLocalBackend::new(1_000),
            fired: AtomicBool::new(false),
        });
        backend.save(b"old", "early", &tags(&["T"]), None).await.unwrap();

        backend.clean(&CleanMode::matching(&["T"])).await.unwrap();

        let mut index = backend.load_set("tag::T").await.unwrap();
        index.sort();
        assert_eq!(index, tags(&["early", "late"]));

        backend.clean(&CleanMode::matching(&["T"])).await.unwrap();

        assert!(backend.load("early").await.unwrap().is_none());
        assert!(backend.load("late").await.unwrap().is_none());
        assert!(backend.load_set("tag::T").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tag_clean_reaches_entries_under_capacity_pressure() {
        let backend = TagEmulation::new(ProcessLocalBackend::new(50));
        backend.save(b"v", "victim", &tags(&["T"]), None).await.unwrap();

        let many: Vec<String> = (0..200).map(|i| format!("noise_{i}")).collect();
        for _ in 0..5 {
            backend.save(b"o", "other", &many, None).await.unwrap();
        }

        backend.clean(&CleanMode::matching(&["T"])).await.unwrap();

        assert!(backend.load("victim").await.unwrap().is_none());
    }
}
