//! Test double that can be switched into a failing state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::error::{BackendError, BackendResult};
use super::{CacheBackend, Capabilities, CleanMode, ProcessLocalBackend, TagEmulation};

const SIMULATED_TIMEOUT: Duration = Duration::from_millis(1);

/// In-memory backend whose calls fail with [`BackendError::Timeout`] while `failing` is set.
///
/// Advertises both capabilities so the façade's multi-load and tag paths are
/// taken against it. Tags are emulated over the local store, so tag cleans
/// really remove entries and `NotMatchingTag` is unsupported.
pub struct FlakyBackend {
    inner: TagEmulation<ProcessLocalBackend>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl FlakyBackend {
    pub fn new() -> Self {
        Self {
            inner: TagEmulation::new(ProcessLocalBackend::new(10_000)),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        let backend = Self::new();
        backend.set_failing(true);
        backend
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of calls received, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> BackendResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(BackendError::Timeout(SIMULATED_TIMEOUT))
        } else {
            Ok(())
        }
    }
}

impl Default for FlakyBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for FlakyBackend {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            native_tags: true,
            multi_load: true,
        }
    }

    async fn ping(&self) -> BackendResult<()> {
        self.check()
    }

    async fn load(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        self.check()?;
        self.inner.load(key).await
    }

    async fn load_many(&self, keys: &[String]) -> BackendResult<HashMap<String, Vec<u8>>> {
        self.check()?;
        self.inner.load_many(keys).await
    }

    async fn save(
        &self,
        payload: &[u8],
        key: &str,
        tags: &[String],
        ttl: Option<Duration>,
    ) -> BackendResult<bool> {
        self.check()?;
        self.inner.save(payload, key, tags, ttl).await
    }

    async fn remove(&self, key: &str) -> BackendResult<bool> {
        self.check()?;
        self.inner.remove(key).await
    }

    async fn clean(&self, mode: &CleanMode) -> BackendResult<bool> {
        self.check()?;
        self.inner.clean(mode).await
    }

    async fn add_to_set(&self, key: &str, members: &[String]) -> BackendResult<bool> {
        self.check()?;
        self.inner.add_to_set(key, members).await
    }

    async fn load_set(&self, key: &str) -> BackendResult<Vec<String>> {
        self.check()?;
        self.inner.load_set(key).await
    }

    async fn take_set(&self, key: &str) -> BackendResult<Vec<String>> {
        self.check()?;
        self.inner.take_set(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_tag_clean_really_removes() {
        let backend = FlakyBackend::new();
        backend.save(b"a", "a", &tags(&["T"]), None).await.unwrap();
        backend.save(b"b", "b", &[], None).await.unwrap();

        assert!(backend.clean(&CleanMode::matching(&["T"])).await.unwrap());

        assert!(backend.load("a").await.unwrap().is_none());
        assert!(backend.load("b").await.unwrap().is_some());
        assert!(matches!(
            backend.clean(&CleanMode::not_matching(&["T"])).await,
            Err(BackendError::Unsupported { .. })
        ));
    }

    #[tokio::test]
    async fn test_failing_calls_are_counted() {
        let backend = FlakyBackend::failing();
        assert!(matches!(
            backend.load("k").await,
            Err(BackendError::Timeout(_))
        ));
        backend.set_failing(false);
        assert!(backend.load("k").await.unwrap().is_none());
        assert_eq!(backend.calls(), 2);
    }
}
