//! Timing decorator for backends.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::trace;

use super::error::BackendResult;
use super::{CacheBackend, Capabilities, CleanMode};

/// Backend call kinds reported to a [`ProfileSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    Ping,
    Load,
    LoadMany,
    Save,
    Remove,
    Clean,
    AddToSet,
    LoadSet,
    TakeSet,
}

impl BackendOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendOp::Ping => "ping",
            BackendOp::Load => "load",
            BackendOp::LoadMany => "load_many",
            BackendOp::Save => "save",
            BackendOp::Remove => "remove",
            BackendOp::Clean => "clean",
            BackendOp::AddToSet => "add_to_set",
            BackendOp::LoadSet => "load_set",
            BackendOp::TakeSet => "take_set",
        }
    }
}

impl fmt::Display for BackendOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives one record per backend call.
pub trait ProfileSink: Send + Sync {
    fn record(&self, elapsed: Duration, op: BackendOp);
}

/// Wraps a backend and reports the wall time of every call to a sink.
///
/// Failed calls are reported too, so the sink sees every round-trip.
pub struct Profiled<B> {
    inner: B,
    sink: Arc<dyn ProfileSink>,
}

impl<B: CacheBackend> Profiled<B> {
    pub fn new(inner: B, sink: Arc<dyn ProfileSink>) -> Self {
        Self { inner, sink }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    fn finish(&self, op: BackendOp, started: Instant) {
        let elapsed = started.elapsed();
        trace!(
            backend = self.inner.name(),
            op = op.as_str(),
            elapsed_us = elapsed.as_micros() as u64,
            "Backend call"
        );
        self.sink.record(elapsed, op);
    }
}

#[async_trait]
impl<B: CacheBackend> CacheBackend for Profiled<B> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    async fn ping(&self) -> BackendResult<()> {
        let started = Instant::now();
        let result = self.inner.ping().await;
        self.finish(BackendOp::Ping, started);
        result
    }

    async fn load(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        let started = Instant::now();
        let result = self.inner.load(key).await;
        self.finish(BackendOp::Load, started);
        result
    }

    async fn load_many(&self, keys: &[String]) -> BackendResult<HashMap<String, Vec<u8>>> {
        let started = Instant::now();
        let result = self.inner.load_many(keys).await;
        self.finish(BackendOp::LoadMany, started);
        result
    }

    async fn save(
        &self,
        payload: &[u8],
        key: &str,
        tags: &[String],
        ttl: Option<Duration>,
    ) -> BackendResult<bool> {
        let started = Instant::now();
        let result = self.inner.save(payload, key, tags, ttl).await;
        self.finish(BackendOp::Save, started);
        result
    }

    async fn remove(&self, key: &str) -> BackendResult<bool> {
        let started = Instant::now();
        let result = self.inner.remove(key).await;
        self.finish(BackendOp::Remove, started);
        result
    }

    async fn clean(&self, mode: &CleanMode) -> BackendResult<bool> {
        let started = Instant::now();
        let result = self.inner.clean(mode).await;
        self.finish(BackendOp::Clean, started);
        result
    }

    async fn add_to_set(&self, key: &str, members: &[String]) -> BackendResult<bool> {
        let started = Instant::now();
        let result = self.inner.add_to_set(key, members).await;
        self.finish(BackendOp::AddToSet, started);
        result
    }

    async fn load_set(&self, key: &str) -> BackendResult<Vec<String>> {
        let started = Instant::now();
        let result = self.inner.load_set(key).await;
        self.finish(BackendOp::LoadSet, started);
        result
    }

    async fn take_set(&self, key: &str) -> BackendResult<Vec<String>> {
        let started = Instant::now();
        let result = self.inner.take_set(key).await;
        self.finish(BackendOp::TakeSet, started);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ProcessLocalBackend;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        ops: Mutex<Vec<BackendOp>>,
    }

    impl ProfileSink for RecordingSink {
        fn record(&self, _elapsed: Duration, op: BackendOp) {
            self.ops.lock().push(op);
        }
    }

    #[tokio::test]
    async fn test_every_call_reaches_the_sink() {
        let sink = Arc::new(RecordingSink::default());
        let backend = Profiled::new(ProcessLocalBackend::new(16), sink.clone());

        backend.save(b"v", "k", &[], None).await.unwrap();
        backend.load("k").await.unwrap();
        backend.load_many(&["k".to_string()]).await.unwrap();
        backend.remove("k").await.unwrap();

        assert_eq!(
            *sink.ops.lock(),
            vec![
                BackendOp::Save,
                BackendOp::Load,
                BackendOp::LoadMany,
                BackendOp::Remove
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_calls_are_recorded() {
        let sink = Arc::new(RecordingSink::default());
        let backend = Profiled::new(ProcessLocalBackend::new(16), sink.clone());

        let result = backend.clean(&CleanMode::matching(&["t"])).await;
        assert!(result.is_err());
        assert_eq!(*sink.ops.lock(), vec![BackendOp::Clean]);
    }

    #[test]
    fn test_profiled_forwards_metadata() {
        let sink = Arc::new(RecordingSink::default());
        let backend = Profiled::new(ProcessLocalBackend::new(16), sink);
        assert_eq!(backend.name(), "process-local");
        assert_eq!(backend.capabilities(), Capabilities::default());
    }
}
