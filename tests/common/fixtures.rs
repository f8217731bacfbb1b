//! Shared builders for integration tests.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tagcache::cache::CacheService;
use tagcache::config::{BackendKind, Config};
use tagcache::reconcile::{BatchLoader, Entity};

pub const TOPIC_UPDATE_TAG: &str = "topic_update";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: u64,
    pub blog_id: u64,
    pub title: String,
}

impl Entity for Topic {
    type Id = u64;

    fn id(&self) -> u64 {
        self.id
    }
}

pub fn topic(id: u64) -> Topic {
    Topic {
        id,
        blog_id: id % 3,
        title: format!("Topic #{id}"),
    }
}

/// Configuration with both sweeps off, so tests see only their own calls.
pub fn quiet_config(backend: BackendKind) -> Config {
    Config {
        backend,
        key_prefix: "it_".to_string(),
        sweep_odds: 0,
        sweep_interval: Duration::ZERO,
        ..Default::default()
    }
}

pub async fn file_cache(dir: &Path) -> CacheService {
    let config = Config {
        cache_dir: dir.to_path_buf(),
        directory_level: 2,
        ..quiet_config(BackendKind::File)
    };
    CacheService::from_config(&config)
        .await
        .expect("file cache should start")
}

pub async fn local_cache() -> CacheService {
    CacheService::from_config(&quiet_config(BackendKind::ProcessLocal))
        .await
        .expect("local cache should start")
}

/// Topic table standing in for the database.
#[derive(Default)]
pub struct TopicTable {
    rows: Mutex<Vec<Topic>>,
    batch_queries: AtomicUsize,
    list_queries: AtomicUsize,
}

impl TopicTable {
    pub fn with_ids(ids: &[u64]) -> Self {
        let table = Self::default();
        for &id in ids {
            table.insert(topic(id));
        }
        table
    }

    pub fn insert(&self, row: Topic) {
        self.rows.lock().push(row);
    }

    /// Ids of the newest `limit` topics, newest first.
    pub fn newest_ids(&self, limit: usize) -> Vec<u64> {
        self.list_queries.fetch_add(1, Ordering::SeqCst);
        let mut ids: Vec<u64> = self.rows.lock().iter().map(|t| t.id).collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        ids.truncate(limit);
        ids
    }

    pub fn batch_queries(&self) -> usize {
        self.batch_queries.load(Ordering::SeqCst)
    }

    pub fn list_queries(&self) -> usize {
        self.list_queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BatchLoader<Topic> for TopicTable {
    type Error = std::convert::Infallible;

    async fn load_batch(&self, ids: &[u64]) -> Result<Vec<Topic>, Self::Error> {
        self.batch_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|t| ids.contains(&t.id))
            .cloned()
            .collect())
    }
}
