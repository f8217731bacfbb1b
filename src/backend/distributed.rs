//! Distributed-memory backend over one or more Redis nodes.
//!
//! Keys are sharded on the client: `hash_to_u64(key) % node_count` picks the
//! node, so every process with the same node list agrees on placement. A set
//! lives on the node chosen by its own key. Every command is bounded by the
//! configured timeout.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use redis::aio::MultiplexedConnection;
use tracing::{debug, info};

use super::error::{BackendError, BackendResult};
use super::{CacheBackend, Capabilities, CleanMode};
use crate::hashing::hash_to_u64;

const SCAN_BATCH: usize = 500;

/// Index of the node owning `key`.
#[inline]
pub fn shard_index(key: &str, node_count: usize) -> usize {
    debug_assert!(node_count > 0);
    (hash_to_u64(key.as_bytes()) % node_count as u64) as usize
}

/// Groups `keys` by owning node, keeping their relative order.
pub fn group_by_shard(keys: &[String], node_count: usize) -> Vec<Vec<String>> {
    let mut groups = vec![Vec::new(); node_count];
    for key in keys {
        groups[shard_index(key, node_count)].push(key.clone());
    }
    groups
}

/// Escapes glob metacharacters so `namespace` matches literally in `SCAN MATCH`.
fn literal_pattern(namespace: &str) -> String {
    let mut pattern = String::with_capacity(namespace.len() + 1);
    for c in namespace.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

struct Node {
    url: String,
    conn: MultiplexedConnection,
}

/// Redis-backed cache shared by every process that points at the same nodes.
pub struct DistributedMemoryBackend {
    nodes: Vec<Node>,
    namespace: String,
    timeout: Duration,
}

impl DistributedMemoryBackend {
    /// Opens a multiplexed connection to every node.
    pub async fn connect(
        urls: &[String],
        namespace: impl Into<String>,
        timeout: Duration,
    ) -> BackendResult<Self> {
        let mut nodes = Vec::with_capacity(urls.len());
        for url in urls {
            let client = redis::Client::open(url.as_str())?;
            let conn = tokio::time::timeout(timeout, client.get_multiplexed_async_connection())
                .await
                .map_err(|_| BackendError::Timeout(timeout))??;
            nodes.push(Node {
                url: url.clone(),
                conn,
            });
        }

        info!(nodes = nodes.len(), "Connected to distributed memory cache");

        Ok(Self {
            nodes,
            namespace: namespace.into(),
            timeout,
        })
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }

    fn node_for(&self, key: &str) -> BackendResult<&Node> {
        if self.nodes.is_empty() {
            return Err(BackendError::Unsupported {
                backend: self.name(),
                operation: "commands without nodes",
            });
        }
        Ok(&self.nodes[shard_index(key, self.nodes.len())])
    }

    async fn timed<T, F>(&self, fut: F) -> BackendResult<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(BackendError::Timeout(self.timeout)),
        }
    }

    async fn flush_node(&self, node: &Node) -> BackendResult<usize> {
        let pattern = literal_pattern(&self.namespace);
        let mut conn = node.conn.clone();
        let mut cursor: u64 = 0;
        let mut removed = 0usize;

        loop {
            let mut scan = redis::cmd("SCAN");
            scan.arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH);
            let (next, keys): (u64, Vec<String>) = self.timed(scan.query_async(&mut conn)).await?;

            if !keys.is_empty() {
                let mut del = redis::cmd("DEL");
                del.arg(&keys);
                let count: usize = self.timed(del.query_async(&mut conn)).await?;
                removed += count;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(node = %node.url, removed, "Flushed cache namespace");
        Ok(removed)
    }
}

#[async_trait]
impl CacheBackend for DistributedMemoryBackend {
    fn name(&self) -> &'static str {
        "distributed-memory"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            native_tags: false,
            multi_load: true,
        }
    }

    async fn ping(&self) -> BackendResult<()> {
        for node in &self.nodes {
            let mut conn = node.conn.clone();
            let _: String = self.timed(redis::cmd("PING").query_async(&mut conn)).await?;
        }
        Ok(())
    }

    async fn load(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        let mut conn = self.node_for(key)?.conn.clone();
        let mut cmd = redis::cmd("GET");
        cmd.arg(self.namespaced(key));
        self.timed(cmd.query_async(&mut conn)).await
    }

    async fn load_many(&self, keys: &[String]) -> BackendResult<HashMap<String, Vec<u8>>> {
        if keys.is_empty() || self.nodes.is_empty() {
            return Ok(HashMap::new());
        }

        let groups = group_by_shard(keys, self.nodes.len());
        let batches = groups
            .into_iter()
            .zip(&self.nodes)
            .filter(|(group, _)| !group.is_empty())
            .map(|(group, node)| async move {
                let mut conn = node.conn.clone();
                let mut cmd = redis::cmd("MGET");
                cmd.arg(
                    group
                        .iter()
                        .map(|key| self.namespaced(key))
                        .collect::<Vec<_>>(),
                );
                let values: Vec<Option<Vec<u8>>> = self.timed(cmd.query_async(&mut conn)).await?;
                Ok::<_, BackendError>(group.into_iter().zip(values).collect::<Vec<_>>())
            });

        let mut found = HashMap::with_capacity(keys.len());
        for batch in join_all(batches).await {
            for (key, value) in batch? {
                if let Some(payload) = value {
                    found.insert(key, payload);
                }
            }
        }
        Ok(found)
    }

    async fn save(
        &self,
        payload: &[u8],
        key: &str,
        _tags: &[String],
        ttl: Option<Duration>,
    ) -> BackendResult<bool> {
        let mut conn = self.node_for(key)?.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.namespaced(key)).arg(payload);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis().max(1) as u64);
        }
        let _: () = self.timed(cmd.query_async(&mut conn)).await?;
        Ok(true)
    }

    async fn remove(&self, key: &str) -> BackendResult<bool> {
        let mut conn = self.node_for(key)?.conn.clone();
        let mut cmd = redis::cmd("DEL");
        cmd.arg(self.namespaced(key));
        let removed: usize = self.timed(cmd.query_async(&mut conn)).await?;
        Ok(removed > 0)
    }

    async fn clean(&self, mode: &CleanMode) -> BackendResult<bool> {
        match mode {
            CleanMode::All => {
                for node in &self.nodes {
                    self.flush_node(node).await?;
                }
                Ok(true)
            }
            // Redis expires keys itself.
            CleanMode::Old => Ok(true),
            CleanMode::MatchingTag(_) | CleanMode::NotMatchingTag(_) => {
                Err(BackendError::Unsupported {
                    backend: self.name(),
                    operation: mode.as_str(),
                })
            }
        }
    }

    async fn add_to_set(&self, key: &str, members: &[String]) -> BackendResult<bool> {
        if members.is_empty() {
            return Ok(true);
        }
        let mut conn = self.node_for(key)?.conn.clone();
        let mut cmd = redis::cmd("SADD");
        cmd.arg(self.namespaced(key)).arg(members);
        let _: usize = self.timed(cmd.query_async(&mut conn)).await?;
        Ok(true)
    }

    async fn load_set(&self, key: &str) -> BackendResult<Vec<String>> {
        let mut conn = self.node_for(key)?.conn.clone();
        let mut cmd = redis::cmd("SMEMBERS");
        cmd.arg(self.namespaced(key));
        self.timed(cmd.query_async(&mut conn)).await
    }

    async fn take_set(&self, key: &str) -> BackendResult<Vec<String>> {
        let mut conn = self.node_for(key)?.conn.clone();
        let name = self.namespaced(key);
        // MULTI/EXEC: no SADD can run between the read and the delete.
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("SMEMBERS")
            .arg(&name)
            .cmd("DEL")
            .arg(&name)
            .ignore();
        let (members,): (Vec<String>,) = self.timed(pipe.query_async(&mut conn)).await?;
        Ok(members)
    }
}
