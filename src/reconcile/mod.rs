//! Batched fetch of entities by id: one cache read, one backing-store query.
//!
//! [`Reconciler::fetch`] looks every id up in the cache in a single multi-read,
//! asks the [`BatchLoader`] only for the ids the cache knows nothing about, and
//! writes the answers back, including "this id does not exist" markers so the
//! same missing id is not queried again until the marker expires.

#[cfg(any(test, feature = "mock"))]
pub mod mock;


#[cfg(any(test, feature = "mock"))]
pub use mock::{MockLoader, StoreUnavailable};

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::cache::CacheService;
use crate::config::Config;
use crate::constants::SOLID_ID_SEPARATOR;

/// A backing-store record addressable by id.
pub trait Entity {
    type Id: Clone + Eq + Hash + Display + Send + Sync;

    fn id(&self) -> Self::Id;
}

#[async_trait]
/// Backing-store query for one entity kind.
///
/// Returns the entities that exist among `ids`, in any order. Ids with no
/// record are simply left out.
pub trait BatchLoader<E: Entity>: Send + Sync {
    type Error: Send;

    async fn load_batch(&self, ids: &[E::Id]) -> Result<Vec<E>, Self::Error>;
}

/// Cached state of one id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "entity", rename_all = "snake_case")]
pub enum Slot<E> {
    Found(E),
    /// The backing store had no record for the id.
    Absent,
}

/// Borrowing twin of [`Slot`] with the same encoding, so writes need no clone.
#[derive(Serialize)]
#[serde(tag = "state", content = "entity", rename_all = "snake_case")]
enum SlotRef<'a, E> {
    Found(&'a E),
    Absent,
}

/// How fetched lists are laid out in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconcileMode {
    /// One entry per id. Precise invalidation, more keys.
    #[default]
    PerKey,
    /// One entry per requested id list. Fewer keys; the whole list goes
    /// stale when any of its tags is cleaned.
    Solid,
}

impl ReconcileMode {
    pub fn from_config(config: &Config) -> Self {
        if config.solid {
            ReconcileMode::Solid
        } else {
            ReconcileMode::PerKey
        }
    }
}

type KeyTemplate<Id> = Arc<dyn Fn(&Id) -> String + Send + Sync>;

/// Cache-then-store lookup for one entity kind.
///
/// # Example
/// ```rust,no_run
/// # use tagcache::cache::CacheService;
/// # use tagcache::reconcile::{Entity, Reconciler};
/// # #[derive(serde::Serialize, serde::Deserialize)]
/// # struct Topic { id: u64 }
/// # impl Entity for Topic { type Id = u64; fn id(&self) -> u64 { self.id } }
/// let cache = CacheService::process_local(10_000, "site_");
/// let topics = Reconciler::<Topic>::new(cache, |id| format!("topic_{id}"))
///     .with_ttl(std::time::Duration::from_secs(4 * 24 * 3600))
///     .with_tags(&["topic_update"]);
/// ```
pub struct Reconciler<E: Entity> {
    cache: CacheService,
    key_template: KeyTemplate<E::Id>,
    ttl: Option<Duration>,
    mode: ReconcileMode,
    solid_name: String,
    tags: Vec<String>,
}

impl<E> Reconciler<E>
where
    E: Entity + Serialize + DeserializeOwned + Send + Sync,
{
    /// Creates a per-key reconciler caching each id under `key_template(id)` without expiry.
    pub fn new<F>(cache: CacheService, key_template: F) -> Self
    where
        F: Fn(&E::Id) -> String + Send + Sync + 'static,
    {
        Self {
            cache,
            key_template: Arc::new(key_template),
            ttl: None,
            mode: ReconcileMode::PerKey,
            solid_name: "solid".to_string(),
            tags: Vec::new(),
        }
    }

    /// Lifetime of positive and negative entries alike.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_mode(mut self, mode: ReconcileMode) -> Self {
        self.mode = mode;
        self
    }

    /// Logical name prefix of composite entries in [`ReconcileMode::Solid`].
    pub fn with_solid_name(mut self, name: impl Into<String>) -> Self {
        self.solid_name = name.into();
        self
    }

    /// Tags attached to every entry written, composite or per-id.
    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn mode(&self) -> ReconcileMode {
        self.mode
    }

    /// Returns the entities behind `ids` in first-occurrence order.
    ///
    /// Duplicate ids are collapsed and ids with no record are omitted. The
    /// loader runs at most once per call. Its error is returned as-is and
    /// nothing is cached for that call.
    #[instrument(level = "debug", skip_all, fields(requested = ids.len(), mode = ?self.mode))]
    pub async fn fetch<L>(&self, ids: &[E::Id], loader: &L) -> Result<Vec<E>, L::Error>
    where
        L: BatchLoader<E> + ?Sized,
    {
        let ids = dedupe(ids);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        match self.mode {
            ReconcileMode::PerKey => self.fetch_per_key(ids, loader).await,
            ReconcileMode::Solid => self.fetch_solid(ids, loader).await,
        }
    }

    /// Composite logical name for an already deduplicated id list.
    pub fn solid_key(&self, ids: &[E::Id]) -> String {
        let joined = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(SOLID_ID_SEPARATOR);
        format!("{}[{}]", self.solid_name, joined)
    }

    async fn fetch_per_key<L>(&self, ids: Vec<E::Id>, loader: &L) -> Result<Vec<E>, L::Error>
    where
        L: BatchLoader<E> + ?Sized,
    {
        let names: Vec<String> = ids.iter().map(|id| (self.key_template)(id)).collect();
        let mut cached: HashMap<String, Slot<E>> =
            self.cache.get_many(&names).await.unwrap_or_default();

        let mut found: HashMap<E::Id, E> = HashMap::with_capacity(ids.len());
        let mut need_query: Vec<E::Id> = Vec::new();
        let mut confirmed_absent = 0usize;

        for (id, name) in ids.iter().zip(&names) {
            match cached.remove(name) {
                Some(Slot::Found(entity)) => {
                    found.insert(id.clone(), entity);
                }
                Some(Slot::Absent) => confirmed_absent += 1,
                None => need_query.push(id.clone()),
            }
        }

        debug!(
            hits = found.len(),
            confirmed_absent,
            need_query = need_query.len(),
            "Reconciler cache pass"
        );

        if !need_query.is_empty() {
            let loaded = loader.load_batch(&need_query).await?;
            let mut still_missing: HashSet<E::Id> = need_query.iter().cloned().collect();
            let tags: Vec<&str> = self.tags.iter().map(String::as_str).collect();

            for entity in loaded {
                let id = entity.id();
                self.cache
                    .set(
                        &SlotRef::Found(&entity),
                        &(self.key_template)(&id),
                        &tags,
                        self.ttl,
                    )
                    .await;
                still_missing.remove(&id);
                found.insert(id, entity);
            }

            for id in need_query.iter().filter(|id| still_missing.contains(*id)) {
                self.cache
                    .set(
                        &SlotRef::<E>::Absent,
                        &(self.key_template)(id),
                        &tags,
                        self.ttl,
                    )
                    .await;
            }

            debug!(
                loaded = need_query.len() - still_missing.len(),
                absent = still_missing.len(),
                "Reconciler store pass"
            );
        }

        Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
    }

    async fn fetch_solid<L>(&self, ids: Vec<E::Id>, loader: &L) -> Result<Vec<E>, L::Error>
    where
        L: BatchLoader<E> + ?Sized,
    {
        let name = self.solid_key(&ids);
        if let Some(entities) = self.cache.get::<Vec<E>>(&name).await {
            debug!(found = entities.len(), "Solid entry hit");
            return Ok(entities);
        }

        let mut by_id: HashMap<E::Id, E> = loader
            .load_batch(&ids)
            .await?
            .into_iter()
            .map(|entity| (entity.id(), entity))
            .collect();
        let ordered: Vec<E> = ids.iter().filter_map(|id| by_id.remove(id)).collect();

        let tags: Vec<&str> = self.tags.iter().map(String::as_str).collect();
        self.cache.set(&ordered, &name, &tags, self.ttl).await;
        debug!(found = ordered.len(), "Solid entry stored");

        Ok(ordered)
    }
}

fn dedupe<Id: Clone + Eq + Hash>(ids: &[Id]) -> Vec<Id> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter()
        .filter(|id| seen.insert((*id).clone()))
        .cloned()
        .collect()
}
