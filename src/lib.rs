//! Tagcache library crate: a tag-invalidated object cache.
//!
//! # Public API Surface
//!
//! ## Façade
//! - [`CacheService`] - get / set / delete / clean, multi-get, smart shadows, stats
//! - [`Janitor`] - periodic expired-entry sweep
//! - [`LifeStore`] - request-scoped memo map
//!
//! ## Backends
//! - [`CacheBackend`] - storage engine interface
//! - [`FileBackend`], [`DistributedMemoryBackend`], [`ProcessLocalBackend`] - engines
//! - [`TagEmulation`], [`Profiled`] - decorators
//! - [`build_backend`] - config-driven chain construction
//!
//! ## Batched fetch
//! - [`Reconciler`], [`BatchLoader`], [`Entity`] - cache-then-store lookup by id
//!
//! ## Test/Mock Support
//! Mock implementations are available behind `#[cfg(any(test, feature = "mock"))]`.

pub mod backend;
pub mod cache;
pub mod config;
pub mod constants;
pub mod hashing;
pub mod reconcile;

pub use backend::{
    BackendError, BackendOp, BackendResult, CacheBackend, Capabilities, CleanMode,
    DistributedMemoryBackend, FileBackend, ProcessLocalBackend, ProfileSink, Profiled,
    StoredRecord, TagEmulation, build_backend,
};
#[cfg(any(test, feature = "mock"))]
pub use backend::FlakyBackend;

pub use cache::{
    CacheError, CacheResult, CacheService, CacheStats, Janitor, LifeStore, StatsSnapshot,
};

pub use config::{BackendKind, Config, ConfigError};
pub use hashing::{hash_to_u64, physical_key, tag_index_key};

pub use reconcile::{BatchLoader, Entity, ReconcileMode, Reconciler, Slot};
#[cfg(any(test, feature = "mock"))]
pub use reconcile::{MockLoader, StoreUnavailable};
