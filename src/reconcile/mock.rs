//! In-memory backing store that records every query.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use super::{BatchLoader, Entity};

/// Returned by [`MockLoader`] while it is set to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("backing store unavailable")]
pub struct StoreUnavailable;

/// Backing store holding `rows` in insertion order.
///
/// Answers in storage order rather than request order, like a database
/// without `ORDER BY`.
pub struct MockLoader<E: Entity> {
    rows: Mutex<Vec<E>>,
    calls: Mutex<Vec<Vec<E::Id>>>,
    failing: AtomicBool,
}

impl<E> MockLoader<E>
where
    E: Entity + Clone,
{
    pub fn new(rows: Vec<E>) -> Self {
        Self {
            rows: Mutex::new(rows),
            calls: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn insert(&self, row: E) {
        self.rows.lock().push(row);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Id lists of every query received, in call order.
    pub fn calls(&self) -> Vec<Vec<E::Id>> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl<E> BatchLoader<E> for MockLoader<E>
where
    E: Entity + Clone + Send + Sync,
{
    type Error = StoreUnavailable;

    async fn load_batch(&self, ids: &[E::Id]) -> Result<Vec<E>, StoreUnavailable> {
        self.calls.lock().push(ids.to_vec());
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreUnavailable);
        }
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|row| ids.contains(&row.id()))
            .cloned()
            .collect())
    }
}
