use std::any::Any;
use std::collections::HashMap;

use parking_lot::Mutex;

/// Request-scoped memo map.
///
/// Holds values computed once per request so repeated lookups skip the cache
/// entirely. Nothing here is persisted or shared across requests; create one
/// per request and drop it with the request.
#[derive(Default)]
pub struct LifeStore {
    values: Mutex<HashMap<String, Box<dyn Any + Send + Sync>>>,
}

impl LifeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `name`, replacing any previous value.
    pub fn set_life<T>(&self, value: T, name: impl Into<String>)
    where
        T: Any + Send + Sync,
    {
        self.values.lock().insert(name.into(), Box::new(value));
    }

    /// Returns a copy of the value under `name` if it exists and has type `T`.
    pub fn get_life<T>(&self, name: &str) -> Option<T>
    where
        T: Any + Clone,
    {
        self.values
            .lock()
            .get(name)
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }
}

impl std::fmt::Debug for LifeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifeStore")
            .field("len", &self.len())
            .finish()
    }
}
