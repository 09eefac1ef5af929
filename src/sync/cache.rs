//! Bounded in-memory store of recent results

use std::time::Duration;

use mini_moka::sync::Cache;

/// Id-keyed result cache with a size bound and retention window
///
/// Entries past `ttl` or beyond `capacity` are evicted; every cached result
/// also has a history record, so eviction only affects retrieval by id.
#[derive(Clone)]
pub struct ResultCache<T: Clone + Send + Sync + 'static> {
    inner: Cache<String, T>,
}

impl<T: Clone + Send + Sync + 'static> ResultCache<T> {
    #[must_use]
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn insert(&self, id: &str, value: T) {
        self.inner.insert(id.to_string(), value);
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<T> {
        self.inner.get(&id.to_string())
    }
}
