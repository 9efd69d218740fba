use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

/// Keyed cache with per-entry expiry.
///
/// Cloning shares the underlying map. Entries past their TTL are treated as
/// missing and are swept out on every insert, so the map only holds keys
/// touched within one TTL.
#[derive(Clone)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    inner: Arc<RwLock<HashMap<K, Entry<V>>>>,
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Fresh value for `key`, if any.
    pub async fn get(&self, key: &K) -> Option<V> {
        let map = self.inner.read().await;
        map.get(key)
            .filter(|e| e.inserted_at.elapsed() < self.ttl)
            .map(|e| e.value.clone())
    }

    pub async fn insert(&self, key: K, value: V) {
        let mut map = self.inner.write().await;
        let ttl = self.ttl;
        map.retain(|_, e| e.inserted_at.elapsed() < ttl);
        map.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub async fn invalidate(&self, key: &K) {
        self.inner.write().await.remove(key);
    }

    /// Return the cached value or build, store and return a new one.
    ///
    /// Concurrent misses may both run `load`; the last writer wins.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: K, load: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(v) = self.get(&key).await {
            return Ok(v);
        }
        let value = load().await?;
        self.insert(key, value.clone()).await;
        Ok(value)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}
