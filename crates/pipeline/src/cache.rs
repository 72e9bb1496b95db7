//! Small keyed TTL cache with single-flight refresh.
//!
//! Each key owns an async slot. A reader locks the slot, returns the value
//! if it is younger than the TTL, otherwise runs the producer while still
//! holding the slot, so concurrent readers of the same key wait for one
//! fetch instead of issuing their own. Failed fetches are not stored.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

struct Entry<V> {
    value: V,
    stored_at: Instant,
}

type Slot<V> = Arc<Mutex<Option<Entry<V>>>>;

/// Keyed cache whose entries expire after a per-call TTL.
pub struct TtlCache<K, V> {
    slots: Mutex<HashMap<K, Slot<V>>>,
}

impl<K, V> Default for TtlCache<K, V> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value for `key`, or run `producer` and cache its
    /// result when the entry is missing or older than `ttl`.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: &K, ttl: Duration, producer: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let slot = {
            let mut slots = self.slots.lock().await;
            Arc::clone(slots.entry(key.clone()).or_default())
        };

        let mut entry = slot.lock().await;
        if let Some(cached) = entry.as_ref() {
            if cached.stored_at.elapsed() < ttl {
                return Ok(cached.value.clone());
            }
        }

        let value = producer().await?;
        *entry = Some(Entry {
            value: value.clone(),
            stored_at: Instant::now(),
        });
        Ok(value)
    }

    /// Drop one entry.
    pub async fn invalidate(&self, key: &K) {
        self.slots.lock().await.remove(key);
    }

    /// Drop every entry.
    pub async fn clear(&self) {
        self.slots.lock().await.clear();
    }
}
