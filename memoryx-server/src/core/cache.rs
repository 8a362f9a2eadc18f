//! A generic TTL cache, grounded directly on the teacher's
//! `ResponseCache`: a `DashMap` behind an `Arc`, a background
//! `cleanup_loop` sweeping expired entries every 5 minutes, size-bounded
//! eviction of the oldest entry on overflow. Generalized here from
//! "cached chat completions" to any `K: Eq + Hash` / `V: Clone` pair —
//! its first user is [`crate::core::auth`]'s API-key-to-owner cache.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Clone)]
pub struct TtlCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

struct Inner<K, V> {
    entries: DashMap<K, Entry<V>>,
    max_entries: usize,
    ttl: Duration,
}

#[derive(Clone)]
struct Entry<V> {
    value: V,
    created_at: Instant,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        let cache = Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                max_entries,
                ttl,
            }),
        };
        let background = cache.clone();
        tokio::spawn(async move {
            background.cleanup_loop().await;
        });
        cache
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let entry = self.inner.entries.get(key)?;
        if entry.created_at.elapsed() > self.inner.ttl {
            drop(entry);
            self.inner.entries.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn put(&self, key: K, value: V) {
        if self.inner.entries.len() >= self.inner.max_entries {
            self.evict_oldest();
        }
        self.inner.entries.insert(
            key,
            Entry {
                value,
                created_at: Instant::now(),
            },
        );
    }

    fn evict_oldest(&self) {
        let oldest = self
            .inner
            .entries
            .iter()
            .min_by_key(|e| e.value().created_at)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.inner.entries.remove(&key);
        }
    }

    async fn cleanup_loop(&self) {
        loop {
            tokio::time::sleep(Duration::from_secs(300)).await;
            let expired: Vec<K> = self
                .inner
                .entries
                .iter()
                .filter(|e| e.value().created_at.elapsed() > self.inner.ttl)
                .map(|e| e.key().clone())
                .collect();
            for key in &expired {
                self.inner.entries.remove(key);
            }
            if !expired.is_empty() {
                debug!(count = expired.len(), "cache cleanup removed expired entries");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let cache: TtlCache<String, u32> = TtlCache::new(10, Duration::from_secs(60));
        cache.put("a".into(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
    }

    #[tokio::test]
    async fn expired_entry_is_evicted_on_read() {
        let cache: TtlCache<String, u32> = TtlCache::new(10, Duration::from_millis(1));
        cache.put("a".into(), 1);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(cache.get(&"a".to_string()), None);
    }

    #[tokio::test]
    async fn overflow_evicts_oldest_entry() {
        let cache: TtlCache<String, u32> = TtlCache::new(2, Duration::from_secs(60));
        cache.put("a".into(), 1);
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.put("b".into(), 2);
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.put("c".into(), 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a".to_string()), None);
    }
}
