//! Capacity-bounded time-aware LRU [`Layer`].
//!
//! Entries carry a TTL deadline and an access stamp. When the cache
//! overflows, expired entries are purged first; if that is not enough, the
//! least recently used entries are evicted until the cache fits again.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{KeyErrors, StoreError};
use crate::layer::{Layer, LayerResult};
use crate::{Key, Value};

/// Configuration for [`TlruLayer`].
#[derive(Debug, Clone)]
pub struct TlruConfig {
    /// Maximum number of entries held. A zero value falls back to
    /// [`TlruConfig::DEFAULT_MAX_ITEMS`].
    pub max_items: usize,

    /// Time-to-live for every entry.
    pub ttl: Duration,
}

impl TlruConfig {
    /// Default capacity.
    pub const DEFAULT_MAX_ITEMS: usize = 65_536;
}

impl Default for TlruConfig {
    fn default() -> Self {
        Self {
            max_items: Self::DEFAULT_MAX_ITEMS,
            ttl: Duration::from_secs(60),
        }
    }
}

struct TlruEntry<V> {
    value: V,
    expires_at: Instant,
    last_access: u64,
}

struct TlruInner<K, V> {
    entries: HashMap<K, TlruEntry<V>>,
    /// Logical clock bumped on every read and write; orders recency.
    tick: u64,
}

impl<K: Key, V: Value> TlruInner<K, V> {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Drop entries until the cache fits `max_items`: expired first, then
    /// by oldest access stamp.
    fn shrink_to(&mut self, max_items: usize, now: Instant) {
        if self.entries.len() <= max_items {
            return;
        }
        self.entries.retain(|_, entry| entry.expires_at > now);

        while self.entries.len() > max_items {
            let Some(coldest) = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            self.entries.remove(&coldest);
        }
    }
}

/// Mutex-guarded time-aware LRU cache.
///
/// Suited as a mid-tier cache with a bounded footprint; for an unbounded
/// first tier prefer [`MemoryLayer`](crate::layer::MemoryLayer).
pub struct TlruLayer<K: Key, V: Value> {
    inner: Mutex<TlruInner<K, V>>,
    max_items: usize,
    ttl: Duration,
}

impl<K: Key, V: Value> TlruLayer<K, V> {
    /// Creates an empty TLRU layer.
    #[must_use]
    pub fn new(config: TlruConfig) -> Self {
        let max_items = if config.max_items == 0 {
            TlruConfig::DEFAULT_MAX_ITEMS
        } else {
            config.max_items
        };
        Self {
            inner: Mutex::new(TlruInner {
                entries: HashMap::new(),
                tick: 0,
            }),
            max_items,
            ttl: config.ttl,
        }
    }

    /// Number of entries currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the layer holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl<K: Key, V: Value> Layer<K, V> for TlruLayer<K, V> {
    fn identifier(&self) -> &str {
        "tlru"
    }

    async fn get(&self, keys: &[K]) -> LayerResult<V> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let results = keys
            .iter()
            .map(|key| {
                let tick = inner.next_tick();
                let mut expired = false;
                let hit = match inner.entries.get_mut(key) {
                    Some(entry) if entry.expires_at > now => {
                        entry.last_access = tick;
                        Some(entry.value.clone())
                    }
                    Some(_) => {
                        expired = true;
                        None
                    }
                    None => None,
                };
                if expired {
                    inner.entries.remove(key);
                }
                hit.ok_or_else(|| StoreError::not_found(key))
            })
            .collect();
        Ok(results)
    }

    async fn set(&self, keys: &[K], values: &[V]) -> KeyErrors {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        for (key, value) in keys.iter().zip(values.iter()) {
            let tick = inner.next_tick();
            inner.entries.insert(
                key.clone(),
                TlruEntry {
                    value: value.clone(),
                    expires_at: now + self.ttl,
                    last_access: tick,
                },
            );
        }
        inner.shrink_to(self.max_items, now);
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_cache(max_items: usize, ttl: Duration) -> TlruLayer<u64, u64> {
        TlruLayer::new(TlruConfig { max_items, ttl })
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let layer = small_cache(8, Duration::from_secs(10));
        layer.set(&[1, 2], &[10, 20]).await;
        let results = layer.get(&[1, 2, 3]).await.unwrap();
        assert_eq!(results[0], Ok(10));
        assert_eq!(results[1], Ok(20));
        assert!(results[2].as_ref().is_err_and(StoreError::is_not_found));
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let layer = small_cache(8, Duration::from_millis(20));
        layer.set(&[1], &[10]).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        let results = layer.get(&[1]).await.unwrap();
        assert!(results[0].as_ref().is_err_and(StoreError::is_not_found));
        assert!(layer.is_empty());
    }

    #[tokio::test]
    async fn overflow_evicts_least_recently_used() {
        let layer = small_cache(3, Duration::from_secs(10));
        layer.set(&[1], &[10]).await;
        layer.set(&[2], &[20]).await;
        layer.set(&[3], &[30]).await;

        // Touch 1 so that 2 becomes the coldest entry.
        layer.get(&[1]).await.unwrap();
        layer.set(&[4], &[40]).await;

        assert_eq!(layer.len(), 3);
        let results = layer.get(&[1, 2, 3, 4]).await.unwrap();
        assert_eq!(results[0], Ok(10));
        assert!(results[1].as_ref().is_err_and(StoreError::is_not_found));
        assert_eq!(results[2], Ok(30));
        assert_eq!(results[3], Ok(40));
    }

    #[tokio::test]
    async fn overflow_prefers_purging_expired_entries() {
        let layer = small_cache(2, Duration::from_millis(20));
        layer.set(&[1], &[10]).await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        layer.set(&[2], &[20]).await;
        layer.set(&[3], &[30]).await;

        // The expired entry was dropped; both live entries survive.
        let results = layer.get(&[2, 3]).await.unwrap();
        assert_eq!(results[0], Ok(20));
        assert_eq!(results[1], Ok(30));
    }
}
