//! In-memory [`Layer`] backed by [`DashMap`].
//!
//! Intended as the first line of cache with short retention. Reads are
//! sharded and lock-free for non-expired entries; expiry is enforced
//! lazily on read, so no background task or runtime handle is required.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{KeyErrors, StoreError};
use crate::layer::{Layer, LayerResult};
use crate::{Key, Value};

/// Configuration for [`MemoryLayer`].
#[derive(Debug, Clone, Default)]
pub struct MemoryConfig {
    /// How long a written entry stays readable. `None` keeps entries until
    /// they are overwritten.
    pub retention: Option<Duration>,
}

struct CacheEntry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// Concurrent map cache with optional per-entry retention.
pub struct MemoryLayer<K: Key, V: Value> {
    entries: DashMap<K, CacheEntry<V>>,
    retention: Option<Duration>,
}

impl<K: Key, V: Value> MemoryLayer<K, V> {
    /// Creates an empty memory layer.
    #[must_use]
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            entries: DashMap::new(),
            retention: config.retention,
        }
    }

    /// Number of entries currently held, including not-yet-collected
    /// expired ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the layer holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Key, V: Value> Default for MemoryLayer<K, V> {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

#[async_trait]
impl<K: Key, V: Value> Layer<K, V> for MemoryLayer<K, V> {
    fn identifier(&self) -> &str {
        "memory"
    }

    async fn get(&self, keys: &[K]) -> LayerResult<V> {
        let now = Instant::now();
        let results = keys
            .iter()
            .map(|key| {
                match self.entries.get(key) {
                    Some(entry) if !entry.is_expired(now) => Ok(entry.value.clone()),
                    Some(entry) => {
                        drop(entry);
                        // Collect the expired entry so the map does not
                        // accumulate dead keys between overwrites.
                        self.entries.remove_if(key, |_, e| e.is_expired(now));
                        Err(StoreError::not_found(key))
                    }
                    None => Err(StoreError::not_found(key)),
                }
            })
            .collect();
        Ok(results)
    }

    async fn set(&self, keys: &[K], values: &[V]) -> KeyErrors {
        let expires_at = self.retention.map(|retention| Instant::now() + retention);
        for (key, value) in keys.iter().zip(values.iter()) {
            self.entries.insert(
                key.clone(),
                CacheEntry {
                    value: value.clone(),
                    expires_at,
                },
            );
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_misses_on_empty_layer() {
        let layer: MemoryLayer<u64, u64> = MemoryLayer::default();
        let results = layer.get(&[1, 2]).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.as_ref().is_err_and(StoreError::is_not_found)));
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let layer: MemoryLayer<u64, String> = MemoryLayer::default();
        let errors = layer.set(&[1, 2], &["a".into(), "b".into()]).await;
        assert!(errors.is_empty());

        let results = layer.get(&[2, 1, 3]).await.unwrap();
        assert_eq!(results[0], Ok("b".to_string()));
        assert_eq!(results[1], Ok("a".to_string()));
        assert!(results[2].as_ref().is_err_and(StoreError::is_not_found));
    }

    #[tokio::test]
    async fn entries_expire_after_retention() {
        let layer: MemoryLayer<u64, u64> = MemoryLayer::new(MemoryConfig {
            retention: Some(Duration::from_millis(20)),
        });
        layer.set(&[7], &[49]).await;
        assert_eq!(layer.get(&[7]).await.unwrap()[0], Ok(49));

        tokio::time::sleep(Duration::from_millis(40)).await;
        let results = layer.get(&[7]).await.unwrap();
        assert!(results[0].as_ref().is_err_and(StoreError::is_not_found));
        // The expired entry is collected on read.
        assert!(layer.is_empty());
    }

    #[tokio::test]
    async fn overwrite_refreshes_retention() {
        let layer: MemoryLayer<u64, u64> = MemoryLayer::new(MemoryConfig {
            retention: Some(Duration::from_millis(50)),
        });
        layer.set(&[1], &[10]).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        layer.set(&[1], &[11]).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        // 60ms after the first write but only 30ms after the refresh.
        assert_eq!(layer.get(&[1]).await.unwrap()[0], Ok(11));
    }
}
