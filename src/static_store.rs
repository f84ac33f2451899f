//! Keyless store wrapper.
//!
//! Some repositories hold exactly one value (feature snapshots, global
//! config blobs). [`StaticStore`] fronts such a repository with a
//! key-free API by mocking the key as `()` internally.

use crate::config::StoreConfig;
use crate::error::{BuildError, KeyErrors, StoreError};
use crate::flags::{LoadFlags, SetFlags};
use crate::store::Store;
use crate::Value;

/// A store whose repository needs no key to fetch its data.
pub struct StaticStore<V: Value> {
    store: Store<(), V>,
}

impl<V: Value> StaticStore<V> {
    /// Builds a static store from a unit-keyed configuration.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Store::new`].
    pub fn new(config: StoreConfig<(), V>) -> Result<Self, BuildError> {
        Ok(Self {
            store: Store::new(config)?,
        })
    }

    /// The identifier this store was configured with.
    #[must_use]
    pub fn identifier(&self) -> &str {
        self.store.identifier()
    }

    /// Load the value.
    pub async fn get(&self) -> Result<V, StoreError> {
        self.store.load(()).await
    }

    /// Load the value with explicit flags.
    pub async fn get_with(&self, flags: LoadFlags) -> Result<V, StoreError> {
        self.store.load_with((), flags).await
    }

    /// Write the value to every layer, returning one error slot per layer.
    pub async fn set(&self, value: V) -> KeyErrors {
        self.store.set((), value).await
    }

    /// Write the value with explicit flags.
    pub async fn set_with(&self, value: V, flags: SetFlags) -> KeyErrors {
        self.store.set_with((), value, flags).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::error::StoreError;
    use crate::layer::{Layer, LayerResult, MemoryLayer};

    /// Keyless backend producing one constant snapshot.
    struct SnapshotBackend;

    #[async_trait]
    impl Layer<(), String> for SnapshotBackend {
        fn identifier(&self) -> &str {
            "snapshot-backend"
        }

        async fn get(&self, keys: &[()]) -> LayerResult<String> {
            Ok(keys.iter().map(|_| Ok("snapshot-v1".to_string())).collect())
        }

        async fn set(&self, _keys: &[()], _values: &[String]) -> Vec<Option<StoreError>> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn get_resolves_through_the_cascade() {
        let store = StaticStore::new(StoreConfig::new(
            "static-test",
            vec![
                Arc::new(MemoryLayer::default()) as Arc<dyn Layer<(), String>>,
                Arc::new(SnapshotBackend),
            ],
        ))
        .unwrap();

        assert_eq!(store.get().await, Ok("snapshot-v1".to_string()));
        assert_eq!(store.identifier(), "static-test");
    }

    #[tokio::test]
    async fn set_overrides_the_cached_value() {
        let store = StaticStore::new(StoreConfig::new(
            "static-set",
            vec![
                Arc::new(MemoryLayer::default()) as Arc<dyn Layer<(), String>>,
                Arc::new(SnapshotBackend),
            ],
        ))
        .unwrap();

        let errors = store.set("snapshot-v2".to_string()).await;
        assert_eq!(errors, vec![None, None]);
        assert_eq!(store.get().await, Ok("snapshot-v2".to_string()));
    }
}
