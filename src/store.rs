//! The store facade.
//!
//! Stitches the batcher, the resolver cascade, and the hook registry into
//! the public load/set API.

use std::sync::Arc;

use crate::batcher::{self, Batcher, LoadAllThunk, LoadThunk};
use crate::config::{BatcherConfig, StoreConfig};
use crate::error::{BuildError, KeyErrors, StoreError};
use crate::flags::{LoadFlags, SetFlags};
use crate::resolver::Resolver;
use crate::{Key, Value};

/// A layered, batching key-value store front.
///
/// Loads walk the layer cascade from the shallowest tier to the deepest,
/// optionally coalesced through the batcher; values resolved by deeper
/// tiers are primed into shallower ones in the background. Sets write
/// through to every layer.
///
/// All methods take `&self`; the store is `Send + Sync` and meant to be
/// shared behind an `Arc`. Load and thunk methods must be called from
/// within a Tokio runtime, which hosts the flush timers, resolution tasks,
/// and prime writes.
pub struct Store<K: Key, V: Value> {
    resolver: Arc<Resolver<K, V>>,
    batcher: Option<Batcher<K, V>>,
    default_load_flags: LoadFlags,
    default_set_flags: SetFlags,
}

impl<K: Key, V: Value> std::fmt::Debug for Store<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl<K: Key, V: Value> Store<K, V> {
    /// Builds a store from `config`.
    ///
    /// # Errors
    ///
    /// Fails when the layer list is empty, when a batcher is configured
    /// with `max_batch == 0`, or when an initialization hook rejects the
    /// store.
    pub fn new(config: StoreConfig<K, V>) -> Result<Self, BuildError> {
        if config.layers.is_empty() {
            return Err(BuildError::NoLayers);
        }
        if config
            .batcher
            .as_ref()
            .is_some_and(|batcher| batcher.max_batch == 0)
        {
            return Err(BuildError::InvalidMaxBatch);
        }

        let hooks = crate::extension::HookRegistry::register(&config.extensions);
        for hook in &hooks.init {
            hook.on_init(&config.identifier, &config.layers)
                .map_err(|source| BuildError::ExtensionInit {
                    name: hook.name().to_string(),
                    source,
                })?;
        }

        let resolver = Arc::new(Resolver::new(config.identifier, config.layers, hooks));
        let batcher = config.batcher.map(|batcher_config| {
            let wait = if batcher_config.wait.is_zero() {
                BatcherConfig::DEFAULT_WAIT
            } else {
                batcher_config.wait
            };
            Batcher::new(Arc::clone(&resolver), wait, batcher_config.max_batch)
        });

        Ok(Self {
            resolver,
            batcher,
            default_load_flags: config.default_load_flags,
            default_set_flags: config.default_set_flags,
        })
    }

    /// The identifier this store was configured with.
    #[must_use]
    pub fn identifier(&self) -> &str {
        self.resolver.identifier()
    }

    /// Number of configured layers.
    #[must_use]
    pub fn layer_count(&self) -> usize {
        self.resolver.layer_count()
    }

    fn load_flags(&self, flags: LoadFlags) -> LoadFlags {
        self.default_load_flags | flags
    }

    fn set_flags(&self, flags: SetFlags) -> SetFlags {
        self.default_set_flags | flags
    }

    /// Load one key.
    pub async fn load(&self, key: K) -> Result<V, StoreError> {
        self.load_with(key, LoadFlags::empty()).await
    }

    /// Load one key with explicit flags (OR-ed with the defaults).
    pub async fn load_with(&self, key: K, flags: LoadFlags) -> Result<V, StoreError> {
        let flags = self.load_flags(flags);
        match &self.batcher {
            Some(batcher) if !flags.contains(LoadFlags::NO_BATCH) => {
                batcher.load(key, flags).await
            }
            _ => {
                let mut results = self
                    .resolver
                    .resolve_and_collect(std::slice::from_ref(&key))
                    .await;
                results.pop().unwrap_or(Err(StoreError::ResolverFailed))
            }
        }
    }

    /// Load many keys, returning outcomes in input order. Duplicate keys
    /// receive identical results.
    pub async fn load_all(&self, keys: &[K]) -> Vec<Result<V, StoreError>> {
        self.load_all_with(keys, LoadFlags::empty()).await
    }

    /// Load many keys with explicit flags (OR-ed with the defaults).
    pub async fn load_all_with(&self, keys: &[K], flags: LoadFlags) -> Vec<Result<V, StoreError>> {
        if keys.is_empty() {
            return Vec::new();
        }
        let flags = self.load_flags(flags);
        match &self.batcher {
            Some(batcher) if !flags.contains(LoadFlags::NO_BATCH) => {
                batcher.load_all(keys, flags).await
            }
            _ => self.resolver.resolve_and_collect(keys).await,
        }
    }

    /// Register one key for loading and return a deferred handle for it.
    ///
    /// Useful when one task wants to file requests against several stores
    /// before blocking on any of them.
    pub fn load_thunk(&self, key: K) -> LoadThunk<K, V> {
        self.load_thunk_with(key, LoadFlags::empty())
    }

    /// [`Store::load_thunk`] with explicit flags (OR-ed with the defaults).
    pub fn load_thunk_with(&self, key: K, flags: LoadFlags) -> LoadThunk<K, V> {
        let flags = self.load_flags(flags);
        match &self.batcher {
            Some(batcher) if !flags.contains(LoadFlags::NO_BATCH) => {
                batcher.load_thunk(key, flags)
            }
            _ => batcher::detached_thunk(&self.resolver, key),
        }
    }

    /// Register many keys for loading and return one deferred handle.
    pub fn load_all_thunk(&self, keys: &[K]) -> LoadAllThunk<K, V> {
        self.load_all_thunk_with(keys, LoadFlags::empty())
    }

    /// [`Store::load_all_thunk`] with explicit flags (OR-ed with the
    /// defaults).
    pub fn load_all_thunk_with(&self, keys: &[K], flags: LoadFlags) -> LoadAllThunk<K, V> {
        let flags = self.load_flags(flags);
        match &self.batcher {
            Some(batcher) if !flags.contains(LoadFlags::NO_BATCH) => {
                batcher.load_all_thunk(keys, flags)
            }
            _ => LoadAllThunk::detached(&self.resolver, keys),
        }
    }

    /// Write one key to every layer.
    ///
    /// Returns one error slot per layer, `None` where the write succeeded.
    pub async fn set(&self, key: K, value: V) -> KeyErrors {
        self.set_with(key, value, SetFlags::empty()).await
    }

    /// [`Store::set`] with explicit flags (OR-ed with the defaults).
    pub async fn set_with(&self, key: K, value: V, flags: SetFlags) -> KeyErrors {
        self.set_all_with(&[key], &[value], flags)
            .await
            .into_iter()
            .map(|mut row| row.pop().unwrap_or(None))
            .collect()
    }

    /// Write many keys to every layer.
    ///
    /// `keys` and `values` must have the same length. Returns error rows
    /// indexed `[layer][key]`; layer failures never short-circuit the
    /// remaining writes.
    pub async fn set_all(&self, keys: &[K], values: &[V]) -> Vec<KeyErrors> {
        self.set_all_with(keys, values, SetFlags::empty()).await
    }

    /// [`Store::set_all`] with explicit flags (OR-ed with the defaults).
    pub async fn set_all_with(
        &self,
        keys: &[K],
        values: &[V],
        flags: SetFlags,
    ) -> Vec<KeyErrors> {
        assert_eq!(
            keys.len(),
            values.len(),
            "set_all requires parallel keys and values"
        );
        self.resolver.set_all(keys, values, self.set_flags(flags)).await
    }
}
