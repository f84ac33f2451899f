//! Extension SPI and the bundled observers.
//!
//! Extensions are opaque objects that advertise the hook points they care
//! about through an explicit [`Capabilities`] bitfield; the store probes
//! the bitfield once at construction and freezes one dispatch list per
//! capability. Dispatch order within a list is registration order.
//!
//! Bundled implementations:
//!
//! - [`LoggerExtension`]: tracing-based access logging
//! - [`StoreMetrics`]: per-store counters and timings

pub mod logger;
pub mod metrics;

pub use logger::LoggerExtension;
pub use metrics::{MetricsSnapshot, StoreMetrics};

use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;

use crate::error::{KeyErrors, StoreError};
use crate::layer::Layer;
use crate::{Key, Value};

/// Hook points an extension subscribes to.
///
/// Only the hooks named here are dispatched to the extension; the
/// corresponding trait methods are never probed dynamically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(u16);

impl Capabilities {
    /// Fires once after store construction; an error aborts it.
    pub const INIT: Self = Self(1);
    /// Fires before the cascade walk of a load.
    pub const PRE_LOAD: Self = Self(1 << 1);
    /// Fires after the cascade walk of a load.
    pub const POST_LOAD: Self = Self(1 << 2);
    /// Fires before each layer `get`.
    pub const LAYER_PRE_LOAD: Self = Self(1 << 3);
    /// Fires after each layer `get`.
    pub const LAYER_POST_LOAD: Self = Self(1 << 4);
    /// Fires before a set operation.
    pub const PRE_SET: Self = Self(1 << 5);
    /// Fires after a set operation.
    pub const POST_SET: Self = Self(1 << 6);
    /// Fires before each layer `set`, including primes.
    pub const LAYER_PRE_SET: Self = Self(1 << 7);
    /// Fires after each layer `set`, including primes.
    pub const LAYER_POST_SET: Self = Self(1 << 8);

    /// No capabilities.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every load- and set-side observation hook, without `INIT`.
    #[must_use]
    pub const fn all_hooks() -> Self {
        Self(Self::PRE_LOAD.0
            | Self::POST_LOAD.0
            | Self::LAYER_PRE_LOAD.0
            | Self::LAYER_POST_LOAD.0
            | Self::PRE_SET.0
            | Self::POST_SET.0
            | Self::LAYER_PRE_SET.0
            | Self::LAYER_POST_SET.0)
    }

    /// Whether every capability in `other` is advertised in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Capabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Capabilities {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Observer around load and set boundaries.
///
/// Hook methods return [`KeyErrors`] parallel to the key slice they were
/// given (or empty for "no objection"). A non-`None` entry vetoes that key:
/// out of the whole cascade for `on_pre_load`, out of the current layer for
/// `on_layer_pre_load`, masking a resolved value for `on_layer_post_load`,
/// and overriding the final outcome for `on_post_load`. Set-side pre hooks
/// veto the corresponding write. Hooks must not block; layer calls are
/// never made while a hook runs.
///
/// Used as `Arc<dyn Extension<K, V>>`.
pub trait Extension<K: Key, V: Value>: Send + Sync {
    /// The extension name, used in diagnostics and veto errors.
    fn name(&self) -> &str;

    /// The extension version.
    fn version(&self) -> &str {
        "0.0.0"
    }

    /// Hook points this extension subscribes to.
    fn capabilities(&self) -> Capabilities;

    /// Called once while the store is being built. An error aborts
    /// construction.
    fn on_init(
        &self,
        identifier: &str,
        layers: &[Arc<dyn Layer<K, V>>],
    ) -> Result<(), StoreError> {
        let _ = (identifier, layers);
        Ok(())
    }

    /// Before the cascade walk.
    fn on_pre_load(&self, trace_id: u64, keys: &[K]) -> KeyErrors {
        let _ = (trace_id, keys);
        Vec::new()
    }

    /// After the cascade walk, with the collected per-key outcomes.
    fn on_post_load(
        &self,
        trace_id: u64,
        keys: &[K],
        results: &[Result<V, StoreError>],
    ) -> KeyErrors {
        let _ = (trace_id, keys, results);
        Vec::new()
    }

    /// Before a layer `get`, with the keys still unresolved at this depth.
    fn on_layer_pre_load(&self, trace_id: u64, layer_index: usize, keys: &[K]) -> KeyErrors {
        let _ = (trace_id, layer_index, keys);
        Vec::new()
    }

    /// After a layer `get`, with that layer's per-key outcomes.
    fn on_layer_post_load(
        &self,
        trace_id: u64,
        layer_index: usize,
        keys: &[K],
        results: &[Result<V, StoreError>],
    ) -> KeyErrors {
        let _ = (trace_id, layer_index, keys, results);
        Vec::new()
    }

    /// Before a set operation.
    fn on_pre_set(&self, trace_id: u64, keys: &[K], values: &[V]) -> KeyErrors {
        let _ = (trace_id, keys, values);
        Vec::new()
    }

    /// After a set operation, with the per-layer error rows.
    fn on_post_set(&self, trace_id: u64, keys: &[K], values: &[V], errors: &[KeyErrors]) {
        let _ = (trace_id, keys, values, errors);
    }

    /// Before a layer `set` (explicit or prime).
    fn on_layer_pre_set(
        &self,
        trace_id: u64,
        layer_index: usize,
        keys: &[K],
        values: &[V],
    ) -> KeyErrors {
        let _ = (trace_id, layer_index, keys, values);
        Vec::new()
    }

    /// After a layer `set` (explicit or prime), with its per-key errors.
    fn on_layer_post_set(
        &self,
        trace_id: u64,
        layer_index: usize,
        keys: &[K],
        values: &[V],
        errors: &KeyErrors,
    ) {
        let _ = (trace_id, layer_index, keys, values, errors);
    }
}

/// Frozen per-capability dispatch lists.
///
/// Built once by [`Store::new`](crate::store::Store::new); the same
/// extension appears in every list whose capability it advertises.
pub(crate) struct HookRegistry<K: Key, V: Value> {
    pub init: Vec<Arc<dyn Extension<K, V>>>,
    pub pre_load: Vec<Arc<dyn Extension<K, V>>>,
    pub post_load: Vec<Arc<dyn Extension<K, V>>>,
    pub layer_pre_load: Vec<Arc<dyn Extension<K, V>>>,
    pub layer_post_load: Vec<Arc<dyn Extension<K, V>>>,
    pub pre_set: Vec<Arc<dyn Extension<K, V>>>,
    pub post_set: Vec<Arc<dyn Extension<K, V>>>,
    pub layer_pre_set: Vec<Arc<dyn Extension<K, V>>>,
    pub layer_post_set: Vec<Arc<dyn Extension<K, V>>>,
}

impl<K: Key, V: Value> HookRegistry<K, V> {
    pub(crate) fn register(extensions: &[Arc<dyn Extension<K, V>>]) -> Self {
        let mut registry = Self {
            init: Vec::new(),
            pre_load: Vec::new(),
            post_load: Vec::new(),
            layer_pre_load: Vec::new(),
            layer_post_load: Vec::new(),
            pre_set: Vec::new(),
            post_set: Vec::new(),
            layer_pre_set: Vec::new(),
            layer_post_set: Vec::new(),
        };
        for extension in extensions {
            let capabilities = extension.capabilities();
            let mut subscribe = |capability: Capabilities, list: &mut Vec<_>| {
                if capabilities.contains(capability) {
                    list.push(Arc::clone(extension));
                }
            };
            subscribe(Capabilities::INIT, &mut registry.init);
            subscribe(Capabilities::PRE_LOAD, &mut registry.pre_load);
            subscribe(Capabilities::POST_LOAD, &mut registry.post_load);
            subscribe(Capabilities::LAYER_PRE_LOAD, &mut registry.layer_pre_load);
            subscribe(Capabilities::LAYER_POST_LOAD, &mut registry.layer_post_load);
            subscribe(Capabilities::PRE_SET, &mut registry.pre_set);
            subscribe(Capabilities::POST_SET, &mut registry.post_set);
            subscribe(Capabilities::LAYER_PRE_SET, &mut registry.layer_pre_set);
            subscribe(Capabilities::LAYER_POST_SET, &mut registry.layer_post_set);
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct LoadOnly;

    impl Extension<u64, u64> for LoadOnly {
        fn name(&self) -> &str {
            "load-only"
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::PRE_LOAD | Capabilities::POST_LOAD
        }
    }

    /// Verifies `Arc<dyn Extension>` compiles (object safety).
    #[test]
    fn extension_is_object_safe() {
        fn _assert_object_safe(_: &Arc<dyn Extension<u64, u64>>) {}
    }

    #[test]
    fn registry_subscribes_only_advertised_capabilities() {
        let extensions: Vec<Arc<dyn Extension<u64, u64>>> = vec![Arc::new(LoadOnly)];
        let registry = HookRegistry::register(&extensions);

        assert_eq!(registry.pre_load.len(), 1);
        assert_eq!(registry.post_load.len(), 1);
        assert!(registry.init.is_empty());
        assert!(registry.layer_pre_load.is_empty());
        assert!(registry.pre_set.is_empty());
        assert!(registry.layer_post_set.is_empty());
    }

    #[test]
    fn all_hooks_excludes_init() {
        assert!(!Capabilities::all_hooks().contains(Capabilities::INIT));
        assert!(Capabilities::all_hooks().contains(Capabilities::LAYER_POST_SET));
    }
}
