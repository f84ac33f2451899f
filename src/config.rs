//! Store configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::extension::Extension;
use crate::flags::{LoadFlags, SetFlags};
use crate::layer::Layer;
use crate::{Key, Value};

/// Batching window configuration. Presence of this struct in
/// [`StoreConfig::batcher`] is what enables batching.
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// How long a batch stays open collecting keys before it is flushed.
    /// A zero duration falls back to the 1 ms default.
    pub wait: Duration,

    /// Forced-flush threshold: a batch reaching this many distinct keys is
    /// committed immediately. Must be at least 1; use a very large value
    /// for "no limit".
    pub max_batch: usize,
}

impl BatcherConfig {
    /// Default flush window.
    pub const DEFAULT_WAIT: Duration = Duration::from_millis(1);

    /// Default forced-flush threshold.
    pub const DEFAULT_MAX_BATCH: usize = 256;
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            wait: Self::DEFAULT_WAIT,
            max_batch: Self::DEFAULT_MAX_BATCH,
        }
    }
}

/// Configuration for [`Store::new`](crate::store::Store::new).
///
/// Does not derive `Default` because `layers` is a required field: a store
/// with no layers cannot resolve anything and is rejected at construction.
pub struct StoreConfig<K: Key, V: Value> {
    /// Opaque identifier surfaced to observers and logging.
    pub identifier: String,

    /// Batcher configuration; `None` disables batching entirely.
    pub batcher: Option<BatcherConfig>,

    /// The resolver layers, walked from the first (shallowest) to the last
    /// (deepest). Must be non-empty.
    pub layers: Vec<Arc<dyn Layer<K, V>>>,

    /// Flags OR-ed into every load call.
    pub default_load_flags: LoadFlags,

    /// Flags OR-ed into every set call.
    pub default_set_flags: SetFlags,

    /// Observers registered at construction; capability lists are frozen
    /// once the store is built.
    pub extensions: Vec<Arc<dyn Extension<K, V>>>,
}

impl<K: Key, V: Value> StoreConfig<K, V> {
    /// Creates a configuration with the given layers and no batching,
    /// extensions, or default flags.
    #[must_use]
    pub fn new(identifier: impl Into<String>, layers: Vec<Arc<dyn Layer<K, V>>>) -> Self {
        Self {
            identifier: identifier.into(),
            batcher: None,
            layers,
            default_load_flags: LoadFlags::empty(),
            default_set_flags: SetFlags::empty(),
            extensions: Vec::new(),
        }
    }
}
