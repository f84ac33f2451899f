//! Layer SPI and the bundled cache tiers.
//!
//! A [`Layer`] is one tier of the store: shallow tiers are caches, the
//! deepest tier is usually the system of record. The store walks layers in
//! order, hands unresolved keys to the next tier, and primes shallower
//! tiers with whatever deeper tiers resolve.
//!
//! Bundled implementations:
//!
//! - [`MemoryLayer`]: concurrent map cache with optional retention
//! - [`TlruLayer`]: capacity-bounded time-aware LRU cache

pub mod memory;
pub mod tlru;

pub use memory::{MemoryConfig, MemoryLayer};
pub use tlru::{TlruConfig, TlruLayer};

use async_trait::async_trait;

use crate::error::{KeyErrors, StoreError};
use crate::{Key, Value};

/// Per-call result of [`Layer::get`].
///
/// The outer `Err` is a transport-level failure applying to every key of
/// the call; the inner vector is parallel to the input keys.
pub type LayerResult<V> = Result<Vec<Result<V, StoreError>>, StoreError>;

/// One tier of the store.
///
/// Implementations must be safe for concurrent `get` and `set` calls; the
/// store invokes both from independent tasks. Used as `Arc<dyn Layer<K, V>>`.
#[async_trait]
pub trait Layer<K: Key, V: Value>: Send + Sync {
    /// Stable human-readable identifier, used only by observers.
    fn identifier(&self) -> &str;

    /// Resolve `keys`, which is always non-empty.
    ///
    /// The returned vector must have one entry per key, in input order.
    /// `Err(StoreError::NotFound)` at an index is the normal miss signal
    /// and sends the key to the next layer; any other per-key error is a
    /// real failure that is surfaced to the caller if no deeper layer
    /// resolves the key. Returning an outer `Err` fails the whole call:
    /// every key is treated as unresolved with that error.
    async fn get(&self, keys: &[K]) -> LayerResult<V>;

    /// Write `values` for `keys` (parallel slices, same length).
    ///
    /// Called for explicit sets and for priming after a deeper layer
    /// resolves. The result is advisory: an empty vector means every write
    /// succeeded, and per-key errors never abort the surrounding operation.
    async fn set(&self, keys: &[K], values: &[V]) -> KeyErrors;
}
