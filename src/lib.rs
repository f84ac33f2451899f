//! Layered, batching key-value store front.
//!
//! `strata` fronts heterogeneous backing data sources with a cascade of
//! caches. Concurrent single-key loads are coalesced into batches, missing
//! keys are back-filled from deeper layers, and values resolved by slower
//! tiers are primed into faster ones in the background.
//!
//! The building blocks:
//!
//! - [`Layer`](layer::Layer): one tier of storage, from in-process maps to
//!   remote backends
//! - [`Store`](store::Store): the facade stitching the cascade together
//! - the batcher: time-windowed, size-bounded request coalescing with
//!   in-flight de-duplication
//! - [`Extension`](extension::Extension): observers around every load and
//!   set boundary
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use strata::layer::{Layer, MemoryConfig, MemoryLayer};
//! use strata::{BatcherConfig, Store, StoreConfig};
//!
//! # #[derive(Clone)] struct UserBackend;
//! # #[async_trait::async_trait]
//! # impl Layer<u64, String> for UserBackend {
//! #     fn identifier(&self) -> &str { "users-db" }
//! #     async fn get(&self, keys: &[u64]) -> strata::layer::LayerResult<String> {
//! #         Ok(keys.iter().map(|_| Ok(String::new())).collect())
//! #     }
//! #     async fn set(&self, _: &[u64], _: &[String]) -> strata::KeyErrors { Vec::new() }
//! # }
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Store::new(StoreConfig {
//!     batcher: Some(BatcherConfig::default()),
//!     ..StoreConfig::new(
//!         "users",
//!         vec![
//!             Arc::new(MemoryLayer::new(MemoryConfig {
//!                 retention: Some(Duration::from_secs(60)),
//!             })) as Arc<dyn Layer<u64, String>>,
//!             Arc::new(UserBackend),
//!         ],
//!     )
//! })?;
//!
//! let name = store.load(42).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod extension;
pub mod flags;
pub mod layer;
pub mod static_store;
pub mod store;

mod batcher;
mod resolver;

#[cfg(test)]
pub(crate) mod doubles;

use std::fmt::Debug;
use std::hash::Hash;

pub use batcher::{LoadAllThunk, LoadThunk};
pub use config::{BatcherConfig, StoreConfig};
pub use error::{BuildError, KeyErrors, StoreError};
pub use flags::{LoadFlags, SetFlags};
pub use static_store::StaticStore;
pub use store::Store;

/// Bounds a store key must satisfy.
///
/// Blanket-implemented; never implement it manually. `Debug` feeds miss
/// messages and access logging.
pub trait Key: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> Key for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

/// Bounds a store value must satisfy.
///
/// Blanket-implemented; never implement it manually. Values are cloned
/// when a batch position fans out to several waiting callers and when
/// shallower layers are primed.
pub trait Value: Clone + Send + Sync + 'static {}

impl<T> Value for T where T: Clone + Send + Sync + 'static {}
