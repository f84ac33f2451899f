//! Error types shared across the store, its layers, and its extensions.
//!
//! Errors are cloneable by design: one resolution outcome can be fanned out
//! to every caller waiting on the same batch position.

use std::fmt;

/// Per-key error vector, parallel to a key slice.
///
/// An empty vector is equivalent to "no error at any index". Layers and
/// hooks return this shape so that a cheap all-success path allocates
/// nothing.
pub type KeyErrors = Vec<Option<StoreError>>;

/// Error produced while resolving or writing a single key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The layer does not own the key. This is the normal cache-miss signal
    /// and cascades to the next layer; it only reaches the caller when no
    /// layer resolves the key.
    #[error("key not found: {0}")]
    NotFound(String),

    /// A layer failed in a way that is not a miss. When returned as the
    /// outer error of [`Layer::get`](crate::layer::Layer::get), it applies
    /// to every key of that call.
    #[error("layer failure: {0}")]
    Layer(String),

    /// The resolver terminated without reporting a result for this key.
    #[error("resolver terminated before reporting a result")]
    ResolverFailed,

    /// An extension vetoed this key out of the operation.
    #[error("blocked by extension: {0}")]
    Vetoed(String),
}

impl StoreError {
    /// Builds the miss signal for `key`.
    pub fn not_found(key: &impl fmt::Debug) -> Self {
        Self::NotFound(format!("{key:?}"))
    }

    /// Builds a layer failure with the given message.
    pub fn layer(message: impl Into<String>) -> Self {
        Self::Layer(message.into())
    }

    /// Whether this is the normal cache-miss signal.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Error aborting [`Store::new`](crate::store::Store::new).
///
/// Construction is the only fatal boundary: once a store is built, no
/// runtime condition tears it down.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The layer list was empty.
    #[error("store requires at least one layer")]
    NoLayers,

    /// `max_batch` was zero. Use a large value for "effectively unbounded".
    #[error("batcher max_batch must be at least 1")]
    InvalidMaxBatch,

    /// An initialization hook rejected the store.
    #[error("extension {name} failed to initialize")]
    ExtensionInit {
        name: String,
        #[source]
        source: StoreError,
    },
}

/// Merge `src` into `dst`, keeping the first error recorded per index.
///
/// `src` may be empty (no vetoes) or shorter than `dst`; extra `dst`
/// positions are left untouched.
pub(crate) fn merge_key_errors(dst: &mut [Option<StoreError>], src: &[Option<StoreError>]) {
    for (slot, err) in dst.iter_mut().zip(src.iter()) {
        if slot.is_none() {
            slot.clone_from(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_formats_key_with_debug() {
        let err = StoreError::not_found(&42);
        assert_eq!(err, StoreError::NotFound("42".to_string()));
        assert!(err.is_not_found());
    }

    #[test]
    fn layer_error_is_not_a_miss() {
        let err = StoreError::layer("connection refused");
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), "layer failure: connection refused");
    }

    #[test]
    fn merge_keeps_first_error_per_index() {
        let mut dst = vec![None, Some(StoreError::ResolverFailed), None];
        let src = vec![
            Some(StoreError::layer("a")),
            Some(StoreError::layer("b")),
            None,
        ];
        merge_key_errors(&mut dst, &src);
        assert_eq!(dst[0], Some(StoreError::layer("a")));
        assert_eq!(dst[1], Some(StoreError::ResolverFailed));
        assert_eq!(dst[2], None);
    }

    #[test]
    fn merge_accepts_empty_source() {
        let mut dst = vec![None, None];
        merge_key_errors(&mut dst, &[]);
        assert_eq!(dst, vec![None, None]);
    }
}
