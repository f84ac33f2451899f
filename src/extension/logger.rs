//! Access-logging extension.
//!
//! Emits one `tracing` debug event per hook point, carrying the trace id so
//! the events of one operation can be correlated. Purely observational:
//! never vetoes a key.

use std::marker::PhantomData;

use crate::error::{KeyErrors, StoreError};
use crate::extension::{Capabilities, Extension};
use crate::{Key, Value};

/// Logs loads and sets for debugging.
pub struct LoggerExtension<K, V> {
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> LoggerExtension<K, V> {
    /// Creates the logger.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<K, V> Default for LoggerExtension<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

fn outcome_counts<V>(results: &[Result<V, StoreError>]) -> (usize, usize, usize) {
    let mut resolved = 0;
    let mut missing = 0;
    let mut failed = 0;
    for result in results {
        match result {
            Ok(_) => resolved += 1,
            Err(err) if err.is_not_found() => missing += 1,
            Err(_) => failed += 1,
        }
    }
    (resolved, missing, failed)
}

impl<K: Key, V: Value> Extension<K, V> for LoggerExtension<K, V> {
    fn name(&self) -> &str {
        "logger"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all_hooks()
    }

    fn on_pre_load(&self, trace_id: u64, keys: &[K]) -> KeyErrors {
        tracing::debug!(trace_id, keys = ?keys, "load start");
        Vec::new()
    }

    fn on_post_load(
        &self,
        trace_id: u64,
        keys: &[K],
        results: &[Result<V, StoreError>],
    ) -> KeyErrors {
        let (resolved, missing, failed) = outcome_counts(results);
        tracing::debug!(
            trace_id,
            count = keys.len(),
            resolved,
            missing,
            failed,
            "load finish"
        );
        Vec::new()
    }

    fn on_layer_pre_load(&self, trace_id: u64, layer_index: usize, keys: &[K]) -> KeyErrors {
        tracing::debug!(trace_id, layer_index, keys = ?keys, "layer load start");
        Vec::new()
    }

    fn on_layer_post_load(
        &self,
        trace_id: u64,
        layer_index: usize,
        keys: &[K],
        results: &[Result<V, StoreError>],
    ) -> KeyErrors {
        let (resolved, missing, failed) = outcome_counts(results);
        tracing::debug!(
            trace_id,
            layer_index,
            count = keys.len(),
            resolved,
            missing,
            failed,
            "layer load finish"
        );
        Vec::new()
    }

    fn on_pre_set(&self, trace_id: u64, keys: &[K], _values: &[V]) -> KeyErrors {
        tracing::debug!(trace_id, keys = ?keys, "set start");
        Vec::new()
    }

    fn on_post_set(&self, trace_id: u64, keys: &[K], _values: &[V], errors: &[KeyErrors]) {
        let failed_layers = errors
            .iter()
            .filter(|row| row.iter().any(Option::is_some))
            .count();
        tracing::debug!(trace_id, count = keys.len(), failed_layers, "set finish");
    }

    fn on_layer_pre_set(
        &self,
        trace_id: u64,
        layer_index: usize,
        keys: &[K],
        _values: &[V],
    ) -> KeyErrors {
        tracing::debug!(trace_id, layer_index, keys = ?keys, "layer set start");
        Vec::new()
    }

    fn on_layer_post_set(
        &self,
        trace_id: u64,
        layer_index: usize,
        keys: &[K],
        _values: &[V],
        errors: &KeyErrors,
    ) {
        let failed = errors.iter().filter(|err| err.is_some()).count();
        tracing::debug!(trace_id, layer_index, count = keys.len(), failed, "layer set finish");
    }
}
