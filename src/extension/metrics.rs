//! Instrumentation extension.
//!
//! Counts per-status outcomes and accumulates wall-clock durations for
//! loads, sets, and per-layer operations, then reports each completed
//! operation through `tracing`. All timing state is confined to the
//! extension instance and keyed by trace id, so one `StoreMetrics` serves
//! exactly one store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::error::{KeyErrors, StoreError};
use crate::extension::{Capabilities, Extension};
use crate::layer::Layer;
use crate::{Key, Value};

#[derive(Default)]
struct OpStats {
    success: AtomicU64,
    not_found: AtomicU64,
    error: AtomicU64,
    total_micros: AtomicU64,
    batches: AtomicU64,
}

impl OpStats {
    fn record_outcomes<V>(&self, results: &[Result<V, StoreError>]) {
        for result in results {
            match result {
                Ok(_) => self.success.fetch_add(1, Ordering::Relaxed),
                Err(err) if err.is_not_found() => self.not_found.fetch_add(1, Ordering::Relaxed),
                Err(_) => self.error.fetch_add(1, Ordering::Relaxed),
            };
        }
    }

    fn record_duration(&self, started: Instant) -> u64 {
        let micros = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        self.total_micros.fetch_add(micros, Ordering::Relaxed);
        self.batches.fetch_add(1, Ordering::Relaxed);
        micros
    }

    fn snapshot(&self) -> OpSnapshot {
        OpSnapshot {
            success: self.success.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            error: self.error.load(Ordering::Relaxed),
            total_micros: self.total_micros.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counters for one operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpSnapshot {
    /// Keys that resolved successfully.
    pub success: u64,
    /// Keys that ended in the miss signal.
    pub not_found: u64,
    /// Keys that ended in a real failure.
    pub error: u64,
    /// Accumulated operation duration in microseconds.
    pub total_micros: u64,
    /// Number of observed operations (batches, not keys).
    pub batches: u64,
}

/// Point-in-time view of everything a [`StoreMetrics`] has counted.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// Top-level load counters.
    pub load: OpSnapshot,
    /// Top-level set counters.
    pub set: OpSnapshot,
    /// Per-layer load counters, indexed by layer position.
    pub layer_load: Vec<OpSnapshot>,
    /// Per-layer set counters, indexed by layer position.
    pub layer_set: Vec<OpSnapshot>,
}

/// Counts and times store operations.
///
/// Register one instance per store; `on_init` sizes the per-layer tables
/// and captures layer identifiers for reporting.
pub struct StoreMetrics {
    store: RwLock<String>,
    layer_identifiers: RwLock<Vec<String>>,
    load: OpStats,
    set: OpStats,
    layer_load: RwLock<Vec<Arc<OpStats>>>,
    layer_set: RwLock<Vec<Arc<OpStats>>>,
    load_started: DashMap<u64, Instant>,
    set_started: DashMap<u64, Instant>,
    layer_load_started: DashMap<(usize, u64), Instant>,
    layer_set_started: DashMap<(usize, u64), Instant>,
}

impl StoreMetrics {
    /// Creates an empty metrics collector.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: RwLock::new(String::new()),
            layer_identifiers: RwLock::new(Vec::new()),
            load: OpStats::default(),
            set: OpStats::default(),
            layer_load: RwLock::new(Vec::new()),
            layer_set: RwLock::new(Vec::new()),
            load_started: DashMap::new(),
            set_started: DashMap::new(),
            layer_load_started: DashMap::new(),
            layer_set_started: DashMap::new(),
        }
    }

    /// Returns the current counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            load: self.load.snapshot(),
            set: self.set.snapshot(),
            layer_load: self.layer_load.read().iter().map(|s| s.snapshot()).collect(),
            layer_set: self.layer_set.read().iter().map(|s| s.snapshot()).collect(),
        }
    }

    fn layer_stats(table: &RwLock<Vec<Arc<OpStats>>>, layer_index: usize) -> Option<Arc<OpStats>> {
        table.read().get(layer_index).cloned()
    }

    fn layer_identifier(&self, layer_index: usize) -> String {
        self.layer_identifiers
            .read()
            .get(layer_index)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for StoreMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Key, V: Value> Extension<K, V> for StoreMetrics {
    fn name(&self) -> &str {
        "metrics"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::INIT | Capabilities::all_hooks()
    }

    fn on_init(
        &self,
        identifier: &str,
        layers: &[Arc<dyn Layer<K, V>>],
    ) -> Result<(), StoreError> {
        *self.store.write() = identifier.to_string();
        *self.layer_identifiers.write() = layers
            .iter()
            .map(|layer| layer.identifier().to_string())
            .collect();
        *self.layer_load.write() = (0..layers.len()).map(|_| Arc::default()).collect();
        *self.layer_set.write() = (0..layers.len()).map(|_| Arc::default()).collect();
        Ok(())
    }

    fn on_pre_load(&self, trace_id: u64, _keys: &[K]) -> KeyErrors {
        self.load_started.insert(trace_id, Instant::now());
        Vec::new()
    }

    fn on_post_load(
        &self,
        trace_id: u64,
        keys: &[K],
        results: &[Result<V, StoreError>],
    ) -> KeyErrors {
        self.load.record_outcomes(results);
        if let Some((_, started)) = self.load_started.remove(&trace_id) {
            let micros = self.load.record_duration(started);
            tracing::debug!(
                store = %self.store.read(),
                trace_id,
                batch = keys.len(),
                micros,
                "load observed"
            );
        }
        Vec::new()
    }

    fn on_layer_pre_load(&self, trace_id: u64, layer_index: usize, _keys: &[K]) -> KeyErrors {
        self.layer_load_started
            .insert((layer_index, trace_id), Instant::now());
        Vec::new()
    }

    fn on_layer_post_load(
        &self,
        trace_id: u64,
        layer_index: usize,
        keys: &[K],
        results: &[Result<V, StoreError>],
    ) -> KeyErrors {
        if let Some(stats) = Self::layer_stats(&self.layer_load, layer_index) {
            stats.record_outcomes(results);
            if let Some((_, started)) = self.layer_load_started.remove(&(layer_index, trace_id)) {
                let micros = stats.record_duration(started);
                tracing::debug!(
                    store = %self.store.read(),
                    layer = %self.layer_identifier(layer_index),
                    trace_id,
                    batch = keys.len(),
                    micros,
                    "layer load observed"
                );
            }
        }
        Vec::new()
    }

    fn on_pre_set(&self, trace_id: u64, _keys: &[K], _values: &[V]) -> KeyErrors {
        self.set_started.insert(trace_id, Instant::now());
        Vec::new()
    }

    fn on_post_set(&self, trace_id: u64, keys: &[K], _values: &[V], errors: &[KeyErrors]) {
        for row in errors {
            for slot in row {
                match slot {
                    None => self.set.success.fetch_add(1, Ordering::Relaxed),
                    Some(err) if err.is_not_found() => {
                        self.set.not_found.fetch_add(1, Ordering::Relaxed)
                    }
                    Some(_) => self.set.error.fetch_add(1, Ordering::Relaxed),
                };
            }
        }
        if let Some((_, started)) = self.set_started.remove(&trace_id) {
            let micros = self.set.record_duration(started);
            tracing::debug!(
                store = %self.store.read(),
                trace_id,
                batch = keys.len(),
                micros,
                "set observed"
            );
        }
    }

    fn on_layer_pre_set(
        &self,
        trace_id: u64,
        layer_index: usize,
        _keys: &[K],
        _values: &[V],
    ) -> KeyErrors {
        self.layer_set_started
            .insert((layer_index, trace_id), Instant::now());
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
        if let Some(stats) = Self::layer_stats(&self.layer_set, layer_index) {
            let failed = errors.iter().filter(|err| err.is_some()).count() as u64;
            let succeeded = keys.len() as u64 - failed.min(keys.len() as u64);
            stats.success.fetch_add(succeeded, Ordering::Relaxed);
            stats.error.fetch_add(failed, Ordering::Relaxed);
            if let Some((_, started)) = self.layer_set_started.remove(&(layer_index, trace_id)) {
                stats.record_duration(started);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn post_load_counts_statuses_and_batches() {
        let metrics = StoreMetrics::new();
        let keys = [1u64, 2, 3];
        let results: Vec<Result<u64, StoreError>> = vec![
            Ok(1),
            Err(StoreError::not_found(&2)),
            Err(StoreError::layer("boom")),
        ];

        Extension::<u64, u64>::on_pre_load(&metrics, 7, &keys);
        Extension::<u64, u64>::on_post_load(&metrics, 7, &keys, &results);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.load.success, 1);
        assert_eq!(snapshot.load.not_found, 1);
        assert_eq!(snapshot.load.error, 1);
        assert_eq!(snapshot.load.batches, 1);
        // The start-time entry for the trace is gone once recorded.
        assert!(metrics.load_started.is_empty());
    }

    #[test]
    fn duration_accumulates() {
        let stats = OpStats::default();
        let started = Instant::now() - Duration::from_millis(5);
        let micros = stats.record_duration(started);
        assert!(micros >= 5_000);
        assert_eq!(stats.snapshot().total_micros, micros);
    }

    #[test]
    fn layer_hooks_ignore_unknown_layer_index() {
        let metrics = StoreMetrics::new();
        // No on_init: the layer tables are empty, so this must be a no-op.
        let results: Vec<Result<u64, StoreError>> = vec![Ok(1)];
        Extension::<u64, u64>::on_layer_post_load(&metrics, 1, 3, &[1], &results);
        assert!(metrics.snapshot().layer_load.is_empty());
    }
}
