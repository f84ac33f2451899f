//! The cascade walk.
//!
//! One resolver invocation takes a frozen key list, asks each layer in
//! order for the keys still unresolved, reports resolutions through a
//! per-position `finish` callback, and primes every shallower layer with
//! values resolved by deeper ones. The set fan-out lives here too, since
//! priming and explicit sets share the per-layer write path and its hooks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;

use crate::error::{merge_key_errors, KeyErrors, StoreError};
use crate::extension::HookRegistry;
use crate::flags::SetFlags;
use crate::layer::Layer;
use crate::{Key, Value};

/// Immutable cascade state shared by the store facade, the batcher, and
/// every spawned prime task.
pub(crate) struct Resolver<K: Key, V: Value> {
    identifier: String,
    layers: Vec<Arc<dyn Layer<K, V>>>,
    hooks: HookRegistry<K, V>,
    trace_counter: AtomicU64,
}

impl<K: Key, V: Value> Resolver<K, V> {
    pub(crate) fn new(
        identifier: String,
        layers: Vec<Arc<dyn Layer<K, V>>>,
        hooks: HookRegistry<K, V>,
    ) -> Self {
        Self {
            identifier,
            layers,
            hooks,
            trace_counter: AtomicU64::new(0),
        }
    }

    pub(crate) fn identifier(&self) -> &str {
        &self.identifier
    }

    pub(crate) fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Next trace id; every top-level load or set takes one and passes it
    /// unchanged to every hook it fires.
    fn next_trace_id(&self) -> u64 {
        self.trace_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Walk the layers for `keys`, reporting exactly one outcome per input
    /// position through `finish`.
    ///
    /// Outcomes are reported as they resolve, layer by layer, except when
    /// post-load hooks are registered: then reporting is deferred until
    /// after the hook pass so result overrides are observed by every
    /// waiter.
    pub(crate) async fn resolve(
        self: &Arc<Self>,
        keys: &[K],
        finish: &mut (dyn FnMut(usize, Result<V, StoreError>) + Send),
    ) {
        let count = keys.len();
        if count == 0 {
            return;
        }
        let trace_id = self.next_trace_id();

        let defer = !self.hooks.post_load.is_empty();
        let mut collected: Vec<Option<Result<V, StoreError>>> =
            if defer { (0..count).map(|_| None).collect() } else { Vec::new() };
        let mut emit = |index: usize, outcome: Result<V, StoreError>| {
            if defer {
                collected[index] = Some(outcome);
            } else {
                finish(index, outcome);
            }
        };

        let mut pre_veto: Vec<Option<StoreError>> = vec![None; count];
        for hook in &self.hooks.pre_load {
            merge_key_errors(&mut pre_veto, &hook.on_pre_load(trace_id, keys));
        }

        // Positions still unresolved, in ORIGINAL input coordinates, and
        // the keys to ask of the current layer (parallel to it).
        let mut errors: Vec<Option<StoreError>> = vec![None; count];
        let mut unresolved: Vec<usize> = Vec::with_capacity(count);
        let mut layer_keys: Vec<K> = Vec::with_capacity(count);
        for (index, key) in keys.iter().enumerate() {
            if let Some(veto) = pre_veto[index].take() {
                emit(index, Err(veto));
            } else {
                unresolved.push(index);
                layer_keys.push(key.clone());
            }
        }

        for (layer_index, layer) in self.layers.iter().enumerate() {
            if layer_keys.is_empty() {
                break;
            }

            let mut skip: Vec<Option<StoreError>> = vec![None; layer_keys.len()];
            for hook in &self.hooks.layer_pre_load {
                merge_key_errors(&mut skip, &hook.on_layer_pre_load(trace_id, layer_index, &layer_keys));
            }

            // A layer-pre-load veto excludes the key from this tier only;
            // it continues to the next layer carrying the veto error.
            let asked: Vec<usize> = (0..layer_keys.len())
                .filter(|local| skip[*local].is_none())
                .collect();
            let asked_results = if asked.is_empty() {
                Vec::new()
            } else {
                let asked_keys: Vec<K> =
                    asked.iter().map(|local| layer_keys[*local].clone()).collect();
                self.layer_get(layer.as_ref(), &asked_keys).await
            };

            let mut results: Vec<Result<V, StoreError>> = Vec::with_capacity(layer_keys.len());
            let mut asked_iter = asked_results.into_iter();
            for slot in &mut skip {
                match slot.take() {
                    Some(veto) => results.push(Err(veto)),
                    None => {
                        results.push(asked_iter.next().unwrap_or(Err(StoreError::ResolverFailed)));
                    }
                }
            }

            let mut mask: Vec<Option<StoreError>> = vec![None; layer_keys.len()];
            for hook in &self.hooks.layer_post_load {
                merge_key_errors(
                    &mut mask,
                    &hook.on_layer_post_load(trace_id, layer_index, &layer_keys, &results),
                );
            }

            let mut next_unresolved: Vec<usize> = Vec::new();
            let mut next_layer_keys: Vec<K> = Vec::new();
            let mut resolved_keys: Vec<K> = Vec::new();
            let mut resolved_values: Vec<V> = Vec::new();

            for (local, result) in results.into_iter().enumerate() {
                let original = unresolved[local];
                // A layer-post-load mask turns a resolution back into a
                // miss-with-error, forcing the key to a deeper layer.
                let result = match (result, mask[local].take()) {
                    (Ok(_), Some(masked)) => Err(masked),
                    (result, _) => result,
                };
                match result {
                    Ok(value) => {
                        emit(original, Ok(value.clone()));
                        resolved_keys.push(layer_keys[local].clone());
                        resolved_values.push(value);
                    }
                    Err(err) => {
                        errors[original] = Some(err);
                        next_unresolved.push(original);
                        next_layer_keys.push(layer_keys[local].clone());
                    }
                }
            }

            // Prime every shallower layer, one fire-and-forget task each.
            if !resolved_keys.is_empty() && layer_index > 0 {
                for shallower in (0..layer_index).rev() {
                    let this = Arc::clone(self);
                    let prime_keys = resolved_keys.clone();
                    let prime_values = resolved_values.clone();
                    tokio::spawn(async move {
                        this.layer_set(trace_id, shallower, &prime_keys, &prime_values)
                            .await;
                    });
                }
            }

            unresolved = next_unresolved;
            layer_keys = next_layer_keys;
        }

        // Whatever is left carries the deepest consulted layer's error.
        for original in &unresolved {
            let err = errors[*original]
                .take()
                .unwrap_or(StoreError::ResolverFailed);
            emit(*original, Err(err));
        }

        if defer {
            let results: Vec<Result<V, StoreError>> = collected
                .into_iter()
                .map(|slot| slot.unwrap_or(Err(StoreError::ResolverFailed)))
                .collect();
            let mut overrides: Vec<Option<StoreError>> = vec![None; count];
            for hook in &self.hooks.post_load {
                merge_key_errors(&mut overrides, &hook.on_post_load(trace_id, keys, &results));
            }
            for (index, result) in results.into_iter().enumerate() {
                match overrides[index].take() {
                    Some(err) => finish(index, Err(err)),
                    None => finish(index, result),
                }
            }
        }
    }

    /// Walk the cascade and gather the per-position outcomes in input
    /// order.
    pub(crate) async fn resolve_and_collect(
        self: &Arc<Self>,
        keys: &[K],
    ) -> Vec<Result<V, StoreError>> {
        let mut slots: Vec<Option<Result<V, StoreError>>> =
            (0..keys.len()).map(|_| None).collect();
        {
            let mut finish = |index: usize, outcome: Result<V, StoreError>| {
                slots[index] = Some(outcome);
            };
            self.resolve(keys, &mut finish).await;
        }
        slots
            .into_iter()
            .map(|slot| slot.unwrap_or(Err(StoreError::ResolverFailed)))
            .collect()
    }

    /// One layer `get` normalised to key-parallel outcomes: a transport
    /// failure or a length mismatch fans out to every key of the call.
    async fn layer_get(&self, layer: &dyn Layer<K, V>, keys: &[K]) -> Vec<Result<V, StoreError>> {
        match layer.get(keys).await {
            Ok(results) if results.len() == keys.len() => results,
            Ok(results) => {
                let err = StoreError::layer(format!(
                    "layer {} returned {} results for {} keys",
                    layer.identifier(),
                    results.len(),
                    keys.len()
                ));
                vec![Err(err); keys.len()]
            }
            Err(err) => vec![Err(err); keys.len()],
        }
    }

    /// Write `keys`/`values` to every layer.
    ///
    /// Returns per-layer error rows indexed `[layer][key]` by true layer
    /// position regardless of iteration direction. Layer errors never
    /// short-circuit the remaining writes.
    pub(crate) async fn set_all(
        self: &Arc<Self>,
        keys: &[K],
        values: &[V],
        flags: SetFlags,
    ) -> Vec<KeyErrors> {
        let trace_id = self.next_trace_id();
        let layer_count = self.layers.len();
        let count = keys.len();

        let mut blocked: Vec<Option<StoreError>> = vec![None; count];
        for hook in &self.hooks.pre_set {
            merge_key_errors(&mut blocked, &hook.on_pre_set(trace_id, keys, values));
        }
        let kept: Vec<usize> = (0..count).filter(|index| blocked[*index].is_none()).collect();

        // Rows start as the veto errors so blocked positions report the
        // veto for every layer.
        let mut errors: Vec<KeyErrors> = vec![blocked; layer_count];

        if kept.is_empty() {
            for hook in &self.hooks.post_set {
                hook.on_post_set(trace_id, keys, values, &errors);
            }
            return errors;
        }

        let (write_keys, write_values) = if kept.len() == count {
            (keys.to_vec(), values.to_vec())
        } else {
            (
                kept.iter().map(|index| keys[*index].clone()).collect(),
                kept.iter().map(|index| values[*index].clone()).collect(),
            )
        };

        if flags.contains(SetFlags::SEQUENTIAL) {
            let order: Vec<usize> = if flags.contains(SetFlags::ASCENDING) {
                (0..layer_count).collect()
            } else {
                (0..layer_count).rev().collect()
            };
            for layer_index in order {
                let row = self
                    .layer_set(trace_id, layer_index, &write_keys, &write_values)
                    .await;
                scatter(&mut errors[layer_index], &kept, row);
            }
        } else {
            let rows = join_all((0..layer_count).map(|layer_index| {
                self.layer_set(trace_id, layer_index, &write_keys, &write_values)
            }))
            .await;
            for (layer_index, row) in rows.into_iter().enumerate() {
                scatter(&mut errors[layer_index], &kept, row);
            }
        }

        for hook in &self.hooks.post_set {
            hook.on_post_set(trace_id, keys, values, &errors);
        }
        errors
    }

    /// One layer write wrapped in its pre/post hooks; used by explicit sets
    /// and by priming.
    pub(crate) async fn layer_set(
        &self,
        trace_id: u64,
        layer_index: usize,
        keys: &[K],
        values: &[V],
    ) -> KeyErrors {
        let count = keys.len();
        let mut vetoes: Vec<Option<StoreError>> = vec![None; count];
        for hook in &self.hooks.layer_pre_set {
            merge_key_errors(
                &mut vetoes,
                &hook.on_layer_pre_set(trace_id, layer_index, keys, values),
            );
        }

        let layer = &self.layers[layer_index];
        let mut errors: KeyErrors;
        if vetoes.iter().any(Option::is_some) {
            let kept: Vec<usize> = (0..count).filter(|index| vetoes[*index].is_none()).collect();
            errors = vetoes;
            if !kept.is_empty() {
                let kept_keys: Vec<K> = kept.iter().map(|index| keys[*index].clone()).collect();
                let kept_values: Vec<V> =
                    kept.iter().map(|index| values[*index].clone()).collect();
                let row = normalize_set_errors(layer.set(&kept_keys, &kept_values).await, kept.len());
                scatter(&mut errors, &kept, row);
            }
        } else {
            errors = normalize_set_errors(layer.set(keys, values).await, count);
        }

        for hook in &self.hooks.layer_post_set {
            hook.on_layer_post_set(trace_id, layer_index, keys, values, &errors);
        }
        errors
    }
}

/// Write `row[i]` into `dst[kept[i]]`.
fn scatter(dst: &mut KeyErrors, kept: &[usize], row: KeyErrors) {
    for (position, err) in kept.iter().zip(row) {
        dst[*position] = err;
    }
}

/// An empty error row means "all succeeded"; a short row is padded.
fn normalize_set_errors(mut errors: KeyErrors, count: usize) -> KeyErrors {
    if errors.is_empty() {
        return vec![None; count];
    }
    errors.resize(count, None);
    errors
}
