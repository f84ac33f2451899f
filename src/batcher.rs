//! Request coalescing.
//!
//! Concurrent single-key loads landing inside one time window (or before
//! the size bound trips) are collected into a [`Batch`] and handed to the
//! resolver as one key list. A key already owned by an in-flight batch is
//! de-duplicated onto the existing position, so overlapping callers share
//! both the wait and the work.
//!
//! Locking: the batcher-wide state (pending batch pointer plus key→batch
//! index) and each batch's mutable state live behind separate mutexes,
//! always acquired batcher → batch and never held across an `.await` or a
//! resolver call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::StoreError;
use crate::flags::LoadFlags;
use crate::resolver::Resolver;
use crate::{Key, Value};

/// A transient aggregation of pending loads.
///
/// While open, keys may be appended under the batcher lock; once `closing`
/// flips, the key list and positions are frozen and only the result slots
/// change.
pub(crate) struct Batch<K: Key, V: Value> {
    state: Mutex<BatchState<K, V>>,
    all_done: watch::Sender<bool>,
}

struct BatchState<K, V> {
    keys: Vec<K>,
    /// Per-key completion signals, parallel to `keys`; each flips to `true`
    /// exactly once.
    done: Vec<watch::Sender<bool>>,
    /// Result slots, sized when resolution starts.
    values: Vec<Option<V>>,
    errors: Vec<Option<StoreError>>,
    closing: bool,
}

impl<K: Key, V: Value> Batch<K, V> {
    fn new() -> Arc<Self> {
        let (all_done, _) = watch::channel(false);
        Arc::new(Self {
            state: Mutex::new(BatchState {
                keys: Vec::new(),
                done: Vec::new(),
                values: Vec::new(),
                errors: Vec::new(),
                closing: false,
            }),
            all_done,
        })
    }

    /// Write one result slot and fire its completion signal. Repeated calls
    /// for the same position are ignored.
    fn finish_key(&self, index: usize, outcome: Result<V, StoreError>) {
        let mut state = self.state.lock();
        if *state.done[index].borrow() {
            return;
        }
        match outcome {
            Ok(value) => state.values[index] = Some(value),
            Err(err) => state.errors[index] = Some(err),
        }
        state.done[index].send_replace(true);
    }

    /// Complete every position the resolver never reported, so no waiter
    /// blocks forever after an abnormal resolver termination.
    fn fail_unfinished(&self) {
        let mut state = self.state.lock();
        for index in 0..state.done.len() {
            if !*state.done[index].borrow() {
                state.errors[index] = Some(StoreError::ResolverFailed);
                state.done[index].send_replace(true);
            }
        }
    }

    /// Drive the frozen batch through the resolver, then purge its keys
    /// from the batcher index (when attached to one).
    async fn resolve(
        batch: Arc<Self>,
        resolver: Arc<Resolver<K, V>>,
        shared: Option<Arc<Mutex<Shared<K, V>>>>,
    ) {
        let keys = {
            let mut state = batch.state.lock();
            debug_assert!(state.closing, "batch resolved before being committed");
            let count = state.keys.len();
            state.values = vec![None; count];
            state.errors = vec![None; count];
            state.keys.clone()
        };

        // The cascade runs in a child task so a panicking layer cannot
        // strand waiters: the join error is absorbed and any unreported
        // position is completed below.
        let cascade = {
            let resolver = Arc::clone(&resolver);
            let batch = Arc::clone(&batch);
            let keys = keys.clone();
            tokio::spawn(async move {
                let mut finish = |index: usize, outcome: Result<V, StoreError>| {
                    batch.finish_key(index, outcome);
                };
                resolver.resolve(&keys, &mut finish).await;
            })
        };
        let _ = cascade.await;

        batch.fail_unfinished();
        batch.all_done.send_replace(true);

        if let Some(shared) = shared {
            let mut shared = shared.lock();
            for key in &keys {
                // A NoShareBatch load may have re-pointed the key at a
                // newer batch; only purge entries that still belong here.
                let owned = shared
                    .in_flight
                    .get(key)
                    .is_some_and(|owner| Arc::ptr_eq(owner, &batch));
                if owned {
                    shared.in_flight.remove(key);
                }
            }
        }
    }
}

/// Deferred-result handle for one key of one batch.
///
/// Awaiting it blocks until the batch position resolves. Dropping it
/// detaches this caller without affecting the batch, which still runs to
/// completion.
pub struct LoadThunk<K: Key, V: Value> {
    batch: Arc<Batch<K, V>>,
    position: usize,
    ready: watch::Receiver<bool>,
}

impl<K: Key, V: Value> LoadThunk<K, V> {
    /// Wait for the batch position to resolve and read its slot.
    pub async fn wait(mut self) -> Result<V, StoreError> {
        if self.ready.wait_for(|ready| *ready).await.is_err() {
            return Err(StoreError::ResolverFailed);
        }
        let state = self.batch.state.lock();
        if let Some(err) = &state.errors[self.position] {
            Err(err.clone())
        } else if let Some(value) = &state.values[self.position] {
            Ok(value.clone())
        } else {
            Err(StoreError::ResolverFailed)
        }
    }
}

/// Deferred-result handle for a list of keys, one thunk per position.
pub struct LoadAllThunk<K: Key, V: Value> {
    thunks: Vec<LoadThunk<K, V>>,
}

impl<K: Key, V: Value> LoadAllThunk<K, V> {
    /// One detached single-key batch per position, for stores without a
    /// batcher.
    pub(crate) fn detached(resolver: &Arc<Resolver<K, V>>, keys: &[K]) -> Self {
        Self {
            thunks: keys
                .iter()
                .map(|key| detached_thunk(resolver, key.clone()))
                .collect(),
        }
    }

    /// Wait for every position, in input order.
    pub async fn wait(self) -> Vec<Result<V, StoreError>> {
        let mut results = Vec::with_capacity(self.thunks.len());
        for thunk in self.thunks {
            results.push(thunk.wait().await);
        }
        results
    }
}

struct Shared<K: Key, V: Value> {
    /// The single open batch new keys may join, if any.
    pending: Option<Arc<Batch<K, V>>>,
    /// Key → owning batch (open, or closing but not yet resolved), used for
    /// in-flight de-duplication. Entries are purged after resolution.
    in_flight: HashMap<K, Arc<Batch<K, V>>>,
}

/// Time-windowed, size-bounded coalescing front for the resolver.
pub(crate) struct Batcher<K: Key, V: Value> {
    resolver: Arc<Resolver<K, V>>,
    wait: Duration,
    max_batch: usize,
    shared: Arc<Mutex<Shared<K, V>>>,
}

impl<K: Key, V: Value> Batcher<K, V> {
    pub(crate) fn new(resolver: Arc<Resolver<K, V>>, wait: Duration, max_batch: usize) -> Self {
        Self {
            resolver,
            wait,
            max_batch,
            shared: Arc::new(Mutex::new(Shared {
                pending: None,
                in_flight: HashMap::new(),
            })),
        }
    }

    pub(crate) async fn load(&self, key: K, flags: LoadFlags) -> Result<V, StoreError> {
        self.load_thunk(key, flags).wait().await
    }

    pub(crate) async fn load_all(&self, keys: &[K], flags: LoadFlags) -> Vec<Result<V, StoreError>> {
        self.load_all_thunk(keys, flags).wait().await
    }

    pub(crate) fn load_all_thunk(&self, keys: &[K], flags: LoadFlags) -> LoadAllThunk<K, V> {
        LoadAllThunk {
            thunks: keys
                .iter()
                .map(|key| self.load_thunk(key.clone(), flags))
                .collect(),
        }
    }

    /// Join a batch and return the deferred handle for this key's position.
    ///
    /// Batch selection, in priority order: the in-flight batch that already
    /// owns the key (unless `NO_SHARE_BATCH`), then the open pending batch,
    /// then a freshly allocated one. The first key of a batch arms its
    /// flush timer; reaching `max_batch` keys commits it immediately.
    pub(crate) fn load_thunk(&self, key: K, flags: LoadFlags) -> LoadThunk<K, V> {
        let share = !flags.contains(LoadFlags::NO_SHARE_BATCH);
        let mut shared = self.shared.lock();

        let by_key = if share {
            shared.in_flight.get(&key).cloned()
        } else {
            None
        };
        let batch = match by_key.or_else(|| shared.pending.clone()) {
            Some(batch) => batch,
            None => {
                let batch = Batch::new();
                shared.pending = Some(Arc::clone(&batch));
                batch
            }
        };
        shared.in_flight.insert(key.clone(), Arc::clone(&batch));

        let mut state = batch.state.lock();
        let position = match state.keys.iter().position(|existing| existing == &key) {
            Some(position) => position,
            None => {
                state.keys.push(key);
                let (done, _) = watch::channel(false);
                state.done.push(done);
                let position = state.keys.len() - 1;
                if position == 0 {
                    tokio::spawn(Self::run_timer(
                        Arc::clone(&self.shared),
                        Arc::clone(&batch),
                        Arc::clone(&self.resolver),
                        self.wait,
                    ));
                }
                position
            }
        };
        let ready = state.done[position].subscribe();

        if state.keys.len() >= self.max_batch && !state.closing {
            state.closing = true;
            if shared
                .pending
                .as_ref()
                .is_some_and(|pending| Arc::ptr_eq(pending, &batch))
            {
                shared.pending = None;
            }
            tokio::spawn(Batch::resolve(
                Arc::clone(&batch),
                Arc::clone(&self.resolver),
                Some(Arc::clone(&self.shared)),
            ));
        }
        drop(state);
        drop(shared);

        LoadThunk {
            batch,
            position,
            ready,
        }
    }

    /// Flush task armed when a batch receives its first key. If the size
    /// bound already committed the batch, this is a no-op.
    async fn run_timer(
        shared: Arc<Mutex<Shared<K, V>>>,
        batch: Arc<Batch<K, V>>,
        resolver: Arc<Resolver<K, V>>,
        wait: Duration,
    ) {
        tokio::time::sleep(wait).await;
        {
            let mut guard = shared.lock();
            let mut state = batch.state.lock();
            if state.closing {
                return;
            }
            state.closing = true;
            if guard
                .pending
                .as_ref()
                .is_some_and(|pending| Arc::ptr_eq(pending, &batch))
            {
                guard.pending = None;
            }
        }
        Batch::resolve(batch, resolver, Some(shared)).await;
    }
}

/// Single-key batch outside the shared index, used when batching is
/// disabled or bypassed but the caller still wants a thunk.
pub(crate) fn detached_thunk<K: Key, V: Value>(
    resolver: &Arc<Resolver<K, V>>,
    key: K,
) -> LoadThunk<K, V> {
    let batch = Batch::new();
    let ready = {
        let mut state = batch.state.lock();
        state.keys.push(key);
        let (done, _) = watch::channel(false);
        state.done.push(done);
        state.closing = true;
        state.done[0].subscribe()
    };
    tokio::spawn(Batch::resolve(
        Arc::clone(&batch),
        Arc::clone(resolver),
        None,
    ));
    LoadThunk {
        batch,
        position: 0,
        ready,
    }
}
