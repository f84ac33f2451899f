//! Test doubles shared across the crate's test modules.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{KeyErrors, StoreError};
use crate::layer::{Layer, LayerResult};

/// Backend that squares its keys after an artificial delay, recording how
/// it was called.
pub(crate) struct SquareBackend {
    delay: Duration,
    calls: AtomicUsize,
    keys_seen: AtomicUsize,
    max_batch_size: AtomicUsize,
}

impl SquareBackend {
    pub(crate) fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
            keys_seen: AtomicUsize::new(0),
            max_batch_size: AtomicUsize::new(0),
        }
    }

    /// Number of `get` invocations.
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Total keys observed across all invocations.
    pub(crate) fn keys_seen(&self) -> usize {
        self.keys_seen.load(Ordering::SeqCst)
    }

    /// Largest single batch observed.
    pub(crate) fn max_batch_size(&self) -> usize {
        self.max_batch_size.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Layer<u64, u64> for SquareBackend {
    fn identifier(&self) -> &str {
        "square-backend"
    }

    async fn get(&self, keys: &[u64]) -> LayerResult<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.keys_seen.fetch_add(keys.len(), Ordering::SeqCst);
        self.max_batch_size.fetch_max(keys.len(), Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(keys.iter().map(|key| Ok(key * key)).collect())
    }

    async fn set(&self, _keys: &[u64], _values: &[u64]) -> KeyErrors {
        Vec::new()
    }
}

/// Backend that resolves non-prime keys to themselves and misses primes.
pub(crate) struct NotPrimeBackend {
    delay: Duration,
}

impl NotPrimeBackend {
    pub(crate) fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Layer<u64, u64> for NotPrimeBackend {
    fn identifier(&self) -> &str {
        "not-prime-backend"
    }

    async fn get(&self, keys: &[u64]) -> LayerResult<u64> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(keys
            .iter()
            .map(|key| {
                if is_prime(*key) {
                    Err(StoreError::not_found(key))
                } else {
                    Ok(*key)
                }
            })
            .collect())
    }

    async fn set(&self, _keys: &[u64], _values: &[u64]) -> KeyErrors {
        Vec::new()
    }
}

/// Backend that resolves each key with the configured probability and
/// misses otherwise.
pub(crate) struct FlakyBackend {
    delay: Duration,
    success_probability: f64,
}

impl FlakyBackend {
    pub(crate) fn new(delay: Duration, success_probability: f64) -> Self {
        Self {
            delay,
            success_probability,
        }
    }
}

#[async_trait]
impl Layer<u64, u64> for FlakyBackend {
    fn identifier(&self) -> &str {
        "flaky-backend"
    }

    async fn get(&self, keys: &[u64]) -> LayerResult<u64> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(keys
            .iter()
            .map(|key| {
                if rand::random::<f64>() < self.success_probability {
                    Ok(key * key)
                } else {
                    Err(StoreError::not_found(key))
                }
            })
            .collect())
    }

    async fn set(&self, _keys: &[u64], _values: &[u64]) -> KeyErrors {
        Vec::new()
    }
}

/// Backend whose whole `get` call fails, as a broken connection would.
pub(crate) struct FailingBackend {
    message: String,
}

impl FailingBackend {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl Layer<u64, u64> for FailingBackend {
    fn identifier(&self) -> &str {
        "failing-backend"
    }

    async fn get(&self, _keys: &[u64]) -> LayerResult<u64> {
        Err(StoreError::layer(self.message.clone()))
    }

    async fn set(&self, _keys: &[u64], _values: &[u64]) -> KeyErrors {
        Vec::new()
    }
}

/// Backend that panics inside `get`, for resolver-guard tests.
pub(crate) struct PanicBackend;

#[async_trait]
impl Layer<u64, u64> for PanicBackend {
    fn identifier(&self) -> &str {
        "panic-backend"
    }

    async fn get(&self, _keys: &[u64]) -> LayerResult<u64> {
        panic!("backend blew up");
    }

    async fn set(&self, _keys: &[u64], _values: &[u64]) -> KeyErrors {
        Vec::new()
    }
}

/// One recorded write against a [`RecordingLayer`].
pub(crate) struct SetEvent {
    pub(crate) layer: String,
    pub(crate) keys: Vec<u64>,
}

pub(crate) type SetLog = Arc<Mutex<Vec<SetEvent>>>;

/// Settable layer that appends every write to a shared log, so tests can
/// assert on cross-layer write ordering.
pub(crate) struct RecordingLayer {
    name: String,
    log: SetLog,
    entries: DashMap<u64, u64>,
}

impl RecordingLayer {
    pub(crate) fn new(name: impl Into<String>, log: SetLog) -> Self {
        Self {
            name: name.into(),
            log,
            entries: DashMap::new(),
        }
    }

    pub(crate) fn shared_log() -> SetLog {
        Arc::new(Mutex::new(Vec::new()))
    }
}

#[async_trait]
impl Layer<u64, u64> for RecordingLayer {
    fn identifier(&self) -> &str {
        &self.name
    }

    async fn get(&self, keys: &[u64]) -> LayerResult<u64> {
        Ok(keys
            .iter()
            .map(|key| {
                self.entries
                    .get(key)
                    .map(|entry| *entry.value())
                    .ok_or_else(|| StoreError::not_found(key))
            })
            .collect())
    }

    async fn set(&self, keys: &[u64], values: &[u64]) -> KeyErrors {
        for (key, value) in keys.iter().zip(values.iter()) {
            self.entries.insert(*key, *value);
        }
        self.log.lock().push(SetEvent {
            layer: self.name.clone(),
            keys: keys.to_vec(),
        });
        Vec::new()
    }
}

pub(crate) fn is_prime(value: u64) -> bool {
    if value < 2 {
        return false;
    }
    let mut divisor = 2;
    while divisor * divisor <= value {
        if value % divisor == 0 {
            return false;
        }
        divisor += 1;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prime_checker_matches_known_values() {
        let primes: Vec<u64> = (0..20).filter(|v| is_prime(*v)).collect();
        assert_eq!(primes, vec![2, 3, 5, 7, 11, 13, 17, 19]);
    }
}
