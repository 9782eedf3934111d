//! Single-flight result cache keyed by dataset fingerprint
//!
//! Completed results live in an LRU map; computations in progress are
//! tracked separately so that concurrent requests for the same key share
//! one computation instead of racing. Failures are broadcast to every
//! waiter but never memoized, so the next request retries.

use crate::dataset::Fingerprint;
use crate::{Result, TabLensError};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Cache partition key: dataset content identity plus a per-consumer
/// discriminator (config hash, query hash).
pub type CacheKey = (Fingerprint, u64);

pub const DEFAULT_CACHE_CAPACITY: usize = 64;

/// Counters for cache behaviour.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    pub hits: AtomicUsize,
    pub misses: AtomicUsize,
    pub joined: AtomicUsize,
    pub evictions: AtomicUsize,
    pub failures: AtomicUsize,
    pub invalidations: AtomicUsize,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let total = hits + self.misses.load(Ordering::Relaxed) as f64;
        if total > 0.0 {
            hits / total
        } else {
            0.0
        }
    }
}

struct CachedEntry<V> {
    value: Arc<V>,
    computed_at: Instant,
}

impl<V> Clone for CachedEntry<V> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            computed_at: self.computed_at,
        }
    }
}

/// Outcome broadcast to waiters. Errors cross the channel as text because
/// the underlying error types are not clonable.
type Outcome<V> = std::result::Result<Arc<V>, String>;

struct Inner<V> {
    done: LruCache<CacheKey, CachedEntry<V>>,
    inflight: HashMap<CacheKey, broadcast::Sender<Outcome<V>>>,
    /// Bumped on every invalidation. An in-flight computation started under
    /// an older epoch completes normally but is not memoized, so waiters
    /// never observe a result that survives its own invalidation.
    epoch: u64,
}

pub struct SingleFlightCache<V> {
    inner: Arc<Mutex<Inner<V>>>,
    metrics: Arc<CacheMetrics>,
}

impl<V> Clone for SingleFlightCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<V: Send + Sync + 'static> SingleFlightCache<V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .unwrap_or_else(|| NonZeroUsize::new(DEFAULT_CACHE_CAPACITY).unwrap());
        Self {
            inner: Arc::new(Mutex::new(Inner {
                done: LruCache::new(capacity),
                inflight: HashMap::new(),
                epoch: 0,
            })),
            metrics: Arc::new(CacheMetrics::default()),
        }
    }

    /// Return the cached value for `key`, joining an in-flight computation
    /// if one exists, or starting `compute` otherwise. The computation runs
    /// on its own task so that a caller dropping its future does not cancel
    /// work other waiters depend on.
    pub async fn get_or_compute<F, Fut>(&self, key: CacheKey, compute: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let mut rx = {
            let mut inner = self.inner.lock();
            if let Some(entry) = inner.done.get(&key) {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry.value.clone());
            }
            if let Some(tx) = inner.inflight.get(&key) {
                self.metrics.joined.fetch_add(1, Ordering::Relaxed);
                tx.subscribe()
            } else {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = broadcast::channel(1);
                inner.inflight.insert(key, tx.clone());
                let started_epoch = inner.epoch;
                drop(inner);
                self.spawn_compute(key, started_epoch, tx, compute);
                rx
            }
        };

        match rx.recv().await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(detail)) => Err(TabLensError::Computation(detail)),
            Err(_) => Err(TabLensError::Computation(
                "cached computation was abandoned".to_string(),
            )),
        }
    }

    fn spawn_compute<F, Fut>(
        &self,
        key: CacheKey,
        started_epoch: u64,
        tx: broadcast::Sender<Outcome<V>>,
        compute: F,
    ) where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let inner = self.inner.clone();
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            let outcome = compute().await;
            let mut guard = inner.lock();
            guard.inflight.remove(&key);
            let broadcast_value = match outcome {
                Ok(value) => {
                    let value = Arc::new(value);
                    if guard.epoch == started_epoch {
                        let evicted = guard.done.push(
                            key,
                            CachedEntry {
                                value: value.clone(),
                                computed_at: Instant::now(),
                            },
                        );
                        if matches!(evicted, Some((old, _)) if old != key) {
                            metrics.evictions.fetch_add(1, Ordering::Relaxed);
                        }
                    } else {
                        debug!(fingerprint = %key.0, "dropping stale result after invalidation");
                    }
                    Ok(value)
                }
                Err(err) => {
                    metrics.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(fingerprint = %key.0, error = %err, "cached computation failed");
                    Err(err.to_string())
                }
            };
            drop(guard);
            // Every waiter holds a receiver, so send only fails if all of
            // them already gave up.
            let _ = tx.send(broadcast_value);
        });
    }

    /// Drop every completed entry for `fingerprint` and prevent in-flight
    /// computations from being memoized. Returns the number of completed
    /// entries removed.
    pub fn invalidate(&self, fingerprint: &Fingerprint) -> usize {
        let mut inner = self.inner.lock();
        let stale: Vec<CacheKey> = inner
            .done
            .iter()
            .map(|(k, _)| *k)
            .filter(|(fp, _)| fp == fingerprint)
            .collect();
        for key in &stale {
            inner.done.pop(key);
        }
        inner.epoch += 1;
        self.metrics
            .invalidations
            .fetch_add(1, Ordering::Relaxed);
        debug!(
            fingerprint = %fingerprint,
            removed = stale.len(),
            "invalidated cache entries"
        );
        stale.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.done.clear();
        inner.epoch += 1;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Age of the completed entry for `key`, if cached.
    pub fn entry_age(&self, key: &CacheKey) -> Option<std::time::Duration> {
        self.inner
            .lock()
            .done
            .peek(key)
            .map(|e| e.computed_at.elapsed())
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn fp(seed: u8) -> Fingerprint {
        Fingerprint::from_bytes([seed; 32])
    }

    #[tokio::test]
    async fn test_hit_after_compute() {
        let cache: SingleFlightCache<u64> = SingleFlightCache::new(4);
        let key = (fp(1), 0);
        let first = cache.get_or_compute(key, || async { Ok(42u64) }).await.unwrap();
        assert_eq!(*first, 42);
        let second = cache
            .get_or_compute(key, || async { Ok(99u64) })
            .await
            .unwrap();
        assert_eq!(*second, 42);
        assert_eq!(cache.metrics().hits.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_computation() {
        let cache: SingleFlightCache<u64> = SingleFlightCache::new(4);
        let key = (fp(2), 0);
        let invocations = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let invocations = invocations.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(key, move || async move {
                        invocations.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok(7u64)
                    })
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(*handle.await.unwrap().unwrap(), 7);
        }
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_not_memoized() {
        let cache: SingleFlightCache<u64> = SingleFlightCache::new(4);
        let key = (fp(3), 0);
        let err = cache
            .get_or_compute(key, || async {
                Err(TabLensError::Computation("boom".to_string()))
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert_eq!(cache.len(), 0);

        let recovered = cache.get_or_compute(key, || async { Ok(5u64) }).await.unwrap();
        assert_eq!(*recovered, 5);
    }

    #[tokio::test]
    async fn test_invalidate_forces_recompute() {
        let cache: SingleFlightCache<u64> = SingleFlightCache::new(4);
        let key = (fp(4), 0);
        cache.get_or_compute(key, || async { Ok(1u64) }).await.unwrap();
        assert_eq!(cache.invalidate(&fp(4)), 1);
        let fresh = cache.get_or_compute(key, || async { Ok(2u64) }).await.unwrap();
        assert_eq!(*fresh, 2);
    }

    #[tokio::test]
    async fn test_invalidate_only_touches_matching_fingerprint() {
        let cache: SingleFlightCache<u64> = SingleFlightCache::new(4);
        cache
            .get_or_compute((fp(5), 0), || async { Ok(1u64) })
            .await
            .unwrap();
        cache
            .get_or_compute((fp(6), 0), || async { Ok(2u64) })
            .await
            .unwrap();
        assert_eq!(cache.invalidate(&fp(5)), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let cache: SingleFlightCache<u64> = SingleFlightCache::new(2);
        for seed in 0..3u8 {
            cache
                .get_or_compute((fp(seed), 0), move || async move { Ok(seed as u64) })
                .await
                .unwrap();
        }
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.metrics().evictions.load(Ordering::Relaxed), 1);
    }
}
