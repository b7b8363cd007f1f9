//! Single-flight result caching.
//!
//! # Responsibilities
//! - Serve cached results while they are inside the freshness window
//! - Collapse concurrent callers for one key into a single producer run
//! - Evict entries not refreshed within an absolute ceiling
//!
//! Unhealthy outcomes are ordinary values here: a probe that failed is cached
//! just like one that succeeded, so a flapping dependency is hit at most once
//! per window.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;

/// Entries untouched for this long are dropped regardless of the freshness
/// window, so checks that are no longer queried do not pin memory.
pub const MAX_ENTRY_AGE: Duration = Duration::from_secs(5 * 60);

struct Slot<T> {
    value: Option<(T, Instant)>,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Self { value: None }
    }
}

/// A keyed TTL cache with at-most-one-concurrent-producer semantics.
///
/// Callers sharing a key queue on that key's lock; whoever acquires it first
/// on a miss runs the producer, and everyone behind it observes the value it
/// stored. Callers with different keys never contend.
pub struct SingleFlight<T> {
    freshness: Duration,
    max_age: Duration,
    slots: DashMap<String, Arc<Mutex<Slot<T>>>>,
}

impl<T: Clone> SingleFlight<T> {
    /// Create a cache with the given freshness window and the default
    /// [`MAX_ENTRY_AGE`] eviction ceiling.
    pub fn new(freshness: Duration) -> Self {
        Self::with_limits(freshness, MAX_ENTRY_AGE)
    }

    /// Create a cache with explicit limits. Mostly useful in tests.
    pub fn with_limits(freshness: Duration, max_age: Duration) -> Self {
        Self {
            freshness,
            max_age,
            slots: DashMap::new(),
        }
    }

    /// Return the cached value for `key` if it is still fresh, otherwise run
    /// `producer` exactly once and cache its output.
    ///
    /// Concurrent callers for the same key during a miss all receive the
    /// value from the single in-flight producer run.
    pub async fn get<F, Fut>(&self, key: &str, producer: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.sweep();

        let slot = {
            self.slots
                .entry(key.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(Slot::new())))
                .clone()
        };

        let mut guard = slot.lock().await;
        if let Some((value, stored_at)) = &guard.value {
            if stored_at.elapsed() < self.freshness {
                return value.clone();
            }
        }

        let value = producer().await;
        guard.value = Some((value.clone(), Instant::now()));
        value
    }

    /// Number of live entries, including ones past their freshness window
    /// but not yet past the eviction ceiling.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drop entries older than the ceiling. Slots with an in-flight producer
    /// are left alone; they will be swept once they settle.
    fn sweep(&self) {
        self.slots.retain(|_, slot| match slot.try_lock() {
            Ok(guard) => match &guard.value {
                Some((_, stored_at)) => stored_at.elapsed() < self.max_age,
                None => true,
            },
            Err(_) => true,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[tokio::test]
    async fn fresh_hit_skips_producer() {
        let cache = SingleFlight::new(Duration::from_secs(5));
        let runs = counter();

        for _ in 0..3 {
            let runs = runs.clone();
            let value = cache
                .get("disk", || async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    7u64
                })
                .await;
            assert_eq!(value, 7);
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_entry_reruns_producer() {
        let cache = SingleFlight::new(Duration::from_millis(20));
        let runs = counter();

        for _ in 0..2 {
            let runs = runs.clone();
            cache
                .get("disk", || async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    1u64
                })
                .await;
            tokio::time::sleep(Duration::from_millis(40)).await;
        }

        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_run() {
        let cache = Arc::new(SingleFlight::new(Duration::from_secs(5)));
        let runs = counter();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let runs = runs.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get("api", || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        42u64
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 42);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn independent_keys_do_not_contend() {
        let cache = Arc::new(SingleFlight::new(Duration::from_secs(5)));

        let slow = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get("slow", || async {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        1u64
                    })
                    .await
            })
        };

        // The fast key must resolve long before the slow producer settles.
        let started = Instant::now();
        let fast = cache.get("fast", || async { 2u64 }).await;
        assert_eq!(fast, 2);
        assert!(started.elapsed() < Duration::from_millis(100));

        assert_eq!(slow.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn ceiling_evicts_idle_entries() {
        let cache =
            SingleFlight::with_limits(Duration::from_secs(60), Duration::from_millis(20));

        cache.get("stale", || async { 1u64 }).await;
        assert_eq!(cache.len(), 1);

        tokio::time::sleep(Duration::from_millis(40)).await;
        cache.get("live", || async { 2u64 }).await;

        // The sweep on the second call drops the idle entry even though its
        // freshness window had not elapsed.
        assert_eq!(cache.len(), 1);
    }
}
