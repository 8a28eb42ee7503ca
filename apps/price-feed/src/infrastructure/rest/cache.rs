//! Response Cache
//!
//! Short-lived memoization of upstream responses, keyed by a string built
//! from the operation name and its normalized parameters.
//!
//! - An entry is fresh while `now - stored_at < ttl`.
//! - Failed fetches are never stored.
//! - Concurrent callers for one key share a single upstream fetch.
//! - When `max_entries` is reached the oldest entry is evicted.
//!
//! Time comes from `tokio::time::Instant`, so tests can drive expiry with a
//! paused clock.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::infrastructure::metrics;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    payload: V,
    stored_at: Instant,
}

/// TTL cache owned by one client.
#[derive(Debug)]
pub struct ResponseCache<V> {
    name: String,
    ttl: Duration,
    max_entries: usize,
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    key_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<V: Clone> ResponseCache<V> {
    /// Create a cache with a default TTL and an entry bound (0 = unbounded).
    #[must_use]
    pub fn new(name: impl Into<String>, ttl: Duration, max_entries: usize) -> Self {
        Self {
            name: name.into(),
            ttl,
            max_entries,
            entries: Mutex::new(HashMap::new()),
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Default TTL.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the fresh payload for `key`, or run `fetch` and store its
    /// result.
    ///
    /// # Errors
    ///
    /// Returns whatever `fetch` returns; errors are not cached.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: &str, ttl: Duration, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(payload) = self.fresh(key, ttl) {
            metrics::record_cache_lookup(&self.name, true);
            return Ok(payload);
        }

        let hold = self.key_lock(key);
        let _guard = hold.lock.lock().await;

        // Another caller may have filled the entry while we waited.
        if let Some(payload) = self.fresh(key, ttl) {
            metrics::record_cache_lookup(&self.name, true);
            return Ok(payload);
        }

        metrics::record_cache_lookup(&self.name, false);
        tracing::debug!(cache = %self.name, key, "Cache miss, fetching");
        fetch()
            .await
            .inspect(|payload| self.store(key, payload.clone()))
    }

    /// Drop one entry. Returns `true` if it existed.
    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of stored entries, fresh or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn fresh(&self, key: &str, ttl: Duration) -> Option<V> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < ttl => Some(entry.payload.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn store(&self, key: &str, payload: V) {
        let mut entries = self.entries.lock();

        if self.max_entries > 0 && !entries.contains_key(key) && entries.len() >= self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.stored_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                tracing::debug!(cache = %self.name, key = %oldest, "Evicting oldest entry");
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key.to_string(),
            CacheEntry {
                payload,
                stored_at: Instant::now(),
            },
        );
    }
}

impl<V> ResponseCache<V> {
    fn key_lock<'a>(&'a self, key: &'a str) -> KeyLockHold<'a, V> {
        let lock = Arc::clone(
            self.key_locks
                .lock()
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        );
        KeyLockHold {
            cache: self,
            key,
            lock,
        }
    }

    fn release_key_lock(&self, key: &str, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.key_locks.lock();
        // One reference in the map, one held by the caller.
        if locks.get(key).is_some_and(|l| Arc::ptr_eq(l, lock)) && Arc::strong_count(lock) <= 2 {
            locks.remove(key);
        }
    }
}

/// A caller's claim on a per-key fetch lock.
///
/// Releasing on drop keeps the lock map bounded even when the caller's
/// future is cancelled mid-fetch. Declare it before the mutex guard it
/// hands out so the guard is dropped first.
struct KeyLockHold<'a, V> {
    cache: &'a ResponseCache<V>,
    key: &'a str,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl<V> Drop for KeyLockHold<'_, V> {
    fn drop(&mut self) {
        self.cache.release_key_lock(self.key, &self.lock);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    async fn counted(calls: &AtomicUsize, value: u32) -> Result<u32, String> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(value)
    }

    #[tokio::test(start_paused = true)]
    async fn second_call_within_ttl_is_served_from_cache() {
        let cache = ResponseCache::new("test", TTL, 0);
        let calls = AtomicUsize::new(0);

        let first = cache.get_or_fetch("k", TTL, || counted(&calls, 1)).await;
        tokio::time::advance(Duration::from_secs(59)).await;
        let second = cache.get_or_fetch("k", TTL, || counted(&calls, 2)).await;

        assert_eq!(first, Ok(1));
        assert_eq!(second, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_refetched() {
        let cache = ResponseCache::new("test", TTL, 0);
        let calls = AtomicUsize::new(0);

        cache.get_or_fetch("k", TTL, || counted(&calls, 1)).await.unwrap();
        tokio::time::advance(TTL).await;
        let refreshed = cache.get_or_fetch("k", TTL, || counted(&calls, 2)).await;

        assert_eq!(refreshed, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let cache: ResponseCache<u32> = ResponseCache::new("test", TTL, 0);

        let failed = cache
            .get_or_fetch("k", TTL, || async { Err::<u32, _>("boom".to_string()) })
            .await;
        assert_eq!(failed, Err("boom".to_string()));
        assert!(cache.is_empty());

        let ok = cache
            .get_or_fetch("k", TTL, || async { Ok::<_, String>(7) })
            .await;
        assert_eq!(ok, Ok(7));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_fetch() {
        let cache = Arc::new(ResponseCache::new("test", TTL, 0));
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    cache
                        .get_or_fetch("k", TTL, || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            Ok::<_, String>(42)
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap(), Ok(42));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.key_locks.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_fetches_release_their_key_locks() {
        let cache = Arc::new(ResponseCache::<u32>::new("test", TTL, 0));

        let tasks: Vec<_> = (0..100)
            .map(|i| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    cache
                        .get_or_fetch(&format!("k{i}"), TTL, || async {
                            tokio::time::sleep(Duration::from_secs(5)).await;
                            Ok::<_, String>(1)
                        })
                        .await
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(cache.key_locks.lock().len(), 100);

        for task in tasks {
            task.abort();
            assert!(task.await.unwrap_err().is_cancelled());
        }

        assert!(cache.key_locks.lock().is_empty());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn oldest_entry_is_evicted_when_full() {
        let cache = ResponseCache::new("test", TTL, 2);

        for key in ["a", "b", "c"] {
            cache
                .get_or_fetch(key, TTL, || async move { Ok::<_, String>(key.len()) })
                .await
                .unwrap();
            tokio::time::advance(Duration::from_secs(1)).await;
        }

        assert_eq!(cache.len(), 2);
        assert!(!cache.invalidate("a"));
        assert!(cache.invalidate("b"));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn distinct_keys_do_not_share_entries() {
        let cache = ResponseCache::new("test", TTL, 0);
        let a = cache.get_or_fetch("a", TTL, || async { Ok::<_, String>(1) }).await;
        let b = cache.get_or_fetch("b", TTL, || async { Ok::<_, String>(2) }).await;
        assert_eq!((a, b), (Ok(1), Ok(2)));
    }
}
