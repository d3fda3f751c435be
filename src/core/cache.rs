//! Expiring key/value cache with lazy and periodic eviction.
//!
//! Entries are dropped on read once their deadline passes, so `get` never
//! hands back stale data even if no sweep has run. `spawn_cleanup` adds a
//! periodic sweep so unread entries do not pile up.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::config::CacheConfig;
use crate::core::BoxFuture;

/// Longest lifetime an entry can be given; longer TTLs are clamped to it.
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// A cached value and its expiry deadline.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// Stored value.
    pub value: V,
    /// Instant after which the entry is treated as absent.
    pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Entries currently stored (expired entries not yet swept included).
    pub size: usize,
    /// Reads served from the cache.
    pub hits: u64,
    /// Reads that found nothing or an expired entry.
    pub misses: u64,
    /// Entries removed because they expired.
    pub evictions: u64,
    /// Default TTL applied by `set` when none is given.
    pub default_ttl_ms: u128,
}

struct CacheInner<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Generic expiring key/value store.
pub struct TtlCache<K, V> {
    default_ttl: Duration,
    inner: Mutex<CacheInner<K, V>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    /// Create an empty cache whose entries live for `default_ttl` unless overridden.
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }

    /// Default TTL for this instance.
    pub const fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Insert or replace `key`, expiring after `ttl` (or the default TTL),
    /// at most [`MAX_TTL`].
    pub fn set(&self, key: K, value: V, ttl: Option<Duration>) {
        let expires_at = Instant::now() + ttl.unwrap_or(self.default_ttl).min(MAX_TTL);
        self.inner
            .lock()
            .entries
            .insert(key, CacheEntry { value, expires_at });
    }

    /// Fetch a live value. Expired entries are removed and reported as a miss.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let Some(expired) = inner.entries.get(key).map(|entry| entry.is_expired(now)) else {
            inner.misses += 1;
            return None;
        };
        if expired {
            inner.entries.remove(key);
            inner.evictions += 1;
            inner.misses += 1;
            return None;
        }
        inner.hits += 1;
        inner.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Whether a live entry exists for `key`. Does not touch hit/miss counters.
    pub fn has(&self, key: &K) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        match inner.entries.get(key).map(|entry| entry.is_expired(now)) {
            Some(false) => true,
            Some(true) => {
                inner.entries.remove(key);
                inner.evictions += 1;
                false
            }
            None => false,
        }
    }

    /// Remove `key`, returning whether anything was stored.
    pub fn delete(&self, key: &K) -> bool {
        self.inner.lock().entries.remove(key).is_some()
    }

    /// Drop every entry and reset counters.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.hits = 0;
        inner.misses = 0;
        inner.evictions = 0;
    }

    /// Purge all expired entries and return how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - inner.entries.len();
        inner.evictions += removed as u64;
        removed
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            size: inner.entries.len(),
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            default_ttl_ms: self.default_ttl.as_millis(),
        }
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Run `cleanup` every `interval` until the cache is dropped or the
    /// returned handle is aborted.
    pub fn spawn_cleanup(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                let removed = cache.cleanup();
                if removed > 0 {
                    tracing::debug!(removed, "cache sweep evicted expired entries");
                }
            }
        })
    }
}

/// Wrap an async function so that successful results are served from `cache`.
///
/// `key_fn` derives the cache key from the argument; errors are never cached.
pub fn with_cache<A, K, V, E, KF, F, Fut>(
    cache: Arc<TtlCache<K, V>>,
    key_fn: KF,
    ttl: Option<Duration>,
    f: F,
) -> impl Fn(A) -> BoxFuture<'static, Result<V, E>> + Send + Sync
where
    A: Send + 'static,
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Send + 'static,
    KF: Fn(&A) -> K + Send + Sync,
    F: Fn(A) -> Fut + Send + Sync,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
{
    move |arg: A| -> BoxFuture<'static, Result<V, E>> {
        let key = key_fn(&arg);
        if let Some(hit) = cache.get(&key) {
            return Box::pin(async move { Ok(hit) });
        }
        let cache = Arc::clone(&cache);
        let fut = f(arg);
        Box::pin(async move {
            let value = fut.await?;
            cache.set(key, value.clone(), ttl);
            Ok(value)
        })
    }
}

/// The three named cache instances used by the dispatcher.
pub struct CacheNamespaces<S, R, T> {
    /// Session-shaped data (default 60s).
    pub sessions: Arc<TtlCache<String, S>>,
    /// Longer-lived records (default 300s).
    pub records: Arc<TtlCache<String, R>>,
    /// Aggregate statistics (default 30s).
    pub stats: Arc<TtlCache<String, T>>,
}

impl<S, R, T> CacheNamespaces<S, R, T>
where
    S: Clone + Send + 'static,
    R: Clone + Send + 'static,
    T: Clone + Send + 'static,
{
    /// Build the namespaces from configured TTLs.
    pub fn new(cfg: &CacheConfig) -> Self {
        Self {
            sessions: Arc::new(TtlCache::new(Duration::from_secs(cfg.session_ttl_secs))),
            records: Arc::new(TtlCache::new(Duration::from_secs(cfg.record_ttl_secs))),
            stats: Arc::new(TtlCache::new(Duration::from_secs(cfg.stats_ttl_secs))),
        }
    }

    /// Start periodic sweeps for all three namespaces.
    pub fn spawn_cleanup(&self, interval: Duration) -> Vec<JoinHandle<()>> {
        vec![
            self.sessions.spawn_cleanup(interval),
            self.records.spawn_cleanup(interval),
            self.stats.spawn_cleanup(interval),
        ]
    }

    /// Clear every namespace.
    pub fn clear_all(&self) {
        self.sessions.clear();
        self.records.clear();
        self.stats.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_get_misses_after_ttl() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.set("k".to_string(), "v".to_string(), Some(Duration::from_secs(1)));
        assert_eq!(cache.get(&"k".to_string()), Some("v".to_string()));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(cache.get(&"k".to_string()), None);

        let stats = cache.stats();
        assert_eq!(stats.size, 0);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 1);
    }

    #[test]
    fn test_oversized_ttl_is_clamped() {
        let cache = TtlCache::new(Duration::MAX);
        cache.set("default", 1, None);
        cache.set("explicit", 2, Some(Duration::from_secs(u64::MAX)));
        assert_eq!(cache.get(&"default"), Some(1));
        assert_eq!(cache.get(&"explicit"), Some(2));
        assert_eq!(cache.cleanup(), 0);
    }

    #[test]
    fn test_has_and_delete() {
        let cache = TtlCache::new(Duration::from_secs(30));
        cache.set(1_u32, "one", None);
        assert!(cache.has(&1));
        assert!(cache.delete(&1));
        assert!(!cache.delete(&1));
        assert!(!cache.has(&1));
    }

    #[test]
    fn test_cleanup_purges_only_expired() {
        let cache = TtlCache::new(Duration::from_secs(30));
        cache.set("stale", 1, Some(Duration::ZERO));
        cache.set("fresh", 2, None);
        assert_eq!(cache.cleanup(), 1);
        assert_eq!(cache.stats().size, 1);
        assert_eq!(cache.get(&"fresh"), Some(2));
    }

    #[test]
    fn test_clear_resets_counters() {
        let cache = TtlCache::new(Duration::from_secs(30));
        cache.set("a", 1, None);
        let _ = cache.get(&"a");
        let _ = cache.get(&"b");
        cache.clear();
        assert_eq!(cache.stats(), CacheStats {
            default_ttl_ms: 30_000,
            ..CacheStats::default()
        });
    }

    #[tokio::test]
    async fn test_periodic_cleanup_sweeps_unread_entries() {
        let cache = Arc::new(TtlCache::new(Duration::from_millis(20)));
        cache.set("a", 1, None);
        cache.set("b", 2, None);
        let handle = cache.spawn_cleanup(Duration::from_millis(30));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cache.stats().size, 0);
        assert_eq!(cache.stats().evictions, 2);
        handle.abort();
    }

    #[tokio::test]
    async fn test_with_cache_memoizes_success_only() {
        let cache = Arc::new(TtlCache::new(Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let lookup = with_cache(
            Arc::clone(&cache),
            |id: &u32| format!("user:{id}"),
            None,
            move |id: u32| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if id == 0 {
                        Err("no such user".to_string())
                    } else {
                        Ok(id * 10)
                    }
                }
            },
        );

        assert_eq!(lookup(4).await, Ok(40));
        assert_eq!(lookup(4).await, Ok(40));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(lookup(0).await.is_err());
        assert!(lookup(0).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(cache.has(&"user:4".to_string()));
    }
}
