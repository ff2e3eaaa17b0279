//! TTL-memoized cache over caller-supplied loaders.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use tracing::{debug, warn};

use super::config::CacheConfig;
use super::key::CacheKey;
use super::stats::{CacheStats, StatsCollector};
use super::CacheProbe;
use crate::clock::{Clock, SystemClock};

/// Entry stored in the cache.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// Thread-safe memoizing cache with per-category TTL expiration.
///
/// `get_or_load` is the read path: a live entry is returned without invoking
/// the loader; on a miss the loader runs and a successful result is stored
/// under the category's TTL. A failed loader stores nothing, so the next call
/// tries again.
///
/// Concurrent misses for the same key are stampede-tolerant rather than
/// coalesced: each miss may invoke its loader, the last successful writer
/// wins, and later calls observe the fresh entry. Callers that need
/// single-flight semantics serialize above this layer.
///
/// Expired entries are evicted lazily on lookup; [`TtlCache::cleanup_expired`]
/// drops the remainder when called from a periodic task.
///
/// # Examples
///
/// ```
/// use parapet::{CacheConfig, CacheKey, TtlCache};
///
/// # #[tokio::main]
/// # async fn main() {
/// let cache: TtlCache<String> = TtlCache::new(CacheConfig::default());
///
/// let value = cache
///     .get_or_load(CacheKey::entity("lesson", 7), || async {
///         Ok::<_, std::io::Error>("lesson seven".to_owned())
///     })
///     .await
///     .unwrap();
/// assert_eq!(value, "lesson seven");
/// # }
/// ```
pub struct TtlCache<V, C = SystemClock>
where
    V: Clone,
    C: Clock + Clone,
{
    entries: Arc<RwLock<HashMap<CacheKey, CacheEntry<V>>>>,
    config: CacheConfig,
    stats: StatsCollector,
    clock: C,
}

impl<V> TtlCache<V, SystemClock>
where
    V: Clone,
{
    /// Create a cache with the given configuration using the system clock.
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<V, C> TtlCache<V, C>
where
    V: Clone,
    C: Clock + Clone,
{
    /// Create a cache with a custom clock (useful for testing).
    pub fn with_clock(config: CacheConfig, clock: C) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            config,
            stats: StatsCollector::new(),
            clock,
        }
    }

    /// Return the live entry for `key`, or run `loader` and store its result.
    ///
    /// A loader failure propagates to the caller and caches nothing; the next
    /// call for the same key invokes its loader again.
    pub async fn get_or_load<F, Fut, E>(&self, key: CacheKey, loader: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        match loader().await {
            Ok(value) => {
                self.insert(key, value.clone());
                Ok(value)
            }
            Err(error) => {
                self.stats.record_load_failure();
                debug!(key = %key, "loader failed, entry not cached");
                Err(error)
            }
        }
    }

    /// Look up a live entry, evicting it if its TTL has passed.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let ttl = self.config.ttl_for(key.category());
        let now = self.clock.now();

        let mut entries = self.write_entries();
        match entries.get(key) {
            Some(entry) if now.duration_since(entry.inserted_at) <= ttl => {
                self.stats.record_hit();
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                self.stats.record_expirations(1);
                self.stats.record_miss();
                debug!(key = %key, "cache entry expired");
                None
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub fn insert(&self, key: CacheKey, value: V) {
        let entry = CacheEntry { value, inserted_at: self.clock.now() };
        self.write_entries().insert(key, entry);
        self.stats.record_insert();
    }

    /// Remove a single entry. Returns whether one was present.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let removed = self.write_entries().remove(key).is_some();
        if removed {
            self.stats.record_invalidations(1);
        }
        removed
    }

    /// Remove every entry in `category`. Returns how many were removed.
    pub fn invalidate_category(&self, category: &str) -> usize {
        let mut entries = self.write_entries();
        let before = entries.len();
        entries.retain(|key, _| key.category() != category);
        let removed = before - entries.len();
        drop(entries);

        if removed > 0 {
            self.stats.record_invalidations(removed as u64);
            debug!(category, removed, "invalidated cache category");
        }
        removed
    }

    /// Remove all entries.
    pub fn clear(&self) {
        let mut entries = self.write_entries();
        let removed = entries.len();
        entries.clear();
        drop(entries);

        self.stats.record_invalidations(removed as u64);
    }

    /// Drop entries whose TTL has passed. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.write_entries();
        let before = entries.len();
        entries.retain(|key, entry| {
            now.duration_since(entry.inserted_at) <= self.config.ttl_for(key.category())
        });
        let removed = before - entries.len();
        drop(entries);

        if removed > 0 {
            self.stats.record_expirations(removed as u64);
        }
        removed
    }

    /// Number of stored entries, including any awaiting lazy expiry.
    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.read_entries().is_empty()
    }

    /// Live entry counts grouped by category. Entries past their TTL are not
    /// counted even if they have not been evicted yet.
    pub fn live_category_sizes(&self) -> BTreeMap<String, usize> {
        let now = self.clock.now();
        let entries = self.read_entries();
        let mut sizes = BTreeMap::new();
        for (key, entry) in entries.iter() {
            if now.duration_since(entry.inserted_at) <= self.config.ttl_for(key.category()) {
                *sizes.entry(key.category().to_owned()).or_insert(0) += 1;
            }
        }
        sizes
    }

    /// Current statistics snapshot.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.len())
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, HashMap<CacheKey, CacheEntry<V>>> {
        match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("cache entry lock poisoned");
                poisoned.into_inner()
            }
        }
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, HashMap<CacheKey, CacheEntry<V>>> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("cache entry lock poisoned");
                poisoned.into_inner()
            }
        }
    }
}

impl<V, C> Clone for TtlCache<V, C>
where
    V: Clone,
    C: Clock + Clone,
{
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            config: self.config.clone(),
            stats: self.stats.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<V, C> CacheProbe for TtlCache<V, C>
where
    V: Clone + Send + Sync + 'static,
    C: Clock + Clone,
{
    fn size(&self) -> usize {
        self.live_category_sizes().values().sum()
    }

    fn category_sizes(&self) -> BTreeMap<String, usize> {
        self.live_category_sizes()
    }
}
