//! Bounded, time-expiring read cache
//!
//! Full reads (and optionally range reads) are kept in an LRU map keyed by the
//! parsed location. Expiry is lazy: an entry past its deadline is dropped the
//! next time it is looked up, or when room is needed for a new entry.
//!
//! Every invalidation bumps a write generation. A reader that missed takes the
//! generation before going to the backend and hands it back with
//! [`ReadCache::put_if_unchanged`]; bytes read while a write was landing are
//! then returned to the caller but never stored.

use crate::config::CacheConfig;
use crate::location::{ByteRange, StorageLocation};
use bytes::Bytes;
use lru::LruCache;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::trace;

/// Source of the current time for expiry decisions
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Cache key: a location and the window read from it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    location: StorageLocation,
    range: Option<ByteRange>,
}

impl CacheKey {
    pub fn full(location: &StorageLocation) -> Self {
        Self {
            location: location.clone(),
            range: None,
        }
    }

    pub fn range(location: &StorageLocation, range: ByteRange) -> Self {
        Self {
            location: location.clone(),
            range: Some(range),
        }
    }

    pub fn location(&self) -> &StorageLocation {
        &self.location
    }
}

#[derive(Debug)]
struct CacheEntry {
    data: Bytes,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

struct CacheState {
    entries: LruCache<CacheKey, CacheEntry>,
    generation: u64,
}

pub struct ReadCache {
    state: Mutex<CacheState>,
    ttl: Option<Duration>,
    cache_ranges: bool,
    clock: Arc<dyn Clock>,
}

impl ReadCache {
    /// Build a cache from its configuration
    pub fn new(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let entries = match config.capacity() {
            Some(capacity) => LruCache::new(capacity),
            None => LruCache::unbounded(),
        };

        Self {
            state: Mutex::new(CacheState {
                entries,
                generation: 0,
            }),
            ttl: config.time_to_live(),
            cache_ranges: config.cache_ranges,
            clock,
        }
    }

    /// Whether explicit range reads are cached too
    pub fn caches_ranges(&self) -> bool {
        self.cache_ranges
    }

    /// Cached bytes for `key`, if present and not expired
    pub fn get(&self, key: &CacheKey) -> Option<Bytes> {
        let now = self.clock.now();
        let mut state = self.lock();
        let entries = &mut state.entries;

        let expired = entries.peek(key)?.is_expired(now);
        if expired {
            trace!(location = %key.location, "Cache entry expired");
            entries.pop(key);
            return None;
        }

        entries.get(key).map(|entry| entry.data.clone())
    }

    /// Current write generation, to be taken before a backend read
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Store bytes read for `key`
    pub fn put(&self, key: CacheKey, data: Bytes) {
        let mut state = self.lock();
        self.insert(&mut state, key, data);
    }

    /// Store bytes read for `key` unless an invalidation happened since
    /// `generation` was taken; returns whether the entry was stored
    pub fn put_if_unchanged(&self, key: CacheKey, data: Bytes, generation: u64) -> bool {
        let mut state = self.lock();
        if state.generation != generation {
            trace!(location = %key.location, "Location written during read, not caching");
            return false;
        }
        self.insert(&mut state, key, data);
        true
    }

    fn insert(&self, state: &mut CacheState, key: CacheKey, data: Bytes) {
        let now = self.clock.now();
        let expires_at = self.ttl.and_then(|ttl| now.checked_add(ttl));
        let entries = &mut state.entries;

        if !entries.contains(&key) && entries.len() >= entries.cap().get() {
            // Expired entries go first, the LRU order only decides among live ones
            let expired: Vec<CacheKey> = entries
                .iter()
                .filter(|(_, entry)| entry.is_expired(now))
                .map(|(k, _)| k.clone())
                .collect();
            for stale in &expired {
                entries.pop(stale);
            }
        }

        entries.put(key, CacheEntry { data, expires_at });
    }

    /// Drop every entry read from `location`
    pub fn invalidate(&self, location: &StorageLocation) {
        let mut state = self.lock();
        state.generation = state.generation.wrapping_add(1);
        let entries = &mut state.entries;
        let keys: Vec<CacheKey> = entries
            .iter()
            .filter(|(k, _)| &k.location == location)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            entries.pop(key);
        }
        if !keys.is_empty() {
            trace!(location = %location, count = keys.len(), "Invalidated cache entries");
        }
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.generation = state.generation.wrapping_add(1);
        state.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // The map stays structurally valid even if a holder panicked
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for ReadCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadCache")
            .field("len", &self.len())
            .field("ttl", &self.ttl)
            .field("cache_ranges", &self.cache_ranges)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterRegistry;
    use crate::location::LocationParser;

    #[derive(Debug)]
    struct StepClock {
        start: Instant,
        offset: Mutex<Duration>,
    }

    impl StepClock {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                start: Instant::now(),
                offset: Mutex::new(Duration::ZERO),
            })
        }

        fn advance(&self, by: Duration) {
            *self.offset.lock().unwrap() += by;
        }
    }

    impl Clock for StepClock {
        fn now(&self) -> Instant {
            self.start + *self.offset.lock().unwrap()
        }
    }

    fn location(path: &str) -> StorageLocation {
        LocationParser::new(Arc::new(ClusterRegistry::empty()))
            .parse(path)
            .unwrap()
    }

    fn config(size: i64, ttl: i64) -> CacheConfig {
        CacheConfig {
            size,
            ttl,
            cache_ranges: false,
        }
    }

    #[test]
    fn test_hit_and_miss() {
        let cache = ReadCache::new(&config(4, 60), Arc::new(SystemClock));
        let key = CacheKey::full(&location("/data/a.json"));

        assert!(cache.get(&key).is_none());
        cache.put(key.clone(), Bytes::from_static(b"{}"));
        assert_eq!(cache.get(&key).unwrap(), Bytes::from_static(b"{}"));
    }

    #[test]
    fn test_ttl_expiry_is_lazy() {
        let clock = StepClock::new();
        let cache = ReadCache::new(&config(4, 10), clock.clone());
        let key = CacheKey::full(&location("/data/a.json"));

        cache.put(key.clone(), Bytes::from_static(b"v1"));
        clock.advance(Duration::from_secs(9));
        assert!(cache.get(&key).is_some());

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_non_positive_ttl_never_expires() {
        let clock = StepClock::new();
        let cache = ReadCache::new(&config(4, 0), clock.clone());
        let key = CacheKey::full(&location("/data/a.json"));

        cache.put(key.clone(), Bytes::from_static(b"v1"));
        clock.advance(Duration::from_secs(365 * 24 * 3600));
        assert!(cache.get(&key).is_some());
    }

    #[test]
    fn test_lru_eviction() {
        let cache = ReadCache::new(&config(2, 60), Arc::new(SystemClock));
        let a = CacheKey::full(&location("/data/a"));
        let b = CacheKey::full(&location("/data/b"));
        let c = CacheKey::full(&location("/data/c"));

        cache.put(a.clone(), Bytes::from_static(b"a"));
        cache.put(b.clone(), Bytes::from_static(b"b"));
        // Touch a so that b becomes the least recently used
        assert!(cache.get(&a).is_some());
        cache.put(c.clone(), Bytes::from_static(b"c"));

        assert!(cache.get(&a).is_some());
        assert!(cache.get(&b).is_none());
        assert!(cache.get(&c).is_some());
    }

    #[test]
    fn test_expired_entries_evicted_before_live_ones() {
        let clock = StepClock::new();
        let cache = ReadCache::new(&config(2, 10), clock.clone());
        let a = CacheKey::full(&location("/data/a"));
        let b = CacheKey::full(&location("/data/b"));
        let c = CacheKey::full(&location("/data/c"));

        cache.put(a.clone(), Bytes::from_static(b"a"));
        clock.advance(Duration::from_secs(6));
        cache.put(b.clone(), Bytes::from_static(b"b"));
        clock.advance(Duration::from_secs(5));
        // a is expired but was never looked up, b is still live
        cache.put(c.clone(), Bytes::from_static(b"c"));

        assert!(cache.get(&b).is_some());
        assert!(cache.get(&c).is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_unbounded_cache() {
        let cache = ReadCache::new(&config(-1, 60), Arc::new(SystemClock));
        for i in 0..500 {
            let key = CacheKey::full(&location(&format!("/data/{}", i)));
            cache.put(key, Bytes::from(vec![0u8; 4]));
        }
        assert_eq!(cache.len(), 500);
    }

    #[test]
    fn test_invalidate_removes_all_ranges() {
        let cache = ReadCache::new(&config(8, 60), Arc::new(SystemClock));
        let target = location("/data/a");
        let other = location("/data/b");

        cache.put(CacheKey::full(&target), Bytes::from_static(b"full"));
        cache.put(
            CacheKey::range(&target, ByteRange::new(0, 2)),
            Bytes::from_static(b"fu"),
        );
        cache.put(CacheKey::full(&other), Bytes::from_static(b"other"));

        cache.invalidate(&target);
        assert!(cache.get(&CacheKey::full(&target)).is_none());
        assert!(cache
            .get(&CacheKey::range(&target, ByteRange::new(0, 2)))
            .is_none());
        assert!(cache.get(&CacheKey::full(&other)).is_some());
    }

    #[test]
    fn test_put_after_invalidation_is_dropped() {
        let cache = ReadCache::new(&config(8, 60), Arc::new(SystemClock));
        let target = location("/data/a");
        let other = location("/data/b");

        let before = cache.generation();
        cache.invalidate(&target);
        assert!(!cache.put_if_unchanged(CacheKey::full(&target), Bytes::from_static(b"old"), before));
        assert!(cache.get(&CacheKey::full(&target)).is_none());

        let current = cache.generation();
        assert!(cache.put_if_unchanged(CacheKey::full(&other), Bytes::from_static(b"new"), current));
        assert!(cache.get(&CacheKey::full(&other)).is_some());
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(ReadCache::new(&config(16, 60), Arc::new(SystemClock)));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let key = CacheKey::full(&location(&format!("/data/{}_{}", t, i % 4)));
                        cache.put(key.clone(), Bytes::from(vec![t as u8; 8]));
                        if let Some(bytes) = cache.get(&key) {
                            assert_eq!(bytes.len(), 8);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.len() <= 16);
    }
}
