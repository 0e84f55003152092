//! Stem Cache
//!
//! Two tiers shared process-wide:
//! - Memory: strict LRU bounded by entry count
//! - Persistent: durable store with timestamped entries, a TTL and an
//!   entry/byte bound enforced by least-recently-accessed eviction
//!
//! Reads go memory first, then persistent (promoting valid hits). Writes
//! always land in memory; persistent writes are best-effort and only log
//! on failure.

pub mod clock;
pub mod fetch;
pub mod key;
pub mod memory;
pub mod persistent;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use chrono::Duration;
use serde::Serialize;

pub use clock::{Clock, ManualClock, SystemClock};
pub use fetch::PayloadFetcher;
#[cfg(feature = "http")]
pub use fetch::HttpFetcher;
pub use key::CacheKey;
pub use memory::{MemoryEntry, MemoryTier};
pub use persistent::{FileStore, PersistedEntry, PersistentStore};

use crate::config::EngineConfig;
use crate::error::Result;

/// Raw stem bytes, shared without copying between cache and loader
pub type Payload = Arc<[u8]>;

/// Which tier answered a lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Memory,
    Persistent,
}

/// A successful lookup
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub payload: Payload,
    pub tier: CacheTier,
}

/// Cache usage counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub memory_entries: usize,
    pub memory_capacity: usize,
    pub persistent_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// Two-tier stem payload cache
pub struct StemCache {
    memory: Mutex<MemoryTier>,
    persistent: Option<Mutex<Box<dyn PersistentStore>>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    max_cacheable_bytes: u64,
    hits: AtomicU64,
    misses: AtomicU64,
}

static SHARED: OnceLock<Arc<StemCache>> = OnceLock::new();

impl StemCache {
    /// Build a cache from config; the persistent tier is enabled when
    /// `cache_dir` is set and can be opened.
    pub fn new(config: &EngineConfig) -> Self {
        let persistent: Option<Box<dyn PersistentStore>> = match &config.cache_dir {
            Some(dir) => match FileStore::open(dir) {
                Ok(store) => Some(Box::new(store.with_limits(
                    config.persistent_max_entries,
                    config.persistent_max_bytes,
                ))),
                Err(e) => {
                    log::warn!(
                        "Persistent cache unavailable at {}: {}",
                        dir.display(),
                        e
                    );
                    None
                }
            },
            None => None,
        };

        Self::with_parts(
            config.memory_cache_capacity,
            config.ttl(),
            persistent,
            Arc::new(SystemClock),
        )
        .with_max_cacheable_bytes(config.max_cacheable_bytes)
    }

    /// A memory-only cache
    pub fn in_memory(capacity: usize) -> Self {
        Self::with_parts(
            capacity,
            EngineConfig::default().ttl(),
            None,
            Arc::new(SystemClock),
        )
    }

    /// Assemble a cache from explicit parts
    pub fn with_parts(
        capacity: usize,
        ttl: Duration,
        persistent: Option<Box<dyn PersistentStore>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            memory: Mutex::new(MemoryTier::new(capacity)),
            persistent: persistent.map(Mutex::new),
            clock,
            ttl,
            max_cacheable_bytes: crate::config::DEFAULT_MAX_CACHEABLE_BYTES,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn with_max_cacheable_bytes(mut self, max: u64) -> Self {
        self.max_cacheable_bytes = max;
        self
    }

    /// The process-wide cache, created memory-only with default settings
    /// on first use.
    pub fn shared() -> Arc<StemCache> {
        Arc::clone(SHARED.get_or_init(|| {
            Arc::new(StemCache::in_memory(crate::config::DEFAULT_MEMORY_CAPACITY))
        }))
    }

    /// Install a configured process-wide cache. Returns false if one
    /// was already installed.
    pub fn install_shared(cache: StemCache) -> bool {
        SHARED.set(Arc::new(cache)).is_ok()
    }

    fn memory(&self) -> MutexGuard<'_, MemoryTier> {
        self.memory.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn store(&self) -> Option<MutexGuard<'_, Box<dyn PersistentStore>>> {
        self.persistent
            .as_ref()
            .map(|m| m.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn has_persistent_tier(&self) -> bool {
        self.persistent.is_some()
    }

    /// Look up a payload
    pub fn get(&self, key: &CacheKey) -> Option<CacheHit> {
        if let Some(entry) = self.memory().get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(CacheHit {
                payload: Arc::clone(&entry.payload),
                tier: CacheTier::Memory,
            });
        }

        match self.get_persistent(key) {
            Some(payload) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(CacheHit {
                    payload,
                    tier: CacheTier::Persistent,
                })
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Look up a payload by its source URL
    pub fn get_url(&self, url: &str) -> Option<CacheHit> {
        self.get(&CacheKey::from_url(url))
    }

    fn get_persistent(&self, key: &CacheKey) -> Option<Payload> {
        let mut store = self.store()?;
        let now = self.clock.now();
        let entry = match store.get(key, now) {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("Persistent cache read failed for {}: {}", key, e);
                return None;
            }
        };

        if now - entry.created_at > self.ttl {
            log::debug!("Cache entry {} expired, removing", key);
            if let Err(e) = store.remove(key) {
                log::warn!("Failed to remove expired cache entry {}: {}", key, e);
            }
            return None;
        }
        drop(store);

        let payload: Payload = Arc::from(entry.payload);
        self.insert_memory(key.clone(), Arc::clone(&payload));
        Some(payload)
    }

    fn insert_memory(&self, key: CacheKey, payload: Payload) {
        let stored_at = self.clock.now();
        if let Some(evicted) = self.memory().insert(key, MemoryEntry { payload, stored_at }) {
            log::debug!("Evicted {} from memory cache", evicted);
        }
    }

    /// Store a payload under `key`
    ///
    /// Returns false (and stores nothing) for payloads above the size limit.
    pub fn set(&self, key: &CacheKey, payload: Payload, source_url: &str) -> bool {
        if payload.len() as u64 > self.max_cacheable_bytes {
            log::warn!(
                "Payload for {} too large to cache ({} bytes)",
                key,
                payload.len()
            );
            return false;
        }

        self.insert_memory(key.clone(), Arc::clone(&payload));

        if let Some(mut store) = self.store() {
            if let Err(e) = store.put(key, &payload, source_url, self.clock.now()) {
                log::warn!("Persistent cache write failed for {}: {}", key, e);
            }
        }
        true
    }

    /// Store a payload under the key derived from its source URL
    pub fn set_url(&self, url: &str, payload: Payload) -> bool {
        self.set(&CacheKey::from_url(url), payload, url)
    }

    /// Whether `key` is resident in the memory tier (recency untouched)
    pub fn in_memory_tier(&self, key: &CacheKey) -> bool {
        self.memory().contains(key)
    }

    /// Drop `key` from the memory tier only
    pub fn evict_from_memory(&self, key: &CacheKey) -> bool {
        self.memory().remove(key).is_some()
    }

    /// Remove `key` from both tiers
    pub fn remove(&self, key: &CacheKey) -> bool {
        let mut removed = self.memory().remove(key).is_some();
        if let Some(mut store) = self.store() {
            match store.remove(key) {
                Ok(existed) => removed |= existed,
                Err(e) => log::warn!("Persistent cache remove failed for {}: {}", key, e),
            }
        }
        removed
    }

    /// Empty both tiers unconditionally
    pub fn clear(&self) {
        self.memory().clear();
        if let Some(mut store) = self.store() {
            if let Err(e) = store.clear() {
                log::warn!("Persistent cache clear failed: {}", e);
            }
        }
        log::info!("Stem cache cleared");
    }

    /// Delete persistent entries older than the TTL; returns how many
    pub fn clear_expired(&self) -> usize {
        let mut store = match self.store() {
            Some(store) => store,
            None => return 0,
        };
        let cutoff = self.clock.now() - self.ttl;
        let expired = match store.keys_created_before(cutoff) {
            Ok(keys) => keys,
            Err(e) => {
                log::warn!("Failed to scan cache index: {}", e);
                return 0;
            }
        };

        let mut removed = 0;
        for key in &expired {
            match store.remove(key) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => log::warn!("Failed to remove expired cache entry {}: {}", key, e),
            }
        }
        drop(store);

        let mut memory = self.memory();
        for key in &expired {
            memory.remove(key);
        }

        if removed > 0 {
            log::info!("Cleaned up {} expired cache entries", removed);
        }
        removed
    }

    /// Fetch and cache every URL not already cached; returns how many were fetched
    pub fn prefetch<F: PayloadFetcher + ?Sized>(&self, urls: &[String], fetcher: &F) -> usize {
        let mut fetched = 0;
        for url in urls {
            let key = CacheKey::from_url(url);
            if self.in_memory_tier(&key) || self.get(&key).is_some() {
                continue;
            }
            match fetcher.fetch(url) {
                Ok(bytes) => {
                    if self.set(&key, Arc::from(bytes), url) {
                        fetched += 1;
                    }
                }
                Err(e) => log::warn!("Prefetch failed for {}: {}", url, e),
            }
        }
        fetched
    }

    pub fn stats(&self) -> CacheStats {
        let (memory_entries, memory_capacity) = {
            let memory = self.memory();
            (memory.len(), memory.capacity())
        };
        let persistent_entries = self
            .store()
            .and_then(|mut store| store.len().ok())
            .unwrap_or(0);
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            memory_entries,
            memory_capacity,
            persistent_entries,
            hits,
            misses,
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}

/// Build a cache from config, failing if the persistent directory cannot be opened
pub fn open_file_cache(config: &EngineConfig) -> Result<StemCache> {
    let store: Option<Box<dyn PersistentStore>> = match &config.cache_dir {
        Some(dir) => Some(Box::new(FileStore::open(dir)?.with_limits(
            config.persistent_max_entries,
            config.persistent_max_bytes,
        ))),
        None => None,
    };
    Ok(StemCache::with_parts(
        config.memory_cache_capacity,
        config.ttl(),
        store,
        Arc::new(SystemClock),
    )
    .with_max_cacheable_bytes(config.max_cacheable_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StemsyncError;
    use chrono::Utc;
    use std::cell::RefCell;
    use tempfile::TempDir;

    fn payload(bytes: &[u8]) -> Payload {
        Arc::from(bytes.to_vec())
    }

    fn file_cache(capacity: usize) -> (TempDir, Arc<ManualClock>, StemCache) {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = FileStore::open(dir.path()).unwrap();
        let cache = StemCache::with_parts(
            capacity,
            Duration::days(7),
            Some(Box::new(store)),
            clock.clone(),
        );
        (dir, clock, cache)
    }

    /// A store whose every operation fails
    struct BrokenStore;

    impl PersistentStore for BrokenStore {
        fn get(
            &mut self,
            _: &CacheKey,
            _: chrono::DateTime<Utc>,
        ) -> Result<Option<PersistedEntry>> {
            Err(StemsyncError::cache("quota exceeded"))
        }
        fn put(&mut self, _: &CacheKey, _: &[u8], _: &str, _: chrono::DateTime<Utc>) -> Result<()> {
            Err(StemsyncError::cache("quota exceeded"))
        }
        fn remove(&mut self, _: &CacheKey) -> Result<bool> {
            Err(StemsyncError::cache("quota exceeded"))
        }
        fn clear(&mut self) -> Result<()> {
            Err(StemsyncError::cache("quota exceeded"))
        }
        fn keys_created_before(&mut self, _: chrono::DateTime<Utc>) -> Result<Vec<CacheKey>> {
            Err(StemsyncError::cache("quota exceeded"))
        }
        fn len(&mut self) -> Result<usize> {
            Err(StemsyncError::cache("quota exceeded"))
        }
    }

    #[test]
    fn test_set_then_get_hits_memory() {
        let (_dir, _clock, cache) = file_cache(20);
        let key = CacheKey::from_url("https://cdn/vocals.mp3");
        cache.set(&key, payload(b"vocals"), "https://cdn/vocals.mp3");

        let hit = cache.get(&key).unwrap();
        assert_eq!(hit.tier, CacheTier::Memory);
        assert_eq!(&*hit.payload, b"vocals");
    }

    #[test]
    fn test_memory_miss_promotes_persistent_hit() {
        let (_dir, _clock, cache) = file_cache(20);
        let key = CacheKey::from_url("https://cdn/bass.mp3");
        cache.set(&key, payload(b"bass"), "https://cdn/bass.mp3");
        assert!(cache.evict_from_memory(&key));

        let hit = cache.get(&key).unwrap();
        assert_eq!(hit.tier, CacheTier::Persistent);
        assert!(cache.in_memory_tier(&key));
        assert_eq!(cache.get(&key).unwrap().tier, CacheTier::Memory);
    }

    #[test]
    fn test_expired_persistent_entry_is_absent() {
        let (_dir, clock, cache) = file_cache(20);
        let key = CacheKey::from_url("https://cdn/drums.mp3");
        cache.set(&key, payload(b"drums"), "https://cdn/drums.mp3");

        clock.advance(Duration::days(8));
        cache.evict_from_memory(&key);

        assert!(cache.get(&key).is_none());
        assert_eq!(cache.stats().persistent_entries, 0);
    }

    #[test]
    fn test_memory_tier_is_strict_lru() {
        let cache = StemCache::in_memory(2);
        let a = CacheKey::from_url("a");
        let b = CacheKey::from_url("b");
        let c = CacheKey::from_url("c");
        cache.set(&a, payload(b"a"), "a");
        cache.set(&b, payload(b"b"), "b");
        cache.get(&a);
        cache.set(&c, payload(b"c"), "c");

        assert!(cache.in_memory_tier(&a));
        assert!(!cache.in_memory_tier(&b));
        assert!(cache.get(&b).is_none());
    }

    #[test]
    fn test_clear_expired_counts_entries() {
        let (_dir, clock, cache) = file_cache(20);
        cache.set_url("old-1", payload(b"1"));
        cache.set_url("old-2", payload(b"2"));
        clock.advance(Duration::days(6));
        cache.set_url("fresh", payload(b"3"));
        clock.advance(Duration::days(2));

        assert_eq!(cache.clear_expired(), 2);
        assert!(!cache.in_memory_tier(&CacheKey::from_url("old-1")));
        assert!(cache.get_url("fresh").is_some());
        assert_eq!(cache.clear_expired(), 0);
    }

    #[test]
    fn test_clear_empties_both_tiers() {
        let (_dir, _clock, cache) = file_cache(20);
        cache.set_url("a", payload(b"a"));
        cache.set_url("b", payload(b"b"));
        cache.clear();

        let stats = cache.stats();
        assert_eq!(stats.memory_entries, 0);
        assert_eq!(stats.persistent_entries, 0);
    }

    #[test]
    fn test_persistent_failures_are_non_fatal() {
        let cache = StemCache::with_parts(
            4,
            Duration::days(7),
            Some(Box::new(BrokenStore)),
            Arc::new(SystemClock),
        );
        assert!(cache.set_url("a", payload(b"a")));
        assert!(cache.get_url("a").is_some());
        assert!(cache.get_url("missing").is_none());
        assert_eq!(cache.clear_expired(), 0);
        cache.clear();
        assert_eq!(cache.stats().persistent_entries, 0);
    }

    #[test]
    fn test_oversized_payload_not_cached() {
        let cache = StemCache::in_memory(4).with_max_cacheable_bytes(4);
        assert!(!cache.set_url("big", payload(b"12345")));
        assert!(cache.get_url("big").is_none());
    }

    #[test]
    fn test_stats_hit_rate() {
        let cache = StemCache::in_memory(4);
        cache.set_url("a", payload(b"a"));
        cache.get_url("a");
        cache.get_url("a");
        cache.get_url("b");
        cache.get_url("c");

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 2);
        assert!((stats.hit_rate - 0.5).abs() < 1e-9);
    }

    struct CountingFetcher {
        calls: RefCell<Vec<String>>,
    }

    impl PayloadFetcher for CountingFetcher {
        fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            self.calls.borrow_mut().push(url.to_string());
            if url.contains("broken") {
                return Err(StemsyncError::load(url, "HTTP 500"));
            }
            Ok(url.as_bytes().to_vec())
        }
    }

    #[test]
    fn test_prefetch_skips_cached_and_tolerates_failures() {
        let cache = StemCache::in_memory(8);
        cache.set_url("https://cdn/vocals.mp3", payload(b"v"));
        let fetcher = CountingFetcher {
            calls: RefCell::new(Vec::new()),
        };
        let urls = vec![
            "https://cdn/vocals.mp3".to_string(),
            "https://cdn/bass.mp3".to_string(),
            "https://cdn/broken.mp3".to_string(),
        ];

        assert_eq!(cache.prefetch(&urls, &fetcher), 1);
        assert_eq!(fetcher.calls.borrow().len(), 2);
        assert!(cache.get_url("https://cdn/bass.mp3").is_some());
    }

    #[test]
    fn test_corrupt_index_does_not_disable_persistent_tier() {
        let (dir, _clock, cache) = file_cache(20);
        std::fs::write(dir.path().join("index.json"), "{not json").unwrap();
        std::fs::write(dir.path().join("deadbeef.bin"), vec![0u8; 8]).unwrap();

        cache.clear();
        assert!(!dir.path().join("deadbeef.bin").exists());

        let key = CacheKey::from_url("https://cdn/keys.mp3");
        assert!(cache.set(&key, payload(b"keys"), "https://cdn/keys.mp3"));
        cache.evict_from_memory(&key);
        assert_eq!(cache.get(&key).unwrap().tier, CacheTier::Persistent);
    }

    #[test]
    fn test_bounded_persistent_tier_keeps_recent_entries() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = FileStore::open(dir.path()).unwrap().with_limits(3, u64::MAX);
        let cache = StemCache::with_parts(
            20,
            Duration::days(7),
            Some(Box::new(store)),
            clock.clone(),
        );

        for i in 0..5 {
            cache.set_url(&format!("https://cdn/take-{}.mp3", i), payload(b"take"));
            clock.advance(Duration::seconds(1));
        }
        assert_eq!(cache.stats().persistent_entries, 3);

        let first = CacheKey::from_url("https://cdn/take-0.mp3");
        cache.evict_from_memory(&first);
        assert!(cache.get(&first).is_none());
        assert!(cache.get_url("https://cdn/take-4.mp3").is_some());
    }
}
