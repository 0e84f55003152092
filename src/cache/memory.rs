//! Memory tier: entry-bounded strict LRU

use std::num::NonZeroUsize;

use chrono::{DateTime, Utc};
use lru::LruCache;

use super::{CacheKey, Payload};

/// A payload held in memory with the time it was stored
#[derive(Debug, Clone)]
pub struct MemoryEntry {
    pub payload: Payload,
    pub stored_at: DateTime<Utc>,
}

/// LRU map with O(1) get/set, bounded by entry count
pub struct MemoryTier {
    entries: LruCache<CacheKey, MemoryEntry>,
}

impl MemoryTier {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Look up and mark as most recently used
    pub fn get(&mut self, key: &CacheKey) -> Option<&MemoryEntry> {
        self.entries.get(key)
    }

    /// Check presence without touching recency
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains(key)
    }

    /// Insert, returning the key evicted to make room (if any)
    pub fn insert(&mut self, key: CacheKey, entry: MemoryEntry) -> Option<CacheKey> {
        match self.entries.push(key.clone(), entry) {
            Some((evicted, _)) if evicted != key => Some(evicted),
            _ => None,
        }
    }

    pub fn remove(&mut self, key: &CacheKey) -> Option<MemoryEntry> {
        self.entries.pop(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn entry(byte: u8) -> MemoryEntry {
        MemoryEntry {
            payload: Arc::from(vec![byte]),
            stored_at: Utc::now(),
        }
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let mut tier = MemoryTier::new(2);
        let a = CacheKey::from_url("a");
        let b = CacheKey::from_url("b");
        let c = CacheKey::from_url("c");

        assert_eq!(tier.insert(a.clone(), entry(1)), None);
        assert_eq!(tier.insert(b.clone(), entry(2)), None);
        // Touch a so b becomes the LRU entry
        assert!(tier.get(&a).is_some());
        assert_eq!(tier.insert(c.clone(), entry(3)), Some(b.clone()));

        assert!(tier.contains(&a));
        assert!(!tier.contains(&b));
        assert!(tier.contains(&c));
        assert_eq!(tier.len(), 2);
    }

    #[test]
    fn test_reinsert_same_key_is_not_eviction() {
        let mut tier = MemoryTier::new(1);
        let a = CacheKey::from_url("a");
        tier.insert(a.clone(), entry(1));
        assert_eq!(tier.insert(a.clone(), entry(2)), None);
        assert_eq!(&*tier.get(&a).unwrap().payload, &[2u8][..]);
    }

    #[test]
    fn test_zero_capacity_clamps_to_one() {
        let tier = MemoryTier::new(0);
        assert_eq!(tier.capacity(), 1);
    }
}
