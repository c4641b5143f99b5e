//! Bounded fingerprint cache keyed by submission id. LRU for capacity,
//! TTL for staleness; a periodic sweep (driven by the owner) drops expired
//! entries wholesale.

use crate::fingerprint::Fingerprint;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_MAX_ENTRIES: usize = 10_000;
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

struct CacheEntry {
    fingerprint: Arc<Fingerprint>,
    cached_at: Instant,
}

pub struct FingerprintCache {
    entries: Mutex<LruCache<i64, CacheEntry>>,
    ttl: Duration,
}

impl FingerprintCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        FingerprintCache {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// A hit refreshes recency; an expired entry is dropped and reported as
    /// a miss.
    pub fn get(&self, submission_id: i64) -> Option<Arc<Fingerprint>> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(&submission_id) {
            if entry.cached_at.elapsed() < self.ttl {
                return Some(entry.fingerprint.clone());
            }
        } else {
            return None;
        }
        entries.pop(&submission_id);
        None
    }

    pub fn insert(&self, submission_id: i64, fingerprint: Arc<Fingerprint>) {
        self.entries.lock().put(
            submission_id,
            CacheEntry {
                fingerprint,
                cached_at: Instant::now(),
            },
        );
    }

    /// Removes every entry past the TTL; returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        let expired: Vec<i64> = entries
            .iter()
            .filter(|(_, entry)| entry.cached_at.elapsed() >= self.ttl)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            entries.pop(id);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for FingerprintCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES, DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(hashes: impl IntoIterator<Item = u64>) -> Arc<Fingerprint> {
        Arc::new(hashes.into_iter().collect())
    }

    #[test]
    fn hit_returns_the_cached_fingerprint() {
        let cache = FingerprintCache::default();
        cache.insert(1, fp([1, 2, 3]));
        let hit = cache.get(1).expect("cached");
        assert_eq!(hit.len(), 3);
    }

    #[test]
    fn miss_on_unknown_id() {
        let cache = FingerprintCache::default();
        assert!(cache.get(99).is_none());
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let cache = FingerprintCache::new(2, DEFAULT_TTL);
        cache.insert(1, fp([1]));
        cache.insert(2, fp([2]));
        // Touch 1 so 2 becomes the eviction victim.
        assert!(cache.get(1).is_some());
        cache.insert(3, fp([3]));

        assert!(cache.get(1).is_some());
        assert!(cache.get(2).is_none());
        assert!(cache.get(3).is_some());
    }

    #[test]
    fn expired_entries_read_as_misses() {
        let cache = FingerprintCache::new(10, Duration::ZERO);
        cache.insert(1, fp([1]));
        assert!(cache.get(1).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn sweep_removes_only_expired_entries() {
        let expiring = FingerprintCache::new(10, Duration::ZERO);
        expiring.insert(1, fp([1]));
        expiring.insert(2, fp([2]));
        assert_eq!(expiring.sweep_expired(), 2);
        assert!(expiring.is_empty());

        let fresh = FingerprintCache::new(10, DEFAULT_TTL);
        fresh.insert(1, fp([1]));
        assert_eq!(fresh.sweep_expired(), 0);
        assert_eq!(fresh.len(), 1);
    }
}
