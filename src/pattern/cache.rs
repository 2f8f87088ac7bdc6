//! Bounded TTL + LRU cache fronting pattern reads.
//!
//! Entries expire `ttl` after being cached and are evicted
//! least-recently-accessed-first once the cache is full. Values read from
//! the cache may be stale by up to `ttl`; the durable store stays
//! authoritative.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::Pattern;

struct CacheEntry {
    pattern: Pattern,
    cached_at: Instant,
    /// Monotonic access tick, not wall time. Gives a total LRU order even
    /// when two accesses land within clock resolution.
    last_access: u64,
}

/// Bounded, TTL-expiring, LRU-evicting pattern cache.
pub struct PatternCache {
    entries: DashMap<String, CacheEntry>,
    max_size: usize,
    ttl: Duration,
    tick: AtomicU64,
}

impl PatternCache {
    pub const DEFAULT_MAX_SIZE: usize = 1000;
    pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            max_size,
            ttl,
            tick: AtomicU64::new(0),
        }
    }

    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed)
    }

    /// Get a fresh entry, touching its access time. An expired entry is
    /// evicted and reported as a miss.
    pub fn get(&self, id: &str) -> Option<Pattern> {
        let expired = match self.entries.get(id) {
            None => return None,
            Some(entry) => entry.cached_at.elapsed() >= self.ttl,
        };
        if expired {
            self.entries.remove(id);
            return None;
        }
        let tick = self.next_tick();
        let mut entry = self.entries.get_mut(id)?;
        entry.last_access = tick;
        Some(entry.pattern.clone())
    }

    /// Insert or overwrite an entry.
    ///
    /// Purges all TTL-expired entries first; if the cache is still full,
    /// evicts the single least-recently-accessed entry.
    pub fn put(&self, pattern: Pattern) {
        if self.max_size == 0 {
            return;
        }
        self.purge_expired();

        if self.entries.len() >= self.max_size && !self.entries.contains_key(&pattern.id) {
            if let Some(lru_key) = self.least_recently_accessed() {
                tracing::debug!(id = %lru_key, "evicting least-recently-used cache entry");
                self.entries.remove(&lru_key);
            }
        }

        let tick = self.next_tick();
        self.entries.insert(
            pattern.id.clone(),
            CacheEntry {
                pattern,
                cached_at: Instant::now(),
                last_access: tick,
            },
        );
    }

    /// Drop a single entry, fresh or not.
    pub fn invalidate(&self, id: &str) {
        self.entries.remove(id);
    }

    /// Empty the cache and its access bookkeeping.
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn purge_expired(&self) {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.cached_at.elapsed() >= self.ttl)
            .map(|e| e.key().clone())
            .collect();
        for key in expired {
            self.entries.remove(&key);
        }
    }

    fn least_recently_accessed(&self) -> Option<String> {
        self.entries
            .iter()
            .min_by_key(|e| e.last_access)
            .map(|e| e.key().clone())
    }
}

impl std::fmt::Debug for PatternCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternCache")
            .field("len", &self.len())
            .field("max_size", &self.max_size)
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(id: &str) -> Pattern {
        Pattern::new(id, "testing", id)
    }

    #[test]
    fn hit_and_miss() {
        let cache = PatternCache::new(10, Duration::from_secs(300));
        cache.put(pattern("a"));
        assert_eq!(cache.get("a").map(|p| p.id), Some("a".to_string()));
        assert!(cache.get("missing").is_none());
    }

    #[test]
    fn zero_ttl_always_misses() {
        let cache = PatternCache::new(10, Duration::ZERO);
        cache.put(pattern("a"));
        assert!(cache.get("a").is_none());
        // The expired entry was evicted on read.
        assert!(cache.is_empty());
    }

    #[test]
    fn lru_eviction_respects_access_order() {
        let cache = PatternCache::new(2, Duration::from_secs(300));
        cache.put(pattern("a"));
        cache.put(pattern("b"));
        // Touch A so B becomes the least recently accessed.
        assert!(cache.get("a").is_some());
        cache.put(pattern("c"));

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn overwrite_does_not_evict() {
        let cache = PatternCache::new(2, Duration::from_secs(300));
        cache.put(pattern("a"));
        cache.put(pattern("b"));
        cache.put(pattern("a"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("b").is_some());
    }

    #[test]
    fn put_purges_expired_before_evicting() {
        let cache = PatternCache::new(2, Duration::ZERO);
        cache.put(pattern("a"));
        cache.put(pattern("b"));
        // Both entries above are already expired; inserting must purge them
        // rather than evict by access order.
        cache.put(pattern("c"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn clear_empties_everything() {
        let cache = PatternCache::new(10, Duration::from_secs(300));
        cache.put(pattern("a"));
        cache.put(pattern("b"));
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn invalidate_drops_single_entry() {
        let cache = PatternCache::new(10, Duration::from_secs(300));
        cache.put(pattern("a"));
        cache.put(pattern("b"));
        cache.invalidate("a");
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
    }
}
