//! Bounded LRU cache with per-entry TTL, correlating `frame_id` to the
//! most recent result for that frame.
//!
//! `put` inserts at MRU with the current timestamp, purges anything past
//! its TTL, and lets the capacity bound evict from the LRU end. `get`
//! treats an expired entry as absent (removing it) and promotes hits to
//! MRU.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;

pub struct ResultsCache<V> {
    entries: LruCache<String, (Instant, V)>,
    ttl: Duration,
}

impl<V> ResultsCache<V> {
    /// `ttl_seconds` of zero disables expiry.
    pub fn new(max_entries: usize, ttl_seconds: f64) -> Self {
        let cap = NonZeroUsize::new(max_entries.max(1)).expect("max_entries >= 1");
        Self {
            entries: LruCache::new(cap),
            ttl: Duration::from_secs_f64(ttl_seconds.max(0.0)),
        }
    }

    pub fn put(&mut self, key: &str, value: V) {
        self.put_at(key, value, Instant::now());
    }

    pub fn get(&mut self, key: &str) -> Option<&V> {
        self.get_at(key, Instant::now())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn expired(&self, now: Instant, inserted: Instant) -> bool {
        !self.ttl.is_zero() && now.duration_since(inserted) > self.ttl
    }

    pub fn put_at(&mut self, key: &str, value: V, now: Instant) {
        // Re-inserting moves the entry to MRU with a fresh timestamp.
        self.entries.put(key.to_string(), (now, value));
        if self.ttl.is_zero() {
            return;
        }
        let dead: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, (inserted, _))| self.expired(now, *inserted))
            .map(|(k, _)| k.clone())
            .collect();
        for key in dead {
            self.entries.pop(&key);
        }
    }

    pub fn get_at(&mut self, key: &str, now: Instant) -> Option<&V> {
        let expired = match self.entries.peek(key) {
            None => return None,
            Some((inserted, _)) => self.expired(now, *inserted),
        };
        if expired {
            self.entries.pop(key);
            return None;
        }
        // Promote to MRU.
        self.entries.get(key).map(|(_, value)| value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_roundtrip_within_ttl() {
        let mut cache = ResultsCache::new(10, 60.0);
        let t0 = Instant::now();
        cache.put_at("f1", 41, t0);
        assert_eq!(cache.get_at("f1", t0 + Duration::from_secs(59)), Some(&41));
    }

    #[test]
    fn expired_entries_read_as_absent() {
        let mut cache = ResultsCache::new(10, 1.0);
        let t0 = Instant::now();
        cache.put_at("f1", 1, t0);
        assert_eq!(cache.get_at("f1", t0 + Duration::from_millis(1_001)), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn capacity_bound_holds_with_lru_eviction() {
        let mut cache = ResultsCache::new(3, 0.0);
        let t0 = Instant::now();
        for (i, key) in ["a", "b", "c", "d"].iter().enumerate() {
            cache.put_at(key, i, t0);
            assert!(cache.len() <= 3);
        }
        // "a" was LRU and fell out.
        assert_eq!(cache.get_at("a", t0), None);
        assert_eq!(cache.get_at("d", t0), Some(&3));
    }

    #[test]
    fn get_promotes_to_mru() {
        let mut cache = ResultsCache::new(2, 0.0);
        let t0 = Instant::now();
        cache.put_at("a", 1, t0);
        cache.put_at("b", 2, t0);
        // Touch "a" so "b" is evicted next.
        assert!(cache.get_at("a", t0).is_some());
        cache.put_at("c", 3, t0);
        assert_eq!(cache.get_at("b", t0), None);
        assert_eq!(cache.get_at("a", t0), Some(&1));
    }

    #[test]
    fn put_purges_other_expired_entries() {
        let mut cache = ResultsCache::new(10, 1.0);
        let t0 = Instant::now();
        cache.put_at("old", 1, t0);
        cache.put_at("fresh", 2, t0 + Duration::from_secs(2));
        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.get_at("fresh", t0 + Duration::from_secs(2)),
            Some(&2)
        );
    }

    #[test]
    fn reinsert_refreshes_timestamp() {
        let mut cache = ResultsCache::new(10, 1.0);
        let t0 = Instant::now();
        cache.put_at("k", 1, t0);
        cache.put_at("k", 2, t0 + Duration::from_millis(900));
        // Fresh timestamp keeps it alive past the original expiry.
        assert_eq!(
            cache.get_at("k", t0 + Duration::from_millis(1_500)),
            Some(&2)
        );
    }

    #[test]
    fn zero_ttl_never_expires() {
        let mut cache = ResultsCache::new(10, 0.0);
        let t0 = Instant::now();
        cache.put_at("k", 1, t0);
        assert_eq!(
            cache.get_at("k", t0 + Duration::from_secs(100_000)),
            Some(&1)
        );
    }
}
