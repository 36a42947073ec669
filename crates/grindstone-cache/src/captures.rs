//! Screen capture cache. Bounded to the N most-recent entries, evicted
//! strictly LRU, with an additional max-age cutoff: an entry past max-age
//! is expired even if it was touched a moment ago.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

use lru::LruCache;

use grindstone_core::types::{Capture, CaptureId};

pub struct CaptureCache {
    inner: Mutex<LruCache<CaptureId, Capture>>,
    max_age: Duration,
}

impl CaptureCache {
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity >= 1");
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            max_age,
        }
    }

    /// Insert a capture, evicting the least-recently-used entry when full.
    pub fn put(&self, capture: Capture) {
        let mut cache = self.inner.lock().unwrap();
        if let Some((evicted, _)) = cache.push(capture.id, capture) {
            tracing::trace!("Capture cache evicted {evicted}");
        }
    }

    /// Fetch a capture by identity. Expired entries are dropped on access
    /// and reported as a miss.
    pub fn get(&self, id: CaptureId) -> Option<Capture> {
        let mut cache = self.inner.lock().unwrap();
        let hit = cache.get(&id).cloned();
        match hit {
            Some(capture) if capture.taken_at.elapsed() <= self.max_age => Some(capture),
            Some(_) => {
                cache.pop(&id);
                None
            }
            None => None,
        }
    }

    /// The newest unexpired capture, by capture timestamp (not recency of
    /// access).
    pub fn latest(&self) -> Option<Capture> {
        let mut cache = self.inner.lock().unwrap();
        let latest = cache
            .iter()
            .filter(|(_, c)| c.taken_at.elapsed() <= self.max_age)
            .max_by_key(|(id, _)| **id)
            .map(|(_, c)| c.clone());
        if let Some(ref capture) = latest {
            // Count as an access for LRU purposes.
            cache.get(&capture.id);
        }
        latest
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn capture(id: u64) -> Capture {
        Capture::new(CaptureId(id), 1280, 720, vec![0u8; 4])
    }

    #[test]
    fn test_lru_eviction_order() {
        let cache = CaptureCache::new(3, Duration::from_secs(60));
        cache.put(capture(1));
        cache.put(capture(2));
        cache.put(capture(3));

        // Touch 1 so 2 becomes the LRU victim.
        assert!(cache.get(CaptureId(1)).is_some());
        cache.put(capture(4));

        assert!(cache.get(CaptureId(2)).is_none());
        assert!(cache.get(CaptureId(1)).is_some());
        assert!(cache.get(CaptureId(3)).is_some());
        assert!(cache.get(CaptureId(4)).is_some());
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_max_age_expires_even_if_referenced() {
        let cache = CaptureCache::new(5, Duration::from_millis(50));
        let mut old = capture(1);
        old.taken_at = Instant::now() - Duration::from_millis(200);
        cache.put(old);
        cache.put(capture(2));

        // Entry 1 was just inserted (recent in LRU terms) but its screen
        // content is stale, so the lookup misses and drops it.
        assert!(cache.get(CaptureId(1)).is_none());
        assert_eq!(cache.len(), 1);
        assert!(cache.get(CaptureId(2)).is_some());
    }

    #[test]
    fn test_latest_picks_newest_by_timestamp() {
        let cache = CaptureCache::new(5, Duration::from_secs(60));
        cache.put(capture(10));
        cache.put(capture(30));
        cache.put(capture(20));

        let latest = cache.latest().unwrap();
        assert_eq!(latest.id, CaptureId(30));
    }

    #[test]
    fn test_latest_skips_expired() {
        let cache = CaptureCache::new(5, Duration::from_millis(50));
        cache.put(capture(1));
        let mut newer_but_stale = capture(9);
        newer_but_stale.taken_at = Instant::now() - Duration::from_millis(200);
        cache.put(newer_but_stale);

        let latest = cache.latest().unwrap();
        assert_eq!(latest.id, CaptureId(1));
    }
}
