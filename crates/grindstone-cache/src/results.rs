//! Recognition-result cache, keyed by `(capture identity, recognition
//! kind)`. Every entry carries its own TTL; a lookup past TTL is a miss
//! that the caller must answer with a recomputation. The cache never
//! silently serves stale results.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use grindstone_core::types::CaptureId;

/// Outcome of a cache lookup. `Expired` and `Miss` both require
/// recomputation; they are distinguished for observability.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<T> {
    Hit(T),
    Expired,
    Miss,
}

impl<T> CacheLookup<T> {
    pub fn hit(self) -> Option<T> {
        match self {
            CacheLookup::Hit(v) => Some(v),
            _ => None,
        }
    }
}

struct Entry<T> {
    value: T,
    cached_at: Instant,
    ttl: Duration,
}

/// TTL-bounded result store. Bounded in entry count; when full, the
/// oldest-inserted entry is evicted first.
pub struct ResultCache<T> {
    entries: Mutex<HashMap<(CaptureId, String), Entry<T>>>,
    capacity: usize,
}

impl<T: Clone> ResultCache<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn put(&self, capture: CaptureId, kind: &str, value: T, ttl: Duration) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            (capture, kind.to_string()),
            Entry {
                value,
                cached_at: Instant::now(),
                ttl,
            },
        );
        while entries.len() > self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.cached_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    entries.remove(&key);
                }
                None => break,
            }
        }
    }

    pub fn get(&self, capture: CaptureId, kind: &str) -> CacheLookup<T> {
        let mut entries = self.entries.lock().unwrap();
        let key = (capture, kind.to_string());
        let hit = entries
            .get(&key)
            .map(|e| (e.cached_at.elapsed() <= e.ttl, e.value.clone()));
        match hit {
            Some((true, value)) => CacheLookup::Hit(value),
            Some((false, _)) => {
                entries.remove(&key);
                CacheLookup::Expired
            }
            None => CacheLookup::Miss,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}
