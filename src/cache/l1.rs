//! L1: in-memory fixed-capacity LRU with per-entry TTL. Eviction is
//! capacity-based (handled by `lru::LruCache`); expiration is lazy on read.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

pub struct L1 {
    inner: Mutex<LruCache<String, Entry>>,
    ttl: Duration,
}

impl L1 {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Returns `Some(bytes)` on a live hit; expired entries are evicted and
    /// treated as a miss.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut guard = self.inner.lock().unwrap();
        let expired = guard.peek(key).map(|e| Instant::now() >= e.expires_at).unwrap_or(false);
        if expired {
            guard.pop(key);
            return None;
        }
        guard.get(key).map(|e| e.value.clone())
    }

    pub fn set(&self, key: String, value: Vec<u8>) {
        let mut guard = self.inner.lock().unwrap();
        guard.put(
            key,
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn remove(&self, key: &str) {
        self.inner.lock().unwrap().pop(key);
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires_lazily() {
        let l1 = L1::new(10, Duration::from_millis(10));
        l1.set("k".into(), b"v".to_vec());
        assert_eq!(l1.get("k"), Some(b"v".to_vec()));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(l1.get("k"), None);
    }

    #[test]
    fn capacity_evicts_lru() {
        let l1 = L1::new(2, Duration::from_secs(60));
        l1.set("a".into(), b"1".to_vec());
        l1.set("b".into(), b"2".to_vec());
        l1.set("c".into(), b"3".to_vec());
        assert_eq!(l1.get("a"), None);
        assert!(l1.get("b").is_some());
        assert!(l1.get("c").is_some());
    }
}
