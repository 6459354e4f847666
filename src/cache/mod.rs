//! Cache (C7): a three-tier read-through/write-through cache.
//!
//! Get: L1 hit returns immediately. L1 miss consults L2; if L2 says
//! "definitely absent" the lookup stops there (negative-lookup fast path,
//! spec.md §4.7 — "an L2 absent verdict implies L3 absent, no false
//! negatives"). Otherwise L3 is queried and, on a hit, the value is
//! promoted back into L1.
//!
//! Set always writes L1 synchronously and marks L2 present; the L3 write is
//! queued asynchronously (see `l3::L3`).

mod l1;
mod l2;
mod l3;

pub mod adapters;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use l1::L1;
use l2::L2;
use l3::L3;

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub l1_hits: u64,
    pub l2_negative_hits: u64,
    pub l3_hits: u64,
    pub misses: u64,
    /// Fraction of lookups satisfied by L1 or L3, versus stopped short at L2
    /// or missing outright. `0.0` when there have been no lookups yet.
    pub hit_ratio: f64,
    /// Current number of live entries in L1, for capacity-pressure monitoring.
    pub l1_size: usize,
}

#[derive(Default)]
struct Counters {
    l1_hits: AtomicU64,
    l2_negative_hits: AtomicU64,
    l3_hits: AtomicU64,
    misses: AtomicU64,
}

pub struct Cache {
    l1: L1,
    l2: L2,
    l3: Arc<L3>,
    counters: Counters,
}

impl Cache {
    pub fn open(data_dir: impl AsRef<std::path::Path>, config: &CacheConfig) -> Result<Self> {
        let l3 = L3::open(data_dir.as_ref().join("l3"))
            .map_err(|e| CacheError::Store(e.to_string()))?;
        Ok(Self {
            l1: L1::new(config.l1_capacity, Duration::from_secs(config.l1_ttl_secs)),
            l2: L2::new(config.l2_expected_items, config.l2_target_fpr),
            l3: Arc::new(l3),
            counters: Counters::default(),
        })
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        if let Some(v) = self.l1.get(key) {
            self.counters.l1_hits.fetch_add(1, Ordering::Relaxed);
            return Some(v);
        }
        if !self.l2.might_contain(key) {
            self.counters.l2_negative_hits.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        match self.l3.get(key) {
            Some(v) => {
                self.counters.l3_hits.fetch_add(1, Ordering::Relaxed);
                self.l1.set(key.to_string(), v.clone());
                Some(v)
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn set(&self, key: String, value: Vec<u8>) {
        self.l1.set(key.clone(), value.clone());
        self.l2.insert(&key);
        self.l3.set(key, value).await;
    }

    /// Removes from L1 and L3. L2 cannot forget a single key (insert-only
    /// filter); a stale "possibly present" verdict just costs an extra L3
    /// lookup, which correctly comes back empty.
    pub async fn delete(&self, key: &str) {
        self.l1.remove(key);
        self.l3.remove(key.to_string()).await;
    }

    pub async fn clear(&self) {
        self.l1.clear();
        self.l2.clear();
        self.l3.clear().await;
    }

    pub fn stats(&self) -> CacheStats {
        let l1_hits = self.counters.l1_hits.load(Ordering::Relaxed);
        let l2_negative_hits = self.counters.l2_negative_hits.load(Ordering::Relaxed);
        let l3_hits = self.counters.l3_hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let total = l1_hits + l2_negative_hits + l3_hits + misses;
        let hit_ratio = if total == 0 {
            0.0
        } else {
            (l1_hits + l3_hits) as f64 / total as f64
        };
        CacheStats {
            l1_hits,
            l2_negative_hits,
            l3_hits,
            misses,
            hit_ratio,
            l1_size: self.l1.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CacheConfig {
        CacheConfig {
            l1_capacity: 100,
            l1_ttl_secs: 60,
            l2_expected_items: 1000,
            l2_target_fpr: 0.01,
            schema_cache_ttl_secs: 60,
        }
    }

    #[tokio::test]
    async fn miss_then_set_then_hit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(dir.path(), &config()).unwrap();
        assert_eq!(cache.get("k").await, None);
        cache.set("k".into(), b"v".to_vec()).await;
        assert_eq!(cache.get("k").await, Some(b"v".to_vec()));
        let stats = cache.stats();
        assert_eq!(stats.l1_hits, 1);
        assert_eq!(stats.l2_negative_hits, 1);
    }

    #[tokio::test]
    async fn l3_promotes_into_l1_after_l1_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(dir.path(), &config()).unwrap();
        cache.set("k".into(), b"v".to_vec()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.l1.remove("k");
        assert_eq!(cache.get("k").await, Some(b"v".to_vec()));
        assert_eq!(cache.stats().l3_hits, 1);
    }

    #[tokio::test]
    async fn delete_then_get_misses() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(dir.path(), &config()).unwrap();
        cache.set("k".into(), b"v".to_vec()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.delete("k").await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("k").await, None);
    }
}
