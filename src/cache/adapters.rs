//! HashIndex & SchemaCache (C8): thin key-prefixed adapters over the
//! generic `Cache`, per spec.md §4.8.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};
use crate::hash::hash_bytes;
use crate::json::Decision;

use super::Cache;

/// Content-dedup lookup: `get_or_compute` hashes the bytes, probes the
/// cache, and inserts the digest as present if this is the first sighting.
pub struct HashIndex<'a> {
    cache: &'a Cache,
}

impl<'a> HashIndex<'a> {
    pub fn new(cache: &'a Cache) -> Self {
        Self { cache }
    }

    fn key(digest: &str) -> String {
        format!("hash:{digest}")
    }

    pub async fn get_or_compute(&self, bytes: &[u8]) -> (String, bool) {
        let digest = hash_bytes(bytes);
        let key = Self::key(&digest);
        let is_duplicate = self.cache.get(&key).await.is_some();
        if !is_duplicate {
            self.cache.set(key, vec![1]).await;
        }
        (digest, is_duplicate)
    }
}

#[derive(Serialize, Deserialize)]
struct SchemaCacheEntry {
    decision: Decision,
    analyzed_at: DateTime<Utc>,
}

pub struct SchemaCache<'a> {
    cache: &'a Cache,
    ttl: Duration,
}

impl<'a> SchemaCache<'a> {
    pub fn new(cache: &'a Cache, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    fn key(schema_hash: &str) -> String {
        format!("schema:{schema_hash}")
    }

    pub async fn get(&self, schema_hash: &str) -> Option<Decision> {
        let raw = self.cache.get(&Self::key(schema_hash)).await?;
        let entry: SchemaCacheEntry = serde_json::from_slice(&raw).ok()?;
        let age = Utc::now().signed_duration_since(entry.analyzed_at);
        if age.to_std().unwrap_or(Duration::MAX) > self.ttl {
            return None;
        }
        Some(entry.decision)
    }

    pub async fn set(&self, schema_hash: &str, decision: Decision) -> Result<()> {
        let entry = SchemaCacheEntry {
            decision,
            analyzed_at: Utc::now(),
        };
        let raw = serde_json::to_vec(&entry).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.cache.set(Self::key(schema_hash), raw).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;

    fn config() -> CacheConfig {
        CacheConfig {
            l1_capacity: 100,
            l1_ttl_secs: 60,
            l2_expected_items: 1000,
            l2_target_fpr: 0.01,
            schema_cache_ttl_secs: 60,
        }
    }

    fn sample_decision() -> Decision {
        Decision {
            engine: "relational".into(),
            reason: "test".into(),
            confidence: 0.9,
            table: "dataset".into(),
            ddl: Some("CREATE TABLE...".into()),
            columns: Some(vec!["id".into()]),
            indexes: None,
            schema_hash: "abc".into(),
        }
    }

    #[tokio::test]
    async fn hash_index_marks_second_lookup_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(dir.path(), &config()).unwrap();
        let index = HashIndex::new(&cache);
        let (_, first) = index.get_or_compute(b"hello").await;
        assert!(!first);
        let (_, second) = index.get_or_compute(b"hello").await;
        assert!(second);
    }

    #[tokio::test]
    async fn schema_cache_round_trips_and_respects_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(dir.path(), &config()).unwrap();
        let schema_cache = SchemaCache::new(&cache, Duration::from_secs(0));
        schema_cache.set("h1", sample_decision()).await.unwrap();
        // TTL of zero means any elapsed time invalidates the entry.
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(schema_cache.get("h1").await.is_none());
    }
}
