//! MetadataIndex (C3): persistent mapping hash -> FileRecord, with a
//! secondary lookup by stored path. Whole-file JSON snapshot, written to a
//! sibling `.tmp` then atomically renamed, matching the teacher's
//! `AppConfig::save` discipline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::{Result, StorageError};

use super::persist_json;

/// The authoritative per-file metadata record (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileRecord {
    pub hash: String,
    /// Digest of the physical bytes at `stored_path`. Equal to `hash` for a
    /// freshly-stored file; for a Copy (hard-linked or byte-duplicated) this
    /// is the source record's digest, while `hash` is the fresh, non-content
    /// id Copy derives (see spec.md invariant 1 and design notes).
    pub content_hash: String,
    pub original_name: String,
    pub stored_path: String,
    pub category: String,
    pub mime: String,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

#[derive(Default, Serialize, Deserialize)]
struct Snapshot {
    records: Vec<FileRecord>,
}

pub struct MetadataIndex {
    path: PathBuf,
    state: RwLock<HashMap<String, FileRecord>>,
}

impl MetadataIndex {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| StorageError::io(path.display().to_string(), e))?;
            let snapshot: Snapshot = serde_json::from_str(&raw)
                .map_err(|e| StorageError::Persistence(e.to_string()))?;
            snapshot
                .records
                .into_iter()
                .map(|r| (r.hash.clone(), r))
                .collect()
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            state: RwLock::new(records),
        })
    }

    fn persist(&self, records: &HashMap<String, FileRecord>) -> Result<()> {
        let snapshot = Snapshot {
            records: records.values().cloned().collect(),
        };
        persist_json(&self.path, &snapshot)
    }

    /// Insert a new record. Errors if `hash` is already present; dedup is
    /// the caller's decision point (StorageManager checks first).
    pub fn add(&self, record: FileRecord) -> Result<()> {
        let mut guard = self.state.write().unwrap();
        if guard.contains_key(&record.hash) {
            return Err(StorageError::DuplicateRecord(record.hash).into());
        }
        let previous = guard.clone();
        guard.insert(record.hash.clone(), record);
        if let Err(e) = self.persist(&guard) {
            *guard = previous;
            return Err(e);
        }
        Ok(())
    }

    pub fn find_by_hash(&self, hash: &str) -> Option<FileRecord> {
        self.state.read().unwrap().get(hash).cloned()
    }

    pub fn find_by_stored_path(&self, stored_path: &str) -> Option<FileRecord> {
        self.state
            .read()
            .unwrap()
            .values()
            .find(|r| r.stored_path == stored_path)
            .cloned()
    }

    /// Replace the record for `hash` wholesale (used by MoveFile/CopyFile
    /// rollback, which need to write back a fully-formed record rather than
    /// transform the metadata map).
    pub fn replace(&self, record: FileRecord) -> Result<()> {
        let mut guard = self.state.write().unwrap();
        let previous = guard.clone();
        guard.insert(record.hash.clone(), record);
        if let Err(e) = self.persist(&guard) {
            *guard = previous;
            return Err(e);
        }
        Ok(())
    }

    /// Apply a transformation over a record's `metadata` map and persist.
    pub fn update_metadata<F>(&self, hash: &str, f: F) -> Result<FileRecord>
    where
        F: FnOnce(&mut HashMap<String, String>),
    {
        let mut guard = self.state.write().unwrap();
        let previous = guard.clone();
        let record = guard
            .get_mut(hash)
            .ok_or_else(|| StorageError::FileNotFound(hash.to_string()))?;
        f(&mut record.metadata);
        let updated = record.clone();
        if let Err(e) = self.persist(&guard) {
            *guard = previous;
            return Err(e);
        }
        Ok(updated)
    }

    pub fn delete(&self, hash: &str) -> Result<()> {
        let mut guard = self.state.write().unwrap();
        if !guard.contains_key(hash) {
            return Err(StorageError::FileNotFound(hash.to_string()).into());
        }
        let previous = guard.clone();
        guard.remove(hash);
        if let Err(e) = self.persist(&guard) {
            *guard = previous;
            return Err(e);
        }
        Ok(())
    }

    /// Snapshot iteration for scanners (e.g. VerifyStore).
    pub fn all(&self) -> Vec<FileRecord> {
        self.state.read().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(hash: &str) -> FileRecord {
        FileRecord {
            hash: hash.to_string(),
            content_hash: hash.to_string(),
            original_name: "a.txt".into(),
            stored_path: format!("documents/{hash}_a.txt"),
            category: "documents".into(),
            mime: "text/plain".into(),
            size: 5,
            uploaded_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn add_then_duplicate_errors() {
        let dir = tempfile::tempdir().unwrap();
        let idx = MetadataIndex::open(dir.path().join("index.json")).unwrap();
        idx.add(sample("abc")).unwrap();
        assert!(idx.add(sample("abc")).is_err());
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        {
            let idx = MetadataIndex::open(&path).unwrap();
            idx.add(sample("abc")).unwrap();
        }
        let idx = MetadataIndex::open(&path).unwrap();
        assert!(idx.find_by_hash("abc").is_some());
    }

    #[test]
    fn update_metadata_persists() {
        let dir = tempfile::tempdir().unwrap();
        let idx = MetadataIndex::open(dir.path().join("index.json")).unwrap();
        idx.add(sample("abc")).unwrap();
        idx.update_metadata("abc", |m| {
            m.insert("k".into(), "v".into());
        })
        .unwrap();
        let record = idx.find_by_hash("abc").unwrap();
        assert_eq!(record.metadata.get("k"), Some(&"v".to_string()));
    }

    #[test]
    fn delete_missing_errors() {
        let dir = tempfile::tempdir().unwrap();
        let idx = MetadataIndex::open(dir.path().join("index.json")).unwrap();
        assert!(idx.delete("missing").is_err());
    }
}
