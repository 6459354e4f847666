//! VersionIndex (C5): per-file-id ordered version chain with a
//! current-pointer and a bounded length (spec.md §4.5).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use crate::error::{Result, StorageError};

use super::persist_json;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VersionEntry {
    pub version: u32,
    pub hash: String,
    pub size: u64,
    pub uploaded_by: String,
    pub comment: String,
    pub created_at: DateTime<Utc>,
    pub is_current: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VersionChain {
    pub file_id: String,
    pub current_version: u32,
    pub entries: Vec<VersionEntry>,
}

/// Per-field deltas produced by `diff`, restricted to the closed set of
/// fields named in spec.md §4.5.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionDiff {
    pub size: Option<(u64, u64)>,
    pub comment: Option<(String, String)>,
    pub hash: Option<(String, String)>,
    pub uploaded_by: Option<(String, String)>,
}

#[derive(Default, Serialize, Deserialize)]
struct Snapshot {
    chains: HashMap<String, VersionChain>,
}

pub struct VersionIndex {
    path: PathBuf,
    state: RwLock<HashMap<String, VersionChain>>,
}

impl VersionIndex {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let chains = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let snapshot: Snapshot = serde_json::from_str(&raw)
                .map_err(|e| StorageError::Persistence(e.to_string()))?;
            snapshot.chains
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            state: RwLock::new(chains),
        })
    }

    fn persist(&self, state: &HashMap<String, VersionChain>) -> Result<()> {
        persist_json(
            &self.path,
            &Snapshot {
                chains: state.clone(),
            },
        )
    }

    pub fn create_chain(
        &self,
        file_id: &str,
        hash: &str,
        size: u64,
        uploaded_by: &str,
        comment: &str,
    ) -> Result<VersionChain> {
        let mut guard = self.state.write().unwrap();
        let previous = guard.clone();
        let chain = VersionChain {
            file_id: file_id.to_string(),
            current_version: 1,
            entries: vec![VersionEntry {
                version: 1,
                hash: hash.to_string(),
                size,
                uploaded_by: uploaded_by.to_string(),
                comment: comment.to_string(),
                created_at: Utc::now(),
                is_current: true,
            }],
        };
        guard.insert(file_id.to_string(), chain.clone());
        if let Err(e) = self.persist(&guard) {
            *guard = previous;
            return Err(e);
        }
        Ok(chain)
    }

    /// Append version N+1, marking it current and unmarking the previous
    /// current entry. `max_versions == 0` means unbounded.
    pub fn add_version(
        &self,
        file_id: &str,
        hash: &str,
        size: u64,
        uploaded_by: &str,
        comment: &str,
        max_versions: u32,
    ) -> Result<VersionEntry> {
        let mut guard = self.state.write().unwrap();
        let previous = guard.clone();
        let chain = guard
            .get_mut(file_id)
            .ok_or_else(|| StorageError::FileNotFound(file_id.to_string()))?;

        if max_versions > 0 && chain.entries.len() as u32 >= max_versions {
            return Err(StorageError::VersionLimit { max: max_versions }.into());
        }

        for entry in chain.entries.iter_mut() {
            entry.is_current = false;
        }
        let next_version = chain.entries.iter().map(|e| e.version).max().unwrap_or(0) + 1;
        let entry = VersionEntry {
            version: next_version,
            hash: hash.to_string(),
            size,
            uploaded_by: uploaded_by.to_string(),
            comment: comment.to_string(),
            created_at: Utc::now(),
            is_current: true,
        };
        chain.entries.push(entry.clone());
        chain.current_version = next_version;

        if let Err(e) = self.persist(&guard) {
            *guard = previous;
            return Err(e);
        }
        Ok(entry)
    }

    pub fn get_version(&self, file_id: &str, version: u32) -> Option<VersionEntry> {
        self.state
            .read()
            .unwrap()
            .get(file_id)
            .and_then(|chain| chain.entries.iter().find(|e| e.version == version).cloned())
    }

    /// Sorted descending by version number.
    pub fn list_versions(&self, file_id: &str) -> Vec<VersionEntry> {
        let guard = self.state.read().unwrap();
        let Some(chain) = guard.get(file_id) else {
            return Vec::new();
        };
        let mut entries = chain.entries.clone();
        entries.sort_by(|a, b| b.version.cmp(&a.version));
        entries
    }

    /// Move the current pointer without truncating history. Returns the
    /// now-current version.
    pub fn revert_to(&self, file_id: &str, version: u32, _reason: &str) -> Result<VersionEntry> {
        let mut guard = self.state.write().unwrap();
        let previous = guard.clone();
        let chain = guard
            .get_mut(file_id)
            .ok_or_else(|| StorageError::FileNotFound(file_id.to_string()))?;

        if !chain.entries.iter().any(|e| e.version == version) {
            return Err(StorageError::VersionNotFound {
                file_id: file_id.to_string(),
                version,
            }
            .into());
        }

        for entry in chain.entries.iter_mut() {
            entry.is_current = entry.version == version;
        }
        chain.current_version = version;
        let reverted = chain
            .entries
            .iter()
            .find(|e| e.version == version)
            .cloned()
            .unwrap();

        if let Err(e) = self.persist(&guard) {
            *guard = previous;
            return Err(e);
        }
        Ok(reverted)
    }

    /// Per-field deltas between two versions, restricted to size/comment/hash/uploaded_by.
    pub fn diff(&self, file_id: &str, a: u32, b: u32) -> Result<VersionDiff> {
        let entry_a = self
            .get_version(file_id, a)
            .ok_or_else(|| StorageError::VersionNotFound {
                file_id: file_id.to_string(),
                version: a,
            })?;
        let entry_b = self
            .get_version(file_id, b)
            .ok_or_else(|| StorageError::VersionNotFound {
                file_id: file_id.to_string(),
                version: b,
            })?;

        Ok(VersionDiff {
            size: (entry_a.size != entry_b.size).then_some((entry_a.size, entry_b.size)),
            comment: (entry_a.comment != entry_b.comment)
                .then(|| (entry_a.comment.clone(), entry_b.comment.clone())),
            hash: (entry_a.hash != entry_b.hash).then(|| (entry_a.hash.clone(), entry_b.hash.clone())),
            uploaded_by: (entry_a.uploaded_by != entry_b.uploaded_by)
                .then(|| (entry_a.uploaded_by.clone(), entry_b.uploaded_by.clone())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revert_preserves_history_length() {
        let dir = tempfile::tempdir().unwrap();
        let idx = VersionIndex::open(dir.path().join("versions.json")).unwrap();
        idx.create_chain("f1", "h1", 10, "alice", "initial").unwrap();
        idx.add_version("f1", "h2", 20, "alice", "second", 0).unwrap();

        let reverted = idx.revert_to("f1", 1, "rollback").unwrap();
        assert_eq!(reverted.version, 1);

        let versions = idx.list_versions("f1");
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].version, 2); // newest-first
        assert!(versions.iter().find(|e| e.version == 1).unwrap().is_current);
        assert!(!versions.iter().find(|e| e.version == 2).unwrap().is_current);
    }

    #[test]
    fn version_cap_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let idx = VersionIndex::open(dir.path().join("versions.json")).unwrap();
        idx.create_chain("f1", "h1", 10, "alice", "initial").unwrap();
        assert!(idx.add_version("f1", "h2", 20, "alice", "second", 1).is_err());
    }

    #[test]
    fn unbounded_when_max_zero() {
        let dir = tempfile::tempdir().unwrap();
        let idx = VersionIndex::open(dir.path().join("versions.json")).unwrap();
        idx.create_chain("f1", "h1", 10, "alice", "initial").unwrap();
        for i in 0..25 {
            idx.add_version("f1", &format!("h{i}"), 20, "alice", "n", 0)
                .unwrap();
        }
        assert_eq!(idx.list_versions("f1").len(), 26);
    }
}
