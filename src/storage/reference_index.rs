//! ReferenceIndex (C4): physical-path -> set of metadata hashes referencing
//! it. A count >= 2 means "hard-linked copy" in RhinoBox's sense: two
//! `FileRecord`s pointing at the same physical bytes (spec.md GLOSSARY).

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::RwLock;

use crate::error::Result;

use super::persist_json;

#[derive(Default, Serialize, Deserialize)]
struct Snapshot {
    references: HashMap<String, HashSet<String>>,
}

pub struct ReferenceIndex {
    path: PathBuf,
    state: RwLock<HashMap<String, HashSet<String>>>,
}

impl ReferenceIndex {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let references = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let snapshot: Snapshot = serde_json::from_str(&raw)
                .map_err(|e| crate::error::StorageError::Persistence(e.to_string()))?;
            snapshot.references
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            state: RwLock::new(references),
        })
    }

    fn persist(&self, state: &HashMap<String, HashSet<String>>) -> Result<()> {
        persist_json(
            &self.path,
            &Snapshot {
                references: state.clone(),
            },
        )
    }

    pub fn add_reference(&self, physical_path: &str, hash: &str) -> Result<()> {
        let mut guard = self.state.write().unwrap();
        let previous = guard.clone();
        guard
            .entry(physical_path.to_string())
            .or_default()
            .insert(hash.to_string());
        if let Err(e) = self.persist(&guard) {
            *guard = previous;
            return Err(e);
        }
        Ok(())
    }

    /// Remove a single hash's reference; cleans up the entry entirely once
    /// its set becomes empty.
    pub fn remove_reference(&self, physical_path: &str, hash: &str) -> Result<()> {
        let mut guard = self.state.write().unwrap();
        let previous = guard.clone();
        if let Some(set) = guard.get_mut(physical_path) {
            set.remove(hash);
            if set.is_empty() {
                guard.remove(physical_path);
            }
        }
        if let Err(e) = self.persist(&guard) {
            *guard = previous;
            return Err(e);
        }
        Ok(())
    }

    pub fn get_reference_count(&self, physical_path: &str) -> usize {
        self.state
            .read()
            .unwrap()
            .get(physical_path)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    pub fn get_references(&self, physical_path: &str) -> HashSet<String> {
        self.state
            .read()
            .unwrap()
            .get(physical_path)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_reflects_additions_and_removals() {
        let dir = tempfile::tempdir().unwrap();
        let idx = ReferenceIndex::open(dir.path().join("references.json")).unwrap();
        idx.add_reference("images/abc.png", "h1").unwrap();
        idx.add_reference("images/abc.png", "h2").unwrap();
        assert_eq!(idx.get_reference_count("images/abc.png"), 2);

        idx.remove_reference("images/abc.png", "h1").unwrap();
        assert_eq!(idx.get_reference_count("images/abc.png"), 1);

        idx.remove_reference("images/abc.png", "h2").unwrap();
        assert_eq!(idx.get_reference_count("images/abc.png"), 0);
        assert!(idx.get_references("images/abc.png").is_empty());
    }
}
