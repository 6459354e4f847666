//! Content-addressed storage manager and its supporting indices (C3-C6).

pub mod manager;
pub mod metadata_index;
pub mod reference_index;
pub mod version_index;

pub use manager::StorageManager;
pub use metadata_index::{FileRecord, MetadataIndex};
pub use reference_index::ReferenceIndex;
pub use version_index::{VersionChain, VersionEntry, VersionIndex};

use crate::error::{Result, StorageError};
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Write `value` as pretty JSON to `<path>.tmp`, then atomically rename over
/// `path`. Used by every persisted index (MetadataIndex, ReferenceIndex,
/// VersionIndex) so a crash mid-write never corrupts the live snapshot.
pub(crate) fn persist_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StorageError::io(parent.display().to_string(), e))?;
    }
    let tmp_path = path.with_extension("tmp");
    let raw = serde_json::to_vec_pretty(value)
        .map_err(|e| StorageError::Persistence(e.to_string()))?;
    fs::write(&tmp_path, raw).map_err(|e| StorageError::io(tmp_path.display().to_string(), e))?;
    fs::rename(&tmp_path, path).map_err(|e| StorageError::io(path.display().to_string(), e))?;
    Ok(())
}

/// Append a single-line JSON audit entry to an NDJSON file. Readers must
/// tolerate trailing partial lines (spec.md §6), so writers always include
/// the trailing newline themselves and nothing else.
pub(crate) fn append_ndjson<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    use std::io::Write;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StorageError::io(parent.display().to_string(), e))?;
    }
    let mut line = serde_json::to_vec(value).map_err(|e| StorageError::Persistence(e.to_string()))?;
    line.push(b'\n');
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StorageError::io(path.display().to_string(), e))?;
    file.write_all(&line)
        .map_err(|e| StorageError::io(path.display().to_string(), e))?;
    Ok(())
}

/// Category path constraints from spec.md §6: non-empty, at most 10
/// `/`-separated segments, each segment at most 100 chars, no `..`, no
/// control characters, no `<>:"|?*`, no leading/trailing dot on a segment.
pub fn validate_category(category: &str) -> Result<(), StorageError> {
    if category.is_empty() {
        return Err(StorageError::InvalidCategory("category is empty".into()));
    }
    let segments: Vec<&str> = category.split('/').collect();
    if segments.len() > 10 {
        return Err(StorageError::InvalidCategory(format!(
            "category has {} segments, max is 10",
            segments.len()
        )));
    }
    for seg in &segments {
        if seg.is_empty() {
            return Err(StorageError::InvalidCategory("empty path segment".into()));
        }
        if seg.len() > 100 {
            return Err(StorageError::InvalidCategory(format!(
                "segment '{seg}' exceeds 100 chars"
            )));
        }
        if *seg == ".." || seg.contains("..") {
            return Err(StorageError::InvalidCategory("path traversal rejected".into()));
        }
        if seg.chars().any(|c| (c as u32) <= 0x1F) {
            return Err(StorageError::InvalidCategory("control characters rejected".into()));
        }
        if seg.chars().any(|c| "<>:\"|?*".contains(c)) {
            return Err(StorageError::InvalidCategory(format!(
                "segment '{seg}' contains a reserved character"
            )));
        }
        if seg.starts_with('.') || seg.ends_with('.') {
            return Err(StorageError::InvalidCategory(format!(
                "segment '{seg}' has a leading/trailing dot"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_segments_ok_eleven_fails() {
        let ten = (0..10).map(|i| i.to_string()).collect::<Vec<_>>().join("/");
        assert!(validate_category(&ten).is_ok());
        let eleven = (0..11).map(|i| i.to_string()).collect::<Vec<_>>().join("/");
        assert!(validate_category(&eleven).is_err());
    }

    #[test]
    fn traversal_rejected() {
        assert!(validate_category("images/../etc").is_err());
    }

    #[test]
    fn reserved_chars_rejected() {
        assert!(validate_category("images/bad:name").is_err());
    }
}
