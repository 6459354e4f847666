//! StorageManager (C6): orchestrates the Hasher, Classifier, MetadataIndex,
//! ReferenceIndex and VersionIndex behind Store/Move/Copy/CreateVersion/
//! Delete/VerifyStore (spec.md §4.6).
//!
//! One mutex serializes structural mutations; read-only operations never
//! take it. Sub-indices carry their own locks, entered only while holding
//! this one, matching the lock hierarchy in spec.md §5.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{info, instrument, warn};

use crate::classify;
use crate::error::{Result, StorageError};
use crate::hash;

use super::{
    append_ndjson, metadata_index::FileRecord, validate_category, MetadataIndex, ReferenceIndex,
    VersionIndex,
};

pub struct StoreOutcome {
    pub record: FileRecord,
    pub duplicate: bool,
}

pub struct StorageManager {
    data_root: PathBuf,
    metadata: MetadataIndex,
    references: ReferenceIndex,
    versions: VersionIndex,
    lock: Mutex<()>,
    pub max_upload_bytes: u64,
    pub max_versions: u32,
}

#[derive(Serialize)]
struct MoveLogEntry<'a> {
    hash: &'a str,
    from: &'a str,
    to: &'a str,
    duration_ms: u128,
    reason: Option<&'a str>,
    timestamp: chrono::DateTime<Utc>,
}

#[derive(Serialize)]
struct CopyLogEntry<'a> {
    source_hash: &'a str,
    new_hash: &'a str,
    hard_link: bool,
    timestamp: chrono::DateTime<Utc>,
}

#[derive(Serialize)]
struct AuditEntry<'a> {
    op: &'a str,
    hash: &'a str,
    timestamp: chrono::DateTime<Utc>,
}

impl StorageManager {
    pub fn open(data_root: impl Into<PathBuf>, max_upload_bytes: u64, max_versions: u32) -> Result<Self> {
        let data_root = data_root.into();
        fs::create_dir_all(&data_root).map_err(|e| StorageError::io(data_root.display().to_string(), e))?;
        let metadata_dir = data_root.join("metadata");
        Ok(Self {
            metadata: MetadataIndex::open(metadata_dir.join("index.json"))?,
            references: ReferenceIndex::open(metadata_dir.join("references.json"))?,
            versions: VersionIndex::open(metadata_dir.join("versions.json"))?,
            data_root,
            lock: Mutex::new(()),
            max_upload_bytes,
            max_versions,
        })
    }

    pub fn metadata(&self) -> &MetadataIndex {
        &self.metadata
    }

    pub fn references(&self) -> &ReferenceIndex {
        &self.references
    }

    pub fn versions(&self) -> &VersionIndex {
        &self.versions
    }

    fn abs(&self, relative: &str) -> PathBuf {
        self.data_root.join(relative)
    }

    fn move_log_path(&self) -> PathBuf {
        self.data_root.join("metadata").join("move_log.ndjson")
    }
    fn copy_log_path(&self) -> PathBuf {
        self.data_root.join("metadata").join("copy_log.ndjson")
    }
    fn audit_log_path(&self) -> PathBuf {
        self.data_root.join("metadata").join("audit_log.ndjson")
    }

    /// Stream `reader` through the Hasher into a temp file under the data
    /// root, enforcing `max_upload_bytes`. Returns the temp path and the
    /// computed hash. Any error or over-size input removes the temp file.
    fn stage_upload<R: Read>(&self, mut reader: R, declared_size: u64) -> Result<(PathBuf, String, u64)> {
        if declared_size > self.max_upload_bytes {
            return Err(StorageError::PayloadTooLarge {
                size: declared_size,
                limit: self.max_upload_bytes,
            }
            .into());
        }

        let tmp_dir = self.data_root.join("tmp");
        fs::create_dir_all(&tmp_dir).map_err(|e| StorageError::io(tmp_dir.display().to_string(), e))?;
        let tmp_path = tmp_dir.join(format!("upload-{}.tmp", uuid::Uuid::new_v4()));

        let mut file =
            fs::File::create(&tmp_path).map_err(|e| StorageError::io(tmp_path.display().to_string(), e))?;

        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        let mut total: u64 = 0;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    let _ = fs::remove_file(&tmp_path);
                    return Err(StorageError::io("upload stream", e).into());
                }
            };
            total += n as u64;
            if total > self.max_upload_bytes {
                let _ = fs::remove_file(&tmp_path);
                return Err(StorageError::PayloadTooLarge {
                    size: total,
                    limit: self.max_upload_bytes,
                }
                .into());
            }
            hasher.update(&buf[..n]);
            use std::io::Write;
            if let Err(e) = file.write_all(&buf[..n]) {
                let _ = fs::remove_file(&tmp_path);
                return Err(StorageError::io(tmp_path.display().to_string(), e).into());
            }
        }
        let digest = hex::encode(hasher.finalize());
        Ok((tmp_path, digest, total))
    }

    fn sanitized_stem(filename: &str) -> String {
        let stem = Path::new(filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("file");
        let cleaned: String = stem
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        if cleaned.is_empty() {
            "file".to_string()
        } else {
            cleaned
        }
    }

    fn extension(filename: &str) -> String {
        Path::new(filename)
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase())
            .unwrap_or_default()
    }

    fn target_relative_path(&self, category: &str, hash: &str, filename: &str) -> String {
        let stem = Self::sanitized_stem(filename);
        let ext = Self::extension(filename);
        let hash12 = &hash[..12.min(hash.len())];
        let name = if ext.is_empty() {
            format!("{hash12}_{stem}")
        } else {
            format!("{hash12}_{stem}.{ext}")
        };
        format!("{category}/{name}")
    }

    /// StoreFile: dedup-checked, hash-on-write ingestion.
    #[instrument(skip(self, reader, metadata), fields(filename = %filename))]
    pub fn store_file<R: Read>(
        &self,
        reader: R,
        filename: &str,
        mime: &str,
        size: u64,
        metadata: Option<HashMap<String, String>>,
        category_hint: Option<&str>,
    ) -> Result<StoreOutcome> {
        let (tmp_path, digest, actual_size) = self.stage_upload(reader, size)?;

        let _guard = self.lock.lock().unwrap();

        if let Some(existing) = self.metadata.find_by_hash(&digest) {
            let _ = fs::remove_file(&tmp_path);
            return Ok(StoreOutcome {
                record: existing,
                duplicate: true,
            });
        }

        let category = classify::category(mime, filename, category_hint);
        let relative_path = self.target_relative_path(category.as_str(), &digest, filename);
        let abs_path = self.abs(&relative_path);

        if let Some(parent) = abs_path.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(parent.display().to_string(), e))?;
        }

        if let Err(e) = fs::rename(&tmp_path, &abs_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(StorageError::io(abs_path.display().to_string(), e).into());
        }

        let record = FileRecord {
            hash: digest.clone(),
            content_hash: digest.clone(),
            original_name: filename.to_string(),
            stored_path: relative_path.clone(),
            category: category.as_str().to_string(),
            mime: mime.to_string(),
            size: actual_size,
            uploaded_at: Utc::now(),
            metadata: metadata.unwrap_or_default(),
        };

        if let Err(e) = self.metadata.add(record.clone()) {
            // Best-effort cleanup: the rename already landed, roll it back.
            let _ = fs::remove_file(&abs_path);
            return Err(e);
        }
        if let Err(e) = self.references.add_reference(&relative_path, &digest) {
            warn!(error = %e, "failed to register reference for new store");
        }

        self.append_audit("store", &digest)?;
        info!(hash = %digest, path = %relative_path, "stored file");

        Ok(StoreOutcome {
            record,
            duplicate: false,
        })
    }

    /// MoveFile: category must validate; a no-op if already in that
    /// category (record still normalises). Full rollback on any failure
    /// after the rename.
    #[instrument(skip(self))]
    pub fn move_file(&self, hash: &str, new_category: &str, reason: Option<&str>) -> Result<(FileRecord, bool)> {
        validate_category(new_category)?;
        let _guard = self.lock.lock().unwrap();

        let record = self
            .metadata
            .find_by_hash(hash)
            .ok_or_else(|| StorageError::FileNotFound(hash.to_string()))?;

        if record.category == new_category {
            let mut normalised = record.clone();
            normalised.category = new_category.to_string();
            self.metadata.replace(normalised.clone())?;
            return Ok((normalised, false));
        }

        let start = Instant::now();
        let filename = Path::new(&record.stored_path)
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(&record.original_name)
            .to_string();
        let new_relative = format!("{new_category}/{filename}");

        if self.metadata.find_by_stored_path(&new_relative).is_some() {
            return Err(StorageError::CategoryConflict(new_relative).into());
        }

        let old_abs = self.abs(&record.stored_path);
        let new_abs = self.abs(&new_relative);
        if let Some(parent) = new_abs.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(parent.display().to_string(), e))?;
        }

        if let Err(e) = fs::rename(&old_abs, &new_abs) {
            return Err(StorageError::MoveFailed {
                reason: format!("rename {} -> {}: {e}", old_abs.display(), new_abs.display()),
            }
            .into());
        }

        let mut updated = record.clone();
        updated.category = new_category.to_string();
        updated.stored_path = new_relative.clone();

        if let Err(e) = self.metadata.replace(updated.clone()) {
            // Rollback: rename back, restore previous record (already present, so just undo the move).
            let _ = fs::rename(&new_abs, &old_abs);
            return Err(e);
        }

        let refs = self.references.get_references(&record.stored_path);
        let _ = self.references.remove_reference(&record.stored_path, hash);
        for h in refs.iter().filter(|h| h.as_str() != hash) {
            let _ = self.references.remove_reference(&record.stored_path, h);
            let _ = self.references.add_reference(&new_relative, h);
        }
        let _ = self.references.add_reference(&new_relative, hash);

        self.append_move_log(hash, &record.stored_path, &new_relative, start.elapsed().as_millis(), reason)?;
        Ok((updated, true))
    }

    /// CopyFile: `hard_link=false` duplicates bytes under a fresh
    /// content-independent id; `hard_link=true` registers a second record
    /// against the same physical file (no byte copy).
    #[instrument(skip(self, metadata))]
    pub fn copy_file(
        &self,
        hash: &str,
        new_name: Option<&str>,
        new_category: Option<&str>,
        metadata: Option<HashMap<String, String>>,
        hard_link: bool,
    ) -> Result<FileRecord> {
        let _guard = self.lock.lock().unwrap();

        let source = self
            .metadata
            .find_by_hash(hash)
            .ok_or_else(|| StorageError::FileNotFound(hash.to_string()))?;

        let category = new_category.unwrap_or(&source.category).to_string();
        validate_category(&category)?;
        let name = new_name.unwrap_or(&source.original_name).to_string();

        let now_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let new_id = hash::derive_copy_id(hash, &name, now_ns);

        let new_relative = self.target_relative_path(&category, &new_id, &name);
        if self.metadata.find_by_stored_path(&new_relative).is_some() {
            return Err(StorageError::CopyConflict(new_relative).into());
        }
        let new_abs = self.abs(&new_relative);
        if let Some(parent) = new_abs.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(parent.display().to_string(), e))?;
        }

        let physical_path = if hard_link {
            source.stored_path.clone()
        } else {
            let source_abs = self.abs(&source.stored_path);
            fs::copy(&source_abs, &new_abs).map_err(|e| StorageError::io(new_abs.display().to_string(), e))?;
            new_relative.clone()
        };

        let record = FileRecord {
            hash: new_id.clone(),
            content_hash: source.content_hash.clone(),
            original_name: name,
            stored_path: physical_path.clone(),
            category,
            mime: source.mime.clone(),
            size: source.size,
            uploaded_at: Utc::now(),
            metadata: metadata.unwrap_or_default(),
        };

        if let Err(e) = self.metadata.add(record.clone()) {
            if !hard_link {
                let _ = fs::remove_file(&new_abs);
            }
            return Err(e);
        }
        self.references.add_reference(&physical_path, &new_id)?;
        if hard_link {
            self.references.add_reference(&physical_path, hash)?;
        }

        self.append_copy_log(hash, &new_id, hard_link)?;
        Ok(record)
    }

    /// CreateVersion: hash and store new bytes under a versioned path, then
    /// append to the chain (creating it on first call for this id).
    #[instrument(skip(self, reader))]
    pub fn create_version<R: Read>(
        &self,
        file_id: &str,
        reader: R,
        filename: &str,
        mime: &str,
        size: u64,
        comment: &str,
        uploaded_by: &str,
    ) -> Result<super::version_index::VersionEntry> {
        let (tmp_path, digest, actual_size) = self.stage_upload(reader, size)?;

        let _guard = self.lock.lock().unwrap();

        let relative_path = format!("versions/{file_id}/{digest}_{filename}");
        let abs_path = self.abs(&relative_path);
        if let Some(parent) = abs_path.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(parent.display().to_string(), e))?;
        }
        if let Err(e) = fs::rename(&tmp_path, &abs_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(StorageError::io(abs_path.display().to_string(), e).into());
        }

        let has_chain = self.versions.list_versions(file_id).len() > 0;
        let result = if has_chain {
            self.versions
                .add_version(file_id, &digest, actual_size, uploaded_by, comment, self.max_versions)
        } else {
            self.versions.create_chain(file_id, &digest, actual_size, uploaded_by, comment)
                .map(|chain| chain.entries[0].clone())
        };

        match result {
            Ok(entry) => {
                let _ = mime; // mime retained on the record level, not the version entry
                Ok(entry)
            }
            Err(e) => {
                let _ = fs::remove_file(&abs_path);
                Err(e)
            }
        }
    }

    /// DeleteFile: drop the record; remove the physical file once its
    /// reference count hits zero.
    #[instrument(skip(self))]
    pub fn delete_file(&self, hash: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap();

        let record = self
            .metadata
            .find_by_hash(hash)
            .ok_or_else(|| StorageError::FileNotFound(hash.to_string()))?;

        self.metadata.delete(hash)?;
        self.references.remove_reference(&record.stored_path, hash)?;

        if self.references.get_reference_count(&record.stored_path) == 0 {
            let abs_path = self.abs(&record.stored_path);
            if abs_path.exists() {
                fs::remove_file(&abs_path).map_err(|e| StorageError::io(abs_path.display().to_string(), e))?;
            }
        }

        self.append_audit("delete", hash)?;
        Ok(())
    }

    /// VerifyStore: maintenance sweep. Checks that every live record's
    /// physical file exists, finds physical files with no referencing
    /// record, and optionally re-hashes content to catch silent corruption.
    pub fn verify_store(&self, rehash: bool) -> Result<VerifyReport> {
        let mut missing = Vec::new();
        let mut mismatched = Vec::new();

        let records = self.metadata.all();
        let mut known_paths = std::collections::HashSet::new();
        for record in &records {
            known_paths.insert(record.stored_path.clone());
            let abs_path = self.abs(&record.stored_path);
            if !abs_path.exists() {
                missing.push(record.stored_path.clone());
                continue;
            }
            if rehash {
                if let Ok(file) = fs::File::open(&abs_path) {
                    if let Ok(digest) = hash::hash_reader(file) {
                        if digest != record.content_hash {
                            mismatched.push(record.stored_path.clone());
                        }
                    }
                }
            }
        }

        let mut orphans = Vec::new();
        for category_dir in ["images", "videos", "audio", "documents", "spreadsheets", "presentations", "archives", "code", "json", "other"] {
            let dir = self.data_root.join(category_dir);
            if !dir.exists() {
                continue;
            }
            for entry in walk_files(&dir) {
                let relative = entry
                    .strip_prefix(&self.data_root)
                    .unwrap_or(&entry)
                    .to_string_lossy()
                    .replace('\\', "/");
                if !known_paths.contains(&relative) {
                    orphans.push(relative);
                }
            }
        }

        Ok(VerifyReport {
            total_records: records.len(),
            missing_files: missing,
            orphan_files: orphans,
            hash_mismatches: mismatched,
        })
    }

    fn append_move_log(&self, hash: &str, from: &str, to: &str, duration_ms: u128, reason: Option<&str>) -> Result<()> {
        append_ndjson(
            &self.move_log_path(),
            &MoveLogEntry {
                hash,
                from,
                to,
                duration_ms,
                reason,
                timestamp: Utc::now(),
            },
        )
    }

    fn append_copy_log(&self, source_hash: &str, new_hash: &str, hard_link: bool) -> Result<()> {
        append_ndjson(
            &self.copy_log_path(),
            &CopyLogEntry {
                source_hash,
                new_hash,
                hard_link,
                timestamp: Utc::now(),
            },
        )
    }

    fn append_audit(&self, op: &str, hash: &str) -> Result<()> {
        append_ndjson(
            &self.audit_log_path(),
            &AuditEntry {
                op,
                hash,
                timestamp: Utc::now(),
            },
        )
    }
}

#[derive(Debug, Serialize)]
pub struct VerifyReport {
    pub total_records: usize,
    pub missing_files: Vec<String>,
    pub orphan_files: Vec<String>,
    pub hash_mismatches: Vec<String>,
}

fn walk_files(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return out;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            out.extend(walk_files(&path));
        } else {
            out.push(path);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn manager() -> (tempfile::TempDir, StorageManager) {
        let dir = tempfile::tempdir().unwrap();
        let mgr = StorageManager::open(dir.path(), 10 * 1024 * 1024, 5).unwrap();
        (dir, mgr)
    }

    #[test]
    fn store_then_restore_is_idempotent() {
        let (_dir, mgr) = manager();
        let first = mgr
            .store_file(Cursor::new(b"hello"), "hello.txt", "text/plain", 5, None, None)
            .unwrap();
        assert!(!first.duplicate);

        let second = mgr
            .store_file(Cursor::new(b"hello"), "hello.txt", "text/plain", 5, None, None)
            .unwrap();
        assert!(second.duplicate);
        assert_eq!(first.record.hash, second.record.hash);
        assert_eq!(mgr.metadata().len(), 1);
    }

    #[test]
    fn oversize_upload_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = StorageManager::open(dir.path(), 4, 5).unwrap();
        let err = mgr.store_file(Cursor::new(b"hello"), "hello.txt", "text/plain", 5, None, None);
        assert!(err.is_err());
    }

    #[test]
    fn move_to_own_category_is_noop() {
        let (_dir, mgr) = manager();
        let stored = mgr
            .store_file(Cursor::new(b"hello"), "hello.txt", "text/plain", 5, None, None)
            .unwrap();
        let (_record, moved) = mgr.move_file(&stored.record.hash, "documents", None).unwrap();
        assert!(!moved);
    }

    #[test]
    fn move_then_file_relocated() {
        let (_dir, mgr) = manager();
        let stored = mgr
            .store_file(Cursor::new(b"hello"), "hello.txt", "text/plain", 5, None, None)
            .unwrap();
        let (record, moved) = mgr.move_file(&stored.record.hash, "archives", None).unwrap();
        assert!(moved);
        assert_eq!(record.category, "archives");
        assert!(record.stored_path.starts_with("archives/"));
    }

    #[test]
    fn hard_link_copy_shares_reference_count() {
        let (_dir, mgr) = manager();
        let stored = mgr
            .store_file(Cursor::new(b"hello"), "hello.txt", "text/plain", 5, None, None)
            .unwrap();
        let copy = mgr
            .copy_file(&stored.record.hash, Some("hello-copy.txt"), None, None, true)
            .unwrap();
        assert_ne!(copy.hash, stored.record.hash);
        assert_eq!(mgr.references().get_reference_count(&stored.record.stored_path), 2);
    }

    #[test]
    fn full_copy_creates_new_physical_file() {
        let (_dir, mgr) = manager();
        let stored = mgr
            .store_file(Cursor::new(b"hello"), "hello.txt", "text/plain", 5, None, None)
            .unwrap();
        let copy = mgr
            .copy_file(&stored.record.hash, Some("hello-copy.txt"), None, None, false)
            .unwrap();
        assert_ne!(copy.stored_path, stored.record.stored_path);
    }

    #[test]
    fn delete_removes_physical_file_when_last_reference() {
        let (dir, mgr) = manager();
        let stored = mgr
            .store_file(Cursor::new(b"hello"), "hello.txt", "text/plain", 5, None, None)
            .unwrap();
        let abs_path = dir.path().join(&stored.record.stored_path);
        assert!(abs_path.exists());
        mgr.delete_file(&stored.record.hash).unwrap();
        assert!(!abs_path.exists());
        assert!(mgr.metadata().find_by_hash(&stored.record.hash).is_none());
    }

    #[test]
    fn verify_store_reports_no_issues_on_clean_store() {
        let (_dir, mgr) = manager();
        mgr.store_file(Cursor::new(b"hello"), "hello.txt", "text/plain", 5, None, None)
            .unwrap();
        let report = mgr.verify_store(true).unwrap();
        assert!(report.missing_files.is_empty());
        assert!(report.orphan_files.is_empty());
    }
}
