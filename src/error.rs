//! Crate-wide error taxonomy.
//!
//! Each subsystem gets its own `thiserror` enum so callers can match on the
//! condition that actually occurred; `RhinoError` wraps them all for code
//! that just wants to propagate with `?`.

use thiserror::Error;

pub type Result<T, E = RhinoError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum RhinoError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Json(#[from] JsonError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the content-addressed storage manager and its indices.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("file not found for hash {0}")]
    FileNotFound(String),

    #[error("version {version} not found for file {file_id}")]
    VersionNotFound { file_id: String, version: u32 },

    #[error("invalid category: {0}")]
    InvalidCategory(String),

    #[error("stored path already in use: {0}")]
    CategoryConflict(String),

    #[error("copy conflict: {0}")]
    CopyConflict(String),

    #[error("move failed: {reason}")]
    MoveFailed { reason: String },

    #[error("version limit reached ({max} versions)")]
    VersionLimit { max: u32 },

    #[error("record with hash {0} already exists")]
    DuplicateRecord(String),

    #[error("upload of {size} bytes exceeds the {limit} byte ceiling")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("metadata persistence failed: {0}")]
    Persistence(String),
}

impl StorageError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised by the tiered cache. Callers generally treat these as
/// advisory: a cache read failure manifests as a miss, a write failure is
/// logged and swallowed, per spec.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("L3 store error: {0}")]
    Store(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Errors raised by the JSON analyzer / decision engine.
#[derive(Debug, Error)]
pub enum JsonError {
    #[error("empty document set")]
    EmptyBatch,

    #[error("unparsable JSON at document {index}: {source}")]
    Unparsable {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised by the worker pool / job queue.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job {0} not found")]
    NotFound(String),

    #[error("job queue is shutting down")]
    ShuttingDown,

    #[error("item processor failed: {0}")]
    ProcessorFailed(String),

    #[error("job persistence failed: {0}")]
    Persistence(String),
}
