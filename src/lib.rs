//! RhinoBox: content-addressed ingestion and storage service.
//!
//! `service` wires the standalone components (storage, cache, json,
//! jobs) into the single process described by the external interface —
//! one data directory, one set of components, a handful of ingest
//! operations plus a liveness probe.

pub mod cache;
pub mod classify;
pub mod config;
pub mod error;
pub mod hash;
pub mod jobs;
pub mod json;
pub mod storage;

mod service;

pub use service::{IngestJsonOutcome, MediaIngestItem, RhinoService};
