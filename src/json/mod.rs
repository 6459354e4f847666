//! JSON schema analysis and storage routing (C9/C10). `analyzer` walks a
//! bounded sample of documents into a flat field model; `decision` scores
//! the resulting summary to pick a relational or document destination.

mod analyzer;
mod decision;

pub use analyzer::{AnalyzeStructure, BuildSummary, FieldSummary, FieldType, JsonAnalyzer};
pub use decision::{Decision, DecisionEngine};

use serde_json::Value;

use crate::error::{JsonError, Result};
use crate::hash::hash_bytes;

/// Parses a batch of raw JSON document strings, reporting the failing index
/// on the first parse error rather than aborting silently.
pub fn parse_batch(raw: &[String]) -> Result<Vec<Value>> {
    if raw.is_empty() {
        return Err(JsonError::EmptyBatch.into());
    }
    raw.iter()
        .enumerate()
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|e| JsonError::Unparsable { index, source: e }.into())
        })
        .collect()
}

/// Digest of the parsed-then-reserialized value. `serde_json::Map` sorts
/// keys by default, so two structurally equal values with differently
/// ordered object fields hash identically.
pub fn schema_hash(value: &Value) -> Result<String> {
    let canonical = serde_json::to_vec(value).map_err(|e| JsonError::Unparsable { index: 0, source: e })?;
    Ok(hash_bytes(&canonical))
}
