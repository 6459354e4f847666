//! Structural descent over `serde_json::Value`, following the sum-type
//! walk idiom (object/array/scalar match arms, no runtime type
//! introspection) rather than the JSON value itself carrying behaviour.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use crate::error::Result;
use crate::hash::hash_bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Null,
    Bool,
    Integer,
    Float,
    String,
    Array,
    Object,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldType::Null => "null",
            FieldType::Bool => "bool",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::String => "string",
            FieldType::Array => "array",
            FieldType::Object => "object",
        };
        f.write_str(s)
    }
}

fn number_type(n: &serde_json::Number) -> FieldType {
    if n.is_i64() || n.is_u64() {
        FieldType::Integer
    } else {
        FieldType::Float
    }
}

#[derive(Default)]
struct FieldAccumulator {
    type_counts: HashMap<FieldType, usize>,
    present_in_docs: usize,
    null_count: usize,
    max_length: usize,
}

impl FieldAccumulator {
    fn observe(&mut self, ty: FieldType, string_len: Option<usize>) {
        *self.type_counts.entry(ty).or_insert(0) += 1;
        if ty == FieldType::Null {
            self.null_count += 1;
        }
        if let Some(len) = string_len {
            self.max_length = self.max_length.max(len);
        }
    }

    fn dominant(&self) -> FieldType {
        self.type_counts
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(ty, _)| *ty)
            .unwrap_or(FieldType::Null)
    }

    fn dominant_count(&self) -> usize {
        self.type_counts.values().copied().max().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSummary {
    pub dominant_type: FieldType,
    pub type_share: f64,
    pub presence: f64,
    pub null_fraction: f64,
    pub max_length: usize,
    pub looks_like_fk: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSummary {
    pub documents_analyzed: usize,
    pub total_fields: usize,
    pub top_level_fields: usize,
    pub max_depth: usize,
    pub field_stability: f64,
    pub type_stability: f64,
    pub has_array_of_objects: bool,
    pub structure_hash: String,
    pub fields: BTreeMap<String, FieldSummary>,
    /// field-set (sorted top-level paths) observed per document, used by
    /// `AnalyzeStructure` to compute schema consistency.
    #[serde(skip)]
    field_sets: Vec<BTreeSet<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeStructure {
    pub has_foreign_keys: bool,
    pub has_relationships: bool,
    pub requires_joins: bool,
    pub schema_consistency: f64,
    pub max_nesting_depth: usize,
    pub unique_field_sets: usize,
    pub record_count: usize,
    pub expected_write_load: String,
    pub field_count: usize,
}

pub struct JsonAnalyzer {
    pub max_documents: usize,
    pub max_depth: usize,
}

impl Default for JsonAnalyzer {
    fn default() -> Self {
        Self {
            max_documents: 10_000,
            max_depth: 8,
        }
    }
}

fn looks_like_fk(path: &str) -> bool {
    let leaf = path
        .trim_end_matches("[]")
        .rsplit('.')
        .next()
        .unwrap_or(path)
        .to_lowercase();
    leaf.ends_with("_id") || leaf.ends_with("_key") || leaf.contains("id")
}

impl JsonAnalyzer {
    pub fn new(max_documents: usize, max_depth: usize) -> Self {
        Self {
            max_documents,
            max_depth,
        }
    }

    pub fn build_summary(&self, docs: &[Value]) -> Result<BuildSummary> {
        if docs.is_empty() {
            return Err(crate::error::JsonError::EmptyBatch.into());
        }
        let sample = &docs[..docs.len().min(self.max_documents)];
        let mut accumulators: BTreeMap<String, FieldAccumulator> = BTreeMap::new();
        let mut depths: BTreeMap<String, usize> = BTreeMap::new();
        let mut has_array_of_objects = false;
        let mut observed_max_depth = 0usize;
        let mut field_sets = Vec::with_capacity(sample.len());

        for doc in sample {
            let mut seen_this_doc: BTreeSet<String> = BTreeSet::new();
            if let Value::Object(map) = doc {
                for (key, value) in map {
                    walk(
                        value,
                        key.clone(),
                        1,
                        self.max_depth,
                        &mut accumulators,
                        &mut depths,
                        &mut has_array_of_objects,
                        &mut observed_max_depth,
                        &mut seen_this_doc,
                    );
                }
            }
            field_sets.push(seen_this_doc);
        }

        let documents_analyzed = sample.len();
        let mut fields = BTreeMap::new();
        let mut field_stability_sum = 0.0;
        let mut type_stability_sum = 0.0;

        for (path, acc) in &accumulators {
            let presence = if documents_analyzed == 0 {
                0.0
            } else {
                acc.present_in_docs as f64 / documents_analyzed as f64
            };
            let type_share = if acc.present_in_docs == 0 {
                0.0
            } else {
                acc.dominant_count() as f64 / acc.present_in_docs as f64
            };
            let null_fraction = if documents_analyzed == 0 {
                0.0
            } else {
                acc.null_count as f64 / documents_analyzed as f64
            };
            field_stability_sum += presence;
            type_stability_sum += type_share;
            fields.insert(
                path.clone(),
                FieldSummary {
                    dominant_type: acc.dominant(),
                    type_share,
                    presence,
                    null_fraction,
                    max_length: acc.max_length,
                    looks_like_fk: looks_like_fk(path),
                },
            );
        }

        let total_fields = fields.len();
        let field_stability = if total_fields == 0 {
            0.0
        } else {
            field_stability_sum / total_fields as f64
        };
        let type_stability = if total_fields == 0 {
            0.0
        } else {
            type_stability_sum / total_fields as f64
        };
        let top_level_fields = fields.keys().filter(|p| !p.contains('.') && !p.contains('[')).count();

        let mut fingerprint: Vec<(&String, FieldType)> =
            fields.iter().map(|(p, f)| (p, f.dominant_type)).collect();
        fingerprint.sort_by(|a, b| a.0.cmp(b.0));
        let fingerprint_text: String = fingerprint
            .iter()
            .map(|(path, ty)| format!("{path}:{ty}"))
            .collect::<Vec<_>>()
            .join("|");
        let structure_hash = hash_bytes(fingerprint_text.as_bytes());

        Ok(BuildSummary {
            documents_analyzed,
            total_fields,
            top_level_fields,
            max_depth: observed_max_depth,
            field_stability,
            type_stability,
            has_array_of_objects,
            structure_hash,
            fields,
            field_sets,
        })
    }

    pub fn analyze_structure(&self, summary: &BuildSummary) -> AnalyzeStructure {
        let record_count = summary.documents_analyzed;
        let fk_fields: Vec<&String> = summary
            .fields
            .iter()
            .filter(|(_, f)| f.looks_like_fk && f.presence > 0.0)
            .map(|(p, _)| p)
            .collect();
        let has_foreign_keys = !fk_fields.is_empty();

        let mut frequency: HashMap<&BTreeSet<String>, usize> = HashMap::new();
        for set in &summary.field_sets {
            *frequency.entry(set).or_insert(0) += 1;
        }
        let unique_field_sets = frequency.len();
        let modal_count = frequency.values().copied().max().unwrap_or(0);
        let schema_consistency = if record_count == 0 {
            1.0
        } else {
            modal_count as f64 / record_count as f64
        };

        let expected_write_load = if record_count > 10_000 {
            "high".to_string()
        } else {
            "normal".to_string()
        };

        AnalyzeStructure {
            has_foreign_keys,
            has_relationships: has_foreign_keys,
            requires_joins: fk_fields.len() >= 2,
            schema_consistency,
            max_nesting_depth: summary.max_depth,
            unique_field_sets,
            record_count,
            expected_write_load,
            field_count: summary.top_level_fields,
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn walk(
    value: &Value,
    path: String,
    depth: usize,
    max_depth: usize,
    accumulators: &mut BTreeMap<String, FieldAccumulator>,
    depths: &mut BTreeMap<String, usize>,
    has_array_of_objects: &mut bool,
    observed_max_depth: &mut usize,
    seen_this_doc: &mut BTreeSet<String>,
) {
    if depth > max_depth {
        return;
    }
    *observed_max_depth = (*observed_max_depth).max(depth);
    depths.insert(path.clone(), depth);

    match value {
        Value::Object(map) => {
            record(
                accumulators,
                seen_this_doc,
                &path,
                FieldType::Object,
                None,
            );
            for (key, child) in map {
                walk(
                    child,
                    format!("{path}.{key}"),
                    depth + 1,
                    max_depth,
                    accumulators,
                    depths,
                    has_array_of_objects,
                    observed_max_depth,
                    seen_this_doc,
                );
            }
        }
        Value::Array(items) => {
            record(accumulators, seen_this_doc, &path, FieldType::Array, None);
            if let Some(first) = items.first() {
                if first.is_object() {
                    *has_array_of_objects = true;
                }
                walk(
                    first,
                    format!("{path}[]"),
                    depth + 1,
                    max_depth,
                    accumulators,
                    depths,
                    has_array_of_objects,
                    observed_max_depth,
                    seen_this_doc,
                );
            }
        }
        Value::Null => record(accumulators, seen_this_doc, &path, FieldType::Null, None),
        Value::Bool(_) => record(accumulators, seen_this_doc, &path, FieldType::Bool, None),
        Value::Number(n) => record(accumulators, seen_this_doc, &path, number_type(n), None),
        Value::String(s) => record(
            accumulators,
            seen_this_doc,
            &path,
            FieldType::String,
            Some(s.chars().count()),
        ),
    }
}

fn record(
    accumulators: &mut BTreeMap<String, FieldAccumulator>,
    seen_this_doc: &mut BTreeSet<String>,
    path: &str,
    ty: FieldType,
    string_len: Option<usize>,
) {
    let acc = accumulators.entry(path.to_string()).or_default();
    acc.observe(ty, string_len);
    if seen_this_doc.insert(path.to_string()) {
        acc.present_in_docs += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flattens_nested_objects_and_arrays() {
        let docs = vec![
            json!({"id": 1, "user_id": 10, "amount": 100}),
            json!({"id": 2, "user_id": 11, "amount": 200}),
        ];
        let analyzer = JsonAnalyzer::default();
        let summary = analyzer.build_summary(&docs).unwrap();
        assert_eq!(summary.documents_analyzed, 2);
        assert!(summary.fields.contains_key("user_id"));
        assert_eq!(summary.fields["id"].presence, 1.0);

        let structure = analyzer.analyze_structure(&summary);
        assert!(structure.has_foreign_keys);
    }

    #[test]
    fn disjoint_field_sets_reduce_consistency() {
        let docs = vec![
            json!({"name": "John", "age": 30}),
            json!({"name": "Jane", "city": "NYC", "hobbies": ["reading"]}),
        ];
        let analyzer = JsonAnalyzer::default();
        let summary = analyzer.build_summary(&docs).unwrap();
        let structure = analyzer.analyze_structure(&summary);
        assert_eq!(structure.unique_field_sets, 2);
        assert!(structure.schema_consistency < 1.0);
        assert!(summary.has_array_of_objects == false);
    }

    #[test]
    fn array_of_objects_flattens_first_element() {
        let docs = vec![json!({"items": [{"sku": "A1", "qty": 2}]})];
        let analyzer = JsonAnalyzer::default();
        let summary = analyzer.build_summary(&docs).unwrap();
        assert!(summary.has_array_of_objects);
        assert!(summary.fields.contains_key("items[].sku"));
    }

    #[test]
    fn structure_hash_stable_across_key_order() {
        let docs_a = vec![json!({"a": 1, "b": "x"})];
        let docs_b = vec![json!({"b": "x", "a": 1})];
        let analyzer = JsonAnalyzer::default();
        let hash_a = analyzer.build_summary(&docs_a).unwrap().structure_hash;
        let hash_b = analyzer.build_summary(&docs_b).unwrap().structure_hash;
        assert_eq!(hash_a, hash_b);
    }
}
