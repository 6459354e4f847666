//! Additive scoring engine that routes a JSON batch to a relational or
//! document destination and emits the matching DDL / index suggestions.

use serde::{Deserialize, Serialize};

use super::analyzer::{AnalyzeStructure, BuildSummary, FieldType};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub engine: String,
    pub reason: String,
    pub confidence: f64,
    pub table: String,
    pub ddl: Option<String>,
    pub columns: Option<Vec<String>>,
    pub indexes: Option<Vec<String>>,
    pub schema_hash: String,
    pub summary: BuildSummary,
    pub analysis: AnalyzeStructure,
}

pub struct DecisionEngine;

impl DecisionEngine {
    pub fn decide(
        namespace: &str,
        summary: &BuildSummary,
        analysis: &AnalyzeStructure,
        schema_hash: String,
    ) -> Decision {
        let table = sanitize_identifier(namespace);
        let score = Self::score(analysis);
        let document_override = Self::prefers_document(summary, analysis);

        if document_override {
            let indexes = suggested_indexes(summary);
            Decision {
                engine: "document".to_string(),
                reason: format!("structural override triggered (score {score:.2})"),
                confidence: confidence_from_score(-score.abs().max(1.0)),
                table,
                ddl: None,
                columns: None,
                indexes: Some(indexes),
                schema_hash,
                summary: summary.clone(),
                analysis: analysis.clone(),
            }
        } else {
            let (ddl, columns) = build_ddl(&table, summary);
            Decision {
                engine: "relational".to_string(),
                reason: format!("additive score {score:.2} favors relational"),
                confidence: confidence_from_score(score),
                table,
                ddl: Some(ddl),
                columns: Some(columns),
                indexes: None,
                schema_hash,
                summary: summary.clone(),
                analysis: analysis.clone(),
            }
        }
    }

    fn score(analysis: &AnalyzeStructure) -> f64 {
        let mut score = 0.0;
        if analysis.has_foreign_keys || analysis.has_relationships {
            score += 1.0;
        }
        if analysis.requires_joins {
            score += 1.0;
        }
        if analysis.schema_consistency > 0.8 {
            score += 0.5;
        } else if analysis.schema_consistency > 0.7 {
            score += 0.3;
        }
        if analysis.max_nesting_depth <= 2 {
            score += 0.3;
        }
        let simple_and_consistent = analysis.schema_consistency > 0.8
            && (1..=50).contains(&analysis.field_count);
        if simple_and_consistent {
            score += 0.2;
        }
        if analysis.max_nesting_depth > 3 {
            score -= 1.0;
        }
        if analysis.schema_consistency < 0.5 {
            score -= 1.0;
        }
        if analysis.record_count > 0
            && analysis.unique_field_sets as f64 / analysis.record_count as f64 > 0.3
        {
            score -= 0.8;
        }
        if analysis.expected_write_load == "high" {
            score -= 0.5;
        }
        score
    }

    fn prefers_document(summary: &BuildSummary, analysis: &AnalyzeStructure) -> bool {
        if analysis.max_nesting_depth > 3 {
            return true;
        }
        if analysis.schema_consistency < 0.5 {
            return true;
        }
        if analysis.record_count >= 2
            && analysis.unique_field_sets as f64 / analysis.record_count as f64 > 0.5
        {
            return true;
        }
        if analysis.record_count == 2 && pairwise_disjoint(summary) {
            return true;
        }
        if analysis.schema_consistency < 0.6 && analysis.max_nesting_depth > 2 {
            return true;
        }
        false
    }
}

fn pairwise_disjoint(summary: &BuildSummary) -> bool {
    if summary.field_sets.len() != 2 {
        return false;
    }
    summary.field_sets[0].is_disjoint(&summary.field_sets[1])
}

fn confidence_from_score(score: f64) -> f64 {
    (0.5 + score / 6.0).clamp(0.0, 1.0)
}

fn build_ddl(table: &str, summary: &BuildSummary) -> (String, Vec<String>) {
    let mut columns = Vec::new();
    let mut column_defs = Vec::new();

    for (path, field) in &summary.fields {
        if path.contains('.') || path.contains('[') {
            continue;
        }
        let column = sanitize_identifier(path);
        let sql_type = sql_type_for(field.dominant_type, field.max_length);
        let nullability = if field.presence >= 1.0 && field.null_fraction < 0.2 {
            "NOT NULL"
        } else {
            "NULL"
        };
        column_defs.push(format!("\"{column}\" {sql_type} {nullability}"));
        columns.push(column);
    }

    let mut ddl = format!("CREATE TABLE IF NOT EXISTS \"{table}\" (\n    id BIGSERIAL PRIMARY KEY");
    for def in &column_defs {
        ddl.push_str(",\n    ");
        ddl.push_str(def);
    }
    ddl.push_str(",\n    created_at TIMESTAMPTZ NOT NULL DEFAULT now()\n);");
    (ddl, columns)
}

fn sql_type_for(ty: FieldType, max_length: usize) -> String {
    match ty {
        FieldType::Integer => "BIGINT".to_string(),
        FieldType::Float => "DOUBLE PRECISION".to_string(),
        FieldType::Bool => "BOOLEAN".to_string(),
        FieldType::String => {
            if max_length <= 512 {
                format!("VARCHAR({})", max_length.max(32))
            } else {
                "TEXT".to_string()
            }
        }
        FieldType::Null | FieldType::Array | FieldType::Object => "JSONB".to_string(),
    }
}

fn suggested_indexes(summary: &BuildSummary) -> Vec<String> {
    let mut indexes: Vec<String> = summary
        .fields
        .iter()
        .filter(|(path, field)| {
            field.presence > 0.5 && (field.looks_like_fk || path.as_str() == "id")
        })
        .map(|(path, _)| path.clone())
        .collect();
    indexes.sort();
    indexes
}

pub fn sanitize_identifier(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if ch == '-' || ch == ' ' || ch == '_' {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "dataset".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json::JsonAnalyzer;
    use serde_json::json;

    #[test]
    fn relational_scenario_s2() {
        let docs = vec![
            json!({"id": 1, "user_id": 10, "amount": 100}),
            json!({"id": 2, "user_id": 11, "amount": 200}),
        ];
        let analyzer = JsonAnalyzer::default();
        let summary = analyzer.build_summary(&docs).unwrap();
        let analysis = analyzer.analyze_structure(&summary);
        let decision = DecisionEngine::decide("dataset", &summary, &analysis, "h".into());
        assert_eq!(decision.engine, "relational");
        let ddl = decision.ddl.unwrap();
        assert!(ddl.contains("\"id\" BIGINT NOT NULL"));
        assert!(ddl.contains("\"user_id\" BIGINT NOT NULL"));
        assert!(ddl.contains("\"amount\" BIGINT NOT NULL"));
    }

    #[test]
    fn document_scenario_s3() {
        let docs = vec![
            json!({"name": "John", "age": 30}),
            json!({"name": "Jane", "city": "NYC", "hobbies": ["reading"]}),
        ];
        let analyzer = JsonAnalyzer::default();
        let summary = analyzer.build_summary(&docs).unwrap();
        let analysis = analyzer.analyze_structure(&summary);
        let decision = DecisionEngine::decide("dataset", &summary, &analysis, "h".into());
        assert_eq!(decision.engine, "document");
    }

    #[test]
    fn sanitize_identifier_rules() {
        assert_eq!(sanitize_identifier("My Dataset-1"), "my_dataset_1");
        assert_eq!(sanitize_identifier("---"), "dataset");
        assert_eq!(sanitize_identifier(""), "dataset");
    }
}
