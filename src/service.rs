//! Wires the standalone components into the single service process
//! described by the external interface: one data directory, one set of
//! components, four ingest operations plus a liveness probe (spec.md §6).

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::cache::adapters::SchemaCache;
use crate::cache::Cache;
use crate::config::RhinoConfig;
use crate::error::{JobError, Result, StorageError};
use crate::jobs::{BoxFuture, JobQueue, Processor};
use crate::json::{self, AnalyzeStructure, BuildSummary, Decision, DecisionEngine, JsonAnalyzer};
use crate::storage::{FileRecord, StorageManager};

/// A single media item handed to `ingest_media`: bytes already staged on
/// disk by the caller (HTTP layer, CLI, etc.) at `source_path`.
#[derive(Debug, Clone)]
pub struct MediaIngestItem {
    pub source_path: PathBuf,
    pub filename: String,
    pub mime: String,
    pub category_hint: Option<String>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct IngestJsonOutcome {
    pub decision: Decision,
    pub summary: BuildSummary,
    pub analysis: AnalyzeStructure,
    pub batch_path: String,
    pub from_cache: bool,
}

pub struct RhinoService {
    pub config: RhinoConfig,
    pub storage: Arc<StorageManager>,
    pub cache: Arc<Cache>,
    pub jobs: Arc<JobQueue>,
    analyzer: JsonAnalyzer,
}

impl RhinoService {
    #[instrument(skip(config))]
    pub async fn open(config: RhinoConfig) -> Result<Arc<Self>> {
        fs::create_dir_all(&config.data_dir)?;
        let storage = Arc::new(StorageManager::open(
            &config.data_dir,
            config.max_upload_bytes,
            config.max_versions,
        )?);
        let cache = Arc::new(Cache::open(config.data_dir.join("cache"), &config.cache)?);

        let storage_for_jobs = storage.clone();
        let processor: Processor = Arc::new(move |payload: Value| -> BoxFuture<Result<Value>> {
            let storage = storage_for_jobs.clone();
            Box::pin(async move { process_media_item(storage, payload).await })
        });

        let jobs = JobQueue::open(
            config.data_dir.join("jobs"),
            config.jobs.worker_count,
            config.jobs.max_retries,
            config.jobs.retention,
            processor,
        )
        .await?;

        info!(data_dir = %config.data_dir.display(), "rhinobox service ready");

        Ok(Arc::new(Self {
            config,
            storage,
            cache,
            jobs,
            analyzer: JsonAnalyzer::default(),
        }))
    }

    /// Liveness probe: confirms the data directory is still reachable.
    pub fn is_healthy(&self) -> bool {
        self.config.data_dir.is_dir()
    }

    /// Ingest operation 1: enqueue a batch of media items for asynchronous,
    /// bounded-concurrency storage. Returns the job id; poll via `jobs`.
    pub async fn ingest_media(&self, items: Vec<MediaIngestItem>) -> Result<Uuid> {
        let payloads = items
            .into_iter()
            .map(|item| {
                serde_json::json!({
                    "source_path": item.source_path,
                    "filename": item.filename,
                    "mime": item.mime,
                    "category_hint": item.category_hint,
                    "metadata": item.metadata,
                })
            })
            .collect();
        self.jobs.enqueue(payloads).await
    }

    /// Ingest operation 2: analyze a JSON batch, decide its destination,
    /// and persist the NDJSON batch (plus DDL for relational decisions)
    /// under `json/<engine>/<namespace>/`.
    #[instrument(skip(self, raw_docs))]
    pub async fn ingest_json(&self, namespace: &str, raw_docs: Vec<String>) -> Result<IngestJsonOutcome> {
        let docs = json::parse_batch(&raw_docs)?;
        let summary = self.analyzer.build_summary(&docs)?;
        let analysis = self.analyzer.analyze_structure(&summary);

        let schema_cache = SchemaCache::new(&self.cache, Duration::from_secs(self.config.cache.schema_cache_ttl_secs));
        let (decision, from_cache) = match schema_cache.get(&summary.structure_hash).await {
            Some(decision) => (decision, true),
            None => {
                let decision = DecisionEngine::decide(namespace, &summary, &analysis, summary.structure_hash.clone());
                schema_cache.set(&summary.structure_hash, decision.clone()).await?;
                (decision, false)
            }
        };

        let batch_dir = self
            .config
            .data_dir
            .join("json")
            .join(&decision.engine)
            .join(namespace);
        fs::create_dir_all(&batch_dir)?;
        let seq = fs::read_dir(&batch_dir)
            .map(|entries| entries.filter_map(|e| e.ok()).count())
            .unwrap_or(0)
            + 1;
        let batch_path = batch_dir.join(format!("batch_{seq:04}.ndjson"));
        write_ndjson_batch(&batch_path, &raw_docs)?;

        if decision.engine == "relational" {
            let schema_dir = self.config.data_dir.join("json").join("sql").join(namespace);
            fs::create_dir_all(&schema_dir)?;
            write_atomic_json(
                &schema_dir.join("schema.json"),
                &serde_json::json!({
                    "table": decision.table,
                    "ddl": decision.ddl,
                    "columns": decision.columns,
                    "summary": summary,
                    "analysis": analysis,
                }),
            )?;
        }

        Ok(IngestJsonOutcome {
            decision,
            summary,
            analysis,
            batch_path: batch_path.display().to_string(),
            from_cache,
        })
    }

    /// Ingest operation 3: update a stored file's free-form metadata map.
    pub fn update_metadata(&self, hash: &str, updates: HashMap<String, String>) -> Result<FileRecord> {
        self.storage.metadata().update_metadata(hash, |map| {
            for (k, v) in updates {
                map.insert(k, v);
            }
        })
    }

    /// Ingest operation 4: listing. Snapshot of all known file records.
    pub fn list_files(&self) -> Vec<FileRecord> {
        self.storage.metadata().all()
    }

    pub fn shutdown(&self) {
        self.jobs.stop();
    }
}

async fn process_media_item(storage: Arc<StorageManager>, payload: Value) -> Result<Value> {
    let source_path: PathBuf = serde_json::from_value(
        payload
            .get("source_path")
            .cloned()
            .ok_or_else(|| JobError::ProcessorFailed("missing source_path".into()))?,
    )
    .map_err(|e| JobError::ProcessorFailed(e.to_string()))?;
    let filename = payload
        .get("filename")
        .and_then(|v| v.as_str())
        .ok_or_else(|| JobError::ProcessorFailed("missing filename".into()))?
        .to_string();
    let mime = payload
        .get("mime")
        .and_then(|v| v.as_str())
        .unwrap_or("application/octet-stream")
        .to_string();
    let category_hint = payload
        .get("category_hint")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let metadata: HashMap<String, String> = payload
        .get("metadata")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| JobError::ProcessorFailed(e.to_string()))?
        .unwrap_or_default();

    let join_result = tokio::task::spawn_blocking(move || {
        let size = fs::metadata(&source_path)
            .map_err(|e| StorageError::io(source_path.display().to_string(), e))?
            .len();
        let file = fs::File::open(&source_path).map_err(|e| StorageError::io(source_path.display().to_string(), e))?;
        let outcome = storage.store_file(
            file,
            &filename,
            &mime,
            size,
            Some(metadata),
            category_hint.as_deref(),
        )?;
        Ok::<_, crate::error::RhinoError>(serde_json::json!({
            "hash": outcome.record.hash,
            "duplicate": outcome.duplicate,
            "stored_path": outcome.record.stored_path,
        }))
    })
    .await;

    match join_result {
        Ok(inner) => inner,
        Err(e) => Err(JobError::ProcessorFailed(e.to_string()).into()),
    }
}

fn write_ndjson_batch(path: &std::path::Path, lines: &[String]) -> Result<()> {
    let mut body = String::new();
    for line in lines {
        body.push_str(line.trim());
        body.push('\n');
    }
    let tmp_path = path.with_extension("ndjson.tmp");
    fs::write(&tmp_path, body).map_err(|e| StorageError::io(tmp_path.display().to_string(), e))?;
    fs::rename(&tmp_path, path).map_err(|e| StorageError::io(path.display().to_string(), e))?;
    Ok(())
}

fn write_atomic_json<T: Serialize>(path: &std::path::Path, value: &T) -> Result<()> {
    let tmp_path = path.with_extension("json.tmp");
    let raw = serde_json::to_vec_pretty(value).map_err(|e| StorageError::Persistence(e.to_string()))?;
    fs::write(&tmp_path, raw).map_err(|e| StorageError::io(tmp_path.display().to_string(), e))?;
    fs::rename(&tmp_path, path).map_err(|e| StorageError::io(path.display().to_string(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ingest_json_writes_batch_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RhinoConfig::default();
        config.data_dir = dir.path().to_path_buf();
        let service = RhinoService::open(config).await.unwrap();

        let docs = vec![
            r#"{"id": 1, "user_id": 10, "amount": 100}"#.to_string(),
            r#"{"id": 2, "user_id": 11, "amount": 200}"#.to_string(),
        ];
        let outcome = service.ingest_json("orders", docs).await.unwrap();
        assert_eq!(outcome.decision.engine, "relational");
        assert!(std::path::Path::new(&outcome.batch_path).exists());
        assert!(dir.path().join("json/sql/orders/schema.json").exists());
    }

    #[tokio::test]
    async fn ingest_media_round_trips_through_job_queue() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RhinoConfig::default();
        config.data_dir = dir.path().join("data");
        let service = RhinoService::open(config).await.unwrap();

        let staged = dir.path().join("staged.txt");
        fs::write(&staged, b"hello world").unwrap();

        let item = MediaIngestItem {
            source_path: staged,
            filename: "staged.txt".to_string(),
            mime: "text/plain".to_string(),
            category_hint: None,
            metadata: HashMap::new(),
        };
        let job_id = service.ingest_media(vec![item]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let job = service.jobs.get(job_id).await.unwrap();
        assert_eq!(job.status, crate::jobs::JobStatus::Completed);
        assert_eq!(service.list_files().len(), 1);
    }
}
