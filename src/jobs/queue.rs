//! JobQueue (C12): a persisted multi-item job store. Dispatch runs each
//! job's items through a `WorkerPool`, retrying failed items up to a cap
//! before giving up, and persists the job record on every status
//! transition using the same tmp-then-rename snapshot discipline as
//! `MetadataIndex` (no database backing, per the teacher's sea-orm-backed
//! job manager it replaces).

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{JobError, Result};
use crate::storage::persist_json;

use super::pool::WorkerPool;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// The narrow capability the queue needs: turn one item's payload into a
/// result or an error. Supplied once at construction.
pub type Processor = Arc<dyn Fn(serde_json::Value) -> BoxFuture<Result<serde_json::Value>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Partial,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobItem {
    pub index: usize,
    pub payload: serde_json::Value,
    pub status: ItemStatus,
    pub retry_count: u32,
    pub error: Option<String>,
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub items: Vec<JobItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    fn new(payloads: Vec<serde_json::Value>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Pending,
            items: payloads
                .into_iter()
                .enumerate()
                .map(|(index, payload)| JobItem {
                    index,
                    payload,
                    status: ItemStatus::Pending,
                    retry_count: 0,
                    error: None,
                    result: None,
                })
                .collect(),
            created_at: now,
            updated_at: now,
        }
    }

    fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.status == ItemStatus::Succeeded).count()
    }

    fn failed(&self) -> usize {
        self.items.iter().filter(|i| i.status == ItemStatus::Failed).count()
    }

    fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Partial | JobStatus::Failed)
    }
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct JobQueueStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub partial: usize,
    pub failed: usize,
}

#[derive(Default, Serialize, Deserialize)]
struct Snapshot {
    jobs: Vec<Job>,
}

pub struct JobQueue {
    path: PathBuf,
    jobs: RwLock<HashMap<Uuid, Job>>,
    order: RwLock<Vec<Uuid>>,
    pool: WorkerPool,
    max_retries: u32,
    retention: usize,
    processor: Processor,
    stopped: AtomicBool,
}

impl JobQueue {
    /// Opens (or creates) the queue's snapshot file and restores
    /// non-terminal jobs for redispatch.
    pub async fn open(
        data_dir: impl Into<PathBuf>,
        worker_count: usize,
        max_retries: u32,
        retention: usize,
        processor: Processor,
    ) -> Result<Arc<Self>> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;
        let path = data_dir.join("jobs.json");

        let (jobs, order) = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let snapshot: Snapshot = serde_json::from_str(&raw)
                .map_err(|e| JobError::Persistence(e.to_string()))?;
            let order = snapshot.jobs.iter().map(|j| j.id).collect();
            let jobs = snapshot.jobs.into_iter().map(|j| (j.id, j)).collect();
            (jobs, order)
        } else {
            (HashMap::new(), Vec::new())
        };

        let queue = Arc::new(Self {
            path,
            jobs: RwLock::new(jobs),
            order: RwLock::new(order),
            pool: WorkerPool::new(worker_count),
            max_retries,
            retention,
            processor,
            stopped: AtomicBool::new(false),
        });

        let resumable: Vec<Uuid> = queue
            .jobs
            .read()
            .await
            .values()
            .filter(|j| !j.is_terminal())
            .map(|j| j.id)
            .collect();
        for job_id in resumable {
            info!(%job_id, "resuming non-terminal job from disk");
            tokio::spawn(Arc::clone(&queue).run_job(job_id));
        }

        Ok(queue)
    }

    pub async fn enqueue(self: &Arc<Self>, payloads: Vec<serde_json::Value>) -> Result<Uuid> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(JobError::ShuttingDown.into());
        }
        let job = Job::new(payloads);
        let job_id = job.id;
        {
            let mut jobs = self.jobs.write().await;
            let mut order = self.order.write().await;
            jobs.insert(job_id, job);
            order.push(job_id);
        }
        self.persist().await?;
        tokio::spawn(Arc::clone(self).run_job(job_id));
        Ok(job_id)
    }

    #[instrument(skip(self))]
    async fn run_job(self: Arc<Self>, job_id: Uuid) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut jobs = self.jobs.write().await;
            if let Some(job) = jobs.get_mut(&job_id) {
                job.status = JobStatus::Running;
                job.updated_at = Utc::now();
            }
        }
        if let Err(e) = self.persist().await {
            warn!(%job_id, error = %e, "failed to persist running state");
        }

        let tasks: Vec<(usize, serde_json::Value)> = {
            let jobs = self.jobs.read().await;
            match jobs.get(&job_id) {
                Some(job) => job
                    .items
                    .iter()
                    .filter(|i| i.status != ItemStatus::Succeeded)
                    .map(|i| (i.index, i.payload.clone()))
                    .collect(),
                None => return,
            }
        };

        let processor = self.processor.clone();
        let max_retries = self.max_retries;
        let outcomes = self
            .pool
            .run(tasks, move |(index, payload)| {
                let processor = processor.clone();
                async move {
                    let mut attempt = 0u32;
                    loop {
                        match processor(payload.clone()).await {
                            Ok(value) => {
                                return Ok::<_, crate::error::RhinoError>((index, Ok(value), attempt))
                            }
                            Err(e) => {
                                if attempt >= max_retries {
                                    return Ok((index, Err(e.to_string()), attempt));
                                }
                                attempt += 1;
                                tokio::task::yield_now().await;
                            }
                        }
                    }
                }
            })
            .await;

        {
            let mut jobs = self.jobs.write().await;
            if let Some(job) = jobs.get_mut(&job_id) {
                for outcome in outcomes {
                    let Ok((index, result, retries)) = outcome else { continue };
                    if let Some(item) = job.items.iter_mut().find(|i| i.index == index) {
                        item.retry_count = retries;
                        match result {
                            Ok(value) => {
                                item.status = ItemStatus::Succeeded;
                                item.result = Some(value);
                                item.error = None;
                            }
                            Err(message) => {
                                item.status = ItemStatus::Failed;
                                item.error = Some(message);
                            }
                        }
                    }
                }
                job.status = if job.failed() == 0 {
                    JobStatus::Completed
                } else if job.succeeded() == 0 {
                    JobStatus::Failed
                } else {
                    JobStatus::Partial
                };
                job.updated_at = Utc::now();
            }
        }

        if let Err(e) = self.persist().await {
            warn!(%job_id, error = %e, "failed to persist terminal state");
        }
        self.trim_retention().await;
    }

    pub async fn get(&self, job_id: Uuid) -> Result<Job> {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .cloned()
            .ok_or_else(|| JobError::NotFound(job_id.to_string()).into())
    }

    /// Identical lookup to `get`; kept as a distinct name matching the
    /// result-retrieval half of the queue's public contract.
    pub async fn get_result(&self, job_id: Uuid) -> Result<Job> {
        self.get(job_id).await
    }

    pub async fn list_jobs(&self) -> Vec<Job> {
        self.jobs.read().await.values().cloned().collect()
    }

    pub async fn stats(&self) -> JobQueueStats {
        let jobs = self.jobs.read().await;
        let mut stats = JobQueueStats {
            total: jobs.len(),
            ..Default::default()
        };
        for job in jobs.values() {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Partial => stats.partial += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Halts dispatch of new jobs and cancels in-flight worker pool tasks.
    /// Already-running items finish their current attempt before stopping.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.pool.cancel();
    }

    async fn persist(&self) -> Result<()> {
        let jobs = self.jobs.read().await;
        let order = self.order.read().await;
        let snapshot = Snapshot {
            jobs: order.iter().filter_map(|id| jobs.get(id).cloned()).collect(),
        };
        persist_json(&self.path, &snapshot)
    }

    /// Drops the oldest terminal jobs once the retention window is
    /// exceeded. Non-terminal jobs are never trimmed.
    async fn trim_retention(&self) {
        if self.retention == 0 {
            return;
        }
        let mut order = self.order.write().await;
        let mut jobs = self.jobs.write().await;
        let terminal_count = order.iter().filter(|id| jobs.get(id).map(|j| j.is_terminal()).unwrap_or(false)).count();
        if terminal_count <= self.retention {
            return;
        }
        let mut to_drop = terminal_count - self.retention;
        let mut survivors = Vec::with_capacity(order.len());
        for id in order.drain(..) {
            let is_terminal = jobs.get(&id).map(|j| j.is_terminal()).unwrap_or(false);
            if is_terminal && to_drop > 0 {
                jobs.remove(&id);
                to_drop -= 1;
            } else {
                survivors.push(id);
            }
        }
        *order = survivors;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_processor() -> Processor {
        Arc::new(|value: serde_json::Value| -> BoxFuture<Result<serde_json::Value>> {
            Box::pin(async move { Ok(value) })
        })
    }

    fn fail_on_index_processor(bad: i64) -> Processor {
        Arc::new(move |value: serde_json::Value| -> BoxFuture<Result<serde_json::Value>> {
            Box::pin(async move {
                if value.get("n").and_then(|v| v.as_i64()) == Some(bad) {
                    Err(JobError::ProcessorFailed("simulated failure".into()).into())
                } else {
                    Ok(value)
                }
            })
        })
    }

    #[tokio::test]
    async fn job_completes_when_all_items_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let queue = JobQueue::open(dir.path(), 2, 2, 50, echo_processor()).await.unwrap();
        let job_id = queue.enqueue(vec![json!({"n": 1}), json!({"n": 2})]).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let job = queue.get(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn job_is_partial_when_one_item_exhausts_retries() {
        let dir = tempfile::tempdir().unwrap();
        let queue = JobQueue::open(dir.path(), 2, 1, 50, fail_on_index_processor(2))
            .await
            .unwrap();
        let job_id = queue
            .enqueue(vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})])
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let job = queue.get(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Partial);
        assert_eq!(job.succeeded(), 2);
        assert_eq!(job.failed(), 1);
    }

    #[tokio::test]
    async fn unknown_job_id_errors() {
        let dir = tempfile::tempdir().unwrap();
        let queue = JobQueue::open(dir.path(), 2, 1, 50, echo_processor()).await.unwrap();
        assert!(queue.get(Uuid::new_v4()).await.is_err());
    }
}
