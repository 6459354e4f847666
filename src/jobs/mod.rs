//! Async ingest pipeline (C11/C12): a bounded worker pool for per-file
//! fan-out, and a persisted job queue layered on top of it for
//! batch-with-retry semantics.

mod pool;
mod queue;

pub use pool::WorkerPool;
pub use queue::{BoxFuture, Job, JobItem, JobQueue, JobQueueStats, JobStatus, ItemStatus, Processor};
