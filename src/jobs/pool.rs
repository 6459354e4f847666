//! WorkerPool (C11): a bounded fan-out executor. Tasks are distributed over
//! an `async_channel` (multi-consumer, unlike `tokio::mpsc::Receiver`) so
//! N workers can share one queue; results come back on a single-consumer
//! channel and are re-sorted by submission index before returning.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::error::Result;

pub struct WorkerPool {
    worker_count: usize,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count: worker_count.max(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Cancels in-flight and not-yet-started tasks. Workers finish their
    /// current task (to avoid orphaning partial I/O) then stop picking up
    /// new ones.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs `items` through `processor`, returning one `Result<O>` per item
    /// in original order. Unspecified completion order internally;
    /// submission index is what restores it.
    #[instrument(skip(self, items, processor))]
    pub async fn run<T, O, F, Fut>(&self, items: Vec<T>, processor: F) -> Vec<Result<O>>
    where
        T: Send + 'static,
        O: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
    {
        let submitted = items.len();
        if submitted == 0 {
            return Vec::new();
        }

        let (task_tx, task_rx) = async_channel::bounded::<(usize, T)>(submitted);
        for (index, item) in items.into_iter().enumerate() {
            if task_tx.send((index, item)).await.is_err() {
                break;
            }
        }
        task_tx.close();

        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<(usize, Result<O>)>();
        let processor = Arc::new(processor);

        let mut handles = Vec::with_capacity(self.worker_count);
        for _ in 0..self.worker_count {
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            let processor = processor.clone();
            let cancel = self.cancel.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let next = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        recv = task_rx.recv() => recv.ok(),
                    };
                    let Some((index, item)) = next else { break };
                    let outcome = processor(item).await;
                    if result_tx.send((index, outcome)).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(result_tx);

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "worker task panicked");
            }
        }

        let mut collected = Vec::with_capacity(submitted);
        while let Some(pair) = result_rx.recv().await {
            collected.push(pair);
        }
        collected.sort_by_key(|(index, _)| *index);
        collected.into_iter().map(|(_, result)| result).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn preserves_submission_order_in_results() {
        let pool = WorkerPool::new(4);
        let items = vec![5, 1, 4, 2, 3];
        let results = pool
            .run(items, |n| async move { Ok::<_, crate::error::RhinoError>(n * 2) })
            .await;
        let values: Vec<i32> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![10, 2, 8, 4, 6]);
    }

    #[tokio::test]
    async fn partial_failure_is_reported_per_item() {
        let pool = WorkerPool::new(2);
        let items = vec![1, 2, 3];
        let results = pool
            .run(items, |n| async move {
                if n == 2 {
                    Err(crate::error::JobError::ProcessorFailed("boom".into()).into())
                } else {
                    Ok(n)
                }
            })
            .await;
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
    }

    #[tokio::test]
    async fn cancellation_stops_pending_work() {
        let pool = WorkerPool::new(1);
        let started = Arc::new(AtomicUsize::new(0));
        let cancel = pool.cancellation_token();
        let started_clone = started.clone();
        let items = vec![1, 2, 3, 4, 5];
        let handle = tokio::spawn(async move {
            pool.run(items, move |n| {
                let started_clone = started_clone.clone();
                async move {
                    started_clone.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(15)).await;
                    Ok::<_, crate::error::RhinoError>(n)
                }
            })
            .await
        });
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        cancel.cancel();
        let _ = handle.await;
        assert!(started.load(Ordering::SeqCst) < 5);
    }
}
