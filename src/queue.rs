//! Task queue boundary for asynchronous ingestion.
//!
//! `enqueue` is fire-and-forget: the upload request returns as soon as the
//! job is accepted. The in-process transport is a bounded tokio channel; a
//! dispatcher drains it and spawns one task per job, so different documents
//! process concurrently while a single job has exactly one worker. Delivery
//! is at-least-once from the caller's point of view — a job that crashes
//! mid-flight leaves its document record in a terminal `error` state rather
//! than being retried.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Work item carried to the ingestion worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestJob {
    pub document_id: String,
    pub storage_key: String,
    pub source_name: String,
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, job: IngestJob) -> Result<()>;
}

/// Bounded in-process queue. Backpressure: `enqueue` waits for a slot
/// instead of dropping jobs.
pub struct MpscQueue {
    tx: mpsc::Sender<IngestJob>,
}

/// Create the queue and its receiving end for the dispatcher.
pub fn channel(capacity: usize) -> (MpscQueue, mpsc::Receiver<IngestJob>) {
    let (tx, rx) = mpsc::channel(capacity);
    (MpscQueue { tx }, rx)
}

#[async_trait]
impl TaskQueue for MpscQueue {
    async fn enqueue(&self, job: IngestJob) -> Result<()> {
        self.tx
            .send(job)
            .await
            .map_err(|_| Error::Ingestion("task queue is closed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str) -> IngestJob {
        IngestJob {
            document_id: id.to_string(),
            storage_key: format!("{}_file.txt", id),
            source_name: "file.txt".to_string(),
        }
    }

    #[tokio::test]
    async fn enqueued_jobs_arrive_in_order() {
        let (queue, mut rx) = channel(8);
        queue.enqueue(job("a")).await.unwrap();
        queue.enqueue(job("b")).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), job("a"));
        assert_eq!(rx.recv().await.unwrap(), job("b"));
    }

    #[tokio::test]
    async fn enqueue_fails_once_receiver_is_gone() {
        let (queue, rx) = channel(1);
        drop(rx);
        assert!(queue.enqueue(job("a")).await.is_err());
    }
}
