//! Ingestion orchestration.
//!
//! Upload path (inside the request): persist a pending registry row, store
//! the raw bytes, enqueue a job, return. Worker path (out of band):
//! download → extract → chunk → embed → ensure collection → upsert points →
//! mark the row processed as the final single step. Any failure marks the
//! row `error` and propagates so the queue's own bookkeeping engages; both
//! outcomes are terminal, with no automatic retry. Partial upserts are not
//! rolled back — deterministic point ids make a re-upload overwrite them.

use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::chunk::chunk_text;
use crate::config::ChunkingConfig;
use crate::docstore;
use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::extract;
use crate::models::{make_document_id, DocumentRecord};
use crate::object_store::ObjectStore;
use crate::queue::{IngestJob, TaskQueue};
use crate::vector_index::VectorIndex;

pub struct Ingestor {
    registry: SqlitePool,
    storage: Arc<dyn ObjectStore>,
    embedder: Arc<Embedder>,
    index: Arc<VectorIndex>,
    chunking: ChunkingConfig,
}

impl Ingestor {
    pub fn new(
        registry: SqlitePool,
        storage: Arc<dyn ObjectStore>,
        embedder: Arc<Embedder>,
        index: Arc<VectorIndex>,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            registry,
            storage,
            embedder,
            index,
            chunking,
        }
    }

    /// Accept an upload: store the bytes, record a pending document, and
    /// hand the rest to the worker. Returns immediately with the pending
    /// record.
    pub async fn upload(
        &self,
        queue: &dyn TaskQueue,
        filename: &str,
        bytes: Vec<u8>,
        document_id: Option<String>,
    ) -> Result<DocumentRecord> {
        if filename.is_empty() {
            return Err(Error::InvalidInput("empty filename".into()));
        }
        // Reject unsupported formats before anything is written anywhere.
        if !extract::is_supported(filename) {
            return Err(Error::UnsupportedFormat(filename.to_string()));
        }

        let document_id = document_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| make_document_id(filename));
        let storage_key = storage_key(&document_id, filename);

        self.storage
            .put(&storage_key, bytes, content_type(filename))
            .await?;

        let record =
            docstore::insert_pending(&self.registry, &document_id, filename, &storage_key).await?;

        queue
            .enqueue(IngestJob {
                document_id: document_id.clone(),
                storage_key,
                source_name: filename.to_string(),
            })
            .await?;

        info!(document_id = %record.document_id, source = %filename, "document queued for ingestion");
        Ok(record)
    }

    /// Process one enqueued document. Runs in a worker task.
    pub async fn process(&self, job: &IngestJob) -> Result<()> {
        let outcome = self.run_pipeline(job).await;

        match outcome {
            Ok(chunk_count) => {
                docstore::mark_processed(&self.registry, &job.document_id, chunk_count).await?;
                info!(document_id = %job.document_id, chunk_count, "document processed");
                Ok(())
            }
            Err(e) => {
                error!(document_id = %job.document_id, "ingestion failed: {}", e);
                docstore::mark_error(&self.registry, &job.document_id).await.ok();
                Err(Error::Ingestion(e.to_string()))
            }
        }
    }

    async fn run_pipeline(&self, job: &IngestJob) -> Result<i64> {
        let bytes = self.storage.get(&job.storage_key).await?;
        let text = extract::extract_text(&job.source_name, &bytes)?;

        let chunks = chunk_text(&text, self.chunking.chunk_size, self.chunking.chunk_overlap);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_texts(texts).await?;

        self.index.ensure_collection(self.embedder.dims()).await?;
        self.index
            .upsert_chunks(&job.document_id, &job.source_name, &chunks, vectors)
            .await?;

        Ok(chunks.len() as i64)
    }

    /// Delete a document everywhere: vector points, stored object, registry
    /// row. Separate explicit operation — ingestion never deletes.
    pub async fn delete_document(&self, document_id: &str) -> Result<()> {
        let record = docstore::get(&self.registry, document_id)
            .await?
            .ok_or_else(|| Error::UnknownDocument(document_id.to_string()))?;

        self.index.delete_document(document_id).await?;
        self.storage.delete(&record.storage_key).await?;
        docstore::delete(&self.registry, document_id).await?;
        Ok(())
    }
}

/// Object-storage key for a document's raw bytes.
fn storage_key(document_id: &str, filename: &str) -> String {
    format!("{}_{}", document_id, filename)
}

fn content_type(filename: &str) -> Option<&'static str> {
    match filename.rsplit('.').next().map(str::to_ascii_lowercase).as_deref() {
        Some("pdf") => Some("application/pdf"),
        Some("docx") => {
            Some("application/vnd.openxmlformats-officedocument.wordprocessingml.document")
        }
        Some("odt") => Some("application/vnd.oasis.opendocument.text"),
        Some("txt") => Some("text/plain"),
        Some("md") => Some("text/markdown"),
        _ => None,
    }
}

/// Drain the queue, spawning one task per job so separate documents process
/// concurrently. Exactly one worker task owns any given job.
pub async fn run_worker(ingestor: Arc<Ingestor>, mut rx: mpsc::Receiver<IngestJob>) {
    info!("ingestion worker started");
    while let Some(job) = rx.recv().await {
        let ingestor = Arc::clone(&ingestor);
        tokio::spawn(async move {
            // process() already recorded the failure; nothing left to do
            // here but keep the worker alive.
            let _ = ingestor.process(&job).await;
        });
    }
    info!("ingestion worker stopped");
}
