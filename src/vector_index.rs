//! Qdrant vector index adapter.
//!
//! One collection holds every chunk point: `{id, vector, payload:
//! {document_id, chunk_index, source, text}}`. Point ids are UUIDv5 of
//! `(document_id, chunk_index)`, so re-ingesting a document overwrites its
//! points instead of duplicating them.

use std::collections::HashMap;

use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder, DeletePointsBuilder,
    Distance, FieldType, Filter, PointStruct, ScrollPointsBuilder, SearchPointsBuilder,
    UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use tracing::debug;
use uuid::Uuid;

use crate::config::QdrantConfig;
use crate::error::{Error, Result};
use crate::models::{Chunk, SearchHit};

/// Page size for listing scans.
const SCROLL_PAGE: u32 = 2048;

pub struct VectorIndex {
    client: Qdrant,
    collection: String,
}

/// Deterministic point identity for a chunk. Re-running the same ingestion
/// produces the same ids, making upserts idempotent.
pub fn chunk_point_id(document_id: &str, chunk_index: i64) -> String {
    let name = format!("{}:{}", document_id, chunk_index);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

impl VectorIndex {
    pub fn connect(config: &QdrantConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("QDRANT_API_KEY").ok());

        let mut builder = Qdrant::from_url(&config.url)
            .timeout(std::time::Duration::from_secs(config.timeout_secs));
        if let Some(key) = api_key {
            builder = builder.api_key(key);
        }

        let client = builder
            .build()
            .map_err(|e| Error::VectorIndex(e.to_string()))?;

        Ok(Self {
            client,
            collection: config.collection.clone(),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Create the collection (cosine distance) if it does not exist, and make
    /// sure `document_id` is indexed for filtering.
    pub async fn ensure_collection(&self, dim: usize) -> Result<()> {
        let exists = self
            .client
            .collection_exists(&self.collection)
            .await
            .map_err(|e| Error::VectorIndex(e.to_string()))?;

        if !exists {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.collection)
                        .vectors_config(VectorParamsBuilder::new(dim as u64, Distance::Cosine)),
                )
                .await
                .map_err(|e| Error::VectorIndex(e.to_string()))?;
            debug!(collection = %self.collection, dim, "created vector collection");
        }

        // Index creation is racy across concurrent starts; an "already
        // exists" failure is harmless.
        if let Err(e) = self
            .client
            .create_field_index(CreateFieldIndexCollectionBuilder::new(
                &self.collection,
                "document_id",
                FieldType::Keyword,
            ))
            .await
        {
            debug!("payload index creation skipped: {}", e);
        }

        Ok(())
    }

    /// Upsert one document's chunk vectors with their payloads.
    pub async fn upsert_chunks(
        &self,
        document_id: &str,
        source_name: &str,
        chunks: &[Chunk],
        vectors: Vec<Vec<f32>>,
    ) -> Result<()> {
        if chunks.len() != vectors.len() {
            return Err(Error::VectorIndex(format!(
                "{} chunks but {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }

        let mut points = Vec::with_capacity(chunks.len());
        for (chunk, vector) in chunks.iter().zip(vectors) {
            let payload = Payload::try_from(serde_json::json!({
                "document_id": document_id,
                "chunk_index": chunk.chunk_index,
                "source": source_name,
                "text": chunk.text,
            }))
            .map_err(|e| Error::VectorIndex(e.to_string()))?;

            points.push(PointStruct::new(
                chunk_point_id(document_id, chunk.chunk_index),
                vector,
                payload,
            ));
        }

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await
            .map_err(|e| Error::VectorIndex(e.to_string()))?;

        Ok(())
    }

    /// Similarity search, optionally restricted to one document.
    pub async fn search(
        &self,
        query_vector: Vec<f32>,
        limit: usize,
        filter_document_id: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        let mut request =
            SearchPointsBuilder::new(&self.collection, query_vector, limit as u64)
                .with_payload(true);

        if let Some(doc_id) = filter_document_id {
            request = request.filter(Filter::must([Condition::matches(
                "document_id",
                doc_id.to_string(),
            )]));
        }

        let response = self
            .client
            .search_points(request)
            .await
            .map_err(|e| Error::VectorIndex(e.to_string()))?;

        let hits = response
            .result
            .into_iter()
            .filter_map(|point| {
                let payload = point.payload;
                Some(SearchHit {
                    score: point.score,
                    document_id: payload_str(&payload, "document_id")?,
                    source: payload_str(&payload, "source").unwrap_or_default(),
                    chunk_index: payload_int(&payload, "chunk_index").unwrap_or(0),
                    text: payload_str(&payload, "text").unwrap_or_default(),
                })
            })
            .collect();

        Ok(hits)
    }

    /// Distinct document ids present in the collection, via a full scroll.
    pub async fn list_documents(&self) -> Result<Vec<String>> {
        let mut unique = std::collections::BTreeSet::new();
        let mut offset = None;

        loop {
            let mut request = ScrollPointsBuilder::new(&self.collection)
                .limit(SCROLL_PAGE)
                .with_payload(true);
            if let Some(next) = offset.take() {
                request = request.offset(next);
            }

            let response = self
                .client
                .scroll(request)
                .await
                .map_err(|e| Error::VectorIndex(e.to_string()))?;

            for point in &response.result {
                if let Some(doc_id) = payload_str(&point.payload, "document_id") {
                    unique.insert(doc_id);
                }
            }

            match response.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        Ok(unique.into_iter().collect())
    }

    /// Delete every point whose payload `document_id` matches.
    pub async fn delete_document(&self, document_id: &str) -> Result<()> {
        let filter = Filter::must([Condition::matches(
            "document_id",
            document_id.to_string(),
        )]);

        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(filter)
                    .wait(true),
            )
            .await
            .map_err(|e| Error::VectorIndex(e.to_string()))?;

        debug!(document_id, "deleted vector points for document");
        Ok(())
    }
}

fn payload_str(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
    match payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::StringValue(s)) => Some(s.clone()),
        _ => None,
    }
}

fn payload_int(payload: &HashMap<String, Value>, key: &str) -> Option<i64> {
    match payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::IntegerValue(i)) => Some(*i),
        Some(Kind::DoubleValue(d)) => Some(*d as i64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_ids_are_deterministic() {
        let a = chunk_point_id("report-1a2b3c4d", 0);
        let b = chunk_point_id("report-1a2b3c4d", 0);
        assert_eq!(a, b);
    }

    #[test]
    fn point_ids_differ_per_chunk_and_document() {
        let base = chunk_point_id("doc-a", 0);
        assert_ne!(base, chunk_point_id("doc-a", 1));
        assert_ne!(base, chunk_point_id("doc-b", 0));
    }

    #[test]
    fn point_ids_are_valid_uuids() {
        let id = chunk_point_id("doc-a", 7);
        assert!(Uuid::parse_str(&id).is_ok());
    }
}
