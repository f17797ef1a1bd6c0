//! Core data types flowing through the ingestion and query pipelines.

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

/// Lifecycle state of an uploaded document.
///
/// `pending → processed` or `pending → error`; both end states are terminal
/// and written exactly once by the ingestion worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processed,
    Error,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processed => "processed",
            DocumentStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DocumentStatus::Pending),
            "processed" => Some(DocumentStatus::Processed),
            "error" => Some(DocumentStatus::Error),
            _ => None,
        }
    }
}

/// Registry row for one uploaded document.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentRecord {
    pub document_id: String,
    pub source_name: String,
    pub status: DocumentStatus,
    /// Meaningful only when `status == Processed`.
    pub chunk_count: i64,
    pub storage_key: String,
    pub created_at: DateTime<Utc>,
}

/// A bounded, overlapping piece of a document's extracted text. Chunks are
/// not persisted as entities; they exist as vector-index points.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub chunk_index: i64,
    pub text: String,
}

/// One scored retrieval hit from the vector index.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub score: f32,
    pub document_id: String,
    pub source: String,
    pub chunk_index: i64,
    pub text: String,
}

/// Source attribution returned alongside a composed answer.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub document_id: String,
    pub source: String,
    pub chunk_index: i64,
    pub score: f32,
}

impl From<&SearchHit> for SourceRef {
    fn from(hit: &SearchHit) -> Self {
        SourceRef {
            document_id: hit.document_id.clone(),
            source: hit.source.clone(),
            chunk_index: hit.chunk_index,
            score: hit.score,
        }
    }
}

/// Execution mode chosen by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryMode {
    #[serde(rename = "SQL")]
    Sql,
    #[serde(rename = "RAG")]
    Rag,
    #[serde(rename = "SQL+RAG")]
    Hybrid,
}

/// Classifier output: which pipeline(s) to run, and against which database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    pub mode: QueryMode,
    pub db_name: Option<String>,
}

impl RouteDecision {
    /// The safe default when classification output cannot be trusted:
    /// retrieval is always available.
    pub fn fallback() -> Self {
        RouteDecision {
            mode: QueryMode::Rag,
            db_name: None,
        }
    }
}

/// One result row as an ordered column → value mapping.
///
/// `serde_json::Map` reorders keys; SQL results must keep column order, so
/// rows are pairs serialized as a JSON object in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlRow(pub Vec<(String, serde_json::Value)>);

impl SqlRow {
    pub fn get(&self, column: &str) -> Option<&serde_json::Value> {
        self.0
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for SqlRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Derive a document id from the uploaded filename: stem plus a short
/// random suffix, so repeated uploads of `report.pdf` stay distinct.
pub fn make_document_id(filename: &str) -> String {
    let stem = std::path::Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", stem, &suffix[..8])
}
