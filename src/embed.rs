//! Embedding component.
//!
//! The model is resolved from its configured name and loaded exactly once at
//! startup; every caller receives the same instance behind an `Arc`. All
//! output vectors share the model's fixed dimension and are unit-normalized,
//! so cosine similarity and dot product coincide in the vector index.

use std::sync::{Arc, Mutex};

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// Map a configured model name onto a fastembed model and its dimension.
///
/// Accepts both bare names and the `org/name` form used by model hubs.
pub fn resolve_model(name: &str) -> Result<(EmbeddingModel, usize)> {
    let short = name.rsplit('/').next().unwrap_or(name);
    match short {
        "all-MiniLM-L6-v2" => Ok((EmbeddingModel::AllMiniLML6V2, 384)),
        "all-MiniLM-L12-v2" => Ok((EmbeddingModel::AllMiniLML12V2, 384)),
        "bge-small-en-v1.5" => Ok((EmbeddingModel::BGESmallENV15, 384)),
        "bge-base-en-v1.5" => Ok((EmbeddingModel::BGEBaseENV15, 768)),
        "nomic-embed-text-v1.5" => Ok((EmbeddingModel::NomicEmbedTextV15, 768)),
        other => Err(Error::Embedding(format!(
            "unknown embedding model: '{}'",
            other
        ))),
    }
}

/// Scale a vector to unit length. Zero vectors are left untouched.
pub fn normalize(v: &mut [f32]) {
    let magnitude: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for x in v.iter_mut() {
            *x /= magnitude;
        }
    }
}

pub struct Embedder {
    model: Arc<Mutex<TextEmbedding>>,
    model_name: String,
    dims: usize,
    batch_size: usize,
}

impl Embedder {
    /// Load the configured model. Called once at startup; the instance is
    /// shared for the process lifetime.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model_id, dims) = resolve_model(&config.model)?;
        let model =
            TextEmbedding::try_new(InitOptions::new(model_id).with_show_download_progress(false))
                .map_err(|e| Error::Embedding(e.to_string()))?;

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            model_name: config.model.clone(),
            dims,
            batch_size: config.batch_size,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// The fixed vector dimension of this model. Changing the model requires
    /// a new collection.
    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Embed a batch of texts, preserving input order. Inference runs on a
    /// blocking thread so the async runtime is not stalled.
    pub async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = Arc::clone(&self.model);
        let batch_size = self.batch_size;
        let mut vectors = tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|e| Error::Embedding(e.to_string()))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| Error::Embedding(e.to_string()))
        })
        .await
        .map_err(|e| Error::Embedding(e.to_string()))??;

        for v in &mut vectors {
            if v.len() != self.dims {
                return Err(Error::Embedding(format!(
                    "model returned dimension {} but {} was expected",
                    v.len(),
                    self.dims
                )));
            }
            normalize(v);
        }

        Ok(vectors)
    }

    /// Embed a single query text.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_texts(vec![text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::Embedding("empty embedding response".to_string()))
    }
}
