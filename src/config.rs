use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub registry: RegistryConfig,
    pub qdrant: QdrantConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub sql: SqlConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub stores: StoresConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RegistryConfig {
    /// Path of the SQLite document registry.
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QdrantConfig {
    pub url: String,
    /// API key; falls back to `QDRANT_API_KEY` in the environment.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_qdrant_timeout")]
    pub timeout_secs: u64,
}

fn default_collection() -> String {
    "company_docs".to_string()
}
fn default_qdrant_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Model name resolved once at startup (e.g. `"all-MiniLM-L6-v2"`).
    #[serde(default = "default_embed_model")]
    pub model: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embed_model(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_embed_model() -> String {
    "all-MiniLM-L6-v2".to_string()
}
fn default_batch_size() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_llm_model(),
            api_base: default_api_base(),
            max_retries: default_max_retries(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_llm_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    700
}
fn default_chunk_overlap() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct SqlConfig {
    /// Hard cap appended to statements that carry no LIMIT of their own.
    #[serde(default = "default_row_limit")]
    pub row_limit: i64,
    /// Rows kept by the result presenter.
    #[serde(default = "default_max_result_rows")]
    pub max_result_rows: usize,
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            row_limit: default_row_limit(),
            max_result_rows: default_max_result_rows(),
        }
    }
}

fn default_row_limit() -> i64 {
    1000
}
fn default_max_result_rows() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// `"s3"` or `"local"`.
    pub backend: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Root directory for the `"local"` backend.
    #[serde(default)]
    pub local_dir: Option<PathBuf>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoresConfig {
    #[serde(default = "default_databases_path")]
    pub databases_path: PathBuf,
    #[serde(default = "default_prompts_path")]
    pub prompts_path: PathBuf,
    /// Directory where schema snapshots are persisted for debugging.
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,
}

impl Default for StoresConfig {
    fn default() -> Self {
        Self {
            databases_path: default_databases_path(),
            prompts_path: default_prompts_path(),
            snapshot_dir: default_snapshot_dir(),
        }
    }
}

fn default_databases_path() -> PathBuf {
    PathBuf::from("./data/databases.json")
}
fn default_prompts_path() -> PathBuf {
    PathBuf::from("./data/prompts.json")
}
fn default_snapshot_dir() -> PathBuf {
    PathBuf::from("./data/schemas")
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SchemaConfig {
    /// Seconds to reuse snapshots before re-introspecting. 0 disables
    /// caching: every query sees a fresh snapshot.
    #[serde(default)]
    pub cache_ttl_secs: u64,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }

    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be smaller than chunk_size");
    }

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    if config.sql.row_limit < 1 {
        anyhow::bail!("sql.row_limit must be >= 1");
    }

    match config.storage.backend.as_str() {
        "s3" => {
            if config.storage.bucket.is_empty() {
                anyhow::bail!("storage.bucket must be set when backend is 's3'");
            }
        }
        "local" => {
            if config.storage.local_dir.is_none() {
                anyhow::bail!("storage.local_dir must be set when backend is 'local'");
            }
        }
        other => anyhow::bail!("Unknown storage backend: '{}'. Must be s3 or local.", other),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
[server]
bind = "127.0.0.1:8000"

[registry]
path = "./data/registry.sqlite"

[qdrant]
url = "http://localhost:6334"

[storage]
backend = "local"
local_dir = "./data/documents"
"#;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let f = write_config(MINIMAL);
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.chunking.chunk_size, 700);
        assert_eq!(cfg.chunking.chunk_overlap, 100);
        assert_eq!(cfg.retrieval.top_k, 5);
        assert_eq!(cfg.sql.row_limit, 1000);
        assert_eq!(cfg.qdrant.collection, "company_docs");
        assert_eq!(cfg.embedding.model, "all-MiniLM-L6-v2");
        assert_eq!(cfg.schema.cache_ttl_secs, 0);
    }

    #[test]
    fn overlap_must_stay_below_chunk_size() {
        let body = format!(
            "{}\n[chunking]\nchunk_size = 100\nchunk_overlap = 100\n",
            MINIMAL
        );
        let f = write_config(&body);
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn s3_backend_requires_bucket() {
        let body = MINIMAL.replace(
            "backend = \"local\"\nlocal_dir = \"./data/documents\"",
            "backend = \"s3\"",
        );
        let f = write_config(&body);
        assert!(load_config(f.path()).is_err());
    }
}
