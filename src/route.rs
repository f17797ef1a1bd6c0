//! Query routing: the hybrid-answer pipeline.
//!
//! One request flows classifier → (SQL pipeline | RAG pipeline | both).
//! The SQL side is synthesize → guard/execute → present; the RAG side is
//! embed → search → compose. Hybrid runs both and merges, carrying SQL
//! failures in-band (`sql_error`) so the retrieval half still answers.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::classify;
use crate::config::Config;
use crate::dbconfigs::{DbConfigStore, DbConnConfig};
use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::llm::ChatClient;
use crate::models::{QueryMode, SourceRef, SqlRow};
use crate::present;
use crate::prompts::PromptStore;
use crate::rag;
use crate::schema::{self, DescribeOptions, SchemaRegistry, SchemaSnapshot};
use crate::sqlexec;
use crate::sqlgen;
use crate::vector_index::VectorIndex;

#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub query: String,
    /// Retrieval depth override (RAG and hybrid modes).
    #[serde(default)]
    pub top_k: Option<usize>,
    /// Restrict retrieval to one document.
    #[serde(default)]
    pub filter_document_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SqlResult {
    pub sql: String,
    pub params: Vec<serde_json::Value>,
    pub rows: Vec<SqlRow>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum QueryResponse {
    #[serde(rename = "structured")]
    Structured {
        db: String,
        #[serde(flatten)]
        result: SqlResult,
    },
    #[serde(rename = "unstructured")]
    Unstructured {
        answer: String,
        sources: Vec<SourceRef>,
    },
    #[serde(rename = "hybrid")]
    Hybrid {
        db: Option<String>,
        sql_result: Option<SqlResult>,
        #[serde(skip_serializing_if = "Option::is_none")]
        sql_error: Option<String>,
        answer: String,
        sources: Vec<SourceRef>,
    },
}

pub struct QueryPipeline {
    config: Arc<Config>,
    chat: Arc<ChatClient>,
    prompts: Arc<PromptStore>,
    databases: Arc<DbConfigStore>,
    schemas: Arc<SchemaRegistry>,
    embedder: Arc<Embedder>,
    index: Arc<VectorIndex>,
}

impl QueryPipeline {
    pub fn new(
        config: Arc<Config>,
        chat: Arc<ChatClient>,
        prompts: Arc<PromptStore>,
        databases: Arc<DbConfigStore>,
        schemas: Arc<SchemaRegistry>,
        embedder: Arc<Embedder>,
        index: Arc<VectorIndex>,
    ) -> Self {
        Self {
            config,
            chat,
            prompts,
            databases,
            schemas,
            embedder,
            index,
        }
    }

    pub async fn run(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let question = request.query.trim();
        if question.is_empty() {
            return Err(Error::InvalidInput("query is required".into()));
        }

        // Connection configs are read fresh; snapshots go through the
        // registry (re-introspected unless the TTL cache is on).
        let configs = self.databases.load()?;
        let snapshots = self.schemas.snapshot_all(&configs).await;

        let decision = classify::classify(&self.chat, &self.prompts, question, &snapshots).await?;
        info!(mode = ?decision.mode, db = ?decision.db_name, "routing query");

        match decision.mode {
            QueryMode::Sql => {
                let (db_name, config, snapshot) =
                    self.resolve_database(decision.db_name.as_deref(), &configs, &snapshots)?;
                let result = self.run_sql(question, config, snapshot).await?;
                Ok(QueryResponse::Structured {
                    db: db_name,
                    result,
                })
            }
            QueryMode::Rag => {
                let (answer, sources) = self.run_rag(question, request).await?;
                Ok(QueryResponse::Unstructured { answer, sources })
            }
            QueryMode::Hybrid => {
                let (answer, sources) = self.run_rag(question, request).await?;

                let (db, sql_result, sql_error) = match self.resolve_database(
                    decision.db_name.as_deref(),
                    &configs,
                    &snapshots,
                ) {
                    Ok((db_name, config, snapshot)) => {
                        match self.run_sql(question, config, snapshot).await {
                            Ok(result) => (Some(db_name), Some(result), None),
                            Err(e) => (Some(db_name), None, Some(e.to_string())),
                        }
                    }
                    Err(e) => (None, None, Some(e.to_string())),
                };

                Ok(QueryResponse::Hybrid {
                    db,
                    sql_result,
                    sql_error,
                    answer,
                    sources,
                })
            }
        }
    }

    /// Re-validate the classifier's database pick against the configured
    /// set. The completion service is never authoritative for routing.
    fn resolve_database<'a>(
        &self,
        db_name: Option<&str>,
        configs: &'a BTreeMap<String, DbConnConfig>,
        snapshots: &'a BTreeMap<String, SchemaSnapshot>,
    ) -> Result<(String, &'a DbConnConfig, &'a SchemaSnapshot)> {
        let name = db_name.ok_or_else(|| Error::UnknownDatabase("none selected".into()))?;
        let config = configs
            .get(name)
            .ok_or_else(|| Error::UnknownDatabase(name.to_string()))?;
        let snapshot = snapshots
            .get(name)
            .ok_or_else(|| Error::SchemaLoad {
                db: name.to_string(),
                message: "no schema snapshot available".into(),
            })?;
        Ok((name.to_string(), config, snapshot))
    }

    async fn run_sql(
        &self,
        question: &str,
        config: &DbConnConfig,
        snapshot: &SchemaSnapshot,
    ) -> Result<SqlResult> {
        let description = schema::describe(snapshot, &DescribeOptions::default());
        let generated =
            sqlgen::generate(&self.chat, &self.prompts, &description, question).await?;
        if generated.is_empty() {
            return Err(Error::SqlGeneration);
        }

        let rows = sqlexec::execute(
            &generated.sql,
            &generated.params,
            config,
            self.config.sql.row_limit,
        )
        .await?;

        let rows = present::present(
            rows,
            Some(snapshot),
            &generated.sql,
            self.config.sql.max_result_rows,
        );

        Ok(SqlResult {
            sql: generated.sql,
            params: generated.params,
            rows,
        })
    }

    async fn run_rag(
        &self,
        question: &str,
        request: &QueryRequest,
    ) -> Result<(String, Vec<SourceRef>)> {
        let top_k = request.top_k.unwrap_or(self.config.retrieval.top_k);
        let query_vector = self.embedder.embed_query(question).await?;

        let hits = self
            .index
            .search(query_vector, top_k, request.filter_document_id.as_deref())
            .await?;

        rag::make_answer(&self.chat, question, &hits).await
    }
}
