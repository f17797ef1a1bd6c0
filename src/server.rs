//! HTTP surface.
//!
//! Routes are thin dispatch into the library: the query pipeline, the
//! ingestion orchestrator, and the admin stores. Every error response
//! follows one schema:
//!
//! ```json
//! { "error": { "code": "sql_validation", "message": "forbidden SQL token: ;" } }
//! ```
//!
//! | Method   | Path                        | Description |
//! |----------|-----------------------------|-------------|
//! | `GET`    | `/health`                   | Liveness + collection name |
//! | `POST`   | `/query`                    | Classify and answer a question |
//! | `POST`   | `/upload-doc`               | Multipart upload, returns pending record |
//! | `GET`    | `/list-docs`                | All registry rows |
//! | `GET`    | `/doc-status/{document_id}` | One registry row |
//! | `POST`   | `/delete-doc`               | Purge a document everywhere |
//! | `GET`    | `/databases`                | Configured connection descriptors |
//! | `POST`   | `/databases`                | Add or replace a descriptor |
//! | `DELETE` | `/databases/{name}`         | Remove a descriptor |
//! | `GET`    | `/prompts`                  | All prompt templates |
//! | `PUT`    | `/prompts/{name}`           | Replace one template |

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::dbconfigs::{DbConfigStore, DbConnConfig};
use crate::docstore;
use crate::error::Error;
use crate::ingest::Ingestor;
use crate::models::DocumentRecord;
use crate::prompts::PromptStore;
use crate::queue::TaskQueue;
use crate::route::{QueryPipeline, QueryRequest, QueryResponse};

/// Largest accepted upload body.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: sqlx::SqlitePool,
    pub pipeline: Arc<QueryPipeline>,
    pub ingestor: Arc<Ingestor>,
    pub queue: Arc<dyn TaskQueue>,
    pub databases: Arc<DbConfigStore>,
    pub prompts: Arc<PromptStore>,
}

/// Bind and serve until the process is terminated.
pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let bind_addr = state.config.server.bind.clone();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/query", post(handle_query))
        .route("/upload-doc", post(handle_upload))
        .route("/list-docs", get(handle_list_docs))
        .route("/doc-status/{document_id}", get(handle_doc_status))
        .route("/delete-doc", post(handle_delete_doc))
        .route("/databases", get(handle_list_databases).post(handle_add_database))
        .route("/databases/{name}", delete(handle_remove_database))
        .route("/prompts", get(handle_list_prompts))
        .route("/prompts/{name}", put(handle_set_prompt))
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state);

    info!("listening on http://{}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error mapping ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        let message = e.to_string();
        let (status, code) = match &e {
            Error::InvalidInput(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Error::UnknownDocument(_) => (StatusCode::NOT_FOUND, "not_found"),
            Error::UnknownDatabase(_) => (StatusCode::BAD_REQUEST, "unknown_database"),
            Error::SqlGeneration => (StatusCode::BAD_REQUEST, "sql_generation"),
            Error::SqlValidation(_) => (StatusCode::BAD_REQUEST, "sql_validation"),
            Error::UnsupportedFormat(_) => (StatusCode::BAD_REQUEST, "unsupported_format"),
            Error::SqlExecution(_) => (StatusCode::INTERNAL_SERVER_ERROR, "sql_execution"),
            Error::PromptConfig(_) => (StatusCode::INTERNAL_SERVER_ERROR, "prompt_config"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        AppError {
            status,
            code,
            message,
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    collection: String,
    version: String,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        collection: state.config.qdrant.collection.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /query ============

async fn handle_query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    let response = state.pipeline.run(&request).await?;
    Ok(Json(response))
}

// ============ POST /upload-doc ============

#[derive(Serialize)]
struct UploadResponse {
    ok: bool,
    document_id: String,
    status: String,
}

async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut document_id: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.to_string()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                // Some browsers send a full path; keep the basename only.
                let filename = field
                    .file_name()
                    .map(|n| n.rsplit(['/', '\\']).next().unwrap_or(n).to_string())
                    .unwrap_or_default();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(e.to_string()))?;
                file = Some((filename, bytes.to_vec()));
            }
            Some("document_id") => {
                document_id = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| bad_request(e.to_string()))?,
                );
            }
            _ => {}
        }
    }

    let (filename, bytes) = file.ok_or_else(|| bad_request("file missing"))?;
    if filename.is_empty() {
        return Err(bad_request("empty filename"));
    }

    let record = state
        .ingestor
        .upload(state.queue.as_ref(), &filename, bytes, document_id)
        .await?;

    Ok(Json(UploadResponse {
        ok: true,
        document_id: record.document_id,
        status: record.status.as_str().to_string(),
    }))
}

// ============ GET /list-docs ============

#[derive(Serialize)]
struct ListDocsResponse {
    documents: Vec<DocumentRecord>,
}

async fn handle_list_docs(
    State(state): State<AppState>,
) -> Result<Json<ListDocsResponse>, AppError> {
    let documents = docstore::list(&state.registry).await?;
    Ok(Json(ListDocsResponse { documents }))
}

// ============ GET /doc-status/{document_id} ============

async fn handle_doc_status(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Result<Json<DocumentRecord>, AppError> {
    let record = docstore::get(&state.registry, &document_id)
        .await?
        .ok_or(Error::UnknownDocument(document_id))?;
    Ok(Json(record))
}

// ============ POST /delete-doc ============

#[derive(Deserialize)]
struct DeleteDocRequest {
    #[serde(default)]
    document_id: String,
}

#[derive(Serialize)]
struct DeleteDocResponse {
    ok: bool,
    deleted_document_id: String,
}

async fn handle_delete_doc(
    State(state): State<AppState>,
    Json(request): Json<DeleteDocRequest>,
) -> Result<Json<DeleteDocResponse>, AppError> {
    if request.document_id.is_empty() {
        return Err(bad_request("document_id is required"));
    }

    state.ingestor.delete_document(&request.document_id).await?;
    Ok(Json(DeleteDocResponse {
        ok: true,
        deleted_document_id: request.document_id,
    }))
}

// ============ Database config admin ============

async fn handle_list_databases(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let configs = state.databases.load()?;
    Ok(Json(serde_json::json!({ "databases": configs })))
}

#[derive(Deserialize)]
struct AddDatabaseRequest {
    name: String,
    #[serde(flatten)]
    config: DbConnConfig,
}

async fn handle_add_database(
    State(state): State<AppState>,
    Json(request): Json<AddDatabaseRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if request.name.trim().is_empty() {
        return Err(bad_request("database name is required"));
    }
    state.databases.upsert(&request.name, request.config).await?;
    Ok(Json(serde_json::json!({ "ok": true, "name": request.name })))
}

async fn handle_remove_database(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.databases.remove(&name).await?;
    Ok(Json(serde_json::json!({ "ok": true, "deleted": name })))
}

// ============ Prompt template admin ============

async fn handle_list_prompts(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let prompts = state.prompts.load()?;
    Ok(Json(serde_json::json!({ "prompts": prompts })))
}

#[derive(Deserialize)]
struct SetPromptRequest {
    template: String,
}

async fn handle_set_prompt(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<SetPromptRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if request.template.trim().is_empty() {
        return Err(bad_request("template is required"));
    }
    state.prompts.set(&name, &request.template).await?;
    Ok(Json(serde_json::json!({ "ok": true, "name": name })))
}
