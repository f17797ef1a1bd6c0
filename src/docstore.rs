//! Document registry.
//!
//! A small SQLite database tracks every uploaded document: identity, source
//! filename, ingestion status, chunk count, and the object-storage key of
//! the raw bytes. The ingestion worker is the only writer for a given
//! document after upload, and flips `pending` to `processed` or `error`
//! exactly once.

use chrono::{TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::models::{DocumentRecord, DocumentStatus};

pub async fn connect(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::Registry(e.to_string()))?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
        .map_err(|e| Error::Registry(e.to_string()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Idempotent schema creation.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            document_id TEXT PRIMARY KEY,
            source_name TEXT NOT NULL,
            status TEXT NOT NULL,
            chunk_count INTEGER NOT NULL DEFAULT 0,
            storage_key TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn insert_pending(
    pool: &SqlitePool,
    document_id: &str,
    source_name: &str,
    storage_key: &str,
) -> Result<DocumentRecord> {
    let created_at = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO documents (document_id, source_name, status, chunk_count, storage_key, created_at)
        VALUES (?, ?, 'pending', 0, ?, ?)
        "#,
    )
    .bind(document_id)
    .bind(source_name)
    .bind(storage_key)
    .bind(created_at.timestamp())
    .execute(pool)
    .await?;

    Ok(DocumentRecord {
        document_id: document_id.to_string(),
        source_name: source_name.to_string(),
        status: DocumentStatus::Pending,
        chunk_count: 0,
        storage_key: storage_key.to_string(),
        created_at,
    })
}

/// The success terminal state; also the only place chunk_count becomes
/// meaningful.
pub async fn mark_processed(pool: &SqlitePool, document_id: &str, chunk_count: i64) -> Result<()> {
    let updated = sqlx::query(
        "UPDATE documents SET status = 'processed', chunk_count = ? WHERE document_id = ?",
    )
    .bind(chunk_count)
    .bind(document_id)
    .execute(pool)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(Error::UnknownDocument(document_id.to_string()));
    }
    Ok(())
}

/// The failure terminal state. No automatic retry.
pub async fn mark_error(pool: &SqlitePool, document_id: &str) -> Result<()> {
    sqlx::query("UPDATE documents SET status = 'error' WHERE document_id = ?")
        .bind(document_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get(pool: &SqlitePool, document_id: &str) -> Result<Option<DocumentRecord>> {
    let row = sqlx::query(
        "SELECT document_id, source_name, status, chunk_count, storage_key, created_at
         FROM documents WHERE document_id = ?",
    )
    .bind(document_id)
    .fetch_optional(pool)
    .await?;

    row.map(record_from_row).transpose()
}

pub async fn list(pool: &SqlitePool) -> Result<Vec<DocumentRecord>> {
    let rows = sqlx::query(
        "SELECT document_id, source_name, status, chunk_count, storage_key, created_at
         FROM documents ORDER BY created_at DESC, document_id",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(record_from_row).collect()
}

/// Remove the registry row. Returns false when the id was unknown.
pub async fn delete(pool: &SqlitePool, document_id: &str) -> Result<bool> {
    let deleted = sqlx::query("DELETE FROM documents WHERE document_id = ?")
        .bind(document_id)
        .execute(pool)
        .await?;
    Ok(deleted.rows_affected() > 0)
}

fn record_from_row(row: sqlx::sqlite::SqliteRow) -> Result<DocumentRecord> {
    let status_text: String = row.get("status");
    let status = DocumentStatus::parse(&status_text)
        .ok_or_else(|| Error::Registry(format!("unknown document status: {}", status_text)))?;
    let created_ts: i64 = row.get("created_at");

    Ok(DocumentRecord {
        document_id: row.get("document_id"),
        source_name: row.get("source_name"),
        status,
        chunk_count: row.get("chunk_count"),
        storage_key: row.get("storage_key"),
        created_at: Utc
            .timestamp_opt(created_ts, 0)
            .single()
            .unwrap_or_else(Utc::now),
    })
}
