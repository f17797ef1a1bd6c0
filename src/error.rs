//! Error taxonomy for the query and ingestion pipelines.
//!
//! Input, synthesis, validation, and execution failures are distinct
//! variants so the HTTP layer can map each to the right status code and the
//! caller can tell "could not generate SQL" apart from "unsafe SQL rejected".
//! Classification degradation is deliberately NOT an error: the classifier
//! falls back to retrieval instead of failing.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed request input (empty query, absent file field).
    #[error("{0}")]
    InvalidInput(String),

    /// A document id that is not present in the registry.
    #[error("unknown document: {0}")]
    UnknownDocument(String),

    /// A database name that is not present in the config store.
    #[error("no suitable database found: {0}")]
    UnknownDatabase(String),

    /// The synthesizer produced no usable statement.
    #[error("could not generate SQL")]
    SqlGeneration,

    /// The statement failed the fail-closed safety policy.
    #[error("SQL validation failed: {0}")]
    SqlValidation(String),

    /// The relational database rejected or failed the statement.
    /// The raw driver message is surfaced (known hardening gap, preserved).
    #[error("SQL execution failed: {0}")]
    SqlExecution(String),

    /// Schema introspection failed for one named database.
    #[error("schema load failed for '{db}': {message}")]
    SchemaLoad { db: String, message: String },

    /// A prompt template (or one of its slots) is missing. Fatal at the
    /// point of use — never silently defaulted.
    #[error("prompt configuration error: {0}")]
    PromptConfig(String),

    /// Unsupported uploaded document format.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Text extraction failed for a supported format.
    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("vector index error: {0}")]
    VectorIndex(String),

    /// Completion-service call failed after retries.
    #[error("completion service error: {0}")]
    Completion(String),

    /// Object storage upload/download/delete failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Document registry (SQLite) failure.
    #[error("registry error: {0}")]
    Registry(String),

    /// Asynchronous ingestion failed; the document record is marked `error`.
    #[error("ingestion failed: {0}")]
    Ingestion(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error is the caller's fault (maps to a 4xx response).
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_)
                | Error::UnknownDocument(_)
                | Error::UnknownDatabase(_)
                | Error::SqlGeneration
                | Error::SqlValidation(_)
                | Error::UnsupportedFormat(_)
        )
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Registry(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_errors_are_flagged() {
        assert!(Error::InvalidInput("query is required".into()).is_user_error());
        assert!(Error::SqlGeneration.is_user_error());
        assert!(Error::SqlValidation("forbidden token".into()).is_user_error());
        assert!(!Error::SqlExecution("connection refused".into()).is_user_error());
    }

    #[test]
    fn generation_and_validation_render_distinct_messages() {
        assert_eq!(Error::SqlGeneration.to_string(), "could not generate SQL");
        assert!(Error::SqlValidation("x".into())
            .to_string()
            .starts_with("SQL validation failed"));
    }
}
