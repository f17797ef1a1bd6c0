//! Query-mode classification.
//!
//! A completion call decides, per question, whether to answer from SQL,
//! from retrieval, or from both. The decision is advisory: any malformed
//! output — wrapper prose, invalid JSON, missing fields, a db_name that is
//! not actually configured — degrades to retrieval-only, which is always
//! available. Callers still re-validate `db_name` before touching a
//! database; the completion service is never trusted for routing.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::Result;
use crate::llm::{parse_json_lenient, ChatClient, ChatMessage};
use crate::models::{QueryMode, RouteDecision};
use crate::prompts::{self, PromptStore, PROMPT_CLASSIFIER};
use crate::schema::{condensed_schema_list, SchemaSnapshot};

/// Token budget for the classification response; the expected output is a
/// two-field JSON object.
const CLASSIFIER_MAX_TOKENS: u32 = 100;

#[derive(Debug, Deserialize)]
struct RawDecision {
    mode: String,
    #[serde(default)]
    db_name: Option<String>,
}

/// Decide the execution mode for a question given the available schemas.
///
/// Errors surface only for prompt-store misconfiguration or a failed
/// completion call; everything about the response itself is handled by
/// falling back.
pub async fn classify(
    chat: &ChatClient,
    store: &PromptStore,
    question: &str,
    schemas: &BTreeMap<String, SchemaSnapshot>,
) -> Result<RouteDecision> {
    let template = store.get(PROMPT_CLASSIFIER)?;
    let schema_list = condensed_schema_list(schemas);
    let prompt = prompts::render(
        &template,
        &[("schema_list", schema_list.as_str()), ("query", question)],
    )?;

    let response = chat
        .complete(&[ChatMessage::user(prompt)], 0.0, CLASSIFIER_MAX_TOKENS)
        .await?;

    let decision = parse_decision(&response, schemas);
    debug!(?decision, "classified query");
    Ok(decision)
}

/// Strict parse of the classifier response with safe degradation.
pub fn parse_decision(
    response: &str,
    schemas: &BTreeMap<String, SchemaSnapshot>,
) -> RouteDecision {
    let Some(raw) = parse_json_lenient::<RawDecision>(response) else {
        warn!("classifier response was not parseable, falling back to RAG");
        return RouteDecision::fallback();
    };

    let mode = match raw.mode.as_str() {
        "SQL" => QueryMode::Sql,
        "RAG" => QueryMode::Rag,
        "SQL+RAG" | "RAG+SQL" => QueryMode::Hybrid,
        other => {
            warn!(mode = %other, "classifier produced an unknown mode, falling back to RAG");
            return RouteDecision::fallback();
        }
    };

    let db_name = match raw.db_name {
        Some(name) if schemas.contains_key(&name) => Some(name),
        Some(name) => {
            warn!(db = %name, "classifier named an unknown database");
            if matches!(mode, QueryMode::Sql | QueryMode::Hybrid) {
                // SQL without a real database cannot run; retrieval can.
                return RouteDecision::fallback();
            }
            None
        }
        None => None,
    };

    if matches!(mode, QueryMode::Sql | QueryMode::Hybrid) && db_name.is_none() {
        return RouteDecision::fallback();
    }

    RouteDecision { mode, db_name }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnInfo, TableInfo};

    fn schemas() -> BTreeMap<String, SchemaSnapshot> {
        let mut m = BTreeMap::new();
        m.insert(
            "company".to_string(),
            SchemaSnapshot {
                tables: vec![TableInfo {
                    name: "employees".into(),
                    columns: vec![ColumnInfo {
                        name: "id".into(),
                        data_type: "integer".into(),
                        is_primary: true,
                    }],
                }],
            },
        );
        m
    }

    #[test]
    fn valid_sql_decision_passes_through() {
        let d = parse_decision(r#"{"mode": "SQL", "db_name": "company"}"#, &schemas());
        assert_eq!(
            d,
            RouteDecision {
                mode: QueryMode::Sql,
                db_name: Some("company".into())
            }
        );
    }

    #[test]
    fn rag_decision_carries_no_database() {
        let d = parse_decision(r#"{"mode": "RAG", "db_name": null}"#, &schemas());
        assert_eq!(d, RouteDecision::fallback());
    }

    #[test]
    fn hybrid_decision_is_recognized() {
        let d = parse_decision(r#"{"mode": "SQL+RAG", "db_name": "company"}"#, &schemas());
        assert_eq!(d.mode, QueryMode::Hybrid);
        assert_eq!(d.db_name.as_deref(), Some("company"));
    }

    #[test]
    fn non_json_falls_back_to_rag() {
        let d = parse_decision("I think this needs a database lookup.", &schemas());
        assert_eq!(d, RouteDecision::fallback());
    }

    #[test]
    fn wrapped_json_is_still_found() {
        let d = parse_decision(
            "Here you go:\n```json\n{\"mode\": \"SQL\", \"db_name\": \"company\"}\n```",
            &schemas(),
        );
        assert_eq!(d.mode, QueryMode::Sql);
    }

    #[test]
    fn unknown_mode_falls_back() {
        let d = parse_decision(r#"{"mode": "GRAPH", "db_name": "company"}"#, &schemas());
        assert_eq!(d, RouteDecision::fallback());
    }

    #[test]
    fn sql_with_unknown_database_falls_back() {
        let d = parse_decision(r#"{"mode": "SQL", "db_name": "finance"}"#, &schemas());
        assert_eq!(d, RouteDecision::fallback());
    }

    #[test]
    fn sql_without_database_falls_back() {
        let d = parse_decision(r#"{"mode": "SQL", "db_name": null}"#, &schemas());
        assert_eq!(d, RouteDecision::fallback());
    }
}
