//! Natural-language-to-SQL synthesis.
//!
//! Renders the `sql_generator` template with the schema description and the
//! question, asks the completion service at temperature 0, and parses the
//! `{"sql": ..., "params": [...]}` object out of whatever surrounds it.
//! Failures never escape this boundary as errors: the synthesizer returns an
//! empty statement, which callers report as "could not generate SQL".

use serde::Deserialize;
use tracing::warn;

use crate::error::Result;
use crate::llm::{parse_json_lenient, ChatClient, ChatMessage};
use crate::prompts::{self, PromptStore, PROMPT_SQL_GENERATOR};

const SQL_MAX_TOKENS: u32 = 300;

#[derive(Debug, Deserialize, PartialEq)]
pub struct GeneratedSql {
    #[serde(default)]
    pub sql: String,
    #[serde(default)]
    pub params: Vec<serde_json::Value>,
}

impl GeneratedSql {
    fn empty() -> Self {
        GeneratedSql {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sql.trim().is_empty()
    }
}

/// Generate a parameterized SELECT for `question` against the described
/// schema. Only prompt-store misconfiguration is an error; completion and
/// parsing failures yield an empty statement.
pub async fn generate(
    chat: &ChatClient,
    store: &PromptStore,
    schema_description: &str,
    question: &str,
) -> Result<GeneratedSql> {
    let template = store.get(PROMPT_SQL_GENERATOR)?;
    let prompt = prompts::render(
        &template,
        &[
            ("schema_description", schema_description),
            ("question", question),
        ],
    )?;

    let response = match chat
        .complete(&[ChatMessage::user(prompt)], 0.0, SQL_MAX_TOKENS)
        .await
    {
        Ok(text) => text,
        Err(e) => {
            warn!("SQL synthesis completion failed: {}", e);
            return Ok(GeneratedSql::empty());
        }
    };

    Ok(parse_generated(&response))
}

/// Parse the synthesis response; anything unusable becomes the empty
/// statement.
pub fn parse_generated(response: &str) -> GeneratedSql {
    match parse_json_lenient::<GeneratedSql>(response) {
        Some(generated) if !generated.is_empty() => generated,
        Some(_) => {
            warn!("SQL synthesis returned an empty statement");
            GeneratedSql::empty()
        }
        None => {
            warn!("SQL synthesis response was not parseable");
            GeneratedSql::empty()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_response_parses() {
        let out = parse_generated(
            r#"{"sql": "SELECT name FROM employees WHERE hired_at > $1", "params": ["2020-01-01"]}"#,
        );
        assert_eq!(out.sql, "SELECT name FROM employees WHERE hired_at > $1");
        assert_eq!(out.params, vec![serde_json::json!("2020-01-01")]);
    }

    #[test]
    fn prose_around_the_object_is_tolerated() {
        let out = parse_generated(
            "Here is your query:\n{\"sql\": \"SELECT 1\", \"params\": []}\nEnjoy!",
        );
        assert_eq!(out.sql, "SELECT 1");
    }

    #[test]
    fn missing_params_default_to_empty() {
        let out = parse_generated(r#"{"sql": "SELECT 1"}"#);
        assert_eq!(out.sql, "SELECT 1");
        assert!(out.params.is_empty());
    }

    #[test]
    fn no_json_span_yields_empty() {
        let out = parse_generated("I cannot express that as SQL.");
        assert!(out.is_empty());
        assert!(out.params.is_empty());
    }

    #[test]
    fn invalid_json_yields_empty() {
        assert!(parse_generated("{sql: select}").is_empty());
    }

    #[test]
    fn missing_sql_key_yields_empty() {
        assert!(parse_generated(r#"{"query": "SELECT 1"}"#).is_empty());
    }

    #[test]
    fn blank_sql_yields_empty() {
        assert!(parse_generated(r#"{"sql": "   ", "params": []}"#).is_empty());
    }
}
