//! Externally editable prompt templates.
//!
//! Templates live in a JSON file mapping name → text with `{slot}`
//! interpolation markers. The file is read fresh on every use; writes go
//! through a single-writer mutex so concurrent admin edits serialize within
//! the process (cross-process edits stay last-writer-wins, as in the file
//! format itself). A missing template or a template lacking a required slot
//! is a configuration error at the point of use — never silently defaulted.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tokio::sync::Mutex;

use crate::error::{Error, Result};

pub const PROMPT_CLASSIFIER: &str = "classifier";
pub const PROMPT_SQL_GENERATOR: &str = "sql_generator";

pub struct PromptStore {
    path: PathBuf,
    write_gate: Mutex<()>,
}

impl PromptStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_gate: Mutex::new(()),
        }
    }

    /// All templates, read fresh from disk.
    pub fn load(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| Error::PromptConfig(format!("{}: {}", self.path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::PromptConfig(format!("{}: {}", self.path.display(), e)))
    }

    /// One template by name; missing templates are fatal here.
    pub fn get(&self, name: &str) -> Result<String> {
        self.load()?
            .remove(name)
            .ok_or_else(|| Error::PromptConfig(format!("prompt template '{}' not found", name)))
    }

    pub async fn set(&self, name: &str, template: &str) -> Result<()> {
        let _guard = self.write_gate.lock().await;
        let mut prompts = self.load()?;
        prompts.insert(name.to_string(), template.to_string());
        self.write(&prompts)
    }

    /// Write the default classifier and SQL-generation templates unless the
    /// store already exists. Used by `docsql init`.
    pub async fn seed_defaults(&self) -> Result<()> {
        let _guard = self.write_gate.lock().await;
        if self.path.exists() {
            return Ok(());
        }
        let mut prompts = BTreeMap::new();
        prompts.insert(
            PROMPT_CLASSIFIER.to_string(),
            DEFAULT_CLASSIFIER_TEMPLATE.to_string(),
        );
        prompts.insert(
            PROMPT_SQL_GENERATOR.to_string(),
            DEFAULT_SQL_TEMPLATE.to_string(),
        );
        self.write(&prompts)
    }

    fn write(&self, prompts: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::PromptConfig(e.to_string()))?;
        }
        let content = serde_json::to_string_pretty(prompts)
            .map_err(|e| Error::PromptConfig(e.to_string()))?;
        std::fs::write(&self.path, content)
            .map_err(|e| Error::PromptConfig(format!("{}: {}", self.path.display(), e)))
    }
}

/// Interpolate `{slot}` markers. Every listed slot must appear in the
/// template at least once; a template that lost a slot to editing fails
/// loudly instead of producing a silently broken prompt.
pub fn render(template: &str, slots: &[(&str, &str)]) -> Result<String> {
    let mut out = template.to_string();
    for (name, value) in slots {
        let marker = format!("{{{}}}", name);
        if !out.contains(&marker) {
            return Err(Error::PromptConfig(format!(
                "template is missing required slot '{{{}}}'",
                name
            )));
        }
        out = out.replace(&marker, value);
    }
    Ok(out)
}

pub const DEFAULT_CLASSIFIER_TEMPLATE: &str = r#"You are a classifier that decides whether a user query should be answered by SQL (structured database query), RAG (document retrieval), or both.

Databases and their tables:
{schema_list}

Rules:
- If the question is about tabular, numeric, or relational data (employees, sales, customers, etc.), or names an entity with matching identifying columns (name, email, ...), classify as SQL and pick the most relevant database.
- If the question asks for concepts, explanations, or text from uploaded documents, classify as RAG and set db_name to null.
- Choose SQL+RAG only when the question plausibly needs both a database lookup and explanatory context from documents.

Return ONLY a JSON object like:
{
  "mode": "SQL" or "RAG" or "SQL+RAG",
  "db_name": "database_name" or null
}

Question: {query}
"#;

pub const DEFAULT_SQL_TEMPLATE: &str = r#"You are a precise SQL generator for PostgreSQL.

Return ONLY a valid JSON object:
{"sql": "...", "params": [...]}

Rules:
- Only SELECT queries are allowed, no mutation (INSERT, UPDATE, DELETE, DROP).
- Use numbered placeholders $1, $2 ... for params; never inline user-supplied values.
- Use the schema below:
{schema_description}

Guidelines:
- Select the columns that carry identifying or descriptive info (name, title, position, department, description, notes, address) when the question is about a person, product, or entity.
- Avoid selecting purely technical fields (ids, timestamps, foreign keys) unless directly relevant.
- If the user asks about "tables", "schema", or "columns", generate introspection queries against information_schema.
- Do not include semicolons.

User Question: {question}
Output:
"#;
