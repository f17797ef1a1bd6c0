//! Relational schema registry.
//!
//! Snapshots are produced by re-introspecting the live database's
//! `information_schema` (public schema, ordered by table then ordinal
//! position) and rendered into prompt-sized descriptions. One database's
//! failure never blocks snapshotting the others. Caching is opt-in with an
//! explicit TTL; the default re-introspects on every use.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnectOptions;
use sqlx::{Connection, PgConnection};
use tokio::sync::Mutex;
use tracing::warn;

use crate::dbconfigs::DbConnConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    /// Heuristic annotation only — never used for query correctness.
    #[serde(default)]
    pub is_primary: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SchemaSnapshot {
    pub tables: Vec<TableInfo>,
}

/// Rendering knobs for [`describe`].
#[derive(Debug, Clone)]
pub struct DescribeOptions {
    /// Cap on displayed columns per table; the remainder is summarized as
    /// a "+N more" marker so the count stays faithful.
    pub max_cols: Option<usize>,
    /// Alphabetical instead of ordinal column order.
    pub sort_cols: bool,
    /// Indented multiline output instead of one line per table.
    pub verbose: bool,
}

impl Default for DescribeOptions {
    fn default() -> Self {
        Self {
            max_cols: None,
            sort_cols: false,
            verbose: true,
        }
    }
}

/// Flag likely primary-key columns by name: `id`, `<table>_id`, or a short
/// name ending in `id` (`uid`, `pid`).
fn looks_like_primary_key(table: &str, column: &str) -> bool {
    column == "id"
        || column == format!("{}_id", table)
        || (column.len() <= 3 && column.ends_with("id"))
}

/// Introspect one database into a snapshot over a fresh connection.
pub async fn snapshot(config: &DbConnConfig) -> Result<SchemaSnapshot> {
    let options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .database(&config.dbname)
        .username(&config.user)
        .password(&config.password);

    let mut conn = PgConnection::connect_with(&options)
        .await
        .map_err(|e| Error::SchemaLoad {
            db: config.dbname.clone(),
            message: e.to_string(),
        })?;

    let rows: Vec<(String, String, String)> = sqlx::query_as(
        r#"
        SELECT table_name::text, column_name::text, data_type::text
        FROM information_schema.columns
        WHERE table_schema = 'public'
        ORDER BY table_name, ordinal_position
        "#,
    )
    .fetch_all(&mut conn)
    .await
    .map_err(|e| Error::SchemaLoad {
        db: config.dbname.clone(),
        message: e.to_string(),
    })?;

    conn.close().await.ok();

    let mut tables: Vec<TableInfo> = Vec::new();
    for (table, column, data_type) in rows {
        if tables.last().map(|t| t.name.as_str()) != Some(table.as_str()) {
            tables.push(TableInfo {
                name: table.clone(),
                columns: Vec::new(),
            });
        }
        let is_primary = looks_like_primary_key(&table, &column);
        if let Some(current) = tables.last_mut() {
            current.columns.push(ColumnInfo {
                name: column,
                data_type,
                is_primary,
            });
        }
    }

    Ok(SchemaSnapshot { tables })
}

/// Render a snapshot as text for prompts or operators.
pub fn describe(snapshot: &SchemaSnapshot, opts: &DescribeOptions) -> String {
    let mut parts = Vec::with_capacity(snapshot.tables.len());

    for table in &snapshot.tables {
        let mut columns = table.columns.clone();
        if opts.sort_cols {
            columns.sort_by(|a, b| a.name.cmp(&b.name));
        }

        let shown = opts.max_cols.unwrap_or(columns.len()).min(columns.len());
        let hidden = columns.len() - shown;

        let mut rendered: Vec<String> = columns[..shown]
            .iter()
            .map(|c| format!("{} ({})", c.name, c.data_type))
            .collect();
        if hidden > 0 {
            rendered.push(format!("+{} more", hidden));
        }

        let pks: Vec<&str> = table
            .columns
            .iter()
            .filter(|c| c.is_primary)
            .map(|c| c.name.as_str())
            .collect();

        if opts.verbose {
            let mut block = format!("Table {}:\n  Columns: {}", table.name, rendered.join(", "));
            if !pks.is_empty() {
                block.push_str(&format!("\n  Primary Key: {}", pks.join(", ")));
            }
            parts.push(block);
        } else {
            parts.push(format!("{}: {}", table.name, rendered.join(", ")));
        }
    }

    parts.join(if opts.verbose { "\n\n" } else { "\n" })
}

/// Columns shown per table in the classifier's condensed listing. Bounds the
/// prompt size regardless of schema width.
const CLASSIFIER_COLUMN_CAP: usize = 5;

/// One line per database for the classifier prompt: table names with a
/// bounded prefix of column names.
pub fn condensed_schema_list(schemas: &BTreeMap<String, SchemaSnapshot>) -> String {
    let mut lines = Vec::with_capacity(schemas.len());
    for (db_name, snapshot) in schemas {
        let tables: Vec<String> = snapshot
            .tables
            .iter()
            .map(|t| {
                let shown = t.columns.len().min(CLASSIFIER_COLUMN_CAP);
                let cols: Vec<&str> = t.columns[..shown].iter().map(|c| c.name.as_str()).collect();
                if t.columns.len() > shown {
                    format!("{}({}, ...)", t.name, cols.join(", "))
                } else {
                    format!("{}({})", t.name, cols.join(", "))
                }
            })
            .collect();
        lines.push(format!("- {}: {}", db_name, tables.join(", ")));
    }
    lines.join("\n")
}

/// Snapshot service with per-database failure isolation, snapshot
/// persistence, and the opt-in TTL cache.
pub struct SchemaRegistry {
    snapshot_dir: PathBuf,
    cache_ttl: Duration,
    cache: Mutex<Option<(Instant, BTreeMap<String, SchemaSnapshot>)>>,
}

impl SchemaRegistry {
    pub fn new(snapshot_dir: PathBuf, cache_ttl_secs: u64) -> Self {
        Self {
            snapshot_dir,
            cache_ttl: Duration::from_secs(cache_ttl_secs),
            cache: Mutex::new(None),
        }
    }

    /// Snapshot every configured database. A database that cannot be
    /// reached is logged and skipped; the rest still load.
    pub async fn snapshot_all(
        &self,
        configs: &BTreeMap<String, DbConnConfig>,
    ) -> BTreeMap<String, SchemaSnapshot> {
        if !self.cache_ttl.is_zero() {
            let cached = self.cache.lock().await;
            if let Some((at, schemas)) = cached.as_ref() {
                if at.elapsed() < self.cache_ttl {
                    return schemas.clone();
                }
            }
        }

        let mut schemas = BTreeMap::new();
        for (db_name, config) in configs {
            match snapshot(config).await {
                Ok(snap) => {
                    self.persist(db_name, &snap);
                    schemas.insert(db_name.clone(), snap);
                }
                Err(e) => {
                    warn!(db = %db_name, "schema load failed: {}", e);
                }
            }
        }

        if !self.cache_ttl.is_zero() {
            let mut cached = self.cache.lock().await;
            *cached = Some((Instant::now(), schemas.clone()));
        }

        schemas
    }

    /// Serialized copy kept on disk for caching and debugging.
    fn persist(&self, db_name: &str, snap: &SchemaSnapshot) {
        if std::fs::create_dir_all(&self.snapshot_dir).is_err() {
            return;
        }
        let path = self.snapshot_dir.join(format!("{}_schema.json", db_name));
        match serde_json::to_string_pretty(snap) {
            Ok(content) => {
                if let Err(e) = std::fs::write(&path, content) {
                    warn!("could not persist schema snapshot {}: {}", path.display(), e);
                }
            }
            Err(e) => warn!("could not serialize schema snapshot: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn employees() -> SchemaSnapshot {
        SchemaSnapshot {
            tables: vec![TableInfo {
                name: "employees".into(),
                columns: vec![
                    ColumnInfo {
                        name: "id".into(),
                        data_type: "integer".into(),
                        is_primary: true,
                    },
                    ColumnInfo {
                        name: "name".into(),
                        data_type: "text".into(),
                        is_primary: false,
                    },
                    ColumnInfo {
                        name: "hired_at".into(),
                        data_type: "date".into(),
                        is_primary: false,
                    },
                ],
            }],
        }
    }

    fn wide_table(cols: usize) -> SchemaSnapshot {
        SchemaSnapshot {
            tables: vec![TableInfo {
                name: "metrics".into(),
                columns: (0..cols)
                    .map(|i| ColumnInfo {
                        name: format!("col_{:02}", i),
                        data_type: "numeric".into(),
                        is_primary: false,
                    })
                    .collect(),
            }],
        }
    }

    #[test]
    fn pk_heuristic_matches_conventional_names() {
        assert!(looks_like_primary_key("employees", "id"));
        assert!(looks_like_primary_key("employees", "employees_id"));
        assert!(looks_like_primary_key("events", "uid"));
        assert!(!looks_like_primary_key("employees", "department_id"));
        assert!(!looks_like_primary_key("employees", "paid"));
    }

    #[test]
    fn verbose_description_is_indented_with_pk() {
        let out = describe(&employees(), &DescribeOptions::default());
        assert!(out.starts_with("Table employees:"));
        assert!(out.contains("  Columns: id (integer), name (text), hired_at (date)"));
        assert!(out.contains("  Primary Key: id"));
    }

    #[test]
    fn compact_description_is_one_line_per_table() {
        let opts = DescribeOptions {
            verbose: false,
            ..DescribeOptions::default()
        };
        let out = describe(&employees(), &opts);
        assert_eq!(out, "employees: id (integer), name (text), hired_at (date)");
    }

    #[test]
    fn max_cols_truncates_and_keeps_count() {
        let opts = DescribeOptions {
            max_cols: Some(3),
            verbose: false,
            ..DescribeOptions::default()
        };
        let out = describe(&wide_table(10), &opts);
        assert!(out.contains("col_00"));
        assert!(out.contains("col_02"));
        assert!(!out.contains("col_03"));
        assert!(out.contains("+7 more"));
    }

    #[test]
    fn sort_cols_orders_alphabetically() {
        let mut snap = employees();
        snap.tables[0].columns.reverse();
        let opts = DescribeOptions {
            sort_cols: true,
            verbose: false,
            ..DescribeOptions::default()
        };
        let out = describe(&snap, &opts);
        let hired = out.find("hired_at").unwrap();
        let id = out.find("id (").unwrap();
        let name = out.find("name (").unwrap();
        assert!(hired < id && id < name);
    }

    #[test]
    fn condensed_list_caps_columns_at_five() {
        let mut schemas = BTreeMap::new();
        schemas.insert("warehouse".to_string(), wide_table(9));
        schemas.insert("hr".to_string(), employees());
        let out = condensed_schema_list(&schemas);

        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("- hr: employees(id, name, hired_at)"));
        assert!(lines[1].contains("col_04"));
        assert!(!lines[1].contains("col_05"));
        assert!(lines[1].contains("..."));
    }
}
