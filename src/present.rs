//! Result presenter: shrink raw row sets into a human-consumable shape.
//!
//! Rows are truncated to `max_rows` in arrival order. Anonymous columns are
//! renamed by parsing the statement's select-list, falling back to the
//! schema snapshot's column roster, then to synthetic `col<i>` names. Wide
//! results (more than six columns) are narrowed to the "descriptive"
//! columns by name substring. All of this is display-only — it never
//! affects what was executed.

use crate::models::SqlRow;
use crate::schema::SchemaSnapshot;

/// Width above which narrowing kicks in.
const MAX_DISPLAY_COLUMNS: usize = 6;

/// Name fragments that mark a column as descriptive enough to keep when
/// narrowing.
const DESCRIPTIVE_FRAGMENTS: [&str; 4] = ["name", "title", "email", "desc"];

/// Column names PostgreSQL hands back for unnamed expressions.
fn is_anonymous(name: &str) -> bool {
    name.is_empty() || name == "?column?"
}

/// Shape raw rows for display.
pub fn present(
    rows: Vec<SqlRow>,
    snapshot: Option<&SchemaSnapshot>,
    sql: &str,
    max_rows: usize,
) -> Vec<SqlRow> {
    let mut rows = rows;
    rows.truncate(max_rows);

    let needs_names = rows
        .iter()
        .any(|row| row.columns().any(is_anonymous));
    if needs_names {
        if let Some(width) = rows.iter().map(SqlRow::len).max() {
            let names = recover_columns(width, snapshot, sql);
            for row in &mut rows {
                for (i, field) in row.0.iter_mut().enumerate() {
                    if is_anonymous(&field.0) {
                        if let Some(name) = names.get(i) {
                            field.0 = name.clone();
                        }
                    }
                }
            }
        }
    }

    let width = rows.iter().map(SqlRow::len).max().unwrap_or(0);
    if width > MAX_DISPLAY_COLUMNS {
        let kept: Vec<String> = rows
            .first()
            .map(|row| {
                row.columns()
                    .filter(|name| {
                        let lower = name.to_lowercase();
                        DESCRIPTIVE_FRAGMENTS.iter().any(|f| lower.contains(f))
                    })
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        // Narrowing must never produce an empty schema.
        if !kept.is_empty() {
            for row in &mut rows {
                row.0.retain(|(name, _)| kept.contains(name));
            }
        }
    }

    rows
}

/// Best-effort column names for positional results: the statement's
/// select-list, else every column of every table in the snapshot, else
/// `col<i>`.
pub fn recover_columns(
    width: usize,
    snapshot: Option<&SchemaSnapshot>,
    sql: &str,
) -> Vec<String> {
    if let Some(parsed) = parse_select_columns(sql) {
        if parsed.len() == width {
            return parsed;
        }
    }

    if let Some(snap) = snapshot {
        let all: Vec<String> = snap
            .tables
            .iter()
            .flat_map(|t| t.columns.iter().map(|c| c.name.clone()))
            .collect();
        if all.len() == width {
            return all;
        }
    }

    (0..width).map(|i| format!("col{}", i)).collect()
}

/// Naive parse of the `SELECT <cols> FROM` list: comma split, aliases kept
/// as written, anything involving `*` gives up.
pub fn parse_select_columns(sql: &str) -> Option<Vec<String>> {
    let lower = sql.to_lowercase();
    let select_at = lower.find("select")? + "select".len();
    let from_at = lower[select_at..].find(" from ")? + select_at;

    let list = sql[select_at..from_at].trim();
    if list.contains('*') {
        return None;
    }

    let columns: Vec<String> = list
        .split(',')
        .map(|piece| {
            let piece = piece.trim();
            // "t.hired_at AS hired" → "hired"; "t.hired_at" → "hired_at".
            let named = piece
                .rsplit(|c: char| c.is_whitespace())
                .next()
                .unwrap_or(piece);
            named
                .rsplit('.')
                .next()
                .unwrap_or(named)
                .trim_matches('"')
                .to_string()
        })
        .filter(|c| !c.is_empty())
        .collect();

    if columns.is_empty() {
        None
    } else {
        Some(columns)
    }
}
