//! SQL guard and executor.
//!
//! Validation is fail-closed: only statements that start with `select` and
//! contain none of the forbidden tokens reach the database, and a statement
//! with no LIMIT of its own gets one appended so no query returns unbounded
//! rows. Execution opens a fresh connection per call, runs exactly once,
//! and releases the connection on both success and failure paths.

use sqlx::postgres::{PgArguments, PgConnectOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Connection, PgConnection, Postgres, Row, TypeInfo};

use crate::dbconfigs::DbConnConfig;
use crate::error::{Error, Result};
use crate::models::SqlRow;

/// Tokens that reject a statement outright: mutation keywords, statement
/// separators, comment sequences. Matched case-insensitively anywhere in
/// the statement.
const FORBIDDEN: [&str; 8] = [
    "insert ", "update ", "delete ", "drop ", "alter ", "create ", ";", "--",
];

/// Fail-closed safety policy. Never executes anything that fails here.
pub fn validate_sql(sql: &str) -> Result<()> {
    let s = sql.trim().to_lowercase();
    if !s.starts_with("select") {
        return Err(Error::SqlValidation(
            "only SELECT queries are allowed".into(),
        ));
    }
    for token in FORBIDDEN {
        if s.contains(token) {
            return Err(Error::SqlValidation(format!(
                "forbidden SQL token: {}",
                token.trim()
            )));
        }
    }
    Ok(())
}

/// Append `LIMIT {row_limit}` unless the statement already carries a limit
/// clause (case-insensitive substring check, as in the source policy).
pub fn ensure_limit(sql: &str, row_limit: i64) -> String {
    if sql.to_lowercase().contains("limit") {
        sql.to_string()
    } else {
        format!("{} LIMIT {}", sql.trim_end(), row_limit)
    }
}

/// Check the synthesizer's numbered placeholders against the supplied
/// params. `$n` is already the executor's native positional form; what can
/// still go wrong is a reference past the end of the param list.
pub fn check_placeholders(sql: &str, param_count: usize) -> Result<usize> {
    let mut max_ref = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
            if end > start {
                let n: usize = sql[start..end].parse().unwrap_or(0);
                if n == 0 {
                    return Err(Error::SqlValidation("invalid placeholder $0".into()));
                }
                if n > param_count {
                    return Err(Error::SqlValidation(format!(
                        "placeholder ${} but only {} params supplied",
                        n, param_count
                    )));
                }
                max_ref = max_ref.max(n);
            }
            i = end;
        } else {
            i += 1;
        }
    }
    Ok(max_ref)
}

/// Validate and execute a synthesized statement, returning every row as an
/// ordered column → value mapping.
pub async fn execute(
    sql: &str,
    params: &[serde_json::Value],
    config: &DbConnConfig,
    row_limit: i64,
) -> Result<Vec<SqlRow>> {
    validate_sql(sql)?;
    let used = check_placeholders(sql, params.len())?;
    let sql = ensure_limit(sql, row_limit);

    let options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .database(&config.dbname)
        .username(&config.user)
        .password(&config.password);

    let mut conn = PgConnection::connect_with(&options)
        .await
        .map_err(|e| Error::SqlExecution(e.to_string()))?;

    let result = run_statement(&mut conn, &sql, &params[..used]).await;
    conn.close().await.ok();
    result
}

async fn run_statement(
    conn: &mut PgConnection,
    sql: &str,
    params: &[serde_json::Value],
) -> Result<Vec<SqlRow>> {
    let mut query = sqlx::query(sql);
    for param in params {
        query = bind_param(query, param);
    }

    let rows = query
        .fetch_all(conn)
        .await
        .map_err(|e| Error::SqlExecution(e.to_string()))?;

    Ok(rows.iter().map(to_sql_row).collect())
}

fn bind_param<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &serde_json::Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        serde_json::Value::Null => query.bind(Option::<String>::None),
        serde_json::Value::Bool(b) => query.bind(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else {
                query.bind(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}

fn to_sql_row(row: &PgRow) -> SqlRow {
    let mut fields = Vec::with_capacity(row.columns().len());
    for (i, column) in row.columns().iter().enumerate() {
        let value = decode_value(row, i, column.type_info().name());
        fields.push((column.name().to_string(), value));
    }
    SqlRow(fields)
}

/// Decode one column into JSON by its PostgreSQL type name. Types outside
/// the table fall through a best-effort chain and end as null.
fn decode_value(row: &PgRow, i: usize, type_name: &str) -> serde_json::Value {
    use serde_json::Value;

    fn opt<T, F>(v: sqlx::Result<Option<T>>, f: F) -> Option<Value>
    where
        F: FnOnce(T) -> Value,
    {
        match v {
            Ok(Some(inner)) => Some(f(inner)),
            Ok(None) => Some(Value::Null),
            Err(_) => None,
        }
    }

    let decoded = match type_name {
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => {
            opt(row.try_get::<Option<String>, _>(i), Value::from)
        }
        "INT2" => opt(row.try_get::<Option<i16>, _>(i), |v| Value::from(v as i64)),
        "INT4" => opt(row.try_get::<Option<i32>, _>(i), |v| Value::from(v as i64)),
        "INT8" => opt(row.try_get::<Option<i64>, _>(i), Value::from),
        "FLOAT4" => opt(row.try_get::<Option<f32>, _>(i), |v| Value::from(v as f64)),
        "FLOAT8" => opt(row.try_get::<Option<f64>, _>(i), Value::from),
        "BOOL" => opt(row.try_get::<Option<bool>, _>(i), Value::from),
        "DATE" => opt(row.try_get::<Option<chrono::NaiveDate>, _>(i), |v| {
            Value::from(v.to_string())
        }),
        "TIME" => opt(row.try_get::<Option<chrono::NaiveTime>, _>(i), |v| {
            Value::from(v.to_string())
        }),
        "TIMESTAMP" => opt(row.try_get::<Option<chrono::NaiveDateTime>, _>(i), |v| {
            Value::from(v.to_string())
        }),
        "TIMESTAMPTZ" => opt(
            row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i),
            |v| Value::from(v.to_rfc3339()),
        ),
        "UUID" => opt(row.try_get::<Option<uuid::Uuid>, _>(i), |v| {
            Value::from(v.to_string())
        }),
        "JSON" | "JSONB" => opt(row.try_get::<Option<serde_json::Value>, _>(i), |v| v),
        _ => None,
    };

    if let Some(value) = decoded {
        return value;
    }

    // Unknown type: try the common decodings before giving up.
    if let Ok(v) = row.try_get::<Option<String>, _>(i) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(i) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(i) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    Value::Null
}
