//! Pipeline-level properties that cut across modules, exercised in-process.
//! Anything needing a live Qdrant, PostgreSQL, embedding model, or
//! completion service stays out; these tests cover the seams between
//! extraction, chunking, the SQL guard, presentation, classification
//! parsing, and the document registry.

use std::collections::BTreeMap;

use docsql::chunk::chunk_text;
use docsql::classify::parse_decision;
use docsql::docstore;
use docsql::extract::extract_text;
use docsql::models::{DocumentStatus, QueryMode, RouteDecision, SqlRow};
use docsql::object_store::{LocalStore, ObjectStore};
use docsql::present::present;
use docsql::prompts::{self, PromptStore, PROMPT_CLASSIFIER, PROMPT_SQL_GENERATOR};
use docsql::queue::{self, IngestJob, TaskQueue};
use docsql::schema::{condensed_schema_list, ColumnInfo, SchemaSnapshot, TableInfo};
use docsql::sqlexec::{check_placeholders, ensure_limit, validate_sql};
use docsql::sqlgen::parse_generated;

fn employees_schema() -> BTreeMap<String, SchemaSnapshot> {
    let mut schemas = BTreeMap::new();
    schemas.insert(
        "company".to_string(),
        SchemaSnapshot {
            tables: vec![TableInfo {
                name: "employees".into(),
                columns: ["id", "name", "hired_at"]
                    .iter()
                    .map(|n| ColumnInfo {
                        name: n.to_string(),
                        data_type: "text".into(),
                        is_primary: *n == "id",
                    })
                    .collect(),
            }],
        },
    );
    schemas
}

// ============ Extraction → chunking ============

#[test]
fn plain_text_upload_chunks_like_the_three_page_scenario() {
    // ~2100 characters of plain text, chunk_size 700 / overlap 100.
    let body = "Quarterly results were strong across all regions this year. ".repeat(35);
    assert!(body.len() >= 2100);

    let text = extract_text("report.txt", body.as_bytes()).unwrap();
    assert!(!text.is_empty());

    let chunks = chunk_text(&text, 700, 100);
    assert!(chunks.len() >= 3);

    // Contiguous 0-based indices, and re-chunking is identical.
    for (i, c) in chunks.iter().enumerate() {
        assert_eq!(c.chunk_index, i as i64);
    }
    assert_eq!(chunks, chunk_text(&text, 700, 100));
}

#[test]
fn unsupported_upload_fails_without_side_effects() {
    let err = extract_text("slides.pptx", b"anything").unwrap_err();
    assert!(err.to_string().contains("unsupported format"));
}

// ============ Guard properties ============

#[test]
fn guard_rejects_piggybacked_statements() {
    assert!(validate_sql("select * from t; drop table t").is_err());
    assert!(validate_sql("select * from t --").is_err());
    assert!(validate_sql("drop table t").is_err());
    assert!(validate_sql("SELECT name FROM employees WHERE hired_at > $1").is_ok());
}

#[test]
fn limit_is_appended_exactly_once() {
    let sql = "select name from employees";
    let limited = ensure_limit(sql, 1000);
    assert!(limited.ends_with("LIMIT 1000"));
    // Running the guard again must not duplicate it.
    assert_eq!(ensure_limit(&limited, 1000), limited);
}

#[test]
fn synthesized_placeholders_are_checked_against_params() {
    let generated = parse_generated(
        r#"{"sql": "SELECT name FROM employees WHERE hired_at > $1", "params": ["2020-01-01"]}"#,
    );
    assert!(validate_sql(&generated.sql).is_ok());
    assert_eq!(
        check_placeholders(&generated.sql, generated.params.len()).unwrap(),
        1
    );
}

// ============ Classification ============

#[test]
fn classifier_fallback_is_exactly_rag_with_no_database() {
    let decision = parse_decision("the model rambled instead of emitting JSON", &employees_schema());
    assert_eq!(
        decision,
        RouteDecision {
            mode: QueryMode::Rag,
            db_name: None
        }
    );
}

#[test]
fn employee_question_routes_to_sql_when_the_model_says_so() {
    // "List employees hired after 2020" → the classifier picks the database
    // whose schema carries the employees table.
    let decision = parse_decision(
        r#"{"mode": "SQL", "db_name": "company"}"#,
        &employees_schema(),
    );
    assert_eq!(decision.mode, QueryMode::Sql);
    let db = decision.db_name.unwrap();
    assert!(employees_schema()[&db]
        .tables
        .iter()
        .any(|t| t.name == "employees"));
}

#[test]
fn classifier_prompt_renders_from_seeded_template() {
    let schema_list = condensed_schema_list(&employees_schema());
    assert!(schema_list.contains("- company: employees(id, name, hired_at)"));

    let prompt = prompts::render(
        prompts::DEFAULT_CLASSIFIER_TEMPLATE,
        &[
            ("schema_list", schema_list.as_str()),
            ("query", "List employees hired after 2020"),
        ],
    )
    .unwrap();
    assert!(prompt.contains("employees(id, name, hired_at)"));
    assert!(prompt.contains("List employees hired after 2020"));
}

// ============ Presentation ============

#[test]
fn presenter_shapes_wide_results_for_display() {
    let rows: Vec<SqlRow> = (0..30)
        .map(|i| {
            SqlRow(vec![
                ("id".into(), serde_json::json!(i)),
                ("name".into(), serde_json::json!(format!("person {}", i))),
                ("email".into(), serde_json::json!("x@example.com")),
                ("dept".into(), serde_json::json!("eng")),
                ("salary".into(), serde_json::json!(1)),
                ("level".into(), serde_json::json!(2)),
                ("tenure".into(), serde_json::json!(3)),
            ])
        })
        .collect();

    let out = present(rows, None, "select 1", 10);
    assert_eq!(out.len(), 10);
    let cols: Vec<&str> = out[0].columns().collect();
    assert_eq!(cols, vec!["name", "email"]);
    // Original order preserved after truncation.
    assert_eq!(out[0].get("name"), Some(&serde_json::json!("person 0")));
}

// ============ Prompt store ============

#[tokio::test]
async fn seeded_store_serves_both_pipeline_templates() {
    let dir = tempfile::tempdir().unwrap();
    let store = PromptStore::new(dir.path().join("prompts.json"));
    store.seed_defaults().await.unwrap();

    let classifier = store.get(PROMPT_CLASSIFIER).unwrap();
    let generator = store.get(PROMPT_SQL_GENERATOR).unwrap();

    assert!(prompts::render(&classifier, &[("schema_list", "- db"), ("query", "q")]).is_ok());
    assert!(prompts::render(
        &generator,
        &[("schema_description", "employees"), ("question", "q")]
    )
    .is_ok());

    // A template edited to drop its slot fails loudly at the point of use.
    store.set(PROMPT_CLASSIFIER, "no slots anymore").await.unwrap();
    let broken = store.get(PROMPT_CLASSIFIER).unwrap();
    assert!(prompts::render(&broken, &[("schema_list", "x"), ("query", "q")]).is_err());
}

// ============ Upload-side bookkeeping ============

#[tokio::test]
async fn upload_bookkeeping_persists_bytes_record_and_job() {
    let dir = tempfile::tempdir().unwrap();
    let storage = LocalStore::new(dir.path().join("objects"));

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    docstore::init_schema(&pool).await.unwrap();

    let (task_queue, mut rx) = queue::channel(4);

    // The upload path: object first, then the pending row, then the job.
    let document_id = "handbook-0a1b2c3d";
    let storage_key = format!("{}_handbook.txt", document_id);
    storage
        .put(&storage_key, b"employee handbook".to_vec(), Some("text/plain"))
        .await
        .unwrap();
    docstore::insert_pending(&pool, document_id, "handbook.txt", &storage_key)
        .await
        .unwrap();
    task_queue
        .enqueue(IngestJob {
            document_id: document_id.to_string(),
            storage_key: storage_key.clone(),
            source_name: "handbook.txt".to_string(),
        })
        .await
        .unwrap();

    let job = rx.recv().await.unwrap();
    assert_eq!(job.document_id, document_id);
    assert_eq!(storage.get(&job.storage_key).await.unwrap(), b"employee handbook");

    let record = docstore::get(&pool, document_id).await.unwrap().unwrap();
    assert_eq!(record.status, DocumentStatus::Pending);

    // Worker terminal transition, then deletion clears the listing.
    docstore::mark_processed(&pool, document_id, 3).await.unwrap();
    let record = docstore::get(&pool, document_id).await.unwrap().unwrap();
    assert_eq!(record.status, DocumentStatus::Processed);
    assert_eq!(record.chunk_count, 3);

    storage.delete(&storage_key).await.unwrap();
    docstore::delete(&pool, document_id).await.unwrap();
    assert!(docstore::list(&pool).await.unwrap().is_empty());
    assert!(storage.get(&storage_key).await.is_err());
}
