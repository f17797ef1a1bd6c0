//! # docsql CLI
//!
//! ```bash
//! docsql --config ./config/docsql.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docsql init` | Create the document registry and seed default prompt templates |
//! | `docsql serve` | Run the HTTP server and the ingestion worker |
//! | `docsql schemas` | Snapshot and print every configured database schema |

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};

use docsql::config::{load_config, Config};
use docsql::dbconfigs::DbConfigStore;
use docsql::docstore;
use docsql::embed::Embedder;
use docsql::ingest::{self, Ingestor};
use docsql::llm::ChatClient;
use docsql::object_store;
use docsql::prompts::PromptStore;
use docsql::queue;
use docsql::route::QueryPipeline;
use docsql::schema::{self, DescribeOptions, SchemaRegistry};
use docsql::server::{run_server, AppState};
use docsql::vector_index::VectorIndex;

/// Capacity of the in-process ingestion queue before uploads backpressure.
const QUEUE_CAPACITY: usize = 256;

#[derive(Parser)]
#[command(
    name = "docsql",
    about = "Natural-language question answering over documents and SQL databases",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docsql.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the document registry and seed default prompt templates.
    ///
    /// Idempotent — running it again never overwrites edited templates.
    Init,

    /// Run the HTTP server with the ingestion worker.
    Serve,

    /// Snapshot every configured database and print its description.
    Schemas,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Init => run_init(&config).await,
        Commands::Serve => run_serve(config).await,
        Commands::Schemas => run_schemas(&config).await,
    }
}

async fn run_init(config: &Config) -> anyhow::Result<()> {
    let pool = docstore::connect(&config.registry.path).await?;
    docstore::init_schema(&pool).await?;
    pool.close().await;

    PromptStore::new(config.stores.prompts_path.clone())
        .seed_defaults()
        .await?;
    DbConfigStore::new(config.stores.databases_path.clone())
        .ensure_file()
        .await?;

    println!("initialized");
    println!("  registry:  {}", config.registry.path.display());
    println!("  prompts:   {}", config.stores.prompts_path.display());
    println!("  databases: {}", config.stores.databases_path.display());
    Ok(())
}

async fn run_serve(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);

    let registry = docstore::connect(&config.registry.path).await?;
    docstore::init_schema(&registry).await?;

    info!(model = %config.embedding.model, "loading embedding model");
    let embedder = Arc::new(Embedder::new(&config.embedding)?);

    let index = Arc::new(VectorIndex::connect(&config.qdrant)?);
    index.ensure_collection(embedder.dims()).await?;

    let chat = Arc::new(ChatClient::new(&config.llm)?);
    let prompts = Arc::new(PromptStore::new(config.stores.prompts_path.clone()));
    let databases = Arc::new(DbConfigStore::new(config.stores.databases_path.clone()));
    let schemas = Arc::new(SchemaRegistry::new(
        config.stores.snapshot_dir.clone(),
        config.schema.cache_ttl_secs,
    ));
    let storage: Arc<dyn object_store::ObjectStore> =
        object_store::create_store(&config.storage)?.into();

    // Warm the schema snapshots so the first query does not pay for every
    // misconfigured database at once.
    let initial = schemas.snapshot_all(&databases.load()?).await;
    info!(databases = initial.len(), "schema snapshots loaded");

    let ingestor = Arc::new(Ingestor::new(
        registry.clone(),
        Arc::clone(&storage),
        Arc::clone(&embedder),
        Arc::clone(&index),
        config.chunking.clone(),
    ));

    let (task_queue, rx) = queue::channel(QUEUE_CAPACITY);
    tokio::spawn(ingest::run_worker(Arc::clone(&ingestor), rx));

    let pipeline = Arc::new(QueryPipeline::new(
        Arc::clone(&config),
        Arc::clone(&chat),
        Arc::clone(&prompts),
        Arc::clone(&databases),
        Arc::clone(&schemas),
        Arc::clone(&embedder),
        Arc::clone(&index),
    ));

    let state = AppState {
        config,
        registry,
        pipeline,
        ingestor,
        queue: Arc::new(task_queue),
        databases,
        prompts,
    };

    run_server(state).await
}

async fn run_schemas(config: &Config) -> anyhow::Result<()> {
    let databases = DbConfigStore::new(config.stores.databases_path.clone());
    let configs = databases.load()?;
    if configs.is_empty() {
        println!("no databases configured");
        return Ok(());
    }

    let registry = SchemaRegistry::new(
        config.stores.snapshot_dir.clone(),
        config.schema.cache_ttl_secs,
    );
    let snapshots = registry.snapshot_all(&configs).await;

    for (name, snapshot) in &snapshots {
        println!("== {} ==", name);
        println!("{}", schema::describe(snapshot, &DescribeOptions::default()));
        println!();
    }

    for name in configs.keys() {
        if !snapshots.contains_key(name) {
            warn!(db = %name, "schema could not be loaded");
        }
    }

    Ok(())
}
