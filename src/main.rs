use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod console;
mod fleet;
mod gguf;
mod inference;
mod orchestrator;
mod registry;
mod retrieval;
mod routing;
mod server;

use config::Settings;
use fleet::FleetManager;
use inference::{HttpBackend, InferenceClient, TierEndpoints};
use orchestrator::Orchestrator;
use registry::ModelRegistry;
use retrieval::{ContextRetriever, HttpEmbedder};
use routing::ComplexityRouter;
use server::{ApiServer, AppState};

#[derive(Parser)]
#[command(name = "triad", version, about = "Local multi-model LLM orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the server fleet and serve the HTTP API (the default)
    Serve,
    /// Run a discovery scan over the models directory and exit
    Scan,
    /// List the model registry
    Models,
    /// Open an interactive console against a running instance
    Console,
    /// Build the context index from a directory of text documents
    Index {
        /// Directory of .txt and .md documents to index
        docs_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load settings first; invalid configuration aborts before anything
    // else starts.
    let settings = Settings::new()?;

    // Initialize the subscriber before any file operations
    let file_appender = tracing_appender::rolling::RollingFileAppender::new(
        tracing_appender::rolling::Rotation::DAILY,
        settings
            .logging
            .file
            .as_deref()
            .unwrap_or_else(|| Path::new("logs")),
        "triad",
    );
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        // Disable ANSI colors for cleaner log files
        .with_ansi(false)
        .with_line_number(true)
        .with_file(true)
        .with_target(false)
        .with_env_filter(EnvFilter::new(&settings.logging.level))
        .init();

    info!("Triad starting up");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(settings).await,
        Command::Scan => scan(settings),
        Command::Models => models(settings),
        Command::Console => console::run(&settings).await.map_err(anyhow::Error::from_boxed),
        Command::Index { docs_dir } => index(settings, &docs_dir).await,
    }
}

/// Scans for models, starts the fleet, and serves the API until shutdown.
async fn serve(settings: Settings) -> Result<()> {
    let models_path = std::fs::canonicalize(&settings.models.directory)?;
    info!("Models directory: {}", models_path.display());

    let registry = Arc::new(ModelRegistry::new(settings.models.directory.clone()));
    registry.scan_models(&settings.tiers)?;

    // Surface each tier's worst-case call latency so operators can keep it
    // under their client timeout.
    for (name, tier) in [
        ("fast", &settings.tiers.fast),
        ("balanced", &settings.tiers.balanced),
        ("powerful", &settings.tiers.powerful),
    ] {
        info!(
            "Tier {}: worst-case call latency {:.1}s ({}s timeout + {} retries x {}s delay)",
            name,
            tier.worst_case_seconds(),
            tier.timeout_seconds,
            tier.max_retries,
            tier.retry_delay_seconds
        );
    }

    let fleet = Arc::new(FleetManager::new(
        settings.models.llama_server_binary.clone(),
        Arc::clone(&registry),
        settings.ports.clone(),
        settings.startup.clone(),
    ));
    fleet.start_fleet().await;
    tokio::spawn(Arc::clone(&fleet).run_health_loop());

    let embedder = Arc::new(HttpEmbedder::new(
        settings.retrieval.embedding_endpoint.clone(),
        settings.retrieval.embedding_model.clone(),
    ));
    let retriever = ContextRetriever::open(&settings.retrieval, embedder);
    let client = InferenceClient::new(Arc::new(HttpBackend::new()), &settings.tiers);
    let router = ComplexityRouter::new(&settings.routing);
    let endpoints = Arc::clone(&fleet) as Arc<dyn TierEndpoints>;

    let orchestrator = Arc::new(Orchestrator::new(
        router,
        retriever,
        client,
        endpoints,
        settings.retrieval.token_budget,
        settings.retrieval.min_relevance,
    ));

    let state = AppState {
        orchestrator,
        registry,
        fleet: Arc::clone(&fleet),
        tiers: settings.tiers.clone(),
    };
    let api = ApiServer::new(state, settings.server.host.clone(), settings.server.port);
    api.start().await.map_err(anyhow::Error::from_boxed)?;

    info!("Stopping the fleet");
    fleet.stop_all().await;
    Ok(())
}

/// Runs one discovery scan and reports the outcome.
fn scan(settings: Settings) -> Result<()> {
    let registry = ModelRegistry::new(settings.models.directory.clone());
    let summary = registry.scan_models(&settings.tiers)?;
    println!(
        "Scan complete: {} new, {} removed, {} failed",
        summary.new_models, summary.removed_models, summary.failed_models
    );
    Ok(())
}

/// Prints the registry as a table.
fn models(settings: Settings) -> Result<()> {
    let registry = ModelRegistry::new(settings.models.directory.clone());
    registry.load_or_create()?;
    console::display_models_table(&registry.list()?);
    Ok(())
}

/// Builds the vector index from a directory of documents.
async fn index(settings: Settings, docs_dir: &Path) -> Result<()> {
    let embedder = Arc::new(HttpEmbedder::new(
        settings.retrieval.embedding_endpoint.clone(),
        settings.retrieval.embedding_model.clone(),
    ));
    let summary =
        retrieval::build_index(docs_dir, &settings.retrieval.index_path, embedder).await?;
    println!(
        "Index built at {}: {} documents, {} chunks, {} skipped",
        settings.retrieval.index_path.display(),
        summary.documents,
        summary.chunks,
        summary.skipped
    );
    Ok(())
}
