use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use engram::claims::ClaimService;
use engram::config::EngramConfig;
use engram::embedding::Embedder;
use engram::events::EventBus;
use engram::extract::Extractor;
use engram::http::{self, AppState};
use engram::llm::LlmClient;
use engram::memory::MemoryService;
use engram::retrieval::RetrievalService;
use engram::store::Store;

#[derive(Parser)]
#[command(name = "engram", version, about = "Memory-and-claim substrate for LLM applications")]
struct Cli {
    /// Path to config file (defaults to ~/.engram/config.toml)
    #[arg(long, short = 'c')]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP service (default command)
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(path) => EngramConfig::load_from(path)?,
        None => EngramConfig::load()?,
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.server.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        None | Some(Command::Serve) => serve(config).await,
    }
}

async fn serve(config: EngramConfig) -> Result<()> {
    let conn = engram::db::open_database(config.resolved_db_path())?;

    let embedder = Arc::new(Embedder::from_config(&config.embedding));
    if embedder.is_enabled() {
        engram::db::check_embedding_model(&conn, embedder.model_name())?;
    }

    let store = Store::new(conn);
    let bus = EventBus::new();
    let llm = Arc::new(LlmClient::from_config(&config.ai));
    let claims = Arc::new(ClaimService::new(store.clone()));
    let extractor = Arc::new(Extractor::new(Arc::clone(&llm)));

    let memories = Arc::new(MemoryService::new(
        store.clone(),
        Arc::clone(&embedder),
        Arc::clone(&extractor),
        Arc::clone(&claims),
        bus.clone(),
        config.retrieval.duplicate_threshold,
        config.retrieval.conflict_min,
        config.retrieval.conflict_max,
    ));
    let retrieval = Arc::new(RetrievalService::new(
        store.clone(),
        Arc::clone(&embedder),
        Arc::clone(&llm),
        config.ai.use_retrieval_expand,
    ));

    let state = AppState {
        memories,
        claims,
        retrieval,
        store,
        bus,
        default_project: config.server.default_project.clone(),
        default_limit: config.retrieval.default_limit,
    };

    http::serve(state, &config.server.host, config.server.port).await
}
