// src/main.rs
// Quarry - persistent code index and hybrid retrieval engine

use anyhow::Result;
use clap::{Parser, Subcommand};
use quarry::build::{IndexService, IndexServiceConfig, WorkerEvent};
use quarry::chunker::LineChunker;
use quarry::config::{ApiKeys, EmbeddingsEnv, QuarryConfig};
use quarry::embeddings::EmbeddingClient;
use quarry::retrieval::rerank::HttpReranker;
use quarry::retrieval::{RetrievalOptions, RetrievalService};
use quarry::store::{MetadataStore, SqliteSymbolGraph, SqliteVectorStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "quarry")]
#[command(about = "Persistent code index and hybrid retrieval engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build or refresh the index for a project
    Index {
        /// Project path (default: current directory)
        #[arg(short, long)]
        path: Option<PathBuf>,
    },

    /// Search the index
    Search {
        /// Free-text or code query
        query: String,

        /// Project path (default: current directory)
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Number of results
        #[arg(short = 'k', long, default_value = "20")]
        top_k: usize,
    },

    /// Show index status and store statistics
    Status {
        /// Project path (default: current directory)
        #[arg(short, long)]
        path: Option<PathBuf>,
    },

    /// Run the indexing service with periodic drift detection
    Watch {
        /// Project path (default: current directory)
        #[arg(short, long)]
        path: Option<PathBuf>,
    },
}

fn resolve_path(path: Option<PathBuf>) -> PathBuf {
    path.unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

async fn open_service(root: &PathBuf) -> Result<(IndexService, MetadataStore)> {
    let config = QuarryConfig::load();
    let store = MetadataStore::open(root).await?;
    let vectors = Arc::new(SqliteVectorStore::new(store.pool()));
    let embeddings = EmbeddingClient::from_config(&ApiKeys::from_env(), &EmbeddingsEnv::from_env());

    if embeddings.is_some() {
        info!("Dense search enabled (embedding API key found)");
    } else {
        info!("Dense search disabled (no embedding API key)");
    }

    let service = IndexService::new(
        root.clone(),
        store.clone(),
        Arc::new(LineChunker::default()),
        embeddings,
        vectors,
        IndexServiceConfig::from_config(&config),
    )
    .await;
    Ok((service, store))
}

async fn run_index(path: Option<PathBuf>) -> Result<()> {
    let root = resolve_path(path);
    info!("Indexing project at {}", root.display());

    let (service, store) = open_service(&root).await?;
    let mut events = service.subscribe();
    service.start_build().await?;

    loop {
        match events.recv().await? {
            WorkerEvent::Progress(progress) => {
                info!(
                    "{} {} ({:.0}%)",
                    progress.status,
                    progress.phase,
                    progress.overall_progress * 100.0
                );
            }
            WorkerEvent::BuildComplete => break,
            WorkerEvent::Error { message } => {
                anyhow::bail!("build failed: {message}");
            }
            _ => {}
        }
    }

    let stats = store.get_stats().await?;
    println!(
        "Indexed {} files, {} chunks, {} cached embeddings",
        stats.files, stats.chunks, stats.cached_embeddings
    );
    service.shutdown().await;
    Ok(())
}

async fn run_search(query: String, path: Option<PathBuf>, top_k: usize) -> Result<()> {
    let root = resolve_path(path);
    let store = MetadataStore::open(&root).await?;
    let vectors = Arc::new(SqliteVectorStore::new(store.pool()));
    let graph = Arc::new(SqliteSymbolGraph::new(store.pool()));

    let api_keys = ApiKeys::from_env();
    let mut service = RetrievalService::new(store, vectors, graph);
    if let Some(embeddings) = EmbeddingClient::from_config(&api_keys, &EmbeddingsEnv::from_env()) {
        service = service.with_embeddings(embeddings);
    }
    if let (Some(key), Ok(endpoint)) =
        (api_keys.rerank.clone(), std::env::var("QUARRY_RERANK_URL"))
    {
        service = service.with_reranker(Arc::new(HttpReranker::new(endpoint, key)));
    }

    let options = RetrievalOptions {
        top_k,
        ..Default::default()
    };
    let response = service.search(&query, options).await?;

    if response.chunks.is_empty() {
        println!("No matches. Have you run 'quarry index' yet?");
        return Ok(());
    }
    println!("{}", response.text_view);
    Ok(())
}

async fn run_status(path: Option<PathBuf>) -> Result<()> {
    let root = resolve_path(path);
    let store = MetadataStore::open(&root).await?;

    let progress = store.get_index_status().await?;
    let stats = store.get_stats().await?;

    println!("status: {} (phase: {})", progress.status, progress.phase);
    println!(
        "progress: {:.0}% overall, {:.0}% current phase",
        progress.overall_progress * 100.0,
        progress.phase_progress * 100.0
    );
    println!(
        "files: {} | chunks: {} | cached embeddings: {}",
        stats.files, stats.chunks, stats.cached_embeddings
    );
    if let Some(error) = progress.error {
        println!("last error: {error}");
    }
    if !progress.failed_files.is_empty() {
        println!("failed files: {}", progress.failed_files.join(", "));
    }
    if store.get_checkpoint().await?.is_some() {
        println!("an interrupted build can be resumed with 'quarry index'");
    }
    Ok(())
}

async fn run_watch(path: Option<PathBuf>) -> Result<()> {
    let root = resolve_path(path);
    info!("Watching project at {}", root.display());

    let (service, _store) = open_service(&root).await?;
    service.start_build().await?;
    let poll_shutdown = service.spawn_poll_loop();

    let mut events = service.subscribe();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(WorkerEvent::BuildComplete) => info!("Build complete"),
                Ok(WorkerEvent::UpdateComplete) => info!("Incremental update complete"),
                Ok(WorkerEvent::Error { message }) => tracing::error!("Build error: {message}"),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Event stream ended: {e}");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    let _ = poll_shutdown.send(true);
    service.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env files (global first, then project - project overrides)
    if let Some(home) = dirs::home_dir() {
        let _ = dotenvy::from_path(home.join(".quarry/.env"));
    }
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let log_level = match &cli.command {
        Commands::Search { .. } | Commands::Status { .. } => Level::WARN,
        Commands::Index { .. } | Commands::Watch { .. } => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Index { path } => run_index(path).await?,
        Commands::Search { query, path, top_k } => run_search(query, path, top_k).await?,
        Commands::Status { path } => run_status(path).await?,
        Commands::Watch { path } => run_watch(path).await?,
    }

    Ok(())
}
