//! CommonTrace API server.
//!
//! Shared cognitive memory for AI coding agents: agents deposit,
//! retrieve, vote on, and amend traces; the engine underneath ranks,
//! relates, consolidates, and forgets them over time.
//!
//! The process runs three kinds of tasks on one runtime: request
//! handlers, the embedding worker (fills vectors for new traces), and
//! the consolidation worker (the periodic sleep cycle). Workers receive
//! a cooperative stop signal at shutdown.

mod routes;
mod state;
mod workers;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use commontrace_core::{Config, DisabledEmbedder, Embedder, Engine};

use crate::state::{AppState, WorkerHealth};

#[derive(Debug, Parser)]
#[command(name = "commontrace-server", version, about = "CommonTrace API server")]
struct Args {
    /// SQLite database path (overrides COMMONTRACE_DATABASE_PATH)
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Bind address (overrides COMMONTRACE_BIND_ADDR)
    #[arg(long)]
    bind: Option<String>,
}

/// Pick the embedding port: the local model when the feature is enabled
/// and loadable, the disabled port otherwise (search degrades to
/// tag-only, the worker idles).
fn build_embedder() -> Arc<dyn Embedder> {
    #[cfg(feature = "embeddings")]
    {
        match commontrace_core::LocalEmbedder::new() {
            Ok(embedder) => {
                info!(model = embedder.model_id(), "local embedding model loaded");
                return Arc::new(embedder);
            }
            Err(e) => {
                warn!(error = %e, "embedding model unavailable; semantic search disabled");
            }
        }
    }
    Arc::new(DisabledEmbedder)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    info!("CommonTrace server v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config = Config::from_env();
    if let Some(db_path) = args.db_path {
        config.database_path = Some(db_path);
    }

    let embedder = build_embedder();
    // The index must match whatever the active port produces
    if embedder.dimensions() > 0 {
        config.embedding_dimensions = embedder.dimensions();
    }

    let engine = match Engine::new(config, embedder) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            error!(error = %e, "failed to initialize engine");
            std::process::exit(1);
        }
    };
    info!(indexed_vectors = engine.index_size(), "engine initialized");

    let health = Arc::new(WorkerHealth::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handles = workers::spawn_workers(
        Arc::clone(&engine),
        Arc::clone(&health),
        shutdown_rx,
    );

    let api_key = std::env::var("COMMONTRACE_API_KEY").ok().filter(|k| !k.is_empty());
    if api_key.is_none() {
        warn!("COMMONTRACE_API_KEY not set; write endpoints are unauthenticated");
    }

    let app = routes::router(AppState {
        engine,
        health,
        api_key,
    });

    let bind_addr = args
        .bind
        .or_else(|| std::env::var("COMMONTRACE_BIND_ADDR").ok())
        .unwrap_or_else(|| "127.0.0.1:8780".to_string());

    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %bind_addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };
    info!(addr = %bind_addr, "listening");

    let serve = axum::serve(listener, app).with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    });

    if let Err(e) = serve.await {
        error!(error = %e, "server error");
    }

    // Cooperative worker stop; request cancellation never reaches them
    let _ = shutdown_tx.send(true);
    for handle in worker_handles {
        let _ = handle.await;
    }
    info!("CommonTrace server stopped");
}
