//! Background worker loops.
//!
//! The consolidation and embedding workers are independent tokio tasks.
//! They survive request cancellation and stop cooperatively on the
//! shutdown signal. Engine calls are blocking (SQLite), so each tick
//! runs on the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use commontrace_core::Engine;
use commontrace_core::embeddings::worker::POLL_INTERVAL_SECONDS;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::state::WorkerHealth;

/// Delay before the first consolidation cycle, so startup stays snappy
const CONSOLIDATION_WARMUP_SECS: u64 = 60;

/// Spawn both workers; they exit when `shutdown` flips to true
pub fn spawn_workers(
    engine: Arc<Engine>,
    health: Arc<WorkerHealth>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    vec![
        spawn_consolidation_worker(Arc::clone(&engine), Arc::clone(&health), shutdown.clone()),
        spawn_embedding_worker(engine, health, shutdown),
    ]
}

fn spawn_consolidation_worker(
    engine: Arc<Engine>,
    health: Arc<WorkerHealth>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let interval_hours = engine.config().consolidation_interval_hours;
    tokio::spawn(async move {
        tracing::info!(interval_hours, "consolidation worker started");

        let mut wait = Duration::from_secs(CONSOLIDATION_WARMUP_SECS);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.changed() => break,
            }

            let engine = Arc::clone(&engine);
            let result = tokio::task::spawn_blocking(move || engine.run_consolidation()).await;
            match result {
                Ok(Ok(outcome)) if !outcome.skipped => {
                    tracing::info!(status = outcome.status.as_str(), "consolidation cycle ran");
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "consolidation cycle failed"),
                Err(e) => tracing::error!(error = %e, "consolidation task panicked"),
            }
            health.beat_consolidation();

            wait = Duration::from_secs(interval_hours * 3600);
        }
        tracing::info!("consolidation worker stopped");
    })
}

fn spawn_embedding_worker(
    engine: Arc<Engine>,
    health: Arc<WorkerHealth>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            poll_interval = POLL_INTERVAL_SECONDS,
            "embedding worker started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(POLL_INTERVAL_SECONDS)) => {}
                _ = shutdown.changed() => break,
            }

            let engine = Arc::clone(&engine);
            let result = tokio::task::spawn_blocking(move || engine.embed_pending_batch()).await;
            match result {
                Ok(Ok(count)) if count > 0 => {
                    tracing::info!(count, "embedding batch processed");
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "embedding batch failed"),
                Err(e) => tracing::error!(error = %e, "embedding task panicked"),
            }
            health.beat_embedding();
        }
        tracing::info!("embedding worker stopped");
    })
}
