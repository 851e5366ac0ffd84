//! Embedding worker: fills in vectors for traces that lack them.
//!
//! The worker polls for unembedded traces in small batches. A *skipped*
//! port aborts the batch quietly (the deployment has no provider); any
//! other per-trace failure is logged and the batch continues. The worker
//! is the sole writer of embedding fields.

use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::error::EngineError;
use crate::search::VectorIndex;
use crate::storage::Store;

use super::{Embedder, EmbeddingError, vector_to_bytes};

/// Seconds between polls
pub const POLL_INTERVAL_SECONDS: u64 = 5;

/// Traces claimed per poll
pub const BATCH_SIZE: usize = 10;

/// Process one batch of unembedded traces. Returns how many were
/// embedded.
pub fn process_batch(
    store: &Store,
    index: &Mutex<VectorIndex>,
    embedder: &dyn Embedder,
    now: DateTime<Utc>,
) -> Result<usize, EngineError> {
    let batch = store.pending_embedding_batch(BATCH_SIZE)?;
    if batch.is_empty() {
        return Ok(0);
    }

    let mut processed = 0usize;
    for (trace_id, text) in batch {
        let embedded = match embedder.embed(&text) {
            Ok(embedded) => embedded,
            Err(EmbeddingError::Skipped) => {
                // No provider configured: abort the whole batch, keep polling
                tracing::debug!("embedding skipped: provider not configured");
                return Ok(processed);
            }
            Err(e) => {
                tracing::error!(trace_id = %trace_id, error = %e, "embedding failed");
                continue;
            }
        };

        store.store_embedding(
            trace_id,
            &vector_to_bytes(&embedded.vector),
            &embedded.model_id,
            &embedded.model_version,
            now,
        )?;

        match index.lock() {
            Ok(mut index) => {
                if let Err(e) = index.add(trace_id, &embedded.vector) {
                    tracing::warn!(trace_id = %trace_id, error = %e, "index add failed");
                }
            }
            Err(_) => {
                return Err(EngineError::Internal("vector index lock poisoned".to_string()));
            }
        }

        tracing::info!(trace_id = %trace_id, model = %embedded.model_id, "embedding stored");
        processed += 1;
    }

    Ok(processed)
}
