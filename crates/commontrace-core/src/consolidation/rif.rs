//! Retrieval-induced forgetting (RIF) shadows.
//!
//! When a trace repeatedly appears below the same winner in search
//! sessions, it is being actively suppressed by a stronger alternative.
//! Those `(loser, winner)` pairs are recorded so curation can surface
//! chronically shadowed knowledge.

use chrono::{DateTime, Utc};

use crate::error::EngineError;
use crate::storage::Store;

/// Minimum co-occurrences in the log window before a shadow is recorded
pub const MIN_CO_OCCURRENCE: i64 = 3;

/// Scan retrieval logs for winner/loser pairs and accumulate shadows.
/// Returns the number of pairs upserted.
pub(crate) fn detect(store: &Store, now: DateTime<Utc>) -> Result<i64, EngineError> {
    let pairs = store.rif_candidate_pairs(MIN_CO_OCCURRENCE)?;
    let mut updated = 0i64;

    for (winner, loser, count) in &pairs {
        store.upsert_rif_shadow(*loser, *winner, *count, now)?;
        updated += 1;
    }

    if updated > 0 {
        tracing::info!(shadow_count = updated, "rif shadows detected");
    }
    Ok(updated)
}
