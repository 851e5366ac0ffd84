//! Spreading activation: graph expansion of top search results.
//!
//! Retrieval activates not just the matched traces but their associates.
//! Top results act as activation sources; their CO_RETRIEVED and
//! SUPERSEDES neighbors receive a capped boost proportional to the
//! source's score and the edge strength. Single hop, never recursive.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::context::ContextFingerprint;
use crate::error::EngineError;
use crate::storage::Store;

use super::pipeline::{Ranked, base_factors, sort_ranked};

/// How many top results seed activation
pub const MAX_ACTIVATION_SOURCES: usize = 20;

/// Total neighbor edges fetched per search
pub const MAX_TOTAL_NEIGHBORS: usize = 50;

/// Hard cap on the activation boost
pub const MAX_ACTIVATION_BOOST: f64 = 0.15;

/// Scale of the boost before capping
pub const ACTIVATION_DECAY: f64 = 0.15;

/// Boost for one neighbor:
/// `ACTIVATION_DECAY * (source_score / max_score) * (strength / max_strength)`,
/// capped at [`MAX_ACTIVATION_BOOST`].
pub fn compute_activation_boost(
    source_score: f64,
    max_score: f64,
    strength: f64,
    max_strength: f64,
) -> f64 {
    if max_score <= 0.0 || max_strength <= 0.0 {
        return 0.0;
    }
    let boost = ACTIVATION_DECAY * (source_score / max_score) * (strength / max_strength);
    boost.min(MAX_ACTIVATION_BOOST)
}

/// Merge activated neighbors into the ranked results, resort, truncate.
pub(crate) fn apply(
    store: &Store,
    mut results: Vec<Ranked>,
    limit: usize,
    searcher_fp: Option<&ContextFingerprint>,
    now: DateTime<Utc>,
) -> Result<Vec<Ranked>, EngineError> {
    let source_ids: Vec<Uuid> = results
        .iter()
        .take(MAX_ACTIVATION_SOURCES)
        .map(|r| r.trace.id)
        .collect();
    let mut existing: HashSet<Uuid> = results.iter().map(|r| r.trace.id).collect();

    let edges = store.activation_neighbors(&source_ids, MAX_TOTAL_NEIGHBORS)?;
    let edges: Vec<_> = edges
        .into_iter()
        .filter(|e| !existing.contains(&e.target_id))
        .collect();
    if edges.is_empty() {
        return Ok(results);
    }

    let neighbor_ids: Vec<Uuid> = {
        let mut seen = HashSet::new();
        edges
            .iter()
            .map(|e| e.target_id)
            .filter(|id| seen.insert(*id))
            .collect()
    };
    let neighbor_traces: HashMap<Uuid, _> = store
        .traces_by_ids(&neighbor_ids)?
        .into_iter()
        .map(|t| (t.id, t))
        .collect();

    let score_by_id: HashMap<Uuid, f64> =
        results.iter().map(|r| (r.trace.id, r.combined)).collect();
    let max_score = score_by_id.values().cloned().fold(f64::MIN, f64::max).max(0.0);
    let max_strength = edges.iter().map(|e| e.strength).fold(1.0, f64::max);

    // Edges arrive strongest-first, so the strongest edge to a neighbor
    // wins and later duplicates are skipped.
    for edge in &edges {
        if existing.contains(&edge.target_id) {
            continue;
        }
        let Some(trace) = neighbor_traces.get(&edge.target_id) else {
            continue;
        };

        let base = base_factors(trace, searcher_fp, now);
        let source_score = score_by_id.get(&edge.source_id).copied().unwrap_or(0.0);
        let boost = compute_activation_boost(source_score, max_score, edge.strength, max_strength);
        let combined = base * (1.0 + boost);

        existing.insert(edge.target_id);
        results.push(Ranked {
            trace: trace.clone(),
            similarity: 0.0,
            combined,
        });
    }

    sort_ranked(&mut results);
    results.truncate(limit);
    Ok(results)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boost_is_capped() {
        let boost = compute_activation_boost(10.0, 1.0, 100.0, 1.0);
        assert_eq!(boost, MAX_ACTIVATION_BOOST);
    }

    #[test]
    fn test_boost_scales_with_source_and_strength() {
        let strong = compute_activation_boost(1.0, 1.0, 1.0, 1.0);
        let weak_source = compute_activation_boost(0.5, 1.0, 1.0, 1.0);
        let weak_edge = compute_activation_boost(1.0, 1.0, 0.5, 1.0);
        assert!((strong - ACTIVATION_DECAY).abs() < 1e-9);
        assert!((weak_source - ACTIVATION_DECAY * 0.5).abs() < 1e-9);
        assert!((weak_edge - ACTIVATION_DECAY * 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_boost_degenerate_inputs() {
        assert_eq!(compute_activation_boost(1.0, 0.0, 1.0, 1.0), 0.0);
        assert_eq!(compute_activation_boost(1.0, 1.0, 1.0, 0.0), 0.0);
    }
}
