//! Convergence detection.
//!
//! Discovers when different contexts converge on the same solution.
//! Traces whose content embeddings sit within a tight cosine-distance
//! threshold form clusters; the spread of context fingerprints inside a
//! cluster determines how broadly the knowledge applies:
//!
//!   0 = universal (cross-language)
//!   2 = stack-agnostic (one language, several frameworks)
//!   3 = environment-agnostic (one stack, several OSes)
//!   4 = contextual (single context, or no context at all)

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::context::ContextFingerprint;
use crate::error::EngineError;
use crate::search::VectorIndex;
use crate::storage::Store;

/// Cosine distance below which two traces solve the same problem
pub const SIMILARITY_THRESHOLD: f64 = 0.15;

/// Neighbor fetch cap per unclustered trace
pub const MAX_NEIGHBORS: usize = 50;

/// Classify a cluster's convergence level from its members' fingerprints
pub fn classify_convergence_level(fingerprints: &[ContextFingerprint]) -> i64 {
    if fingerprints.is_empty() {
        return 4;
    }

    let distinct = |get: fn(&ContextFingerprint) -> Option<&String>| {
        let mut values: Vec<&String> = fingerprints.iter().filter_map(get).collect();
        values.sort();
        values.dedup();
        values.len()
    };

    let languages = distinct(|fp| fp.language.as_ref());
    let frameworks = distinct(|fp| fp.framework.as_ref());
    let oses = distinct(|fp| fp.os.as_ref());

    // Different languages solving the same problem: universal
    if languages > 1 {
        return 0;
    }
    // One language, several frameworks: stack-agnostic
    if languages == 1 && frameworks > 1 {
        return 2;
    }
    // One stack, several OSes: environment-agnostic
    if languages <= 1 && frameworks <= 1 && oses > 1 {
        return 3;
    }
    4
}

/// Greedy clustering pass over unclustered embedded traces.
///
/// A trace joins the first neighboring cluster it finds; otherwise a new
/// cluster is minted for it and its unclustered neighbors. The level is
/// recomputed from all gathered fingerprints and propagated to every
/// member. Returns the count of newly clustered traces.
pub(crate) fn detect(
    store: &Store,
    index: &Mutex<VectorIndex>,
    embedding_model_id: &str,
    now: DateTime<Utc>,
) -> Result<i64, EngineError> {
    let unclustered = store.unclustered_embedded(embedding_model_id)?;
    if unclustered.is_empty() {
        return Ok(0);
    }

    let mut newly_clustered = 0i64;

    for trace_id in unclustered {
        // An earlier iteration may have pulled this trace into a cluster
        if store.cluster_of(trace_id)?.is_some() {
            continue;
        }
        let Some(vector) = store.embedding_of(trace_id)? else {
            continue;
        };

        let neighbors = {
            let index = index
                .lock()
                .map_err(|_| EngineError::Internal("vector index lock poisoned".to_string()))?;
            index
                .neighbors_within(trace_id, &vector, MAX_NEIGHBORS, SIMILARITY_THRESHOLD)
                .map_err(|e| EngineError::Internal(e.to_string()))?
        };
        if neighbors.is_empty() {
            continue;
        }

        let neighbor_ids: Vec<Uuid> = neighbors.iter().map(|n| n.id).collect();
        let neighbor_info = store.cluster_info_for(&neighbor_ids)?;

        // Join an existing cluster when any neighbor already has one
        let existing_cluster = neighbor_info.iter().find_map(|(_, cluster, _)| *cluster);
        let cluster_id = existing_cluster.unwrap_or_else(Uuid::new_v4);

        // Gather fingerprints: self, neighbors, and (when joining) the
        // cluster's current members
        let mut fingerprints: Vec<ContextFingerprint> = Vec::new();
        if let Some(own) = store.fingerprint_of(trace_id)? {
            fingerprints.push(own);
        }
        for (_, _, fp) in &neighbor_info {
            if let Some(fp) = fp {
                fingerprints.push(fp.clone());
            }
        }
        if let Some(existing) = existing_cluster {
            fingerprints.extend(store.fingerprints_in_cluster(existing)?);
        }

        let level = classify_convergence_level(&fingerprints);

        let mut to_assign = vec![trace_id];
        to_assign.extend(
            neighbor_info
                .iter()
                .filter(|(_, cluster, _)| cluster.is_none())
                .map(|(id, _, _)| *id),
        );
        newly_clustered += to_assign.len() as i64;

        store.assign_cluster(&to_assign, cluster_id, level, now)?;
        store.set_cluster_level(cluster_id, level, now)?;

        tracing::info!(
            cluster_id = %cluster_id,
            level,
            members = to_assign.len(),
            "convergence cluster updated"
        );
    }

    Ok(newly_clustered)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(language: Option<&str>, framework: Option<&str>, os: Option<&str>) -> ContextFingerprint {
        ContextFingerprint {
            language: language.map(|s| s.to_string()),
            framework: framework.map(|s| s.to_string()),
            os: os.map(|s| s.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_cross_language_is_universal() {
        let fps = vec![
            fp(Some("python"), Some("fastapi"), None),
            fp(Some("go"), Some("gin"), None),
        ];
        assert_eq!(classify_convergence_level(&fps), 0);
    }

    #[test]
    fn test_one_language_many_frameworks_is_stack_agnostic() {
        let fps = vec![
            fp(Some("python"), Some("fastapi"), None),
            fp(Some("python"), Some("django"), None),
        ];
        assert_eq!(classify_convergence_level(&fps), 2);
    }

    #[test]
    fn test_one_stack_many_oses_is_env_agnostic() {
        let fps = vec![
            fp(Some("python"), Some("fastapi"), Some("linux")),
            fp(Some("python"), Some("fastapi"), Some("macos")),
        ];
        assert_eq!(classify_convergence_level(&fps), 3);
    }

    #[test]
    fn test_single_context_is_contextual() {
        let fps = vec![
            fp(Some("python"), Some("fastapi"), Some("linux")),
            fp(Some("python"), Some("fastapi"), Some("linux")),
        ];
        assert_eq!(classify_convergence_level(&fps), 4);
    }

    #[test]
    fn test_no_context_is_contextual() {
        assert_eq!(classify_convergence_level(&[]), 4);
    }
}
