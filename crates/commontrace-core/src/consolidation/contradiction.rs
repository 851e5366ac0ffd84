//! Contradiction and alternative detection.
//!
//! Traces in the same convergence cluster solve the same problem; when
//! their solution embeddings diverge they are ALTERNATIVE_TO each other,
//! and when the community additionally disagrees about them (one trusted,
//! one distrusted) the pair is a CONTRADICTS edge instead.

use chrono::{DateTime, Utc};

use crate::embeddings::cosine_distance;
use crate::error::EngineError;
use crate::model::RelationshipType;
use crate::storage::Store;

/// Minimum cosine distance between solution vectors to count as a
/// different approach
pub const ALTERNATIVE_DISTANCE_THRESHOLD: f64 = 0.4;

/// Trust above which one side counts as community-endorsed
pub const TRUST_HIGH: f64 = 1.0;

/// Trust below which the other side counts as community-rejected
pub const TRUST_LOW: f64 = -0.5;

/// Detect ALTERNATIVE_TO / CONTRADICTS edges inside every cluster.
///
/// Uses the solution embedding when present, falling back to the content
/// embedding. Upserts are idempotent; returns the number of new edges.
pub(crate) fn detect(store: &Store, now: DateTime<Utc>) -> Result<i64, EngineError> {
    let clusters = store.clusters_with_vectors()?;
    let mut created = 0i64;

    for cluster_id in clusters {
        let members = store.cluster_pair_vectors(cluster_id)?;

        for i in 0..members.len() {
            for j in (i + 1)..members.len() {
                let (id_a, trust_a, vec_a) = &members[i];
                let (id_b, trust_b, vec_b) = &members[j];

                let distance = cosine_distance(vec_a, vec_b);
                if distance <= ALTERNATIVE_DISTANCE_THRESHOLD {
                    continue;
                }

                let contradicts = (*trust_a > TRUST_HIGH && *trust_b < TRUST_LOW)
                    || (*trust_b > TRUST_HIGH && *trust_a < TRUST_LOW);
                let kind = if contradicts {
                    RelationshipType::Contradicts
                } else {
                    RelationshipType::AlternativeTo
                };

                for (src, tgt) in [(*id_a, *id_b), (*id_b, *id_a)] {
                    if store.insert_relationship_if_absent(src, tgt, kind, now)? {
                        created += 1;
                    }
                }
            }
        }
    }

    if created > 0 {
        tracing::info!(new_edges = created, "alternatives detected");
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_divergence_threshold_constants() {
        // Orthogonal solutions are clearly past the divergence threshold
        let a = vec![1.0f32, 0.0];
        let b = vec![0.0f32, 1.0];
        assert!(cosine_distance(&a, &b) > ALTERNATIVE_DISTANCE_THRESHOLD);

        // Identical solutions never qualify
        assert!(cosine_distance(&a, &a) <= ALTERNATIVE_DISTANCE_THRESHOLD);
    }
}
