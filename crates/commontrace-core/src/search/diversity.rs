//! Diversity re-ranking (anti-monoculture).
//!
//! MMR-inspired: search results should not all converge on the same
//! solution approach. The best match always keeps slot 0. For every
//! following slot, a candidate too similar to an already-selected result
//! is swapped with the first dissimilar alternative further down the
//! ranking. Reorders only - never drops a result.

use std::collections::HashMap;

use uuid::Uuid;

use crate::embeddings::cosine_similarity;

use super::pipeline::Ranked;

/// Cosine similarity beyond which two results count as near-duplicates
pub const DIVERSITY_SIMILARITY_THRESHOLD: f64 = 0.85;

/// Apply the diversity swap to ranked results.
///
/// Results without an embedding are never considered too similar (there
/// is nothing to compare) and pass through in rank order.
pub(crate) fn apply(results: Vec<Ranked>, embeddings: &HashMap<Uuid, Vec<f32>>) -> Vec<Ranked> {
    if results.len() < 3 || embeddings.is_empty() {
        return results;
    }

    let too_similar_to_any = |candidate_id: Uuid, selected: &[Ranked]| -> bool {
        let Some(candidate_emb) = embeddings.get(&candidate_id) else {
            return false;
        };
        selected.iter().any(|sel| {
            embeddings
                .get(&sel.trace.id)
                .map(|sel_emb| {
                    cosine_similarity(candidate_emb, sel_emb) > DIVERSITY_SIMILARITY_THRESHOLD
                })
                .unwrap_or(false)
        })
    };

    let mut remaining = results;
    let mut selected: Vec<Ranked> = vec![remaining.remove(0)];

    while !remaining.is_empty() {
        let mut pick = 0;
        if too_similar_to_any(remaining[0].trace.id, &selected) {
            // Find the first dissimilar alternative lower in the ranking
            for (idx, alt) in remaining.iter().enumerate().skip(1) {
                if embeddings.contains_key(&alt.trace.id)
                    && !too_similar_to_any(alt.trace.id, &selected)
                {
                    pick = idx;
                    break;
                }
            }
        }
        selected.push(remaining.remove(pick));
    }

    selected
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ImpactLevel, Trace, TraceStatus, TraceType};
    use chrono::Utc;

    fn ranked(id: Uuid, combined: f64) -> Ranked {
        let now = Utc::now();
        Ranked {
            trace: Trace {
                id,
                title: "t".to_string(),
                context_text: "c".to_string(),
                solution_text: "s".to_string(),
                contributor_id: Uuid::new_v4(),
                agent_model: None,
                agent_version: None,
                metadata: None,
                is_seed: false,
                status: TraceStatus::Pending,
                trust_score: 0.0,
                confirmation_count: 0,
                has_embedding: true,
                embedding_model_id: None,
                embedding_model_version: None,
                retrieval_count: 0,
                last_retrieved_at: None,
                half_life_days: None,
                valid_from: None,
                valid_until: None,
                review_after: None,
                watch_condition: None,
                depth_score: 0,
                somatic_intensity: 0.0,
                impact_level: ImpactLevel::Normal,
                memory_temperature: None,
                trace_type: TraceType::Episodic,
                convergence_cluster_id: None,
                convergence_level: None,
                context_fingerprint: None,
                is_flagged: false,
                flagged_at: None,
                is_stale: false,
                created_at: now,
                updated_at: now,
                tags: vec![],
            },
            similarity: 0.0,
            combined,
        }
    }

    #[test]
    fn test_near_duplicate_demoted() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        let mut embeddings = HashMap::new();
        embeddings.insert(a, vec![1.0f32, 0.0, 0.0]);
        embeddings.insert(b, vec![0.999f32, 0.01, 0.0]); // near-duplicate of a
        embeddings.insert(c, vec![0.0f32, 1.0, 0.0]); // orthogonal

        let results = vec![ranked(a, 3.0), ranked(b, 2.0), ranked(c, 1.0)];
        let reordered = apply(results, &embeddings);

        assert_eq!(reordered[0].trace.id, a, "best match keeps slot 0");
        assert_eq!(reordered[1].trace.id, c, "dissimilar alternative promoted");
        assert_eq!(reordered[2].trace.id, b);
    }

    #[test]
    fn test_no_swap_when_all_diverse() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        let mut embeddings = HashMap::new();
        embeddings.insert(a, vec![1.0f32, 0.0, 0.0]);
        embeddings.insert(b, vec![0.0f32, 1.0, 0.0]);
        embeddings.insert(c, vec![0.0f32, 0.0, 1.0]);

        let results = vec![ranked(a, 3.0), ranked(b, 2.0), ranked(c, 1.0)];
        let reordered = apply(results, &embeddings);

        let order: Vec<Uuid> = reordered.iter().map(|r| r.trace.id).collect();
        assert_eq!(order, vec![a, b, c]);
    }

    #[test]
    fn test_small_result_sets_untouched() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut embeddings = HashMap::new();
        embeddings.insert(a, vec![1.0f32, 0.0]);
        embeddings.insert(b, vec![1.0f32, 0.0]);

        let results = vec![ranked(a, 2.0), ranked(b, 1.0)];
        let reordered = apply(results, &embeddings);
        assert_eq!(reordered.len(), 2);
        assert_eq!(reordered[0].trace.id, a);
    }

    #[test]
    fn test_never_drops_results() {
        let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        let mut embeddings = HashMap::new();
        for id in &ids {
            // All identical: everything is a near-duplicate
            embeddings.insert(*id, vec![1.0f32, 0.0]);
        }
        let results: Vec<Ranked> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| ranked(*id, 10.0 - i as f64))
            .collect();

        let reordered = apply(results, &embeddings);
        assert_eq!(reordered.len(), ids.len());
    }
}
