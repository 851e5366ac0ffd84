//! The search pipeline orchestrator.
//!
//! Modes:
//!   - Semantic-only (q provided, tags empty): cosine ANN, multi-factor
//!     re-ranked
//!   - Tag-only (q omitted, tags provided): trust-ordered SQL filter, no
//!     embed call
//!   - Hybrid (q + tags): cosine ANN with tag pre-filter
//!   - Both empty: InvalidArgument
//!
//! Every candidate is re-ranked with
//! `sim * trust * depth * decay * ctx * conv * temp * validity`, then the
//! top results seed spreading activation, pass the diversity re-ranker,
//! and get their related traces attached. Sorting is stable by
//! `(score DESC, id ASC)` so results are reproducible.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use lru::LruCache;
use uuid::Uuid;

use crate::context::{self, ContextFingerprint};
use crate::embeddings::Embedder;
use crate::error::EngineError;
use crate::model::{SearchRequest, SearchResponse, SearchResult, Trace, normalize_tag};
use crate::ranking::decay::temporal_decay_factor;
use crate::ranking::temperature::temperature_multiplier;
use crate::storage::Store;

use super::vector::{HNSW_EXPANSION_SEARCH, VectorIndex};
use super::{activation, diversity};

/// Over-fetch from the ANN before re-ranking
pub const SEARCH_OVERFETCH: usize = 100;

/// Related traces attached per result
pub const RELATED_PER_RESULT: usize = 3;

/// Capacity of the query-embedding LRU cache
pub const QUERY_CACHE_CAPACITY: usize = 100;

/// A candidate mid-pipeline: the trace plus its ranking state
#[derive(Debug, Clone)]
pub(crate) struct Ranked {
    pub trace: Trace,
    /// Reported similarity (0.0 in tag-only mode and for activated
    /// neighbors)
    pub similarity: f64,
    pub combined: f64,
}

/// Borrowed engine internals the pipeline runs against
pub(crate) struct SearchParts<'a> {
    pub store: &'a Store,
    pub index: &'a Mutex<VectorIndex>,
    pub embedder: &'a dyn Embedder,
    pub query_cache: &'a Mutex<LruCache<String, Vec<f32>>>,
}

/// Pipeline output: the response plus the ids to feed the side-effects
pub(crate) struct SearchOutcome {
    pub response: SearchResponse,
    pub retrieved_ids: Vec<Uuid>,
}

/// Build an empty query-embedding cache
pub(crate) fn new_query_cache() -> Mutex<LruCache<String, Vec<f32>>> {
    Mutex::new(LruCache::new(
        NonZeroUsize::new(QUERY_CACHE_CAPACITY).expect("capacity is non-zero"),
    ))
}

/// Multi-factor ranking without the similarity term:
/// `trust * depth * decay * ctx * conv * temp * validity`
pub(crate) fn base_factors(
    trace: &Trace,
    searcher_fp: Option<&ContextFingerprint>,
    now: DateTime<Utc>,
) -> f64 {
    let trust = (trace.trust_score.max(0.0) + 1.0).ln_1p();
    let depth = 1.0 + 0.1 * trace.depth_score as f64;
    let decay = temporal_decay_factor(
        trace.created_at,
        trace.last_retrieved_at,
        trace.half_life_days,
        now,
    );

    let ctx = match (searcher_fp, trace.context_fingerprint.as_ref()) {
        (Some(searcher), Some(own)) => 1.0 + 0.3 * context::alignment(searcher, own),
        _ => 1.0,
    };

    let conv = trace
        .convergence_level
        .map(|level| 1.0 + 0.05 * (4 - level) as f64)
        .unwrap_or(1.0);

    let temp = temperature_multiplier(trace.memory_temperature);

    let validity = match trace.valid_until {
        Some(until) if until < now => 0.5,
        _ => 1.0,
    };

    trust * depth * decay * ctx * conv * temp * validity
}

/// Stable ordering: score descending, trace id ascending
pub(crate) fn sort_ranked(results: &mut [Ranked]) {
    results.sort_by(|a, b| {
        b.combined
            .partial_cmp(&a.combined)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.trace.id.cmp(&b.trace.id))
    });
}

/// Run the whole pipeline. Side-effects are NOT dispatched here - the
/// caller owns that so failures there can never touch the response.
pub(crate) fn execute(
    parts: &SearchParts<'_>,
    req: &SearchRequest,
    now: DateTime<Utc>,
) -> Result<SearchOutcome, EngineError> {
    req.validate()?;

    let query = req.q.as_deref().map(str::trim).filter(|q| !q.is_empty());
    let searcher_fp = req.context.as_ref();

    let normalized_tags: Vec<String> = req
        .tags
        .iter()
        .map(|t| normalize_tag(t))
        .filter(|t| !t.is_empty())
        .collect();

    // Step A: embed the query (LRU-cached); a skipped port is a hard 503
    let query_vector = match query {
        Some(q) => Some(embed_query(parts, q)?),
        None => None,
    };

    // Steps B-E: candidate fetch + multi-factor re-rank
    let mut results = match &query_vector {
        Some(vector) => semantic_candidates(parts, vector, &normalized_tags, req, searcher_fp, now)?,
        None => tag_only_candidates(parts, &normalized_tags, req, searcher_fp, now)?,
    };

    sort_ranked(&mut results);
    results.truncate(req.limit);

    // Step F: spreading activation over the graph neighborhood
    if !results.is_empty() {
        results = activation::apply(parts.store, results, req.limit, searcher_fp, now)?;
    }

    // Step G: diversity re-rank (semantic mode only; needs embeddings)
    if query_vector.is_some() && results.len() >= 3 {
        let ids: Vec<Uuid> = results.iter().map(|r| r.trace.id).collect();
        let embeddings = parts.store.embeddings_for(&ids)?;
        results = diversity::apply(results, &embeddings);
    }

    // Step H: related-trace attachment (outgoing edges only)
    let final_ids: Vec<Uuid> = results.iter().map(|r| r.trace.id).collect();
    let mut related = parts.store.related_for(&final_ids, RELATED_PER_RESULT)?;

    let search_results: Vec<SearchResult> = results
        .into_iter()
        .map(|ranked| {
            let related_traces = related.remove(&ranked.trace.id).unwrap_or_default();
            to_search_result(ranked, related_traces)
        })
        .collect();

    let total = search_results.len();
    Ok(SearchOutcome {
        response: SearchResponse {
            results: search_results,
            total,
            query: query.map(|q| q.to_string()),
        },
        retrieved_ids: final_ids,
    })
}

fn embed_query(parts: &SearchParts<'_>, query: &str) -> Result<Vec<f32>, EngineError> {
    if let Ok(mut cache) = parts.query_cache.lock() {
        if let Some(vector) = cache.get(query) {
            return Ok(vector.clone());
        }
    }

    let embedded = parts.embedder.embed(query)?;

    if let Ok(mut cache) = parts.query_cache.lock() {
        cache.put(query.to_string(), embedded.vector.clone());
    }
    Ok(embedded.vector)
}

fn semantic_candidates(
    parts: &SearchParts<'_>,
    query_vector: &[f32],
    tags: &[String],
    req: &SearchRequest,
    searcher_fp: Option<&ContextFingerprint>,
    now: DateTime<Utc>,
) -> Result<Vec<Ranked>, EngineError> {
    // ANN over-fetch with the per-search expansion factor
    let neighbors = {
        let index = parts
            .index
            .lock()
            .map_err(|_| EngineError::Internal("vector index lock poisoned".to_string()))?;
        index
            .search_with_ef(query_vector, SEARCH_OVERFETCH, HNSW_EXPANSION_SEARCH)
            .map_err(|e| EngineError::Internal(e.to_string()))?
    };

    if neighbors.is_empty() {
        return Ok(vec![]);
    }

    let distance_by_id: HashMap<Uuid, f64> =
        neighbors.iter().map(|n| (n.id, n.distance)).collect();
    let candidate_ids: Vec<Uuid> = neighbors.iter().map(|n| n.id).collect();

    let traces = parts.store.filter_semantic_candidates(
        &candidate_ids,
        parts.embedder.model_id(),
        tags,
        req.include_expired,
        now,
    )?;

    Ok(traces
        .into_iter()
        .filter_map(|trace| {
            let distance = *distance_by_id.get(&trace.id)?;
            let similarity = 1.0 - distance;
            let combined = similarity * base_factors(&trace, searcher_fp, now);
            Some(Ranked {
                trace,
                similarity,
                combined,
            })
        })
        .collect())
}

fn tag_only_candidates(
    parts: &SearchParts<'_>,
    tags: &[String],
    req: &SearchRequest,
    searcher_fp: Option<&ContextFingerprint>,
    now: DateTime<Utc>,
) -> Result<Vec<Ranked>, EngineError> {
    let traces =
        parts
            .store
            .tag_only_candidates(tags, req.include_expired, now, SEARCH_OVERFETCH)?;

    // Internally sim := 1 (pure quality ranking); the reported
    // similarity_score stays 0 since no semantic comparison happened.
    Ok(traces
        .into_iter()
        .map(|trace| {
            let combined = base_factors(&trace, searcher_fp, now);
            Ranked {
                trace,
                similarity: 0.0,
                combined,
            }
        })
        .collect())
}

fn to_search_result(ranked: Ranked, related_traces: Vec<crate::model::RelatedTrace>) -> SearchResult {
    let trace = ranked.trace;
    SearchResult {
        id: trace.id,
        title: trace.title,
        context_text: trace.context_text,
        solution_text: trace.solution_text,
        trust_score: trace.trust_score,
        status: trace.status,
        tags: trace.tags,
        similarity_score: ranked.similarity,
        combined_score: ranked.combined,
        contributor_id: trace.contributor_id,
        created_at: trace.created_at,
        retrieval_count: trace.retrieval_count,
        depth_score: trace.depth_score,
        context_fingerprint: trace.context_fingerprint,
        convergence_level: trace.convergence_level,
        memory_temperature: trace.memory_temperature,
        valid_from: trace.valid_from,
        valid_until: trace.valid_until,
        related_traces,
    }
}

// ============================================================================
// TESTS
// ============================================================================
