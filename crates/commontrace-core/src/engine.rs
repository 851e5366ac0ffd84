//! The engine facade.
//!
//! Owns the store, the vector index, the embedding port, and the
//! side-effect tracker, and exposes the operations the HTTP surface and
//! the workers drive: submit, fetch, search, vote, consolidate, embed.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use lru::LruCache;
use uuid::Uuid;

use crate::config::Config;
use crate::consolidation::{ConsolidationOutcome, cycle};
use crate::embeddings::{Embedder, worker};
use crate::error::EngineError;
use crate::model::{
    SearchRequest, SearchResponse, SubmitTraceInput, Trace, TrendingTag, VoteInput, VoteOutcome,
};
use crate::search::pipeline::{self, SearchParts, new_query_cache};
use crate::search::{SideEffects, VectorIndex, side_effects};
use crate::storage::Store;
use crate::trust;

/// Maximum title length accepted on submission
pub const MAX_TITLE_LEN: usize = 500;

/// Maximum tags accepted on submission
pub const MAX_SUBMIT_TAGS: usize = 20;

/// The cognitive-memory engine
pub struct Engine {
    store: Arc<Store>,
    index: Mutex<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    config: Config,
    effects: SideEffects,
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl Engine {
    /// Open the store, build the vector index, and warm it from
    /// persisted embeddings on the current model.
    pub fn new(config: Config, embedder: Arc<dyn Embedder>) -> Result<Self, EngineError> {
        let store = Arc::new(Store::new(config.database_path.clone())?);

        let mut index = VectorIndex::new(config.embedding_dimensions)
            .map_err(|e| EngineError::Internal(e.to_string()))?;

        let persisted = store.all_embeddings(embedder.model_id())?;
        let warm_count = persisted.len();
        for (trace_id, vector) in persisted {
            if let Err(e) = index.add(trace_id, &vector) {
                tracing::warn!(trace_id = %trace_id, error = %e, "failed to load embedding into index");
            }
        }
        if warm_count > 0 {
            tracing::info!(count = warm_count, "vector index warmed from store");
        }

        Ok(Self {
            store,
            index: Mutex::new(index),
            embedder,
            config,
            effects: SideEffects::new(),
            query_cache: new_query_cache(),
        })
    }

    /// The underlying store (shared with workers and tests)
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Vectors currently indexed
    pub fn index_size(&self) -> usize {
        self.index.lock().map(|index| index.len()).unwrap_or(0)
    }

    /// Database liveness, for the health endpoint
    pub fn ping(&self) -> Result<(), EngineError> {
        self.store.ping()?;
        Ok(())
    }

    // ========================================================================
    // WRITE PATH
    // ========================================================================

    /// Accept a trace for asynchronous processing; it is persisted
    /// `pending` and embedded later by the background worker.
    pub fn submit_trace(
        &self,
        input: SubmitTraceInput,
        contributor_id: Uuid,
    ) -> Result<Trace, EngineError> {
        if input.title.trim().is_empty() || input.title.len() > MAX_TITLE_LEN {
            return Err(EngineError::InvalidArgument(format!(
                "title must be 1-{} characters",
                MAX_TITLE_LEN
            )));
        }
        if input.context_text.trim().is_empty() || input.solution_text.trim().is_empty() {
            return Err(EngineError::InvalidArgument(
                "context and solution must be non-empty".to_string(),
            ));
        }
        if input.tags.len() > MAX_SUBMIT_TAGS {
            return Err(EngineError::InvalidArgument(format!(
                "at most {} tags may be provided",
                MAX_SUBMIT_TAGS
            )));
        }

        let trace = self.store.submit_trace(input, contributor_id, Utc::now())?;
        tracing::info!(trace_id = %trace.id, "trace accepted");
        Ok(trace)
    }

    /// Fetch one trace
    pub fn get_trace(&self, id: Uuid) -> Result<Trace, EngineError> {
        self.store
            .trace(id)?
            .ok_or_else(|| EngineError::NotFound(format!("trace {}", id)))
    }

    /// Apply a vote; the voter's reputation history derives the weight
    pub fn vote(
        &self,
        trace_id: Uuid,
        user_id: Uuid,
        input: &VoteInput,
    ) -> Result<VoteOutcome, EngineError> {
        let (upvotes, total) = self.store.reputation(user_id)?;
        let weight = trust::vote_weight(upvotes, total);
        trust::apply_vote(&self.store, trace_id, user_id, input, weight, Utc::now())
    }

    // ========================================================================
    // READ PATH
    // ========================================================================

    /// Run the search pipeline and dispatch the fire-and-forget
    /// side-effects. Side-effect failures never touch the response.
    pub fn search(&self, req: &SearchRequest) -> Result<SearchResponse, EngineError> {
        let now = Utc::now();
        let parts = SearchParts {
            store: &self.store,
            index: &self.index,
            embedder: self.embedder.as_ref(),
            query_cache: &self.query_cache,
        };

        let outcome = pipeline::execute(&parts, req, now)?;

        side_effects::dispatch(
            Arc::clone(&self.store),
            &self.effects,
            outcome.retrieved_ids,
            now,
        );

        Ok(outcome.response)
    }

    /// All tag names, alphabetical
    pub fn list_tags(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.store.list_tags()?)
    }

    /// Top trending tags from the latest trend detection period
    pub fn trending_tags(&self, limit: usize) -> Result<Vec<TrendingTag>, EngineError> {
        Ok(self.store.trending_tags(limit)?)
    }

    /// Accept an opaque telemetry payload
    pub fn record_trigger_stats(
        &self,
        session_id: &str,
        stats: &serde_json::Value,
    ) -> Result<(), EngineError> {
        if session_id.trim().is_empty() {
            return Err(EngineError::InvalidArgument(
                "session_id must be non-empty".to_string(),
            ));
        }
        self.store
            .insert_trigger_stats(session_id, stats, Utc::now())?;
        Ok(())
    }

    // ========================================================================
    // BACKGROUND WORK
    // ========================================================================

    /// Run one consolidation cycle (the "sleep cycle")
    pub fn run_consolidation(&self) -> Result<ConsolidationOutcome, EngineError> {
        cycle::run_cycle(
            &self.store,
            &self.index,
            &self.config,
            self.embedder.model_id(),
            Utc::now(),
        )
    }

    /// One embedding worker poll: claim and embed a batch of traces
    pub fn embed_pending_batch(&self) -> Result<usize, EngineError> {
        worker::process_batch(&self.store, &self.index, self.embedder.as_ref(), Utc::now())
    }
}
