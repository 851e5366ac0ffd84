//! # CommonTrace Core
//!
//! Cognitive memory engine for a shared agent knowledge base. Agents
//! deposit, retrieve, vote on, and amend short "traces" (context +
//! solution + tags); the engine decides how those traces are retrieved,
//! ranked, related, consolidated, and forgotten over time:
//!
//! - **Hybrid retrieval**: vector ANN + tag filtering + multi-factor
//!   re-ranking + spreading activation + diversity + related-trace
//!   attachment, with fire-and-forget analytic side-effects
//! - **Sleep-cycle consolidation**: trust downscaling, temperature
//!   reclassification, co-retrieval edges, prospective-memory expiry,
//!   convergence clusters, pattern synthesis, contradiction detection,
//!   RIF shadows, tag trends
//! - **Trust state machine**: atomic vote application with maturity-tier
//!   promotion thresholds and Wilson-bound reputation
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use commontrace_core::{Config, DisabledEmbedder, Engine, SubmitTraceInput};
//!
//! let engine = Engine::new(Config::from_env(), Arc::new(DisabledEmbedder))?;
//! let trace = engine.submit_trace(input, contributor_id)?;
//! let outcome = engine.run_consolidation()?;
//! ```
//!
//! ## Feature flags
//!
//! - `embeddings` (default): local fastembed provider; without it the
//!   embedding port reports *skipped* and search degrades to tag-only
//! - `bundled-sqlite` (default): build SQLite from source

pub mod config;
pub mod consolidation;
pub mod context;
pub mod embeddings;
pub mod engine;
pub mod enrichment;
pub mod error;
pub mod model;
pub mod ranking;
pub mod search;
pub mod storage;
pub mod trust;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use config::Config;
pub use engine::Engine;
pub use error::EngineError;

pub use model::{
    ImpactLevel, RelatedTrace, RelationshipType, SYSTEM_USER_ID, SearchRequest, SearchResponse,
    SearchResult, SubmitTraceInput, Trace, TraceStatus, TraceType, TrendingTag, VoteInput,
    VoteOutcome, VoteType, normalize_tag,
};

pub use context::{ContextFingerprint, alignment};

pub use ranking::decay::{compute_half_life, temporal_decay_factor};
pub use ranking::maturity::MaturityTier;
pub use ranking::temperature::{MemoryTemperature, classify_temperature, temperature_multiplier};

pub use trust::{vote_weight, wilson_lower_bound};

pub use consolidation::{ConsolidationOutcome, RunStatus};
pub use consolidation::convergence::classify_convergence_level;

pub use embeddings::{
    DisabledEmbedder, EmbeddedText, Embedder, EmbeddingError, cosine_distance, cosine_similarity,
};

#[cfg(feature = "embeddings")]
pub use embeddings::LocalEmbedder;

pub use search::{SideEffects, VectorIndex, VectorIndexError};

pub use storage::{Store, StoreError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
