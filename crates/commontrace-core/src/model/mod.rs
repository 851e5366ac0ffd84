//! Core data model - the trace and its satellite records.
//!
//! A trace is the unit of knowledge: a (context, solution, tags) triple
//! contributed by one agent, carrying trust state, temporal freshness,
//! classification scores, and convergence membership.

mod search;

pub use search::{RelatedTrace, SearchRequest, SearchResponse, SearchResult};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::ContextFingerprint;
use crate::ranking::temperature::MemoryTemperature;

/// Reserved contributor id for system-generated content (pattern traces)
pub const SYSTEM_USER_ID: Uuid = Uuid::from_u128(0x0000_0000_0000_0000_0000_0000_0000_0001);

// ============================================================================
// ENUMS
// ============================================================================

/// Trust lifecycle of a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TraceStatus {
    /// Submitted but not yet confirmed by enough voters
    #[default]
    Pending,
    /// Confirmed by the community (threshold reached with net positive trust)
    Validated,
}

impl TraceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceStatus::Pending => "pending",
            TraceStatus::Validated => "validated",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s {
            "validated" => TraceStatus::Validated,
            _ => TraceStatus::Pending,
        }
    }
}

/// Origin of a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TraceType {
    /// Submitted by an agent describing one concrete episode
    #[default]
    Episodic,
    /// Synthesized by consolidation from a convergence cluster
    Pattern,
}

impl TraceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceType::Episodic => "episodic",
            TraceType::Pattern => "pattern",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s {
            "pattern" => TraceType::Pattern,
            _ => TraceType::Episodic,
        }
    }
}

/// Categorical impact of a trace; acts as a permanent decay floor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImpactLevel {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl ImpactLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImpactLevel::Critical => "critical",
            ImpactLevel::High => "high",
            ImpactLevel::Normal => "normal",
            ImpactLevel::Low => "low",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s {
            "critical" => ImpactLevel::Critical,
            "high" => ImpactLevel::High,
            "low" => ImpactLevel::Low,
            _ => ImpactLevel::Normal,
        }
    }

    /// Ordering rank for aggregation (higher = more impactful)
    pub fn rank(&self) -> u8 {
        match self {
            ImpactLevel::Critical => 4,
            ImpactLevel::High => 3,
            ImpactLevel::Normal => 2,
            ImpactLevel::Low => 1,
        }
    }
}

/// Typed edge between two traces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    /// Appeared together in search results (stored symmetrically)
    CoRetrieved,
    /// Source replaces target (directional)
    Supersedes,
    /// Source complements target
    Complements,
    /// Pattern trace to cluster member (directional)
    PatternSource,
    /// Different solution to the same problem (stored symmetrically)
    AlternativeTo,
    /// Conflicting solutions with opposed trust (stored symmetrically)
    Contradicts,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::CoRetrieved => "CO_RETRIEVED",
            RelationshipType::Supersedes => "SUPERSEDES",
            RelationshipType::Complements => "COMPLEMENTS",
            RelationshipType::PatternSource => "PATTERN_SOURCE",
            RelationshipType::AlternativeTo => "ALTERNATIVE_TO",
            RelationshipType::Contradicts => "CONTRADICTS",
        }
    }
}

/// Direction of a vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteType {
    Up,
    Down,
}

impl VoteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteType::Up => "up",
            VoteType::Down => "down",
        }
    }

    pub fn is_upvote(&self) -> bool {
        matches!(self, VoteType::Up)
    }
}

// ============================================================================
// TRACE
// ============================================================================

/// A knowledge trace
///
/// Embedding vectors are stored out-of-row; `has_embedding` reflects their
/// presence without hauling the bytes through every query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    pub id: Uuid,
    pub title: String,
    pub context_text: String,
    pub solution_text: String,
    pub contributor_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub is_seed: bool,

    // Trust state machine - every trace starts pending
    pub status: TraceStatus,
    pub trust_score: f64,
    pub confirmation_count: i64,

    // Embedding metadata; the background worker is the sole writer
    pub has_embedding: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model_version: Option<String>,

    // Temporal freshness
    pub retrieval_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_retrieved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub half_life_days: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,

    // Prospective memory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_after: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watch_condition: Option<String>,

    // Classification
    pub depth_score: i64,
    pub somatic_intensity: f64,
    pub impact_level: ImpactLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_temperature: Option<MemoryTemperature>,
    pub trace_type: TraceType,

    // Convergence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub convergence_cluster_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub convergence_level: Option<i64>,

    // Context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_fingerprint: Option<ContextFingerprint>,

    // Moderation
    pub is_flagged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flagged_at: Option<DateTime<Utc>>,
    pub is_stale: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub tags: Vec<String>,
}

impl Trace {
    /// Whether the trace is within its validity window at `time`
    pub fn is_valid_at(&self, time: DateTime<Utc>) -> bool {
        let after_start = self.valid_from.map(|t| time >= t).unwrap_or(true);
        let before_end = self.valid_until.map(|t| time <= t).unwrap_or(true);
        after_start && before_end
    }
}

// ============================================================================
// INPUT TYPES
// ============================================================================

/// Input for submitting a new trace
///
/// Uses `deny_unknown_fields` to prevent field injection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SubmitTraceInput {
    pub title: String,
    pub context_text: String,
    pub solution_text: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Creates a SUPERSEDES edge from the new trace to this one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supersedes_trace_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_after: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watch_condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub impact_level: ImpactLevel,
}

/// Input for casting a vote on a trace
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VoteInput {
    pub vote_type: VoteType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback_text: Option<String>,
}

/// Outcome of a vote after atomic application and the promotion check
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteOutcome {
    pub trace_id: Uuid,
    pub trust_score: f64,
    pub confirmation_count: i64,
    pub status: TraceStatus,
    pub promoted: bool,
}

/// A trending tag as served by the tags endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendingTag {
    pub tag: String,
    pub growth_rate: f64,
    pub trace_count: i64,
    pub prior_count: i64,
    pub period_end: DateTime<Utc>,
}

/// Normalize a tag name: lowercase, trimmed
pub fn normalize_tag(tag: &str) -> String {
    tag.trim().to_lowercase()
}

// ============================================================================
// TESTS
// ============================================================================
