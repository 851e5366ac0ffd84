//! The consolidation worker ("sleep cycle") and its sub-jobs.
//!
//! Runs on a configurable cadence to maintain knowledge health: trust
//! downscaling, temperature reclassification, co-retrieval edge building,
//! log pruning, prospective-memory expiry, convergence detection, pattern
//! synthesis, contradiction detection, RIF shadows, and tag trends.

pub mod contradiction;
pub mod convergence;
pub mod cycle;
pub mod patterns;
pub mod rif;
pub mod trends;

use serde::{Deserialize, Serialize};

/// Terminal state of a consolidation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    /// Every sub-job succeeded
    Completed,
    /// At least one sub-job failed; the rest ran
    Partial,
    /// Top-level failure before sub-jobs could run
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }
}

/// Result of one consolidation cycle
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationOutcome {
    /// True when the idempotency gate skipped the cycle
    pub skipped: bool,
    pub status: RunStatus,
    /// Per-job stats ("error" for isolated failures)
    pub stats: serde_json::Value,
}

impl ConsolidationOutcome {
    pub(crate) fn skipped() -> Self {
        Self {
            skipped: true,
            status: RunStatus::Completed,
            stats: serde_json::json!({ "skipped": true }),
        }
    }
}
