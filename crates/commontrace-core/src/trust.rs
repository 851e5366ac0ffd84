//! Trust state machine: vote application and promotion.
//!
//! Votes mutate exactly three fields - `trust_score`,
//! `confirmation_count`, and (on threshold crossing) `status`. The update
//! is one atomic column-delta statement; promotion is a separate
//! conditional UPDATE that is idempotent under races because the vote
//! itself is uniquely constrained per `(user, trace)`.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::{VoteInput, VoteOutcome, TraceStatus};
use crate::ranking::maturity::MaturityTier;
use crate::storage::Store;

/// z-score for a 95% one-sided confidence bound
const WILSON_Z: f64 = 1.96;

/// Wilson score lower bound for a binomial proportion.
///
/// Used to turn a contributor's `(upvotes, total votes)` history into a
/// conservative reputation estimate. Returns 0.0 for an empty history.
pub fn wilson_lower_bound(upvotes: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    let n = total as f64;
    let p_hat = upvotes.max(0) as f64 / n;
    let z = WILSON_Z;
    let z2 = z * z;

    let numerator =
        p_hat + z2 / (2.0 * n) - z * ((p_hat * (1.0 - p_hat) + z2 / (4.0 * n)) / n).sqrt();
    let denominator = 1.0 + z2 / n;
    (numerator / denominator).clamp(0.0, 1.0)
}

/// Derive a vote weight from a voter's reputation history.
///
/// An unknown voter carries the default weight 1.0; a voter whose own
/// contributions are consistently upvoted approaches 2.0.
pub fn vote_weight(upvotes_received: i64, votes_received: i64) -> f64 {
    1.0 + wilson_lower_bound(upvotes_received, votes_received)
}

/// Apply a vote to a trace and promote it when eligible.
///
/// The threshold is maturity-tier derived: a SEED system validates on one
/// confirmation, a MATURE one needs three. The promotion re-check never
/// rescues - a failure there aborts the whole vote.
pub fn apply_vote(
    store: &Store,
    trace_id: Uuid,
    user_id: Uuid,
    input: &VoteInput,
    weight: f64,
    now: DateTime<Utc>,
) -> Result<VoteOutcome, EngineError> {
    if weight <= 0.0 {
        return Err(EngineError::InvalidArgument(
            "vote weight must be positive".to_string(),
        ));
    }

    // Uniqueness on (user, trace) is the concurrency anchor: a duplicate
    // vote fails here and leaves the trust state untouched.
    store.insert_vote(trace_id, user_id, input, now)?;

    let score_delta = if input.vote_type.is_upvote() {
        weight
    } else {
        -weight
    };
    store.apply_vote_delta(trace_id, score_delta, now)?;

    // Contributor reputation feeds future vote weights
    if let Some(contributor) = store.contributor_of(trace_id)? {
        store.bump_reputation(contributor, input.vote_type.is_upvote())?;
    }

    let (status, confirmation_count, trust_score) = store.trust_state(trace_id)?;

    let tier = MaturityTier::from_trace_count(store.trace_count()?);
    let threshold = tier.validation_threshold();

    let mut promoted = false;
    if status == TraceStatus::Pending && confirmation_count >= threshold && trust_score > 0.0 {
        promoted = store.promote_trace(trace_id, now)?;
    }

    let final_status = if promoted || status == TraceStatus::Validated {
        TraceStatus::Validated
    } else {
        TraceStatus::Pending
    };

    tracing::debug!(
        trace_id = %trace_id,
        trust_score,
        confirmation_count,
        promoted,
        "vote applied"
    );

    Ok(VoteOutcome {
        trace_id,
        trust_score,
        confirmation_count,
        status: final_status,
        promoted,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wilson_empty_history() {
        assert_eq!(wilson_lower_bound(0, 0), 0.0);
    }

    #[test]
    fn test_wilson_bounds() {
        for (up, total) in [(0, 10), (5, 10), (10, 10), (1, 1), (99, 100)] {
            let w = wilson_lower_bound(up, total);
            assert!((0.0..=1.0).contains(&w), "wilson({}, {}) = {}", up, total, w);
        }
    }

    #[test]
    fn test_wilson_all_upvotes_monotone_in_n() {
        let mut prev = 0.0;
        for n in [1, 5, 10, 50, 100, 1000] {
            let w = wilson_lower_bound(n, n);
            assert!(w > prev, "wilson({n}, {n}) should grow with n");
            prev = w;
        }
    }

    #[test]
    fn test_wilson_penalizes_small_samples() {
        // 1/1 is less credible than 90/100
        assert!(wilson_lower_bound(1, 1) < wilson_lower_bound(90, 100));
    }

    #[test]
    fn test_vote_weight_range() {
        assert_eq!(vote_weight(0, 0), 1.0);
        let strong = vote_weight(1000, 1000);
        assert!(strong > 1.9 && strong < 2.0);
    }
}
