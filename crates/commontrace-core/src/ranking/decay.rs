//! Temporal decay for trace ranking.
//!
//! Exponential decay with a Hebbian twist: retrieval resets the freshness
//! clock, so recently-used knowledge stays fresh while untouched traces
//! sink gracefully instead of being deleted.

use chrono::{DateTime, Utc};

/// Default half-life when no tag matches the domain table
pub const DEFAULT_HALF_LIFE_DAYS: i64 = 365;

/// Decay never drops below this floor - timeless knowledge never fully
/// disappears from ranking.
pub const DECAY_FLOOR: f64 = 0.3;

/// Domain-specific half-life rules (days). Frontend frameworks churn
/// faster; infrastructure knowledge is more stable.
const HALF_LIFE_RULES: &[(&str, i64)] = &[
    // Frontend - fast churn
    ("react", 180),
    ("vue", 180),
    ("next", 180),
    ("nuxt", 180),
    ("svelte", 180),
    ("angular", 180),
    ("tailwind", 270),
    ("css", 270),
    // Backend - moderate stability
    ("fastapi", 365),
    ("django", 365),
    ("flask", 365),
    ("express", 365),
    ("rails", 365),
    ("spring", 365),
    ("node", 365),
    ("python", 365),
    ("javascript", 365),
    ("typescript", 365),
    ("rust", 365),
    ("go", 365),
    // Infrastructure - high stability
    ("docker", 730),
    ("kubernetes", 730),
    ("postgres", 730),
    ("redis", 730),
    ("nginx", 730),
    ("linux", 730),
    ("terraform", 730),
    ("aws", 548),
    ("gcp", 548),
];

/// Compute the half-life for a trace from its tags.
///
/// The minimum half-life across matching tags wins (the most volatile
/// domain dominates). Falls back to [`DEFAULT_HALF_LIFE_DAYS`].
pub fn compute_half_life(tag_names: &[String]) -> i64 {
    HALF_LIFE_RULES
        .iter()
        .filter(|(tag, _)| tag_names.iter().any(|t| t == tag))
        .map(|(_, days)| *days)
        .min()
        .unwrap_or(DEFAULT_HALF_LIFE_DAYS)
}

/// Temporal decay factor in [DECAY_FLOOR, 1.0].
///
/// `factor = 2^(-age_days / half_life)` where age is measured from the
/// most recent of creation and last retrieval.
pub fn temporal_decay_factor(
    created_at: DateTime<Utc>,
    last_retrieved_at: Option<DateTime<Utc>>,
    half_life_days: Option<i64>,
    now: DateTime<Utc>,
) -> f64 {
    let half_life = half_life_days.unwrap_or(DEFAULT_HALF_LIFE_DAYS).max(1) as f64;
    let anchor = last_retrieved_at.unwrap_or(created_at);

    let age_days = (now - anchor).num_seconds() as f64 / 86_400.0;
    if age_days <= 0.0 {
        return 1.0;
    }

    let raw = 2f64.powf(-age_days / half_life);
    raw.max(DECAY_FLOOR)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn tags(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_half_life_most_volatile_wins() {
        assert_eq!(compute_half_life(&tags(&["react", "docker"])), 180);
        assert_eq!(compute_half_life(&tags(&["docker", "postgres"])), 730);
        assert_eq!(compute_half_life(&tags(&["unknown-tag"])), DEFAULT_HALF_LIFE_DAYS);
        assert_eq!(compute_half_life(&[]), DEFAULT_HALF_LIFE_DAYS);
    }

    #[test]
    fn test_fresh_trace_has_no_decay() {
        let now = Utc::now();
        let factor = temporal_decay_factor(now, None, None, now);
        assert_eq!(factor, 1.0);
    }

    #[test]
    fn test_decay_halves_at_half_life() {
        let now = Utc::now();
        let created = now - Duration::days(365);
        let factor = temporal_decay_factor(created, None, Some(365), now);
        assert!((factor - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_decay_floor() {
        let now = Utc::now();
        let created = now - Duration::days(10_000);
        let factor = temporal_decay_factor(created, None, Some(180), now);
        assert_eq!(factor, DECAY_FLOOR);
    }

    #[test]
    fn test_retrieval_resets_freshness_anchor() {
        let now = Utc::now();
        let created = now - Duration::days(400);
        let stale = temporal_decay_factor(created, None, Some(365), now);
        let refreshed =
            temporal_decay_factor(created, Some(now - Duration::days(1)), Some(365), now);
        assert!(refreshed > stale);
        assert!(refreshed > 0.99);
    }

    #[test]
    fn test_decay_monotonically_non_increasing_in_age() {
        let now = Utc::now();
        let mut prev = f64::MAX;
        for days in [0, 30, 90, 180, 365, 730, 3650] {
            let factor = temporal_decay_factor(now - Duration::days(days), None, Some(365), now);
            assert!(factor <= prev);
            prev = factor;
        }
    }
}
