//! Memory temperature classification.
//!
//! Replaces a binary stale bit with a graduated freshness signal used as a
//! ranking multiplier:
//!
//!   HOT > WARM > COOL > COLD > FROZEN
//!
//! Trust checks run first as a floor - a heavily downvoted trace cannot be
//! HOT just because it was recently retrieved (it was probably being
//! downvoted).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Graduated freshness tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MemoryTemperature {
    Hot,
    Warm,
    Cool,
    Cold,
    Frozen,
}

impl MemoryTemperature {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryTemperature::Hot => "HOT",
            MemoryTemperature::Warm => "WARM",
            MemoryTemperature::Cool => "COOL",
            MemoryTemperature::Cold => "COLD",
            MemoryTemperature::Frozen => "FROZEN",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "HOT" => Some(MemoryTemperature::Hot),
            "WARM" => Some(MemoryTemperature::Warm),
            "COOL" => Some(MemoryTemperature::Cool),
            "COLD" => Some(MemoryTemperature::Cold),
            "FROZEN" => Some(MemoryTemperature::Frozen),
            _ => None,
        }
    }

    /// Search ranking multiplier for this tier
    pub fn multiplier(&self) -> f64 {
        match self {
            MemoryTemperature::Hot => 1.15,
            MemoryTemperature::Warm => 1.05,
            MemoryTemperature::Cool => 1.0,
            MemoryTemperature::Cold => 0.85,
            MemoryTemperature::Frozen => 0.70,
        }
    }
}

/// Ranking multiplier for an optional temperature; unknown maps to 1.0
pub fn temperature_multiplier(temperature: Option<MemoryTemperature>) -> f64 {
    temperature.map(|t| t.multiplier()).unwrap_or(1.0)
}

/// Classify a trace's memory temperature.
///
/// Rule order is authoritative; the trust floors are evaluated before any
/// recency rule.
pub fn classify_temperature(
    created_at: DateTime<Utc>,
    last_retrieved_at: Option<DateTime<Utc>>,
    retrieval_count: i64,
    trust_score: f64,
    now: DateTime<Utc>,
) -> MemoryTemperature {
    let age_days = ((now - created_at).num_seconds() as f64 / 86_400.0).max(1.0);
    let days_since_retrieval =
        last_retrieved_at.map(|lr| (now - lr).num_seconds() as f64 / 86_400.0);
    let retrieval_freq = retrieval_count as f64 / age_days;

    // FROZEN: strongly distrusted and effectively unused
    if trust_score < -1.0 {
        match days_since_retrieval {
            None => return MemoryTemperature::Frozen,
            Some(dsr) if dsr > 180.0 => return MemoryTemperature::Frozen,
            _ => {}
        }
    }

    // COLD: any net distrust
    if trust_score < 0.0 {
        return MemoryTemperature::Cold;
    }

    // COLD: not retrieved in 90+ days (or never, and old)
    match days_since_retrieval {
        Some(dsr) if dsr > 90.0 => return MemoryTemperature::Cold,
        None if age_days > 90.0 => return MemoryTemperature::Cold,
        _ => {}
    }

    // HOT: high retrieval frequency or very recent retrieval
    if retrieval_freq > 0.1 {
        return MemoryTemperature::Hot;
    }
    if let Some(dsr) = days_since_retrieval {
        if dsr <= 7.0 {
            return MemoryTemperature::Hot;
        }
        if dsr <= 30.0 {
            return MemoryTemperature::Warm;
        }
        if dsr <= 90.0 {
            return MemoryTemperature::Cool;
        }
    }

    // New traces with no retrievals get the benefit of the doubt
    if age_days <= 30.0 {
        return MemoryTemperature::Warm;
    }

    MemoryTemperature::Cool
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_multiplier_range() {
        for temp in [
            MemoryTemperature::Hot,
            MemoryTemperature::Warm,
            MemoryTemperature::Cool,
            MemoryTemperature::Cold,
            MemoryTemperature::Frozen,
        ] {
            let m = temp.multiplier();
            assert!((0.7..=1.15).contains(&m));
        }
        assert_eq!(temperature_multiplier(None), 1.0);
    }

    #[test]
    fn test_distrusted_and_unused_is_frozen() {
        let now = Utc::now();
        let temp = classify_temperature(
            now - Duration::days(400),
            Some(now - Duration::days(200)),
            3,
            -1.5,
            now,
        );
        assert_eq!(temp, MemoryTemperature::Frozen);

        // Never retrieved at all
        let temp = classify_temperature(now - Duration::days(10), None, 0, -1.5, now);
        assert_eq!(temp, MemoryTemperature::Frozen);
    }

    #[test]
    fn test_distrusted_but_recently_used_is_cold_not_frozen() {
        let now = Utc::now();
        let temp = classify_temperature(
            now - Duration::days(400),
            Some(now - Duration::days(5)),
            3,
            -1.5,
            now,
        );
        assert_eq!(temp, MemoryTemperature::Cold);
    }

    #[test]
    fn test_recent_retrieval_is_hot() {
        let now = Utc::now();
        let temp = classify_temperature(
            now - Duration::days(100),
            Some(now - Duration::days(5)),
            2,
            0.5,
            now,
        );
        assert_eq!(temp, MemoryTemperature::Hot);
    }

    #[test]
    fn test_high_frequency_is_hot() {
        let now = Utc::now();
        let temp = classify_temperature(
            now - Duration::days(50),
            Some(now - Duration::days(20)),
            10,
            1.0,
            now,
        );
        assert_eq!(temp, MemoryTemperature::Hot);
    }

    #[test]
    fn test_recency_buckets() {
        let now = Utc::now();
        let created = now - Duration::days(300);

        let warm = classify_temperature(created, Some(now - Duration::days(20)), 1, 0.5, now);
        assert_eq!(warm, MemoryTemperature::Warm);

        let cool = classify_temperature(created, Some(now - Duration::days(60)), 1, 0.5, now);
        assert_eq!(cool, MemoryTemperature::Cool);

        let cold = classify_temperature(created, Some(now - Duration::days(120)), 1, 0.5, now);
        assert_eq!(cold, MemoryTemperature::Cold);
    }

    #[test]
    fn test_new_unretrieved_trace_is_warm() {
        let now = Utc::now();
        let temp = classify_temperature(now - Duration::days(3), None, 0, 0.0, now);
        assert_eq!(temp, MemoryTemperature::Warm);
    }

    #[test]
    fn test_old_unretrieved_trace_is_cold() {
        let now = Utc::now();
        let temp = classify_temperature(now - Duration::days(120), None, 0, 0.0, now);
        assert_eq!(temp, MemoryTemperature::Cold);
    }
}
