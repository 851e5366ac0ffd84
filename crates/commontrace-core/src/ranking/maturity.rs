//! Maturity tiers for adaptive lifecycle management.
//!
//! System behavior scales with the size of the knowledge base: small
//! collections nurture everything, large collections curate aggressively.

use serde::{Deserialize, Serialize};

/// Trace count below which the system is SEED
pub const SEED_CEILING: u64 = 1_000;

/// Trace count below which the system is GROWING
pub const GROWING_CEILING: u64 = 100_000;

/// Developmental stage of the knowledge base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaturityTier {
    /// Early-stage: nurture everything
    Seed,
    /// Medium-scale: moderate curation
    Growing,
    /// Large-scale: aggressive curation
    Mature,
}

impl MaturityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaturityTier::Seed => "seed",
            MaturityTier::Growing => "growing",
            MaturityTier::Mature => "mature",
        }
    }

    /// Derive the tier from the total trace count
    pub fn from_trace_count(count: u64) -> Self {
        if count < SEED_CEILING {
            MaturityTier::Seed
        } else if count < GROWING_CEILING {
            MaturityTier::Growing
        } else {
            MaturityTier::Mature
        }
    }

    /// Confirmations needed to validate a trace at this scale
    pub fn validation_threshold(&self) -> i64 {
        match self {
            MaturityTier::Seed => 1,
            MaturityTier::Growing => 2,
            MaturityTier::Mature => 3,
        }
    }

    /// Trust decay multiplier applied by the consolidation worker.
    /// 1.0 disables decay (SEED), stronger decay at scale prevents trust
    /// inflation.
    pub fn decay_multiplier(&self) -> f64 {
        match self {
            MaturityTier::Seed => 1.0,
            MaturityTier::Growing => 0.995,
            MaturityTier::Mature => 0.990,
        }
    }

    /// Whether convergence detection runs at this scale
    pub fn detects_convergence(&self) -> bool {
        !matches!(self, MaturityTier::Seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(MaturityTier::from_trace_count(0), MaturityTier::Seed);
        assert_eq!(MaturityTier::from_trace_count(999), MaturityTier::Seed);
        assert_eq!(MaturityTier::from_trace_count(1_000), MaturityTier::Growing);
        assert_eq!(MaturityTier::from_trace_count(99_999), MaturityTier::Growing);
        assert_eq!(MaturityTier::from_trace_count(100_000), MaturityTier::Mature);
    }

    #[test]
    fn test_thresholds_scale_with_tier() {
        assert_eq!(MaturityTier::Seed.validation_threshold(), 1);
        assert_eq!(MaturityTier::Growing.validation_threshold(), 2);
        assert_eq!(MaturityTier::Mature.validation_threshold(), 3);
    }

    #[test]
    fn test_decay_disabled_in_seed() {
        assert_eq!(MaturityTier::Seed.decay_multiplier(), 1.0);
        assert!(MaturityTier::Growing.decay_multiplier() < 1.0);
        assert!(MaturityTier::Mature.decay_multiplier() < MaturityTier::Growing.decay_multiplier());
    }

    #[test]
    fn test_convergence_gated_on_scale() {
        assert!(!MaturityTier::Seed.detects_convergence());
        assert!(MaturityTier::Growing.detects_convergence());
        assert!(MaturityTier::Mature.detects_convergence());
    }
}
