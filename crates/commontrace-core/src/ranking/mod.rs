//! Ranking primitives: temporal decay, memory temperature, maturity tiers.

pub mod decay;
pub mod maturity;
pub mod temperature;
