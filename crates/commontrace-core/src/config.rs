//! Engine configuration.
//!
//! All knobs are environment-driven with sensible defaults, so the server
//! binary and the test suite construct configs the same way.

use std::path::PathBuf;

/// Engine configuration, normally read from the environment
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database path. `None` resolves to the platform data directory.
    pub database_path: Option<PathBuf>,
    /// Fallback confirmation threshold when maturity probing is bypassed.
    /// The maturity tier overrides this during normal operation.
    pub validation_threshold: u32,
    /// Embedding vector dimensionality
    pub embedding_dimensions: usize,
    /// Hours between consolidation cycles
    pub consolidation_interval_hours: u64,
    /// Age in days after which a never-retrieved trace is marked stale
    pub stale_age_days: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            validation_threshold: 2,
            embedding_dimensions: 1536,
            consolidation_interval_hours: 6,
            stale_age_days: 90,
        }
    }
}

impl Config {
    /// Build a config from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_path: std::env::var("COMMONTRACE_DATABASE_PATH")
                .ok()
                .map(PathBuf::from),
            validation_threshold: env_parse(
                "VALIDATION_THRESHOLD",
                defaults.validation_threshold,
            ),
            embedding_dimensions: env_parse(
                "EMBEDDING_DIMENSIONS",
                defaults.embedding_dimensions,
            ),
            consolidation_interval_hours: env_parse(
                "CONSOLIDATION_INTERVAL_HOURS",
                defaults.consolidation_interval_hours,
            ),
            stale_age_days: env_parse("CONSOLIDATION_STALE_AGE_DAYS", defaults.stale_age_days),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.validation_threshold, 2);
        assert_eq!(config.embedding_dimensions, 1536);
        assert_eq!(config.consolidation_interval_hours, 6);
        assert_eq!(config.stale_age_days, 90);
    }
}
