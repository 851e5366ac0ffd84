//! Tag trend detection (stigmergy).
//!
//! Compares per-tag trace counts over rolling 7-day windows. Tags growing
//! fast enough, with a minimum of activity, are marked trending and
//! served by the tags endpoint.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};

use crate::error::EngineError;
use crate::storage::Store;

/// Minimum traces in the current window to qualify as trending
pub const MIN_TRENDING_COUNT: i64 = 3;

/// Minimum growth rate (current / prior) to qualify as trending
pub const MIN_GROWTH_RATE: f64 = 2.0;

/// Window length in days
pub const TREND_WINDOW_DAYS: i64 = 7;

/// Compute tag trends for the window ending now and upsert them.
/// Returns the number of trending tags detected.
pub(crate) fn detect(store: &Store, now: DateTime<Utc>) -> Result<i64, EngineError> {
    let period_end = now;
    let period_start = now - Duration::days(TREND_WINDOW_DAYS);
    let prior_start = period_start - Duration::days(TREND_WINDOW_DAYS);

    let current = store.tag_counts_between(period_start, period_end)?;
    let prior = store.tag_counts_between(prior_start, period_start)?;

    let tags: HashSet<&String> = current.keys().chain(prior.keys()).collect();
    let mut trending_count = 0i64;

    for tag in tags {
        let count_current = current.get(tag).copied().unwrap_or(0);
        let count_prior = prior.get(tag).copied().unwrap_or(0);

        let growth_rate = count_current as f64 / count_prior.max(1) as f64;
        let is_trending = growth_rate > MIN_GROWTH_RATE && count_current >= MIN_TRENDING_COUNT;
        if is_trending {
            trending_count += 1;
        }

        store.upsert_tag_trend(
            tag,
            period_start,
            period_end,
            count_current,
            count_prior,
            growth_rate,
            is_trending,
            now,
        )?;
    }

    if trending_count > 0 {
        tracing::info!(trending_count, "tag trends detected");
    }
    Ok(trending_count)
}
