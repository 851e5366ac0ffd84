//! The sleep-cycle orchestrator.
//!
//! One cycle runs the sub-jobs in a fixed order. Each job is isolated: a
//! failure records `"error"` for its stat and demotes the run to
//! `partial`, but never blocks the remaining jobs. Only a top-level
//! failure (e.g. the run record itself cannot be written) yields
//! `failed`.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value, json};

use crate::config::Config;
use crate::error::EngineError;
use crate::ranking::maturity::MaturityTier;
use crate::ranking::temperature::classify_temperature;
use crate::search::VectorIndex;
use crate::storage::Store;

use super::{ConsolidationOutcome, RunStatus, contradiction, convergence, patterns, rif, trends};

/// Retrieval logs participate in co-retrieval building for this long
pub const CO_RETRIEVAL_WINDOW_DAYS: i64 = 30;

/// Retrieval logs older than this are pruned
pub const LOG_RETENTION_DAYS: i64 = 30;

/// Co-retrieval pairs per session are generated from at most this many
/// distinct traces
pub const MAX_SESSION_TRACES: usize = 10;

/// Record one sub-job's outcome; a failure is isolated, logged, and
/// demotes the run to partial.
fn record_job(
    stats: &mut Map<String, Value>,
    any_failed: &mut bool,
    name: &str,
    result: Result<Value, EngineError>,
) {
    match result {
        Ok(value) => {
            stats.insert(name.to_string(), value);
        }
        Err(e) => {
            tracing::error!(job = name, error = %e, "consolidation sub-job failed");
            stats.insert(name.to_string(), json!("error"));
            *any_failed = true;
        }
    }
}

/// Execute one consolidation cycle.
///
/// The idempotency gate skips the cycle entirely when a completed run
/// finished within the cadence window.
pub fn run_cycle(
    store: &Store,
    index: &Mutex<VectorIndex>,
    config: &Config,
    embedding_model_id: &str,
    now: DateTime<Utc>,
) -> Result<ConsolidationOutcome, EngineError> {
    let window = Duration::hours(config.consolidation_interval_hours as i64);
    if store.has_completed_run_since(now - window)? {
        tracing::info!("consolidation skipped: recent completed run exists");
        return Ok(ConsolidationOutcome::skipped());
    }

    let run_id = store.create_run(now)?;
    let mut stats = Map::new();
    let mut any_failed = false;

    // a. Maturity probing drives decay rate and thresholds for this cycle
    let tier = match store.trace_count() {
        Ok(count) => MaturityTier::from_trace_count(count),
        Err(e) => {
            let status = RunStatus::Failed;
            let failure_stats = json!({ "error": "maturity_probe_failed" });
            store.finish_run(run_id, status.as_str(), &failure_stats, Utc::now())?;
            tracing::error!(error = %e, "consolidation failed before sub-jobs");
            return Ok(ConsolidationOutcome {
                skipped: false,
                status,
                stats: failure_stats,
            });
        }
    };
    stats.insert("maturity_tier".to_string(), json!(tier.as_str()));

    // b. Trust downscaling (no-op in SEED)
    record_job(
        &mut stats,
        &mut any_failed,
        "trust_downscaled",
        trust_downscaling(store, tier, now),
    );

    // c. Temperature reclassification + moderation flags
    record_job(
        &mut stats,
        &mut any_failed,
        "temperature",
        reclassify_temperatures(store, config, now),
    );

    // d. Co-retrieval edges from recent retrieval logs
    record_job(
        &mut stats,
        &mut any_failed,
        "co_retrieval_links",
        build_co_retrieval_links(store, now),
    );

    // e. Log pruning
    record_job(
        &mut stats,
        &mut any_failed,
        "logs_pruned",
        store
            .prune_retrieval_logs(now - Duration::days(LOG_RETENTION_DAYS))
            .map(|n| json!(n))
            .map_err(Into::into),
    );

    // f. Prospective memory expiry
    record_job(
        &mut stats,
        &mut any_failed,
        "prospective_expired",
        store.expire_due_reviews(now).map(|n| json!(n)).map_err(Into::into),
    );

    // g. Convergence detection (needs scale to be meaningful)
    if tier.detects_convergence() {
        record_job(
            &mut stats,
            &mut any_failed,
            "newly_clustered",
            convergence::detect(store, index, embedding_model_id, now).map(|n| json!(n)),
        );
    }

    // h. Pattern synthesis from qualifying clusters
    record_job(
        &mut stats,
        &mut any_failed,
        "patterns_generated",
        patterns::synthesize(store, now).map(|n| json!(n)),
    );

    // i. Contradictions & alternatives inside clusters
    record_job(
        &mut stats,
        &mut any_failed,
        "alternative_edges",
        contradiction::detect(store, now).map(|n| json!(n)),
    );

    // j. Retrieval-induced-forgetting shadows
    record_job(
        &mut stats,
        &mut any_failed,
        "rif_shadows",
        rif::detect(store, now).map(|n| json!(n)),
    );

    // k. Tag trends
    record_job(
        &mut stats,
        &mut any_failed,
        "trending_tags",
        trends::detect(store, now).map(|n| json!(n)),
    );

    let status = if any_failed {
        RunStatus::Partial
    } else {
        RunStatus::Completed
    };
    let stats = Value::Object(stats);
    store.finish_run(run_id, status.as_str(), &stats, Utc::now())?;

    tracing::info!(status = status.as_str(), %stats, "consolidation cycle finished");
    Ok(ConsolidationOutcome {
        skipped: false,
        status,
        stats,
    })
}

fn trust_downscaling(
    store: &Store,
    tier: MaturityTier,
    now: DateTime<Utc>,
) -> Result<Value, EngineError> {
    let factor = tier.decay_multiplier();
    if factor >= 1.0 {
        return Ok(json!(0));
    }
    Ok(json!(store.downscale_trust(factor, now)?))
}

fn reclassify_temperatures(
    store: &Store,
    config: &Config,
    now: DateTime<Utc>,
) -> Result<Value, EngineError> {
    let rows = store.temperature_rows()?;
    let mut reclassified = 0usize;

    for row in rows {
        let temperature = classify_temperature(
            row.created_at,
            row.last_retrieved_at,
            row.retrieval_count,
            row.trust_score,
            now,
        );
        if row.temperature != Some(temperature) {
            store.set_temperature(row.id, temperature, now)?;
            reclassified += 1;
        }
    }

    let newly_flagged = store.flag_heavily_downvoted(now)?;
    let newly_stale =
        store.mark_stale_unretrieved(now - Duration::days(config.stale_age_days), now)?;

    Ok(json!({
        "reclassified": reclassified,
        "newly_flagged": newly_flagged,
        "newly_stale": newly_stale,
    }))
}

fn build_co_retrieval_links(store: &Store, now: DateTime<Utc>) -> Result<Value, EngineError> {
    let cutoff = now - Duration::days(CO_RETRIEVAL_WINDOW_DAYS);
    let sessions = store.co_retrieval_sessions(cutoff, MAX_SESSION_TRACES)?;

    let mut link_count = 0usize;
    for (_session_id, trace_ids) in sessions {
        for i in 0..trace_ids.len() {
            for j in (i + 1)..trace_ids.len() {
                store.upsert_co_retrieved(trace_ids[i], trace_ids[j], now)?;
                store.upsert_co_retrieved(trace_ids[j], trace_ids[i], now)?;
                link_count += 2;
            }
        }
    }
    Ok(json!(link_count))
}
