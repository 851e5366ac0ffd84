//! Pattern trace synthesis.
//!
//! When enough episodic traces converge on a topic with sufficient trust,
//! a pattern trace is synthesized structurally - no LLM calls. The
//! pattern is attributed to the system user, auto-validated, born WARM,
//! and linked to every member via PATTERN_SOURCE edges.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::error::EngineError;
use crate::model::{ImpactLevel, RelationshipType, SYSTEM_USER_ID, Trace};
use crate::storage::{PatternSpec, Store};

/// Minimum episodic members for a cluster to qualify
pub const MIN_CLUSTER_SIZE: i64 = 3;

/// Minimum average trust for a cluster to qualify
pub const MIN_CLUSTER_TRUST: f64 = 0.5;

/// Members loaded per cluster (highest trust first)
const MEMBER_LIMIT: usize = 20;

/// Tags attached to a pattern (most frequent member tags)
const TOP_TAG_COUNT: usize = 10;

const TITLE_MAX: usize = 500;
const CONTEXT_SNIPPET_MAX: usize = 300;
const SOLUTION_SNIPPET_MAX: usize = 200;

/// Synthesize pattern traces for every qualifying cluster that does not
/// already have one. Idempotent per cluster. Returns the number of
/// patterns generated.
pub(crate) fn synthesize(store: &Store, now: DateTime<Utc>) -> Result<i64, EngineError> {
    let clusters = store.qualifying_clusters(MIN_CLUSTER_SIZE, MIN_CLUSTER_TRUST)?;
    if clusters.is_empty() {
        return Ok(0);
    }

    let mut generated = 0i64;
    for (cluster_id, _member_count, avg_trust) in clusters {
        if store.cluster_has_pattern(cluster_id)? {
            continue;
        }

        let members = store.cluster_members(cluster_id, MEMBER_LIMIT)?;
        if (members.len() as i64) < MIN_CLUSTER_SIZE {
            continue;
        }

        let exemplar = &members[0];
        let spec = PatternSpec {
            title: truncate_chars(&format!("Pattern: {}", exemplar.title), TITLE_MAX),
            context_text: synthesize_context(&members),
            solution_text: synthesize_solution(&members),
            trust_score: avg_trust * 0.8,
            contributor_id: SYSTEM_USER_ID,
            cluster_id,
            convergence_level: exemplar.convergence_level,
            impact_level: aggregate_impact(&members),
            depth_score: members.iter().map(|m| m.depth_score).max().unwrap_or(0).min(4),
            somatic_intensity: members
                .iter()
                .map(|m| m.somatic_intensity)
                .fold(0.0, f64::max),
            metadata: Some(pattern_metadata(&members, cluster_id)),
        };

        let tags = top_member_tags(&members);
        let pattern_id = store.insert_pattern_trace(&spec, &tags, now)?;

        for member in &members {
            store.insert_relationship_if_absent(
                pattern_id,
                member.id,
                RelationshipType::PatternSource,
                now,
            )?;
        }

        generated += 1;
        tracing::info!(
            cluster_id = %cluster_id,
            pattern_id = %pattern_id,
            members = members.len(),
            "pattern trace generated"
        );
    }

    Ok(generated)
}

fn synthesize_context(members: &[Trace]) -> String {
    let mut parts = vec![
        format!("Observed across {} traces in convergence cluster.", members.len()),
        String::new(),
        "Representative contexts:".to_string(),
    ];
    for (i, member) in members.iter().take(3).enumerate() {
        parts.push(format!(
            "\n{}. {}",
            i + 1,
            snippet(&member.context_text, CONTEXT_SNIPPET_MAX)
        ));
    }
    parts.join("\n")
}

fn synthesize_solution(members: &[Trace]) -> String {
    let exemplar = &members[0];
    let mut parts = vec![exemplar.solution_text.clone()];

    let alternatives: Vec<&Trace> = members
        .iter()
        .take(3)
        .skip(1)
        .filter(|m| m.solution_text != exemplar.solution_text)
        .collect();

    if !alternatives.is_empty() {
        parts.push("\n\nAlternative approaches:".to_string());
        for alt in alternatives {
            parts.push(format!("\n- {}", snippet(&alt.solution_text, SOLUTION_SNIPPET_MAX)));
        }
    }
    parts.join("\n")
}

fn pattern_metadata(members: &[Trace], cluster_id: uuid::Uuid) -> serde_json::Value {
    let exemplar = &members[0];
    let mut meta = json!({
        "cluster_id": cluster_id.to_string(),
        "source_count": members.len(),
        "exemplar_id": exemplar.id.to_string(),
    });
    if let Some(exemplar_meta) = &exemplar.metadata {
        for key in ["language", "framework"] {
            if let Some(value) = exemplar_meta.get(key).and_then(|v| v.as_str()) {
                meta[key] = json!(value);
            }
        }
    }
    meta
}

/// Highest impact level among the members
fn aggregate_impact(members: &[Trace]) -> ImpactLevel {
    members
        .iter()
        .map(|m| m.impact_level)
        .max_by_key(|level| level.rank())
        .unwrap_or(ImpactLevel::Normal)
}

/// Union of member tags, most frequent first (name-ordered on ties)
fn top_member_tags(members: &[Trace]) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for member in members {
        for tag in &member.tags {
            *counts.entry(tag.as_str()).or_default() += 1;
        }
    }
    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked
        .into_iter()
        .take(TOP_TAG_COUNT)
        .map(|(name, _)| name.to_string())
        .collect()
}

/// Char-boundary-safe truncation with an ellipsis marker
fn snippet(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max).collect();
    format!("{}...", truncated)
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", truncated)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TraceStatus, TraceType};
    use uuid::Uuid;

    fn member(title: &str, solution: &str, trust: f64, impact: ImpactLevel, tags: &[&str]) -> Trace {
        let now = Utc::now();
        Trace {
            id: Uuid::new_v4(),
            title: title.to_string(),
            context_text: "context goes here".to_string(),
            solution_text: solution.to_string(),
            contributor_id: Uuid::new_v4(),
            agent_model: None,
            agent_version: None,
            metadata: None,
            is_seed: false,
            status: TraceStatus::Validated,
            trust_score: trust,
            confirmation_count: 2,
            has_embedding: true,
            embedding_model_id: None,
            embedding_model_version: None,
            retrieval_count: 0,
            last_retrieved_at: None,
            half_life_days: None,
            valid_from: None,
            valid_until: None,
            review_after: None,
            watch_condition: None,
            depth_score: 2,
            somatic_intensity: 0.4,
            impact_level: impact,
            memory_temperature: None,
            trace_type: TraceType::Episodic,
            convergence_cluster_id: Some(Uuid::new_v4()),
            convergence_level: Some(2),
            context_fingerprint: None,
            is_flagged: false,
            flagged_at: None,
            is_stale: false,
            created_at: now,
            updated_at: now,
            tags: tags.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_solution_includes_alternatives() {
        let members = vec![
            member("A", "primary fix", 2.0, ImpactLevel::Normal, &[]),
            member("B", "a different fix", 1.5, ImpactLevel::Normal, &[]),
            member("C", "primary fix", 1.0, ImpactLevel::Normal, &[]),
        ];
        let solution = synthesize_solution(&members);
        assert!(solution.starts_with("primary fix"));
        assert!(solution.contains("Alternative approaches:"));
        assert!(solution.contains("a different fix"));
    }

    #[test]
    fn test_identical_solutions_have_no_alternatives_section() {
        let members = vec![
            member("A", "same", 2.0, ImpactLevel::Normal, &[]),
            member("B", "same", 1.5, ImpactLevel::Normal, &[]),
            member("C", "same", 1.0, ImpactLevel::Normal, &[]),
        ];
        assert!(!synthesize_solution(&members).contains("Alternative"));
    }

    #[test]
    fn test_impact_aggregation_takes_highest() {
        let members = vec![
            member("A", "s", 2.0, ImpactLevel::Low, &[]),
            member("B", "s", 1.5, ImpactLevel::Critical, &[]),
            member("C", "s", 1.0, ImpactLevel::Normal, &[]),
        ];
        assert_eq!(aggregate_impact(&members), ImpactLevel::Critical);
    }

    #[test]
    fn test_top_tags_by_frequency() {
        let members = vec![
            member("A", "s", 2.0, ImpactLevel::Normal, &["python", "fastapi"]),
            member("B", "s", 1.5, ImpactLevel::Normal, &["python"]),
            member("C", "s", 1.0, ImpactLevel::Normal, &["python", "redis"]),
        ];
        let tags = top_member_tags(&members);
        assert_eq!(tags[0], "python");
        assert_eq!(tags.len(), 3);
    }

    #[test]
    fn test_truncation_is_char_safe() {
        let long = "é".repeat(600);
        let title = truncate_chars(&long, TITLE_MAX);
        assert!(title.chars().count() <= TITLE_MAX);
        assert!(title.ends_with("..."));

        let short = snippet("short", CONTEXT_SNIPPET_MAX);
        assert_eq!(short, "short");
    }
}
