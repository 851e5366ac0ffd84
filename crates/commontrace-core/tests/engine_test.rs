//! End-to-end engine scenarios: submission, voting and promotion, hybrid
//! search, retrieval side-effects, and the consolidation sleep cycle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{Duration, SecondsFormat, Utc};
use tempfile::TempDir;
use uuid::Uuid;

use commontrace_core::{
    Config, DisabledEmbedder, EmbeddedText, Embedder, EmbeddingError, Engine, EngineError,
    ImpactLevel, MemoryTemperature, RelationshipType, SYSTEM_USER_ID, SearchRequest,
    SubmitTraceInput, TraceStatus, TraceType, VoteInput, VoteType,
};

const DIMS: usize = 8;

// ============================================================================
// FIXTURES
// ============================================================================

/// Deterministic embedding port: canned vectors matched by substring,
/// hash-derived vectors otherwise.
struct StubEmbedder {
    canned: Mutex<HashMap<String, Vec<f32>>>,
}

impl StubEmbedder {
    fn new() -> Self {
        Self {
            canned: Mutex::new(HashMap::new()),
        }
    }

    fn with_canned(pairs: &[(&str, Vec<f32>)]) -> Self {
        let stub = Self::new();
        {
            let mut canned = stub.canned.lock().unwrap();
            for (key, vector) in pairs {
                canned.insert(key.to_string(), vector.clone());
            }
        }
        stub
    }
}

impl Embedder for StubEmbedder {
    fn embed(&self, text: &str) -> Result<EmbeddedText, EmbeddingError> {
        let canned = self.canned.lock().unwrap();
        let vector = canned
            .iter()
            .find(|(key, _)| text.contains(key.as_str()))
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| {
                use std::hash::{Hash, Hasher};
                let mut hasher = std::collections::hash_map::DefaultHasher::new();
                text.hash(&mut hasher);
                let seed = hasher.finish();
                (0..DIMS)
                    .map(|i| (((seed >> (i * 7)) & 0xff) as f32 / 255.0) + 0.01)
                    .collect()
            });
        Ok(EmbeddedText {
            vector,
            model_id: "stub-embed-1".to_string(),
            model_version: "1".to_string(),
        })
    }

    fn model_id(&self) -> &str {
        "stub-embed-1"
    }

    fn dimensions(&self) -> usize {
        DIMS
    }
}

/// A unit vector at exactly `distance` cosine distance from the base axis
fn vector_at_distance(distance: f32) -> Vec<f32> {
    let cos = 1.0 - distance;
    let sin = (1.0 - cos * cos).max(0.0).sqrt();
    let mut v = vec![0.0f32; DIMS];
    v[0] = cos;
    v[1] = sin;
    v
}

fn test_config(dir: &TempDir) -> Config {
    Config {
        database_path: Some(dir.path().join("engine.db")),
        embedding_dimensions: DIMS,
        ..Config::default()
    }
}

fn engine_with(embedder: Arc<dyn Embedder>) -> (TempDir, Engine) {
    let dir = TempDir::new().unwrap();
    let engine = Engine::new(test_config(&dir), embedder).unwrap();
    (dir, engine)
}

fn submission(title: &str, tags: &[&str]) -> SubmitTraceInput {
    SubmitTraceInput {
        title: title.to_string(),
        context_text: format!("{} context", title),
        solution_text: format!("{} solution text", title),
        tags: tags.iter().map(|s| s.to_string()).collect(),
        agent_model: None,
        agent_version: None,
        metadata: None,
        supersedes_trace_id: None,
        review_after: None,
        watch_condition: None,
        valid_from: None,
        valid_until: None,
        impact_level: ImpactLevel::Normal,
    }
}

fn upvote() -> VoteInput {
    VoteInput {
        vote_type: VoteType::Up,
        feedback_tag: None,
        feedback_text: None,
    }
}

fn downvote() -> VoteInput {
    VoteInput {
        vote_type: VoteType::Down,
        feedback_tag: None,
        feedback_text: None,
    }
}

/// Raw connection to the engine's database for fixture surgery
fn raw_conn(dir: &TempDir) -> rusqlite::Connection {
    rusqlite::Connection::open(dir.path().join("engine.db")).unwrap()
}

fn ts(dt: chrono::DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, false)
}

// ============================================================================
// TRUST STATE MACHINE
// ============================================================================

#[test]
fn promotion_lifecycle() {
    let (_dir, engine) = engine_with(Arc::new(DisabledEmbedder));
    let contributor = Uuid::new_v4();

    let trace = engine
        .submit_trace(submission("Promotion target", &["python"]), contributor)
        .unwrap();
    assert_eq!(trace.status, TraceStatus::Pending);

    // SEED tier: threshold 1, so the first positive vote promotes
    let outcome = engine.vote(trace.id, Uuid::new_v4(), &upvote()).unwrap();
    assert!(outcome.promoted);
    assert_eq!(outcome.status, TraceStatus::Validated);
    assert_eq!(outcome.confirmation_count, 1);
    assert!(outcome.trust_score > 0.0);

    // A later downvote lowers trust but never demotes
    let outcome = engine.vote(trace.id, Uuid::new_v4(), &downvote()).unwrap();
    assert_eq!(outcome.status, TraceStatus::Validated);
    assert!(!outcome.promoted);
    assert_eq!(outcome.confirmation_count, 2);
}

#[test]
fn negative_trust_blocks_promotion() {
    let (_dir, engine) = engine_with(Arc::new(DisabledEmbedder));
    let trace = engine
        .submit_trace(submission("Contested", &[]), Uuid::new_v4())
        .unwrap();

    // Downvote first: confirmation threshold is met but trust <= 0
    let outcome = engine.vote(trace.id, Uuid::new_v4(), &downvote()).unwrap();
    assert_eq!(outcome.status, TraceStatus::Pending);
    assert!(!outcome.promoted);

    // One upvote balances to zero: still not promoted
    let outcome = engine.vote(trace.id, Uuid::new_v4(), &upvote()).unwrap();
    assert_eq!(outcome.status, TraceStatus::Pending);

    // Net positive trust finally promotes
    let outcome = engine.vote(trace.id, Uuid::new_v4(), &upvote()).unwrap();
    assert!(outcome.promoted);
}

#[test]
fn duplicate_vote_conflicts_and_leaves_state_intact() {
    let (_dir, engine) = engine_with(Arc::new(DisabledEmbedder));
    let trace = engine
        .submit_trace(submission("Voted once", &[]), Uuid::new_v4())
        .unwrap();
    let voter = Uuid::new_v4();

    let first = engine.vote(trace.id, voter, &upvote()).unwrap();
    let err = engine.vote(trace.id, voter, &upvote()).unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    let after = engine.get_trace(trace.id).unwrap();
    assert_eq!(after.confirmation_count, first.confirmation_count);
    assert_eq!(after.trust_score, first.trust_score);
}

#[test]
fn vote_on_missing_trace_is_not_found() {
    let (_dir, engine) = engine_with(Arc::new(DisabledEmbedder));
    let err = engine
        .vote(Uuid::new_v4(), Uuid::new_v4(), &upvote())
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

// ============================================================================
// SEARCH PIPELINE
// ============================================================================

#[test]
fn hybrid_search_filters_by_tags_and_ranks() {
    let embedder = Arc::new(StubEmbedder::with_canned(&[
        ("T1 rate limit", vector_at_distance(0.02)),
        ("T2 throttling", vector_at_distance(0.05)),
        ("T3 rust borrow", vector_at_distance(0.50)),
        ("rate limiting", vector_at_distance(0.0)),
    ]));
    let (_dir, engine) = engine_with(embedder);
    let contributor = Uuid::new_v4();

    engine
        .submit_trace(submission("T1 rate limit", &["python", "fastapi"]), contributor)
        .unwrap();
    engine
        .submit_trace(submission("T2 throttling", &["python"]), contributor)
        .unwrap();
    engine
        .submit_trace(submission("T3 rust borrow", &["rust"]), contributor)
        .unwrap();

    // Fill embeddings through the worker
    let embedded = engine.embed_pending_batch().unwrap();
    assert_eq!(embedded, 3);
    assert_eq!(engine.index_size(), 3);

    let response = engine
        .search(&SearchRequest {
            q: Some("rate limiting".to_string()),
            tags: vec!["python".to_string()],
            limit: 10,
            context: None,
            include_expired: false,
        })
        .unwrap();

    let titles: Vec<&str> = response.results.iter().map(|r| r.title.as_str()).collect();
    assert_eq!(titles, vec!["T1 rate limit", "T2 throttling"]);
    assert!(response.results[0].similarity_score > response.results[1].similarity_score);
    assert!(response.results[0].combined_score > 0.0);
    assert_eq!(response.query.as_deref(), Some("rate limiting"));
}

#[test]
fn semantic_search_with_no_embedded_traces_is_empty() {
    let embedder = Arc::new(StubEmbedder::new());
    let (_dir, engine) = engine_with(embedder);

    engine
        .submit_trace(submission("Unembedded", &["python"]), Uuid::new_v4())
        .unwrap();

    // No worker run: the index is empty, so semantic search finds nothing
    let response = engine
        .search(&SearchRequest {
            q: Some("anything".to_string()),
            tags: vec![],
            limit: 1,
            context: None,
            include_expired: false,
        })
        .unwrap();
    assert!(response.results.is_empty());
    assert_eq!(response.total, 0);
}

#[test]
fn tag_only_search_reports_zero_similarity_and_orders_by_quality() {
    let (dir, engine) = engine_with(Arc::new(DisabledEmbedder));
    let contributor = Uuid::new_v4();

    let strong = engine
        .submit_trace(submission("Strong", &["python"]), contributor)
        .unwrap();
    let weak = engine
        .submit_trace(submission("Weak", &["python"]), contributor)
        .unwrap();

    let conn = raw_conn(&dir);
    conn.execute(
        "UPDATE traces SET trust_score = 2.0 WHERE id = ?1",
        [strong.id.to_string()],
    )
    .unwrap();

    let response = engine
        .search(&SearchRequest {
            q: None,
            tags: vec!["python".to_string()],
            limit: 10,
            context: None,
            include_expired: false,
        })
        .unwrap();

    assert_eq!(response.results.len(), 2);
    assert_eq!(response.results[0].id, strong.id);
    assert_eq!(response.results[1].id, weak.id);
    assert_eq!(response.results[0].similarity_score, 0.0);
    assert!(response.query.is_none());
}

#[test]
fn search_without_query_or_tags_is_invalid() {
    let (_dir, engine) = engine_with(Arc::new(DisabledEmbedder));
    let err = engine
        .search(&SearchRequest {
            q: None,
            tags: vec![],
            limit: 10,
            context: None,
            include_expired: false,
        })
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument(_)));
}

#[test]
fn unconfigured_embedder_fails_semantic_but_not_tag_search() {
    let (_dir, engine) = engine_with(Arc::new(DisabledEmbedder));
    engine
        .submit_trace(submission("Tagged", &["python"]), Uuid::new_v4())
        .unwrap();

    let err = engine
        .search(&SearchRequest {
            q: Some("needs embedding".to_string()),
            tags: vec![],
            limit: 10,
            context: None,
            include_expired: false,
        })
        .unwrap_err();
    assert!(matches!(err, EngineError::ServiceUnavailable(_)));

    let response = engine
        .search(&SearchRequest {
            q: None,
            tags: vec!["python".to_string()],
            limit: 10,
            context: None,
            include_expired: false,
        })
        .unwrap();
    assert_eq!(response.results.len(), 1);
}

#[test]
fn expired_traces_are_hidden_unless_requested() {
    let (dir, engine) = engine_with(Arc::new(DisabledEmbedder));
    let trace = engine
        .submit_trace(submission("Expired", &["python"]), Uuid::new_v4())
        .unwrap();

    let conn = raw_conn(&dir);
    conn.execute(
        "UPDATE traces SET valid_until = ?1 WHERE id = ?2",
        [ts(Utc::now() - Duration::days(2)), trace.id.to_string()],
    )
    .unwrap();

    let hidden = engine
        .search(&SearchRequest {
            q: None,
            tags: vec!["python".to_string()],
            limit: 10,
            context: None,
            include_expired: false,
        })
        .unwrap();
    assert!(hidden.results.is_empty());

    let shown = engine
        .search(&SearchRequest {
            q: None,
            tags: vec!["python".to_string()],
            limit: 10,
            context: None,
            include_expired: true,
        })
        .unwrap();
    assert_eq!(shown.results.len(), 1);
}

#[test]
fn retrieval_side_effects_accumulate() {
    let (_dir, engine) = engine_with(Arc::new(DisabledEmbedder));
    let contributor = Uuid::new_v4();
    let a = engine
        .submit_trace(submission("A", &["python"]), contributor)
        .unwrap();
    let b = engine
        .submit_trace(submission("B", &["python"]), contributor)
        .unwrap();

    // Without a tokio runtime the side-effects run inline
    let request = SearchRequest {
        q: None,
        tags: vec!["python".to_string()],
        limit: 10,
        context: None,
        include_expired: false,
    };
    engine.search(&request).unwrap();
    engine.search(&request).unwrap();

    let fetched = engine.get_trace(a.id).unwrap();
    assert_eq!(fetched.retrieval_count, 2);
    assert!(fetched.last_retrieved_at.is_some());

    // Co-retrieval edges exist in both directions after two searches
    let forward = engine
        .store()
        .relationship_strength(a.id, b.id, RelationshipType::CoRetrieved)
        .unwrap();
    let backward = engine
        .store()
        .relationship_strength(b.id, a.id, RelationshipType::CoRetrieved)
        .unwrap();
    assert_eq!(forward, Some(2.0));
    assert_eq!(backward, Some(2.0));
}

// ============================================================================
// CONSOLIDATION CYCLE
// ============================================================================

#[test]
fn consolidation_is_idempotent_within_the_window() {
    let (_dir, engine) = engine_with(Arc::new(DisabledEmbedder));
    engine
        .submit_trace(submission("Lone", &[]), Uuid::new_v4())
        .unwrap();

    let first = engine.run_consolidation().unwrap();
    assert!(!first.skipped);

    let second = engine.run_consolidation().unwrap();
    assert!(second.skipped);
}

#[test]
fn temperature_transitions_follow_the_rule_table() {
    let (dir, engine) = engine_with(Arc::new(DisabledEmbedder));
    let contributor = Uuid::new_v4();
    let frozen = engine
        .submit_trace(submission("Frozen candidate", &[]), contributor)
        .unwrap();
    let hot = engine
        .submit_trace(submission("Hot candidate", &[]), contributor)
        .unwrap();

    let now = Utc::now();
    let conn = raw_conn(&dir);
    conn.execute(
        "UPDATE traces SET trust_score = -1.5, last_retrieved_at = ?1, retrieval_count = 1
         WHERE id = ?2",
        [ts(now - Duration::days(200)), frozen.id.to_string()],
    )
    .unwrap();
    conn.execute(
        "UPDATE traces SET trust_score = 0.5, last_retrieved_at = ?1, retrieval_count = 1
         WHERE id = ?2",
        [ts(now - Duration::days(5)), hot.id.to_string()],
    )
    .unwrap();

    engine.run_consolidation().unwrap();

    let frozen = engine.get_trace(frozen.id).unwrap();
    assert_eq!(frozen.memory_temperature, Some(MemoryTemperature::Frozen));
    assert!(frozen.is_stale);

    let hot = engine.get_trace(hot.id).unwrap();
    assert_eq!(hot.memory_temperature, Some(MemoryTemperature::Hot));
    assert!(!hot.is_stale);
}

#[test]
fn prospective_memory_expiry_freezes_traces() {
    let (_dir, engine) = engine_with(Arc::new(DisabledEmbedder));
    let mut input = submission("Review me", &[]);
    input.review_after = Some(Utc::now() - Duration::days(1));
    let trace = engine.submit_trace(input, Uuid::new_v4()).unwrap();

    engine.run_consolidation().unwrap();

    let after = engine.get_trace(trace.id).unwrap();
    assert!(after.is_stale);
    assert_eq!(after.memory_temperature, Some(MemoryTemperature::Frozen));
}

#[test]
fn rif_shadows_count_repeated_losses() {
    let (dir, engine) = engine_with(Arc::new(DisabledEmbedder));
    let contributor = Uuid::new_v4();
    let winner = engine
        .submit_trace(submission("Winner", &["python"]), contributor)
        .unwrap();
    let loser = engine
        .submit_trace(submission("Loser", &["python"]), contributor)
        .unwrap();

    let conn = raw_conn(&dir);
    conn.execute(
        "UPDATE traces SET trust_score = 3.0 WHERE id = ?1",
        [winner.id.to_string()],
    )
    .unwrap();

    let request = SearchRequest {
        q: None,
        tags: vec!["python".to_string()],
        limit: 10,
        context: None,
        include_expired: false,
    };
    for _ in 0..3 {
        let response = engine.search(&request).unwrap();
        assert_eq!(response.results[0].id, winner.id);
    }

    engine.run_consolidation().unwrap();

    let losses = engine
        .store()
        .rif_loss_count(loser.id, winner.id)
        .unwrap();
    assert!(losses.unwrap_or(0) >= 3);
}

#[test]
fn tag_trends_mark_fast_growing_tags() {
    let (_dir, engine) = engine_with(Arc::new(DisabledEmbedder));
    let contributor = Uuid::new_v4();
    for i in 0..3 {
        engine
            .submit_trace(submission(&format!("Fresh {}", i), &["quic"]), contributor)
            .unwrap();
    }

    engine.run_consolidation().unwrap();

    let trending = engine.trending_tags(10).unwrap();
    assert!(trending.iter().any(|t| t.tag == "quic"));
    let quic = trending.iter().find(|t| t.tag == "quic").unwrap();
    assert!(quic.growth_rate > 2.0);
    assert_eq!(quic.trace_count, 3);
}

#[test]
fn pattern_synthesis_is_idempotent_per_cluster() {
    let (dir, engine) = engine_with(Arc::new(DisabledEmbedder));
    let contributor = Uuid::new_v4();
    let cluster = Uuid::new_v4();

    let mut member_ids = Vec::new();
    for i in 0..3 {
        let trace = engine
            .submit_trace(
                submission(&format!("Member {}", i), &["python", "fastapi"]),
                contributor,
            )
            .unwrap();
        member_ids.push(trace.id);
    }

    let conn = raw_conn(&dir);
    for id in &member_ids {
        conn.execute(
            "UPDATE traces SET convergence_cluster_id = ?1, convergence_level = 2,
                 trust_score = 1.0
             WHERE id = ?2",
            [cluster.to_string(), id.to_string()],
        )
        .unwrap();
    }

    engine.run_consolidation().unwrap();

    let count_patterns = |conn: &rusqlite::Connection| -> i64 {
        conn.query_row(
            "SELECT COUNT(*) FROM traces WHERE trace_type = 'pattern'
                 AND convergence_cluster_id = ?1",
            [cluster.to_string()],
            |r| r.get(0),
        )
        .unwrap()
    };
    assert_eq!(count_patterns(&conn), 1);

    // Inspect the synthesized pattern
    let pattern_id: String = conn
        .query_row(
            "SELECT id FROM traces WHERE trace_type = 'pattern'
                 AND convergence_cluster_id = ?1",
            [cluster.to_string()],
            |r| r.get(0),
        )
        .unwrap();
    let pattern = engine.get_trace(pattern_id.parse().unwrap()).unwrap();
    assert_eq!(pattern.contributor_id, SYSTEM_USER_ID);
    assert_eq!(pattern.status, TraceStatus::Validated);
    assert_eq!(pattern.trace_type, TraceType::Pattern);
    assert_eq!(pattern.memory_temperature, Some(MemoryTemperature::Warm));
    assert!(pattern.title.starts_with("Pattern: "));
    assert!(pattern.tags.contains(&"python".to_string()));
    assert!((pattern.trust_score - 0.8).abs() < 1e-9);

    // PATTERN_SOURCE edges to every member
    for id in &member_ids {
        let strength = engine
            .store()
            .relationship_strength(pattern.id, *id, RelationshipType::PatternSource)
            .unwrap();
        assert_eq!(strength, Some(1.0));
    }

    // Clear the idempotency gate and re-run: still exactly one pattern
    conn.execute("DELETE FROM consolidation_runs", []).unwrap();
    engine.run_consolidation().unwrap();
    assert_eq!(count_patterns(&conn), 1);
}

#[test]
fn convergence_clusters_and_reclassifies_across_languages() {
    let embedder = Arc::new(StubEmbedder::with_canned(&[
        ("Py one", vector_at_distance(0.00)),
        ("Py two", vector_at_distance(0.04)),
        ("Py three", vector_at_distance(0.08)),
        ("Go gateway", vector_at_distance(0.12)),
    ]));
    let (dir, engine) = engine_with(embedder);
    let contributor = Uuid::new_v4();

    let mut ids = Vec::new();
    for title in ["Py one", "Py two", "Py three"] {
        let trace = engine
            .submit_trace(submission(title, &["python", "fastapi"]), contributor)
            .unwrap();
        ids.push(trace.id);
    }
    let go = engine
        .submit_trace(submission("Go gateway", &["go"]), contributor)
        .unwrap();
    ids.push(go.id);

    assert_eq!(engine.embed_pending_batch().unwrap(), 4);

    // Convergence only runs past SEED scale: inflate the trace count
    let conn = raw_conn(&dir);
    let now = ts(Utc::now());
    {
        let mut stmt = conn
            .prepare(
                "INSERT INTO traces (id, title, context_text, solution_text,
                     contributor_id, created_at, updated_at)
                 VALUES (?1, 'filler', 'c', 's',
                     '00000000-0000-0000-0000-000000000001', ?2, ?2)",
            )
            .unwrap();
        conn.execute_batch("BEGIN").unwrap();
        for _ in 0..1000 {
            stmt.execute([Uuid::new_v4().to_string(), now.clone()]).unwrap();
        }
        conn.execute_batch("COMMIT").unwrap();
    }

    engine.run_consolidation().unwrap();

    // All four traces share one cluster, classified universal (level 0)
    // because two languages converge on the same solution
    let mut clusters = std::collections::HashSet::new();
    for id in &ids {
        let trace = engine.get_trace(*id).unwrap();
        clusters.insert(trace.convergence_cluster_id.unwrap());
        assert_eq!(trace.convergence_level, Some(0));
    }
    assert_eq!(clusters.len(), 1);
}

// ============================================================================
// AMENDMENTS & SUPERSESSION
// ============================================================================

#[test]
fn amendment_creates_supersedes_edge() {
    let (_dir, engine) = engine_with(Arc::new(DisabledEmbedder));
    let contributor = Uuid::new_v4();
    let original = engine
        .submit_trace(submission("Original", &[]), contributor)
        .unwrap();

    let mut amendment = submission("Amended", &[]);
    amendment.supersedes_trace_id = Some(original.id);
    let amended = engine.submit_trace(amendment, contributor).unwrap();

    assert_eq!(amended.status, TraceStatus::Pending);
    let strength = engine
        .store()
        .relationship_strength(amended.id, original.id, RelationshipType::Supersedes)
        .unwrap();
    assert_eq!(strength, Some(1.0));
}
