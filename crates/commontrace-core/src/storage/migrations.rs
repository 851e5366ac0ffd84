//! Database migrations.
//!
//! Versioned schema definitions applied in order by the storage layer.

use rusqlite::Connection;

use super::{Result, StoreError};

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Core schema: users, traces, tags, votes, relationships",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Retrieval analytics: logs and consolidation audit trail",
        up: MIGRATION_V2_UP,
    },
    Migration {
        version: 3,
        description: "RIF shadows, tag trends, trigger stats",
        up: MIGRATION_V3_UP,
    },
];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// Apply all missing migrations to a connection
pub fn apply_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    )?;

    let current: u32 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| {
            r.get(0)
        })?;

    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }
        conn.execute_batch(migration.up).map_err(|e| {
            StoreError::Init(format!(
                "migration v{} ({}) failed: {}",
                migration.version, migration.description, e
            ))
        })?;
        conn.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?1, datetime('now'))",
            [migration.version],
        )?;
        tracing::info!(
            version = migration.version,
            description = migration.description,
            "migration applied"
        );
    }

    Ok(())
}

/// V1: Core schema
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    display_name TEXT,
    upvotes_received INTEGER NOT NULL DEFAULT 0,
    votes_received INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS traces (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    context_text TEXT NOT NULL,
    solution_text TEXT NOT NULL,
    contributor_id TEXT NOT NULL REFERENCES users(id),
    agent_model TEXT,
    agent_version TEXT,
    metadata_json TEXT,
    is_seed INTEGER NOT NULL DEFAULT 0,

    -- Trust state machine
    status TEXT NOT NULL DEFAULT 'pending',
    trust_score REAL NOT NULL DEFAULT 0.0,
    confirmation_count INTEGER NOT NULL DEFAULT 0,

    -- Vector embeddings (f32 little-endian blobs); null until the
    -- embedding worker processes the trace
    embedding BLOB,
    solution_embedding BLOB,
    context_embedding BLOB,
    embedding_model_id TEXT,
    embedding_model_version TEXT,

    -- Temporal freshness
    retrieval_count INTEGER NOT NULL DEFAULT 0,
    last_retrieved_at TEXT,
    half_life_days INTEGER,
    valid_from TEXT,
    valid_until TEXT,

    -- Prospective memory
    review_after TEXT,
    watch_condition TEXT,

    -- Classification
    depth_score INTEGER NOT NULL DEFAULT 0,
    somatic_intensity REAL NOT NULL DEFAULT 0.0,
    impact_level TEXT NOT NULL DEFAULT 'normal',
    memory_temperature TEXT,
    trace_type TEXT NOT NULL DEFAULT 'episodic',

    -- Convergence
    convergence_cluster_id TEXT,
    convergence_level INTEGER,

    -- Context fingerprint (JSON)
    context_fingerprint TEXT,

    -- Moderation
    is_flagged INTEGER NOT NULL DEFAULT 0,
    flagged_at TEXT,
    is_stale INTEGER NOT NULL DEFAULT 0,

    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_traces_status ON traces(status);
CREATE INDEX IF NOT EXISTS idx_traces_trust ON traces(trust_score);
CREATE INDEX IF NOT EXISTS idx_traces_flagged ON traces(is_flagged);
CREATE INDEX IF NOT EXISTS idx_traces_cluster ON traces(convergence_cluster_id);
CREATE INDEX IF NOT EXISTS idx_traces_model ON traces(embedding_model_id);
CREATE INDEX IF NOT EXISTS idx_traces_review_after ON traces(review_after);

CREATE TABLE IF NOT EXISTS tags (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS trace_tags (
    trace_id TEXT NOT NULL REFERENCES traces(id) ON DELETE CASCADE,
    tag_id TEXT NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
    PRIMARY KEY (trace_id, tag_id)
);

CREATE TABLE IF NOT EXISTS votes (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id),
    trace_id TEXT NOT NULL REFERENCES traces(id) ON DELETE CASCADE,
    vote_type TEXT NOT NULL,
    feedback_tag TEXT,
    feedback_text TEXT,
    created_at TEXT NOT NULL,
    UNIQUE (user_id, trace_id)
);

CREATE TABLE IF NOT EXISTS trace_relationships (
    id TEXT PRIMARY KEY,
    source_trace_id TEXT NOT NULL REFERENCES traces(id) ON DELETE CASCADE,
    target_trace_id TEXT NOT NULL REFERENCES traces(id) ON DELETE CASCADE,
    relationship_type TEXT NOT NULL,
    strength REAL NOT NULL DEFAULT 1.0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (source_trace_id, target_trace_id, relationship_type)
);

CREATE INDEX IF NOT EXISTS idx_relationships_source
    ON trace_relationships(source_trace_id);

-- Reserved system user for consolidation-generated content
INSERT OR IGNORE INTO users (id, display_name)
VALUES ('00000000-0000-0000-0000-000000000001', 'system');
"#;

/// V2: Retrieval analytics
const MIGRATION_V2_UP: &str = r#"
CREATE TABLE IF NOT EXISTS retrieval_logs (
    id TEXT PRIMARY KEY,
    trace_id TEXT NOT NULL REFERENCES traces(id) ON DELETE CASCADE,
    search_session_id TEXT NOT NULL,
    result_position INTEGER,
    retrieved_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_retrieval_logs_session
    ON retrieval_logs(search_session_id);
CREATE INDEX IF NOT EXISTS idx_retrieval_logs_retrieved
    ON retrieval_logs(retrieved_at);

CREATE TABLE IF NOT EXISTS consolidation_runs (
    id TEXT PRIMARY KEY,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    status TEXT NOT NULL DEFAULT 'running',
    stats_json TEXT
);
"#;

/// V3: Retrieval-induced forgetting, stigmergy, telemetry
const MIGRATION_V3_UP: &str = r#"
CREATE TABLE IF NOT EXISTS rif_shadows (
    id TEXT PRIMARY KEY,
    loser_trace_id TEXT NOT NULL REFERENCES traces(id) ON DELETE CASCADE,
    winner_trace_id TEXT NOT NULL REFERENCES traces(id) ON DELETE CASCADE,
    loss_count INTEGER NOT NULL DEFAULT 1,
    last_observed TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (loser_trace_id, winner_trace_id)
);

CREATE TABLE IF NOT EXISTS tag_trends (
    id TEXT PRIMARY KEY,
    tag_name TEXT NOT NULL,
    period_start TEXT NOT NULL,
    period_end TEXT NOT NULL,
    trace_count_period INTEGER NOT NULL DEFAULT 0,
    trace_count_prior INTEGER NOT NULL DEFAULT 0,
    growth_rate REAL NOT NULL DEFAULT 0.0,
    is_trending INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    UNIQUE (tag_name, period_end)
);

CREATE TABLE IF NOT EXISTS trigger_stats (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    stats_json TEXT NOT NULL,
    reported_at TEXT NOT NULL
);
"#;
