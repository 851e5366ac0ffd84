//! SQLite storage implementation.
//!
//! Reader/writer connection split with interior mutability so `Store` is
//! `Send + Sync` and shared as `Arc<Store>` across request handlers and
//! workers. All timestamps are written as fixed-width RFC 3339 UTC strings
//! so lexicographic comparison matches chronological order.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use directories::ProjectDirs;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use uuid::Uuid;

use crate::context::ContextFingerprint;
use crate::embeddings::vector_from_bytes;
use crate::enrichment;
use crate::model::{
    ImpactLevel, RelatedTrace, RelationshipType, SubmitTraceInput, Trace, TraceStatus, TraceType,
    TrendingTag, VoteInput, normalize_tag,
};
use crate::ranking::decay::compute_half_life;
use crate::ranking::temperature::MemoryTemperature;

use super::{Result, StoreError, migrations};

/// Relationship upserts created by co-retrieval start at this strength
const INITIAL_EDGE_STRENGTH: f64 = 1.0;

// ============================================================================
// ROW TYPES
// ============================================================================

/// A relationship edge row used by spreading activation
#[derive(Debug, Clone)]
pub struct EdgeRow {
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub relationship_type: String,
    pub strength: f64,
}

/// Minimal trace projection for temperature reclassification
#[derive(Debug, Clone)]
pub struct TemperatureRow {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_retrieved_at: Option<DateTime<Utc>>,
    pub retrieval_count: i64,
    pub trust_score: f64,
    pub temperature: Option<MemoryTemperature>,
}

/// Fields for a synthesized pattern trace
#[derive(Debug, Clone)]
pub struct PatternSpec {
    pub title: String,
    pub context_text: String,
    pub solution_text: String,
    pub trust_score: f64,
    pub contributor_id: Uuid,
    pub cluster_id: Uuid,
    pub convergence_level: Option<i64>,
    pub impact_level: ImpactLevel,
    pub depth_score: i64,
    pub somatic_intensity: f64,
    pub metadata: Option<serde_json::Value>,
}

// ============================================================================
// HELPERS
// ============================================================================

/// Fixed-width RFC 3339 with microseconds and +00:00 offset
fn fmt_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, false)
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn opt_uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let s: Option<String> = row.get(idx)?;
    match s {
        None => Ok(None),
        Some(s) => Uuid::parse_str(&s).map(Some).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        }),
    }
}

const TRACE_COLUMNS: &str = "id, title, context_text, solution_text, contributor_id, \
     agent_model, agent_version, metadata_json, is_seed, status, trust_score, \
     confirmation_count, (embedding IS NOT NULL), embedding_model_id, \
     embedding_model_version, retrieval_count, last_retrieved_at, half_life_days, \
     valid_from, valid_until, review_after, watch_condition, depth_score, \
     somatic_intensity, impact_level, memory_temperature, trace_type, \
     convergence_cluster_id, convergence_level, context_fingerprint, is_flagged, \
     flagged_at, is_stale, created_at, updated_at";

fn trace_from_row(row: &Row<'_>) -> rusqlite::Result<Trace> {
    let status: String = row.get(9)?;
    let impact: String = row.get(24)?;
    let temperature: Option<String> = row.get(25)?;
    let trace_type: String = row.get(26)?;
    let metadata: Option<String> = row.get(7)?;
    let fingerprint: Option<String> = row.get(29)?;

    Ok(Trace {
        id: uuid_col(row, 0)?,
        title: row.get(1)?,
        context_text: row.get(2)?,
        solution_text: row.get(3)?,
        contributor_id: uuid_col(row, 4)?,
        agent_model: row.get(5)?,
        agent_version: row.get(6)?,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        is_seed: row.get(8)?,
        status: TraceStatus::parse_name(&status),
        trust_score: row.get(10)?,
        confirmation_count: row.get(11)?,
        has_embedding: row.get(12)?,
        embedding_model_id: row.get(13)?,
        embedding_model_version: row.get(14)?,
        retrieval_count: row.get(15)?,
        last_retrieved_at: row.get(16)?,
        half_life_days: row.get(17)?,
        valid_from: row.get(18)?,
        valid_until: row.get(19)?,
        review_after: row.get(20)?,
        watch_condition: row.get(21)?,
        depth_score: row.get(22)?,
        somatic_intensity: row.get(23)?,
        impact_level: ImpactLevel::parse_name(&impact),
        memory_temperature: temperature.as_deref().and_then(MemoryTemperature::parse_name),
        trace_type: TraceType::parse_name(&trace_type),
        convergence_cluster_id: opt_uuid_col(row, 27)?,
        convergence_level: row.get(28)?,
        context_fingerprint: fingerprint.and_then(|f| serde_json::from_str(&f).ok()),
        is_flagged: row.get(30)?,
        flagged_at: row.get(31)?,
        is_stale: row.get(32)?,
        created_at: row.get(33)?,
        updated_at: row.get(34)?,
        tags: vec![],
    })
}

fn put_tags(conn: &Connection, trace_id: Uuid, names: &[String]) -> Result<()> {
    for name in names {
        conn.execute(
            "INSERT OR IGNORE INTO tags (id, name) VALUES (?1, ?2)",
            params![Uuid::new_v4().to_string(), name],
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO trace_tags (trace_id, tag_id)
             SELECT ?1, id FROM tags WHERE name = ?2",
            params![trace_id.to_string(), name],
        )?;
    }
    Ok(())
}

fn put_relationship(
    conn: &Connection,
    source: Uuid,
    target: Uuid,
    kind: RelationshipType,
    now: DateTime<Utc>,
) -> Result<bool> {
    let changed = conn.execute(
        "INSERT INTO trace_relationships
             (id, source_trace_id, target_trace_id, relationship_type, strength,
              created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
         ON CONFLICT (source_trace_id, target_trace_id, relationship_type)
         DO NOTHING",
        params![
            Uuid::new_v4().to_string(),
            source.to_string(),
            target.to_string(),
            kind.as_str(),
            INITIAL_EDGE_STRENGTH,
            fmt_ts(now),
        ],
    )?;
    Ok(changed > 0)
}

// ============================================================================
// STORE
// ============================================================================

/// SQLite-backed store with separate reader/writer connections
pub struct Store {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database, applying PRAGMAs and migrations
    pub fn new(db_path: Option<PathBuf>) -> Result<Self> {
        let path = match db_path {
            Some(p) => p,
            None => {
                let proj_dirs = ProjectDirs::from("org", "commontrace", "core").ok_or_else(
                    || StoreError::Init("could not determine project directories".to_string()),
                )?;
                let data_dir = proj_dirs.data_dir();
                std::fs::create_dir_all(data_dir)?;
                data_dir.join("commontrace.db")
            }
        };

        let writer_conn = Connection::open(&path)?;
        Self::configure_connection(&writer_conn)?;
        migrations::apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open(&path)?;
        Self::configure_connection(&reader_conn)?;

        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
        })
    }

    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    fn writer(&self) -> Result<MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| StoreError::Init("writer lock poisoned".to_string()))
    }

    fn reader(&self) -> Result<MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| StoreError::Init("reader lock poisoned".to_string()))
    }

    /// Liveness probe used by the health endpoint
    pub fn ping(&self) -> Result<()> {
        let conn = self.reader()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    // ========================================================================
    // USERS & REPUTATION
    // ========================================================================

    /// Insert a user row if absent (contributors and voters are implicit)
    pub fn ensure_user(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let conn = self.writer()?;
        conn.execute(
            "INSERT OR IGNORE INTO users (id, created_at) VALUES (?1, ?2)",
            params![user_id.to_string(), fmt_ts(now)],
        )?;
        Ok(())
    }

    /// Bump the reputation counters of the contributor receiving a vote
    pub fn bump_reputation(&self, user_id: Uuid, is_upvote: bool) -> Result<()> {
        let conn = self.writer()?;
        conn.execute(
            "UPDATE users SET votes_received = votes_received + 1,
                 upvotes_received = upvotes_received + ?1
             WHERE id = ?2",
            params![i64::from(is_upvote), user_id.to_string()],
        )?;
        Ok(())
    }

    /// `(upvotes_received, votes_received)` for a user; (0, 0) when unknown
    pub fn reputation(&self, user_id: Uuid) -> Result<(i64, i64)> {
        let conn = self.reader()?;
        let row = conn
            .query_row(
                "SELECT upvotes_received, votes_received FROM users WHERE id = ?1",
                params![user_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row.unwrap_or((0, 0)))
    }

    // ========================================================================
    // TRACE SUBMISSION & LOOKUP
    // ========================================================================

    /// Persist a new trace, enriching it on the way in.
    ///
    /// Enrichment fills language/framework metadata, depth and somatic
    /// scores, the tag-derived half-life, and the context fingerprint.
    /// A `supersedes_trace_id` becomes a SUPERSEDES edge (new -> old).
    pub fn submit_trace(
        &self,
        input: SubmitTraceInput,
        contributor_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Trace> {
        let metadata = enrichment::auto_enrich_metadata(input.metadata, &input.solution_text);
        let depth_score = enrichment::compute_depth_score(metadata.as_ref(), &input.solution_text);
        let somatic_intensity = enrichment::compute_somatic_intensity(metadata.as_ref());

        let mut tags: Vec<String> = Vec::new();
        for tag in &input.tags {
            let normalized = normalize_tag(tag);
            if !normalized.is_empty() && !tags.contains(&normalized) {
                tags.push(normalized);
            }
        }

        let half_life = compute_half_life(&tags);
        let fingerprint = ContextFingerprint::from_sources(metadata.as_ref(), &tags);

        let id = Uuid::new_v4();
        {
            let mut conn = self.writer()?;
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT OR IGNORE INTO users (id, created_at) VALUES (?1, ?2)",
                params![contributor_id.to_string(), fmt_ts(now)],
            )?;

            tx.execute(
                "INSERT INTO traces
                     (id, title, context_text, solution_text, contributor_id,
                      agent_model, agent_version, metadata_json, status,
                      half_life_days, depth_score, somatic_intensity, impact_level,
                      review_after, watch_condition, valid_from, valid_until,
                      context_fingerprint, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                         ?14, ?15, ?16, ?17, ?18, ?19, ?19)",
                params![
                    id.to_string(),
                    input.title,
                    input.context_text,
                    input.solution_text,
                    contributor_id.to_string(),
                    input.agent_model,
                    input.agent_version,
                    metadata.as_ref().map(|m| m.to_string()),
                    TraceStatus::Pending.as_str(),
                    half_life,
                    depth_score,
                    somatic_intensity,
                    input.impact_level.as_str(),
                    input.review_after.map(fmt_ts),
                    input.watch_condition,
                    input.valid_from.map(fmt_ts),
                    input.valid_until.map(fmt_ts),
                    fingerprint
                        .as_ref()
                        .map(|f| serde_json::to_string(f).unwrap_or_default()),
                    fmt_ts(now),
                ],
            )?;

            put_tags(&tx, id, &tags)?;

            if let Some(old) = input.supersedes_trace_id {
                put_relationship(&tx, id, old, RelationshipType::Supersedes, now)?;
            }

            tx.commit()?;
        }

        self.trace(id)?
            .ok_or_else(|| StoreError::NotFound(format!("trace {}", id)))
    }

    /// Fetch one trace with its tags
    pub fn trace(&self, id: Uuid) -> Result<Option<Trace>> {
        let trace = {
            let conn = self.reader()?;
            let sql = format!("SELECT {} FROM traces WHERE id = ?1", TRACE_COLUMNS);
            conn.query_row(&sql, params![id.to_string()], trace_from_row)
                .optional()?
        };
        match trace {
            None => Ok(None),
            Some(trace) => {
                let mut traces = self.attach_tags(vec![trace])?;
                Ok(traces.pop())
            }
        }
    }

    /// Fetch several traces with tags; order follows the input ids
    pub fn traces_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Trace>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let rows = {
            let conn = self.reader()?;
            let sql = format!(
                "SELECT {} FROM traces WHERE id IN ({})",
                TRACE_COLUMNS,
                placeholders(ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params_from_iter(ids.iter().map(|id| id.to_string())),
                    trace_from_row,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        let mut by_id: HashMap<Uuid, Trace> = self
            .attach_tags(rows)?
            .into_iter()
            .map(|t| (t.id, t))
            .collect();
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// Total trace count (drives maturity probing)
    pub fn trace_count(&self) -> Result<u64> {
        let conn = self.reader()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM traces", [], |r| r.get(0))?;
        Ok(count as u64)
    }

    fn attach_tags(&self, mut traces: Vec<Trace>) -> Result<Vec<Trace>> {
        let ids: Vec<Uuid> = traces.iter().map(|t| t.id).collect();
        let mut tag_map = self.tags_for_traces(&ids)?;
        for trace in &mut traces {
            trace.tags = tag_map.remove(&trace.id).unwrap_or_default();
        }
        Ok(traces)
    }

    /// Tag names per trace, alphabetical
    pub fn tags_for_traces(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<String>>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let conn = self.reader()?;
        let sql = format!(
            "SELECT tt.trace_id, tg.name
             FROM trace_tags tt JOIN tags tg ON tg.id = tt.tag_id
             WHERE tt.trace_id IN ({})
             ORDER BY tg.name",
            placeholders(ids.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(ids.iter().map(|id| id.to_string())),
            |row| Ok((uuid_col(row, 0)?, row.get::<_, String>(1)?)),
        )?;

        let mut map: HashMap<Uuid, Vec<String>> = HashMap::new();
        for row in rows {
            let (trace_id, name) = row?;
            map.entry(trace_id).or_default().push(name);
        }
        Ok(map)
    }

    // ========================================================================
    // VOTES & TRUST
    // ========================================================================

    /// Record a vote row; duplicate `(user, trace)` maps to DuplicateVote
    pub fn insert_vote(
        &self,
        trace_id: Uuid,
        user_id: Uuid,
        vote: &VoteInput,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let exists: bool = {
            let conn = self.reader()?;
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM traces WHERE id = ?1)",
                params![trace_id.to_string()],
                |r| r.get(0),
            )?
        };
        if !exists {
            return Err(StoreError::NotFound(format!("trace {}", trace_id)));
        }

        self.ensure_user(user_id, now)?;

        let conn = self.writer()?;
        let result = conn.execute(
            "INSERT INTO votes
                 (id, user_id, trace_id, vote_type, feedback_tag, feedback_text, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                Uuid::new_v4().to_string(),
                user_id.to_string(),
                trace_id.to_string(),
                vote.vote_type.as_str(),
                vote.feedback_tag,
                vote.feedback_text,
                fmt_ts(now),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::DuplicateVote)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Single atomic UPDATE: bump confirmation count, shift trust score
    pub fn apply_vote_delta(
        &self,
        trace_id: Uuid,
        score_delta: f64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.writer()?;
        conn.execute(
            "UPDATE traces SET confirmation_count = confirmation_count + 1,
                 trust_score = trust_score + ?1,
                 updated_at = ?2
             WHERE id = ?3",
            params![score_delta, fmt_ts(now), trace_id.to_string()],
        )?;
        Ok(())
    }

    /// Re-read the trust state after an atomic vote update
    pub fn trust_state(&self, trace_id: Uuid) -> Result<(TraceStatus, i64, f64)> {
        let conn = self.reader()?;
        let row = conn
            .query_row(
                "SELECT status, confirmation_count, trust_score FROM traces WHERE id = ?1",
                params![trace_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, f64>(2)?,
                    ))
                },
            )
            .optional()?;
        match row {
            Some((status, count, trust)) => {
                Ok((TraceStatus::parse_name(&status), count, trust))
            }
            None => Err(StoreError::NotFound(format!("trace {}", trace_id))),
        }
    }

    /// Promote pending -> validated; idempotent, returns whether a row changed
    pub fn promote_trace(&self, trace_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.writer()?;
        let changed = conn.execute(
            "UPDATE traces SET status = 'validated', updated_at = ?1
             WHERE id = ?2 AND status = 'pending'",
            params![fmt_ts(now), trace_id.to_string()],
        )?;
        Ok(changed > 0)
    }

    /// Contributor of a trace (for reputation bumps)
    pub fn contributor_of(&self, trace_id: Uuid) -> Result<Option<Uuid>> {
        let conn = self.reader()?;
        let id: Option<String> = conn
            .query_row(
                "SELECT contributor_id FROM traces WHERE id = ?1",
                params![trace_id.to_string()],
                |r| r.get(0),
            )
            .optional()?;
        Ok(id.and_then(|s| Uuid::parse_str(&s).ok()))
    }

    // ========================================================================
    // TAGS, TRENDS, TELEMETRY
    // ========================================================================

    /// All distinct tag names, alphabetical
    pub fn list_tags(&self) -> Result<Vec<String>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare("SELECT name FROM tags ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    /// Currently trending tags, strongest growth first
    pub fn trending_tags(&self, limit: usize) -> Result<Vec<TrendingTag>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT tag_name, growth_rate, trace_count_period, trace_count_prior, period_end
             FROM tag_trends WHERE is_trending = 1
             ORDER BY growth_rate DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(TrendingTag {
                    tag: row.get(0)?,
                    growth_rate: row.get(1)?,
                    trace_count: row.get(2)?,
                    prior_count: row.get(3)?,
                    period_end: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Store an opaque per-session telemetry payload
    pub fn insert_trigger_stats(
        &self,
        session_id: &str,
        stats: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.writer()?;
        conn.execute(
            "INSERT INTO trigger_stats (id, session_id, stats_json, reported_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                Uuid::new_v4().to_string(),
                session_id,
                stats.to_string(),
                fmt_ts(now),
            ],
        )?;
        Ok(())
    }

    // ========================================================================
    // SEARCH SUPPORT
    // ========================================================================

    /// Filter ANN candidates down to searchable traces.
    ///
    /// Keeps only embedded traces on the current model, unflagged, within
    /// validity (unless expired results were requested), and matching ALL
    /// requested tags.
    pub fn filter_semantic_candidates(
        &self,
        ids: &[Uuid],
        model_id: &str,
        tags: &[String],
        include_expired: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<Trace>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let mut sql = format!(
            "SELECT {} FROM traces
             WHERE id IN ({}) AND embedding IS NOT NULL
               AND embedding_model_id = ? AND is_flagged = 0",
            TRACE_COLUMNS,
            placeholders(ids.len())
        );
        let mut bind: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        bind.push(model_id.to_string());

        if !include_expired {
            sql.push_str(" AND (valid_until IS NULL OR valid_until >= ?)");
            bind.push(fmt_ts(now));
        }
        if !tags.is_empty() {
            sql.push_str(&format!(
                " AND id IN (SELECT tt.trace_id FROM trace_tags tt
                             JOIN tags tg ON tg.id = tt.tag_id
                             WHERE tg.name IN ({})
                             GROUP BY tt.trace_id
                             HAVING COUNT(DISTINCT tg.id) = {})",
                placeholders(tags.len()),
                tags.len()
            ));
            bind.extend(tags.iter().cloned());
        }

        let rows = {
            let conn = self.reader()?;
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map(params_from_iter(bind), trace_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };
        self.attach_tags(rows)
    }

    /// Tag-only candidate fetch, ordered by trust, over-fetched for
    /// re-ranking
    pub fn tag_only_candidates(
        &self,
        tags: &[String],
        include_expired: bool,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Trace>> {
        let mut sql = format!(
            "SELECT {} FROM traces WHERE is_flagged = 0",
            TRACE_COLUMNS
        );
        let mut bind: Vec<String> = Vec::new();

        if !include_expired {
            sql.push_str(" AND (valid_until IS NULL OR valid_until >= ?)");
            bind.push(fmt_ts(now));
        }
        if !tags.is_empty() {
            sql.push_str(&format!(
                " AND id IN (SELECT tt.trace_id FROM trace_tags tt
                             JOIN tags tg ON tg.id = tt.tag_id
                             WHERE tg.name IN ({})
                             GROUP BY tt.trace_id
                             HAVING COUNT(DISTINCT tg.id) = {})",
                placeholders(tags.len()),
                tags.len()
            ));
            bind.extend(tags.iter().cloned());
        }
        sql.push_str(&format!(" ORDER BY trust_score DESC LIMIT {}", limit));

        let rows = {
            let conn = self.reader()?;
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map(params_from_iter(bind), trace_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };
        self.attach_tags(rows)
    }

    /// Graph neighbors of the activation sources, strongest edges first.
    /// Only CO_RETRIEVED and SUPERSEDES edges participate; flagged targets
    /// are excluded.
    pub fn activation_neighbors(&self, source_ids: &[Uuid], limit: usize) -> Result<Vec<EdgeRow>> {
        if source_ids.is_empty() {
            return Ok(vec![]);
        }
        let conn = self.reader()?;
        let sql = format!(
            "SELECT tr.source_trace_id, tr.target_trace_id, tr.relationship_type, tr.strength
             FROM trace_relationships tr
             JOIN traces t ON t.id = tr.target_trace_id
             WHERE tr.source_trace_id IN ({})
               AND tr.relationship_type IN ('CO_RETRIEVED', 'SUPERSEDES')
               AND t.is_flagged = 0
             ORDER BY tr.strength DESC
             LIMIT {}",
            placeholders(source_ids.len()),
            limit
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params_from_iter(source_ids.iter().map(|id| id.to_string())),
                |row| {
                    Ok(EdgeRow {
                        source_id: uuid_col(row, 0)?,
                        target_id: uuid_col(row, 1)?,
                        relationship_type: row.get(2)?,
                        strength: row.get(3)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Outgoing relationships for the final result set, top `per_source`
    /// by strength
    pub fn related_for(
        &self,
        ids: &[Uuid],
        per_source: usize,
    ) -> Result<HashMap<Uuid, Vec<RelatedTrace>>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let conn = self.reader()?;
        let sql = format!(
            "SELECT tr.source_trace_id, tr.target_trace_id, tr.relationship_type,
                    tr.strength, t.title
             FROM trace_relationships tr
             JOIN traces t ON t.id = tr.target_trace_id
             WHERE tr.source_trace_id IN ({})
             ORDER BY tr.strength DESC",
            placeholders(ids.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(ids.iter().map(|id| id.to_string())),
            |row| {
                Ok((
                    uuid_col(row, 0)?,
                    RelatedTrace {
                        id: uuid_col(row, 1)?,
                        relationship_type: row.get(2)?,
                        strength: row.get(3)?,
                        title: row.get(4)?,
                    },
                ))
            },
        )?;

        let mut map: HashMap<Uuid, Vec<RelatedTrace>> = HashMap::new();
        for row in rows {
            let (source, related) = row?;
            let entry = map.entry(source).or_default();
            if entry.len() < per_source {
                entry.push(related);
            }
        }
        Ok(map)
    }

    /// Bump retrieval counters for returned traces (testing effect).
    /// Counters never decrement; the freshness anchor only moves forward.
    pub fn record_retrievals(&self, ids: &[Uuid], now: DateTime<Utc>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let conn = self.writer()?;
        let sql = format!(
            "UPDATE traces SET retrieval_count = retrieval_count + 1,
                 last_retrieved_at = ?
             WHERE id IN ({})",
            placeholders(ids.len())
        );
        let mut bind: Vec<String> = vec![fmt_ts(now)];
        bind.extend(ids.iter().map(|id| id.to_string()));
        conn.execute(&sql, params_from_iter(bind))?;
        Ok(())
    }

    /// One retrieval-log row per returned trace, tied to the search session
    pub fn insert_retrieval_logs(
        &self,
        entries: &[(Uuid, usize)],
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.writer()?;
        let tx = conn.transaction()?;
        for (trace_id, position) in entries {
            tx.execute(
                "INSERT INTO retrieval_logs
                     (id, trace_id, search_session_id, result_position, retrieved_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    Uuid::new_v4().to_string(),
                    trace_id.to_string(),
                    session_id,
                    *position as i64,
                    fmt_ts(now),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Upsert one direction of a CO_RETRIEVED edge, strength += 1
    pub fn upsert_co_retrieved(&self, source: Uuid, target: Uuid, now: DateTime<Utc>) -> Result<()> {
        let conn = self.writer()?;
        conn.execute(
            "INSERT INTO trace_relationships
                 (id, source_trace_id, target_trace_id, relationship_type, strength,
                  created_at, updated_at)
             VALUES (?1, ?2, ?3, 'CO_RETRIEVED', ?4, ?5, ?5)
             ON CONFLICT (source_trace_id, target_trace_id, relationship_type)
             DO UPDATE SET strength = strength + 1.0, updated_at = excluded.updated_at",
            params![
                Uuid::new_v4().to_string(),
                source.to_string(),
                target.to_string(),
                INITIAL_EDGE_STRENGTH,
                fmt_ts(now),
            ],
        )?;
        Ok(())
    }

    /// Insert a directional relationship if absent (idempotent).
    /// Returns whether a new edge was created.
    pub fn insert_relationship_if_absent(
        &self,
        source: Uuid,
        target: Uuid,
        kind: RelationshipType,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.writer()?;
        put_relationship(&conn, source, target, kind, now)
    }

    /// Strength of a relationship edge, if present
    pub fn relationship_strength(
        &self,
        source: Uuid,
        target: Uuid,
        kind: RelationshipType,
    ) -> Result<Option<f64>> {
        let conn = self.reader()?;
        let strength = conn
            .query_row(
                "SELECT strength FROM trace_relationships
                 WHERE source_trace_id = ?1 AND target_trace_id = ?2
                   AND relationship_type = ?3",
                params![source.to_string(), target.to_string(), kind.as_str()],
                |r| r.get(0),
            )
            .optional()?;
        Ok(strength)
    }

    // ========================================================================
    // EMBEDDINGS
    // ========================================================================

    /// Embedding vectors for a set of traces (used by diversity re-ranking)
    pub fn embeddings_for(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<f32>>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let conn = self.reader()?;
        let sql = format!(
            "SELECT id, embedding FROM traces
             WHERE id IN ({}) AND embedding IS NOT NULL",
            placeholders(ids.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(ids.iter().map(|id| id.to_string())),
            |row| Ok((uuid_col(row, 0)?, row.get::<_, Vec<u8>>(1)?)),
        )?;

        let mut map = HashMap::new();
        for row in rows {
            let (id, bytes) = row?;
            if let Some(vector) = vector_from_bytes(&bytes) {
                map.insert(id, vector);
            }
        }
        Ok(map)
    }

    /// All embeddings on the given model, for index warm-up at startup
    pub fn all_embeddings(&self, model_id: &str) -> Result<Vec<(Uuid, Vec<f32>)>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT id, embedding FROM traces
             WHERE embedding IS NOT NULL AND embedding_model_id = ?1",
        )?;
        let rows = stmt.query_map(params![model_id], |row| {
            Ok((uuid_col(row, 0)?, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, bytes) = row?;
            if let Some(vector) = vector_from_bytes(&bytes) {
                out.push((id, vector));
            }
        }
        Ok(out)
    }

    /// Claim a batch of unembedded traces: `(id, text-to-embed)` pairs
    pub fn pending_embedding_batch(&self, limit: usize) -> Result<Vec<(Uuid, String)>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, context_text, solution_text FROM traces
             WHERE embedding IS NULL ORDER BY created_at LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                let title: String = row.get(1)?;
                let context: String = row.get(2)?;
                let solution: String = row.get(3)?;
                Ok((uuid_col(row, 0)?, format!("{}\n{}\n{}", title, context, solution)))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Write an embedding; the worker is the sole caller
    pub fn store_embedding(
        &self,
        trace_id: Uuid,
        vector_bytes: &[u8],
        model_id: &str,
        model_version: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.writer()?;
        conn.execute(
            "UPDATE traces SET embedding = ?1, embedding_model_id = ?2,
                 embedding_model_version = ?3, updated_at = ?4
             WHERE id = ?5",
            params![
                vector_bytes,
                model_id,
                model_version,
                fmt_ts(now),
                trace_id.to_string(),
            ],
        )?;
        Ok(())
    }

    /// The content embedding of one trace, if present
    pub fn embedding_of(&self, trace_id: Uuid) -> Result<Option<Vec<f32>>> {
        let conn = self.reader()?;
        let bytes: Option<Vec<u8>> = conn
            .query_row(
                "SELECT embedding FROM traces WHERE id = ?1 AND embedding IS NOT NULL",
                params![trace_id.to_string()],
                |r| r.get(0),
            )
            .optional()?;
        Ok(bytes.and_then(|b| vector_from_bytes(&b)))
    }

    // ========================================================================
    // CONSOLIDATION SUPPORT
    // ========================================================================

    /// Idempotency gate: has a completed run finished since `cutoff`?
    pub fn has_completed_run_since(&self, cutoff: DateTime<Utc>) -> Result<bool> {
        let conn = self.reader()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM consolidation_runs
                 WHERE status = 'completed' AND completed_at > ?1)",
            params![fmt_ts(cutoff)],
            |r| r.get(0),
        )?;
        Ok(exists)
    }

    /// Open a new consolidation run in `running` state
    pub fn create_run(&self, now: DateTime<Utc>) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let conn = self.writer()?;
        conn.execute(
            "INSERT INTO consolidation_runs (id, started_at, status)
             VALUES (?1, ?2, 'running')",
            params![id.to_string(), fmt_ts(now)],
        )?;
        Ok(id)
    }

    /// Record a run's terminal status and stats
    pub fn finish_run(
        &self,
        run_id: Uuid,
        status: &str,
        stats: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.writer()?;
        conn.execute(
            "UPDATE consolidation_runs
             SET status = ?1, stats_json = ?2, completed_at = ?3
             WHERE id = ?4",
            params![status, stats.to_string(), fmt_ts(now), run_id.to_string()],
        )?;
        Ok(())
    }

    /// Multiply positive trust scores by the tier decay factor
    pub fn downscale_trust(&self, factor: f64, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.writer()?;
        let changed = conn.execute(
            "UPDATE traces SET trust_score = trust_score * ?1, updated_at = ?2
             WHERE trust_score > 0",
            params![factor, fmt_ts(now)],
        )?;
        Ok(changed)
    }

    /// Projection of every trace for temperature reclassification
    pub fn temperature_rows(&self) -> Result<Vec<TemperatureRow>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT id, created_at, last_retrieved_at, retrieval_count, trust_score,
                    memory_temperature
             FROM traces",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let temperature: Option<String> = row.get(5)?;
                Ok(TemperatureRow {
                    id: uuid_col(row, 0)?,
                    created_at: row.get(1)?,
                    last_retrieved_at: row.get(2)?,
                    retrieval_count: row.get(3)?,
                    trust_score: row.get(4)?,
                    temperature: temperature.as_deref().and_then(MemoryTemperature::parse_name),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Write a reclassified temperature; staleness follows FROZEN
    pub fn set_temperature(
        &self,
        trace_id: Uuid,
        temperature: MemoryTemperature,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.writer()?;
        conn.execute(
            "UPDATE traces SET memory_temperature = ?1, is_stale = ?2, updated_at = ?3
             WHERE id = ?4",
            params![
                temperature.as_str(),
                temperature == MemoryTemperature::Frozen,
                fmt_ts(now),
                trace_id.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Flag heavily downvoted traces (trust below -2)
    pub fn flag_heavily_downvoted(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.writer()?;
        let changed = conn.execute(
            "UPDATE traces SET is_flagged = 1, flagged_at = ?1, updated_at = ?1
             WHERE trust_score < -2 AND is_flagged = 0",
            params![fmt_ts(now)],
        )?;
        Ok(changed)
    }

    /// Mark never-retrieved traces older than the cutoff as stale
    pub fn mark_stale_unretrieved(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.writer()?;
        let changed = conn.execute(
            "UPDATE traces SET is_stale = 1, updated_at = ?1
             WHERE retrieval_count = 0 AND created_at < ?2 AND is_stale = 0",
            params![fmt_ts(now), fmt_ts(cutoff)],
        )?;
        Ok(changed)
    }

    /// Retrieval sessions within the window: `(session_id, distinct trace
    /// ids in retrieval order)`, sessions with at least two traces
    pub fn co_retrieval_sessions(
        &self,
        cutoff: DateTime<Utc>,
        max_per_session: usize,
    ) -> Result<Vec<(String, Vec<Uuid>)>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT search_session_id, trace_id FROM retrieval_logs
             WHERE retrieved_at > ?1
             ORDER BY search_session_id, retrieved_at",
        )?;
        let rows = stmt
            .query_map(params![fmt_ts(cutoff)], |row| {
                Ok((row.get::<_, String>(0)?, uuid_col(row, 1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut sessions: Vec<(String, Vec<Uuid>)> = Vec::new();
        for (session_id, trace_id) in rows {
            let continues_current = sessions
                .last()
                .is_some_and(|(current, _)| *current == session_id);
            if continues_current {
                if let Some((_, ids)) = sessions.last_mut() {
                    if ids.len() < max_per_session && !ids.contains(&trace_id) {
                        ids.push(trace_id);
                    }
                }
            } else {
                sessions.push((session_id, vec![trace_id]));
            }
        }
        sessions.retain(|(_, ids)| ids.len() >= 2);
        Ok(sessions)
    }

    /// Delete retrieval logs older than the cutoff
    pub fn prune_retrieval_logs(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.writer()?;
        let deleted = conn.execute(
            "DELETE FROM retrieval_logs WHERE retrieved_at < ?1",
            params![fmt_ts(cutoff)],
        )?;
        Ok(deleted)
    }

    /// Prospective memory: freeze traces whose review date has passed
    pub fn expire_due_reviews(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.writer()?;
        let changed = conn.execute(
            "UPDATE traces SET is_stale = 1, memory_temperature = 'FROZEN', updated_at = ?1
             WHERE review_after IS NOT NULL AND review_after < ?1 AND is_stale = 0",
            params![fmt_ts(now)],
        )?;
        Ok(changed)
    }

    // ------------------------------------------------------------------
    // Convergence
    // ------------------------------------------------------------------

    /// Embedded traces (on the current model) without a cluster
    pub fn unclustered_embedded(&self, model_id: &str) -> Result<Vec<Uuid>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM traces
             WHERE embedding IS NOT NULL AND embedding_model_id = ?1
               AND convergence_cluster_id IS NULL",
        )?;
        let ids = stmt
            .query_map(params![model_id], |row| uuid_col(row, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Current cluster assignment of a trace
    pub fn cluster_of(&self, trace_id: Uuid) -> Result<Option<Uuid>> {
        let conn = self.reader()?;
        let cluster: Option<Option<String>> = conn
            .query_row(
                "SELECT convergence_cluster_id FROM traces WHERE id = ?1",
                params![trace_id.to_string()],
                |r| r.get(0),
            )
            .optional()?;
        Ok(cluster.flatten().and_then(|s| Uuid::parse_str(&s).ok()))
    }

    /// `(cluster, fingerprint)` per neighbor trace
    pub fn cluster_info_for(
        &self,
        ids: &[Uuid],
    ) -> Result<Vec<(Uuid, Option<Uuid>, Option<ContextFingerprint>)>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let conn = self.reader()?;
        let sql = format!(
            "SELECT id, convergence_cluster_id, context_fingerprint FROM traces
             WHERE id IN ({})",
            placeholders(ids.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params_from_iter(ids.iter().map(|id| id.to_string())),
                |row| {
                    let fp: Option<String> = row.get(2)?;
                    Ok((
                        uuid_col(row, 0)?,
                        opt_uuid_col(row, 1)?,
                        fp.and_then(|f| serde_json::from_str(&f).ok()),
                    ))
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Fingerprint of one trace, if recorded
    pub fn fingerprint_of(&self, trace_id: Uuid) -> Result<Option<ContextFingerprint>> {
        let conn = self.reader()?;
        let fp: Option<Option<String>> = conn
            .query_row(
                "SELECT context_fingerprint FROM traces WHERE id = ?1",
                params![trace_id.to_string()],
                |r| r.get(0),
            )
            .optional()?;
        Ok(fp.flatten().and_then(|f| serde_json::from_str(&f).ok()))
    }

    /// All recorded fingerprints of a cluster's members
    pub fn fingerprints_in_cluster(&self, cluster_id: Uuid) -> Result<Vec<ContextFingerprint>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT context_fingerprint FROM traces
             WHERE convergence_cluster_id = ?1 AND context_fingerprint IS NOT NULL",
        )?;
        let rows = stmt
            .query_map(params![cluster_id.to_string()], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|f| serde_json::from_str(&f).ok())
            .collect())
    }

    /// Assign traces to a cluster at a convergence level
    pub fn assign_cluster(
        &self,
        ids: &[Uuid],
        cluster_id: Uuid,
        level: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let conn = self.writer()?;
        let sql = format!(
            "UPDATE traces SET convergence_cluster_id = ?, convergence_level = {}, updated_at = ?
             WHERE id IN ({})",
            level,
            placeholders(ids.len())
        );
        let mut bind: Vec<String> = vec![cluster_id.to_string(), fmt_ts(now)];
        bind.extend(ids.iter().map(|id| id.to_string()));
        conn.execute(&sql, params_from_iter(bind))?;
        Ok(())
    }

    /// Propagate a convergence level to every member of a cluster
    pub fn set_cluster_level(&self, cluster_id: Uuid, level: i64, now: DateTime<Utc>) -> Result<()> {
        let conn = self.writer()?;
        conn.execute(
            "UPDATE traces SET convergence_level = ?1, updated_at = ?2
             WHERE convergence_cluster_id = ?3",
            params![level, fmt_ts(now), cluster_id.to_string()],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Pattern synthesis
    // ------------------------------------------------------------------

    /// Clusters qualifying for pattern synthesis:
    /// `(cluster_id, member_count, avg_trust)`
    pub fn qualifying_clusters(
        &self,
        min_size: i64,
        min_trust: f64,
    ) -> Result<Vec<(Uuid, i64, f64)>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT convergence_cluster_id, COUNT(*), AVG(trust_score)
             FROM traces
             WHERE convergence_cluster_id IS NOT NULL
               AND is_flagged = 0 AND trace_type = 'episodic'
             GROUP BY convergence_cluster_id
             HAVING COUNT(*) >= ?1 AND AVG(trust_score) >= ?2",
        )?;
        let rows = stmt
            .query_map(params![min_size, min_trust], |row| {
                Ok((uuid_col(row, 0)?, row.get::<_, i64>(1)?, row.get::<_, f64>(2)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Whether a cluster already owns a pattern trace
    pub fn cluster_has_pattern(&self, cluster_id: Uuid) -> Result<bool> {
        let conn = self.reader()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM traces
                 WHERE trace_type = 'pattern' AND convergence_cluster_id = ?1)",
            params![cluster_id.to_string()],
            |r| r.get(0),
        )?;
        Ok(exists)
    }

    /// Episodic, unflagged members of a cluster ordered by trust, with tags
    pub fn cluster_members(&self, cluster_id: Uuid, limit: usize) -> Result<Vec<Trace>> {
        let rows = {
            let conn = self.reader()?;
            let sql = format!(
                "SELECT {} FROM traces
                 WHERE convergence_cluster_id = ?1 AND is_flagged = 0
                   AND trace_type = 'episodic'
                 ORDER BY trust_score DESC LIMIT {}",
                TRACE_COLUMNS, limit
            );
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map(params![cluster_id.to_string()], trace_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };
        self.attach_tags(rows)
    }

    /// Insert a synthesized pattern trace (validated, system-contributed,
    /// WARM) and link its tags
    pub fn insert_pattern_trace(
        &self,
        spec: &PatternSpec,
        tags: &[String],
        now: DateTime<Utc>,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let mut conn = self.writer()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO traces
                 (id, title, context_text, solution_text, contributor_id, metadata_json,
                  status, trust_score, trace_type, convergence_cluster_id,
                  convergence_level, impact_level, depth_score, somatic_intensity,
                  memory_temperature, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'validated', ?7, 'pattern', ?8, ?9, ?10,
                     ?11, ?12, 'WARM', ?13, ?13)",
            params![
                id.to_string(),
                spec.title,
                spec.context_text,
                spec.solution_text,
                spec.contributor_id.to_string(),
                spec.metadata.as_ref().map(|m| m.to_string()),
                spec.trust_score,
                spec.cluster_id.to_string(),
                spec.convergence_level,
                spec.impact_level.as_str(),
                spec.depth_score,
                spec.somatic_intensity,
                fmt_ts(now),
            ],
        )?;
        put_tags(&tx, id, tags)?;
        tx.commit()?;
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Contradictions & alternatives
    // ------------------------------------------------------------------

    /// Clusters that can be checked for solution divergence
    pub fn clusters_with_vectors(&self) -> Result<Vec<Uuid>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT convergence_cluster_id FROM traces
             WHERE convergence_cluster_id IS NOT NULL AND is_flagged = 0
               AND COALESCE(solution_embedding, embedding) IS NOT NULL
             GROUP BY convergence_cluster_id
             HAVING COUNT(*) >= 2",
        )?;
        let rows = stmt
            .query_map([], |row| uuid_col(row, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// `(id, trust, solution-or-content vector)` per unflagged cluster member
    pub fn cluster_pair_vectors(&self, cluster_id: Uuid) -> Result<Vec<(Uuid, f64, Vec<f32>)>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT id, trust_score, COALESCE(solution_embedding, embedding)
             FROM traces
             WHERE convergence_cluster_id = ?1 AND is_flagged = 0
               AND COALESCE(solution_embedding, embedding) IS NOT NULL",
        )?;
        let rows = stmt
            .query_map(params![cluster_id.to_string()], |row| {
                Ok((
                    uuid_col(row, 0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|(id, trust, bytes)| vector_from_bytes(&bytes).map(|v| (id, trust, v)))
            .collect())
    }

    // ------------------------------------------------------------------
    // RIF shadows
    // ------------------------------------------------------------------

    /// `(winner, loser, co-occurrence count)` pairs from retrieval logs
    /// where the winner held position 0 at least `min_count` times
    pub fn rif_candidate_pairs(&self, min_count: i64) -> Result<Vec<(Uuid, Uuid, i64)>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT w.trace_id, l.trace_id, COUNT(*)
             FROM retrieval_logs w
             JOIN retrieval_logs l ON w.search_session_id = l.search_session_id
                 AND w.result_position = 0
                 AND l.result_position > 0
                 AND w.trace_id != l.trace_id
             GROUP BY w.trace_id, l.trace_id
             HAVING COUNT(*) >= ?1",
        )?;
        let rows = stmt
            .query_map(params![min_count], |row| {
                Ok((uuid_col(row, 0)?, uuid_col(row, 1)?, row.get::<_, i64>(2)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Accumulate a loss count into the shadow table
    pub fn upsert_rif_shadow(
        &self,
        loser: Uuid,
        winner: Uuid,
        count: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.writer()?;
        conn.execute(
            "INSERT INTO rif_shadows
                 (id, loser_trace_id, winner_trace_id, loss_count, last_observed, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT (loser_trace_id, winner_trace_id)
             DO UPDATE SET loss_count = loss_count + excluded.loss_count,
                           last_observed = excluded.last_observed",
            params![
                Uuid::new_v4().to_string(),
                loser.to_string(),
                winner.to_string(),
                count,
                fmt_ts(now),
            ],
        )?;
        Ok(())
    }

    /// Loss count recorded for a `(loser, winner)` pair
    pub fn rif_loss_count(&self, loser: Uuid, winner: Uuid) -> Result<Option<i64>> {
        let conn = self.reader()?;
        let count = conn
            .query_row(
                "SELECT loss_count FROM rif_shadows
                 WHERE loser_trace_id = ?1 AND winner_trace_id = ?2",
                params![loser.to_string(), winner.to_string()],
                |r| r.get(0),
            )
            .optional()?;
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Tag trends
    // ------------------------------------------------------------------

    /// Distinct-trace counts per tag for traces created in `[start, end)`
    pub fn tag_counts_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<HashMap<String, i64>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT tg.name, COUNT(DISTINCT t.id)
             FROM tags tg
             JOIN trace_tags tt ON tt.tag_id = tg.id
             JOIN traces t ON t.id = tt.trace_id
             WHERE t.created_at >= ?1 AND t.created_at < ?2
             GROUP BY tg.name",
        )?;
        let rows = stmt
            .query_map(params![fmt_ts(start), fmt_ts(end)], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows.into_iter().collect())
    }

    /// Upsert one tag's trend row for the period ending at `period_end`
    #[allow(clippy::too_many_arguments)]
    pub fn upsert_tag_trend(
        &self,
        tag_name: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        count_current: i64,
        count_prior: i64,
        growth_rate: f64,
        is_trending: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.writer()?;
        conn.execute(
            "INSERT INTO tag_trends
                 (id, tag_name, period_start, period_end, trace_count_period,
                  trace_count_prior, growth_rate, is_trending, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT (tag_name, period_end)
             DO UPDATE SET trace_count_period = excluded.trace_count_period,
                           trace_count_prior = excluded.trace_count_prior,
                           growth_rate = excluded.growth_rate,
                           is_trending = excluded.is_trending",
            params![
                Uuid::new_v4().to_string(),
                tag_name,
                fmt_ts(period_start),
                fmt_ts(period_end),
                count_current,
                count_prior,
                growth_rate,
                is_trending,
                fmt_ts(now),
            ],
        )?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
