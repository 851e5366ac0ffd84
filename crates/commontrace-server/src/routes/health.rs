//! Health endpoint: database plus both background workers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;

use crate::state::AppState;

/// GET /health - 200 when everything is healthy, else 503 with
/// per-component status
pub async fn health_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<serde_json::Value>) {
    let db_ok = state.engine.ping().is_ok();
    let consolidation_ok = state
        .health
        .consolidation_healthy(state.engine.config().consolidation_interval_hours);
    let embedding_ok = state.health.embedding_healthy();

    let healthy = db_ok && consolidation_ok && embedding_ok;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let label = |ok: bool| if ok { "ok" } else { "unhealthy" };
    (
        status,
        Json(serde_json::json!({
            "status": if healthy { "healthy" } else { "unhealthy" },
            "components": {
                "database": label(db_ok),
                "consolidation_worker": label(consolidation_ok),
                "embedding_worker": label(embedding_ok),
            },
            "indexed_vectors": state.engine.index_size(),
        })),
    )
}
