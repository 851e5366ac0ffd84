//! Telemetry endpoint - anonymized trigger stats from skill clients.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;

use super::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TriggerStatsBody {
    pub session_id: String,
    pub trigger_stats: serde_json::Value,
}

/// POST /api/v1/telemetry/triggers - fires at most once per session
pub async fn report_triggers(
    State(state): State<AppState>,
    Json(body): Json<TriggerStatsBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    state
        .engine
        .record_trigger_stats(&body.session_id, &body.trigger_stats)?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "status": "ok" })),
    ))
}
