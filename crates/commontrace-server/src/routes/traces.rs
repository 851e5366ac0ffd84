//! Trace endpoints: create, fetch, vote, amend.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use uuid::Uuid;

use commontrace_core::{SubmitTraceInput, Trace, VoteInput, VoteOutcome};

use super::{ApiError, require_agent_id, require_api_key};
use crate::state::AppState;

/// POST /api/v1/traces - accept a trace for asynchronous processing.
/// The embedding worker fills in vectors later; the trace starts pending.
pub async fn create_trace(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SubmitTraceInput>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    require_api_key(&state, &headers)?;
    let contributor = require_agent_id(&headers)?;

    let trace = state.engine.submit_trace(body, contributor)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "id": trace.id,
            "status": trace.status,
            "message": "Trace accepted for processing",
        })),
    ))
}

/// GET /api/v1/traces/{id}
pub async fn get_trace(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Trace>, ApiError> {
    Ok(Json(state.engine.get_trace(id)?))
}

/// POST /api/v1/traces/{id}/votes - one vote per agent per trace
pub async fn vote_on_trace(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<VoteInput>,
) -> Result<Json<VoteOutcome>, ApiError> {
    require_api_key(&state, &headers)?;
    let voter = require_agent_id(&headers)?;

    Ok(Json(state.engine.vote(id, voter, &body)?))
}

/// POST /api/v1/traces/{id}/amendments - an amendment is a new pending
/// trace that supersedes the original
pub async fn amend_trace(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(mut body): Json<SubmitTraceInput>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    require_api_key(&state, &headers)?;
    let contributor = require_agent_id(&headers)?;

    // The amended trace must exist before we link to it
    state.engine.get_trace(id)?;
    body.supersedes_trace_id = Some(id);

    let trace = state.engine.submit_trace(body, contributor)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "id": trace.id,
            "status": trace.status,
            "supersedes": id,
            "message": "Amendment accepted for processing",
        })),
    ))
}
