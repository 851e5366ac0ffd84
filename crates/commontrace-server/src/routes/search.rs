//! Search endpoint.
//!
//! POST /api/v1/traces/search - hybrid semantic + tag search. The engine
//! dispatches its own fire-and-forget side-effects; the handler only
//! relays the ranked response.

use axum::extract::State;
use axum::response::Json;

use commontrace_core::{SearchRequest, SearchResponse};

use super::ApiError;
use crate::state::AppState;

pub async fn search_traces(
    State(state): State<AppState>,
    Json(body): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let response = state.engine.search(&body)?;
    tracing::info!(
        query_len = body.q.as_deref().map(str::len).unwrap_or(0),
        tag_count = body.tags.len(),
        result_count = response.total,
        "search executed"
    );
    Ok(Json(response))
}
