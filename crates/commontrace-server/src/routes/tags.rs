//! Tag endpoints.

use axum::extract::State;
use axum::response::Json;

use super::ApiError;
use crate::state::AppState;

/// GET /api/v1/tags - all distinct tag names, alphabetical
pub async fn list_tags(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let tags = state.engine.list_tags()?;
    Ok(Json(serde_json::json!({ "tags": tags })))
}

/// GET /api/v1/tags/trending - top 10 trending tags from the latest
/// trend-detection period
pub async fn trending_tags(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let trending = state.engine.trending_tags(10)?;
    Ok(Json(serde_json::json!({ "trending": trending })))
}
