//! HTTP routes and the error-to-status mapping.

pub mod health;
pub mod search;
pub mod tags;
pub mod telemetry;
pub mod traces;

use axum::Router;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use commontrace_core::EngineError;

use crate::state::AppState;

/// Concurrent in-flight requests before new ones queue
const CONCURRENCY_LIMIT: usize = 64;

/// Build the axum router with all API routes
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/traces/search", post(search::search_traces))
        .route("/api/v1/traces", post(traces::create_trace))
        .route("/api/v1/traces/{id}", get(traces::get_trace))
        .route("/api/v1/traces/{id}/votes", post(traces::vote_on_trace))
        .route("/api/v1/traces/{id}/amendments", post(traces::amend_trace))
        .route("/api/v1/tags", get(tags::list_tags))
        .route("/api/v1/tags/trending", get(tags::trending_tags))
        .route("/api/v1/telemetry/triggers", post(telemetry::report_triggers))
        .route("/health", get(health::health_check))
        .layer(
            ServiceBuilder::new()
                .concurrency_limit(CONCURRENCY_LIMIT)
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Engine errors rendered as JSON with a human-readable detail string
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::InvalidArgument(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Conflict(_) => StatusCode::CONFLICT,
            EngineError::Unauthenticated => StatusCode::UNAUTHORIZED,
            EngineError::PermissionDenied => StatusCode::FORBIDDEN,
            EngineError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            EngineError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let detail = match &self.0 {
            // Internal details are logged, never leaked
            EngineError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}

/// Write endpoints require the configured API key
pub fn require_api_key(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = &state.api_key else {
        return Ok(());
    };
    let provided = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    if provided == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(ApiError(EngineError::Unauthenticated))
    }
}

/// The calling agent identifies itself with an `X-Agent-Id` UUID header;
/// votes and contributions are keyed on it.
pub fn require_agent_id(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    headers
        .get("x-agent-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or(ApiError(EngineError::Unauthenticated))
}
