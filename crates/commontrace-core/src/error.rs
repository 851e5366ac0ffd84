//! Engine-level error taxonomy.
//!
//! Every fallible operation the engine exposes resolves to one of these
//! kinds so callers (HTTP layer, workers, clients) can map them to a
//! transport status without inspecting message strings.

use crate::embeddings::EmbeddingError;
use crate::storage::StoreError;

/// Error kinds surfaced by the engine
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed or empty request (e.g. search with neither query nor tags)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// Referenced entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),
    /// Uniqueness violation (e.g. duplicate vote by the same user)
    #[error("Conflict: {0}")]
    Conflict(String),
    /// Missing or invalid credentials
    #[error("Unauthenticated")]
    Unauthenticated,
    /// Authenticated but not allowed
    #[error("Permission denied")]
    PermissionDenied,
    /// Caller exceeded its request quota
    #[error("Rate limited")]
    RateLimited,
    /// A required collaborator is unavailable (embedding port skipped,
    /// backend circuit open)
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Deadline exceeded
    #[error("Timeout: {0}")]
    Timeout(String),
    /// Anything else; details are logged, not leaked
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => EngineError::NotFound(what),
            StoreError::DuplicateVote => {
                EngineError::Conflict("user already voted on this trace".to_string())
            }
            other => EngineError::Internal(other.to_string()),
        }
    }
}

impl From<EmbeddingError> for EngineError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::Skipped => EngineError::ServiceUnavailable(
                "embedding provider not configured".to_string(),
            ),
            EmbeddingError::InvalidInput(msg) => EngineError::InvalidArgument(msg),
            other => EngineError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_mapping() {
        let err: EngineError = StoreError::DuplicateVote.into();
        assert!(matches!(err, EngineError::Conflict(_)));

        let err: EngineError = StoreError::NotFound("trace abc".to_string()).into();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn test_skipped_embedding_maps_to_unavailable() {
        let err: EngineError = EmbeddingError::Skipped.into();
        assert!(matches!(err, EngineError::ServiceUnavailable(_)));
    }
}
