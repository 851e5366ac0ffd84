//! Search request and response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::ContextFingerprint;
use crate::error::EngineError;
use crate::ranking::temperature::MemoryTemperature;

use super::TraceStatus;

/// Upper bound on query text length
pub const MAX_QUERY_LEN: usize = 2000;

/// Upper bound on the number of tag filters
pub const MAX_SEARCH_TAGS: usize = 10;

/// Search request: natural-language query, tag filters, or both
///
/// Uses `deny_unknown_fields` to prevent field injection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SearchRequest {
    /// Natural language query (omit for tag-only search)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    /// Tag filters - AND semantics, all must match
    #[serde(default)]
    pub tags: Vec<String>,
    /// Maximum results to return
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Searcher's environment fingerprint for relevance boosting
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextFingerprint>,
    /// Include traces past their validity window
    #[serde(default)]
    pub include_expired: bool,
}

fn default_limit() -> usize {
    10
}

impl SearchRequest {
    /// Reject empty or out-of-bounds requests before touching the store
    pub fn validate(&self) -> Result<(), EngineError> {
        let has_query = self.q.as_deref().is_some_and(|q| !q.trim().is_empty());
        if !has_query && self.tags.is_empty() {
            return Err(EngineError::InvalidArgument(
                "at least one of 'q' or 'tags' must be provided".to_string(),
            ));
        }
        if let Some(q) = &self.q {
            if q.len() > MAX_QUERY_LEN {
                return Err(EngineError::InvalidArgument(format!(
                    "query exceeds {} characters",
                    MAX_QUERY_LEN
                )));
            }
        }
        if self.tags.len() > MAX_SEARCH_TAGS {
            return Err(EngineError::InvalidArgument(format!(
                "at most {} tags may be provided",
                MAX_SEARCH_TAGS
            )));
        }
        if self.limit < 1 || self.limit > 50 {
            return Err(EngineError::InvalidArgument(
                "limit must be between 1 and 50".to_string(),
            ));
        }
        Ok(())
    }
}

/// A related trace attached to a search result (top 3 by edge strength)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedTrace {
    pub id: Uuid,
    pub title: String,
    pub relationship_type: String,
    pub strength: f64,
}

/// One ranked search result with all ranking fields exposed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub id: Uuid,
    pub title: String,
    pub context_text: String,
    pub solution_text: String,
    pub trust_score: f64,
    pub status: TraceStatus,
    pub tags: Vec<String>,
    /// Cosine similarity (1 - distance); 0.0 in tag-only mode
    pub similarity_score: f64,
    /// Final multi-factor score
    pub combined_score: f64,
    pub contributor_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub retrieval_count: i64,
    pub depth_score: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_fingerprint: Option<ContextFingerprint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub convergence_level: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_temperature: Option<MemoryTemperature>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub related_traces: Vec<RelatedTrace>,
}

/// Search response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    /// Number of results returned
    pub total: usize,
    /// Echo of the query (None for tag-only search)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request() -> SearchRequest {
        SearchRequest {
            q: Some("rate limiting".to_string()),
            tags: vec![],
            limit: 10,
            context: None,
            include_expired: false,
        }
    }

    #[test]
    fn test_empty_request_rejected() {
        let req = SearchRequest {
            q: None,
            tags: vec![],
            ..base_request()
        };
        assert!(matches!(
            req.validate(),
            Err(EngineError::InvalidArgument(_))
        ));

        // Whitespace-only query counts as empty
        let req = SearchRequest {
            q: Some("   ".to_string()),
            tags: vec![],
            ..base_request()
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_tag_only_request_accepted() {
        let req = SearchRequest {
            q: None,
            tags: vec!["python".to_string()],
            ..base_request()
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_limit_bounds() {
        let req = SearchRequest {
            limit: 0,
            ..base_request()
        };
        assert!(req.validate().is_err());

        let req = SearchRequest {
            limit: 51,
            ..base_request()
        };
        assert!(req.validate().is_err());

        let req = SearchRequest {
            limit: 50,
            ..base_request()
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_too_many_tags_rejected() {
        let req = SearchRequest {
            tags: (0..11).map(|i| format!("tag{}", i)).collect(),
            ..base_request()
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_default_limit_from_json() {
        let req: SearchRequest = serde_json::from_str(r#"{"q": "hello"}"#).unwrap();
        assert_eq!(req.limit, 10);
        assert!(!req.include_expired);
    }
}
