//! Embedding port and vector primitives.
//!
//! The engine never talks to an embedding backend directly - it goes
//! through the [`Embedder`] port, which either produces a vector with its
//! model identity or reports that embedding is skipped (unconfigured).
//! Search maps *skipped* to `ServiceUnavailable`; the background worker
//! quietly idles.

pub mod worker;

#[cfg(feature = "embeddings")]
mod local;

#[cfg(feature = "embeddings")]
pub use local::LocalEmbedder;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Embedding port errors
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbeddingError {
    /// Provider is not configured; callers must degrade, not fail hard
    #[error("embedding skipped: provider not configured")]
    Skipped,
    /// Provider failed to produce a vector
    #[error("embedding failed: {0}")]
    Failed(String),
    /// Input was unusable (empty text, oversized, ...)
    #[error("invalid embedding input: {0}")]
    InvalidInput(String),
}

// ============================================================================
// PORT
// ============================================================================

/// Output of one embedding call
#[derive(Debug, Clone)]
pub struct EmbeddedText {
    pub vector: Vec<f32>,
    pub model_id: String,
    pub model_version: String,
}

/// Outbound port to the embedding provider
pub trait Embedder: Send + Sync {
    /// Embed one text. Returns [`EmbeddingError::Skipped`] when the
    /// provider is not configured.
    fn embed(&self, text: &str) -> Result<EmbeddedText, EmbeddingError>;

    /// Identifier of the model this port currently produces vectors with.
    /// Search filters candidates to this model id.
    fn model_id(&self) -> &str;

    /// Vector dimensionality this port produces
    fn dimensions(&self) -> usize;
}

/// Port implementation for deployments without an embedding provider.
/// Every call reports *skipped*; search degrades to tag-only mode.
#[derive(Debug, Default)]
pub struct DisabledEmbedder;

impl Embedder for DisabledEmbedder {
    fn embed(&self, _text: &str) -> Result<EmbeddedText, EmbeddingError> {
        Err(EmbeddingError::Skipped)
    }

    fn model_id(&self) -> &str {
        "disabled"
    }

    fn dimensions(&self) -> usize {
        0
    }
}

// ============================================================================
// VECTOR PRIMITIVES
// ============================================================================

/// Encode an f32 vector as little-endian bytes for BLOB storage
pub fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Decode a BLOB back into an f32 vector; `None` on malformed length
pub fn vector_from_bytes(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

/// Cosine similarity between two vectors; 0.0 on mismatch or zero norm
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Cosine distance (1 - similarity)
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    1.0 - cosine_similarity(a, b)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_roundtrip() {
        let v = vec![0.25f32, -1.5, 3.0, 0.0];
        let bytes = vector_to_bytes(&v);
        assert_eq!(vector_from_bytes(&bytes).unwrap(), v);
    }

    #[test]
    fn test_malformed_bytes_rejected() {
        assert!(vector_from_bytes(&[1, 2, 3]).is_none());
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0f32, 0.0];
        let b = vec![0.0f32, 1.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&a, &b).abs() < 1e-9);
        assert!((cosine_distance(&a, &b) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_disabled_embedder_is_skipped() {
        let port = DisabledEmbedder;
        assert!(matches!(port.embed("hello"), Err(EmbeddingError::Skipped)));
    }
}
