//! Local embedding provider (fastembed, ONNX inference).
//!
//! No external API calls - the model runs in-process. Model files are
//! cached under the platform cache directory (override with
//! `FASTEMBED_CACHE_PATH`).

use std::path::PathBuf;
use std::sync::Mutex;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use super::{EmbeddedText, Embedder, EmbeddingError};

/// Dimensionality of nomic-embed-text-v1.5 vectors
pub const LOCAL_EMBEDDING_DIMENSIONS: usize = 768;

/// Maximum text length for embedding (truncated beyond this)
const MAX_TEXT_LENGTH: usize = 8192;

const MODEL_ID: &str = "nomic-ai/nomic-embed-text-v1.5";
const MODEL_VERSION: &str = "v1.5";

fn cache_dir() -> PathBuf {
    if let Ok(path) = std::env::var("FASTEMBED_CACHE_PATH") {
        return PathBuf::from(path);
    }
    if let Some(proj_dirs) = directories::ProjectDirs::from("org", "commontrace", "core") {
        return proj_dirs.cache_dir().join("fastembed");
    }
    PathBuf::from(".fastembed_cache")
}

/// Embedding port backed by a local fastembed model
pub struct LocalEmbedder {
    model: Mutex<TextEmbedding>,
}

impl LocalEmbedder {
    /// Load (downloading on first use) the local embedding model
    pub fn new() -> Result<Self, EmbeddingError> {
        let cache = cache_dir();
        if let Err(e) = std::fs::create_dir_all(&cache) {
            tracing::warn!("failed to create fastembed cache dir {:?}: {}", cache, e);
        }

        let options = InitOptions::new(EmbeddingModel::NomicEmbedTextV15)
            .with_show_download_progress(false)
            .with_cache_dir(cache);

        let model = TextEmbedding::try_new(options)
            .map_err(|e| EmbeddingError::Failed(format!("model init: {}", e)))?;

        Ok(Self {
            model: Mutex::new(model),
        })
    }
}

impl Embedder for LocalEmbedder {
    fn embed(&self, text: &str) -> Result<EmbeddedText, EmbeddingError> {
        if text.is_empty() {
            return Err(EmbeddingError::InvalidInput("text cannot be empty".to_string()));
        }

        let text = if text.len() > MAX_TEXT_LENGTH {
            let mut end = MAX_TEXT_LENGTH;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            &text[..end]
        } else {
            text
        };

        let mut model = self
            .model
            .lock()
            .map_err(|_| EmbeddingError::Failed("model lock poisoned".to_string()))?;

        let mut vectors = model
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::Failed(e.to_string()))?;

        if vectors.is_empty() {
            return Err(EmbeddingError::Failed("no embedding generated".to_string()));
        }

        Ok(EmbeddedText {
            vector: vectors.remove(0),
            model_id: MODEL_ID.to_string(),
            model_version: MODEL_VERSION.to_string(),
        })
    }

    fn model_id(&self) -> &str {
        MODEL_ID
    }

    fn dimensions(&self) -> usize {
        LOCAL_EMBEDDING_DIMENSIONS
    }
}
