//! Text → vector embedding.
//!
//! The model itself is a black box behind [`EmbeddingBackend`]. [`Embedder`]
//! wraps one backend and guarantees what the vector store relies on: empty
//! texts never reach the model, every vector has the backend's fixed width,
//! and every vector is unit-normalized.

use std::sync::Arc;

use crate::config::{EmbeddingConfig, EmbeddingProvider};
use crate::error::{RagError, RagResult};
use crate::rag::search::{l2_norm, normalize};

pub mod hashing;
pub mod ollama;

pub use hashing::HashEmbeddings;
pub use ollama::OllamaEmbeddings;

#[async_trait::async_trait]
pub trait EmbeddingBackend: Send + Sync {
    fn model_name(&self) -> &str;

    /// Fixed output width of this model.
    fn dimension(&self) -> usize;

    /// Encode a non-empty batch. Output vectors need not be normalized.
    async fn encode(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>>;
}

/// Trim texts and drop the ones left empty. Callers that pair texts with
/// embeddings must apply the same filter before embedding.
pub fn clean_texts(texts: &[String]) -> Vec<String> {
    texts
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Clone)]
pub struct Embedder {
    backend: Arc<dyn EmbeddingBackend>,
}

impl Embedder {
    pub fn new(backend: Arc<dyn EmbeddingBackend>) -> Self {
        Self { backend }
    }

    pub fn dimension(&self) -> usize {
        self.backend.dimension()
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    /// Embed a batch. Empty and whitespace-only texts are skipped; if none remain the
    /// model is not called and the result is empty.
    pub async fn embed_batch(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        let cleaned = clean_texts(texts);
        if cleaned.is_empty() {
            return Ok(Vec::new());
        }
        let raw = self.backend.encode(&cleaned).await?;
        self.finish(raw, cleaned.len())
    }

    pub async fn embed_query(&self, text: &str) -> RagResult<Vec<f32>> {
        let text = text.trim();
        if text.is_empty() {
            return Err(RagError::EmptyInput("query cannot be empty".into()));
        }
        let raw = self.backend.encode(&[text.to_string()]).await?;
        self.finish(raw, 1)?
            .pop()
            .ok_or_else(|| RagError::Embedding("model returned no vector for the query".into()))
    }

    fn finish(&self, mut raw: Vec<Vec<f32>>, expected: usize) -> RagResult<Vec<Vec<f32>>> {
        if raw.len() != expected {
            return Err(RagError::Embedding(format!(
                "model returned {} vectors for {expected} texts",
                raw.len()
            )));
        }
        let dims = self.dimension();
        for (i, v) in raw.iter_mut().enumerate() {
            if v.len() != dims {
                return Err(RagError::DimensionMismatch { expected: dims, actual: v.len() });
            }
            if v.iter().any(|x| !x.is_finite()) {
                return Err(RagError::Embedding(format!("vector {i} contains non-finite values")));
            }
            if l2_norm(v) == 0.0 {
                return Err(RagError::Embedding(format!("vector {i} has zero norm")));
            }
            normalize(v);
        }
        Ok(raw)
    }
}

/// Build the configured backend. Network backends are probed once here.
pub async fn build_backend(config: &EmbeddingConfig, timeout_secs: u64) -> RagResult<Arc<dyn EmbeddingBackend>> {
    match config.provider {
        EmbeddingProvider::Hash => {
            let dims = config
                .dimension
                .filter(|d| *d > 0)
                .ok_or_else(|| RagError::InvalidConfig("embedding.dimension is required for the hash provider".into()))?;
            Ok(Arc::new(HashEmbeddings::new(dims)?))
        }
        EmbeddingProvider::Ollama => {
            let backend = OllamaEmbeddings::connect(&config.base_url, &config.model, timeout_secs).await?;
            if let Some(expected) = config.dimension {
                if expected != backend.dimension() {
                    return Err(RagError::DimensionMismatch { expected, actual: backend.dimension() });
                }
            }
            tracing::info!(model = %config.model, dimension = backend.dimension(), "embedding model ready");
            Ok(Arc::new(backend))
        }
    }
}
