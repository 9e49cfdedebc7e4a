use sha2::{Digest, Sha256};

use super::EmbeddingBackend;
use crate::error::{RagError, RagResult};

const BIGRAM_WEIGHT: f32 = 0.5;

/// Offline embedding by signed feature hashing of lower-cased word unigrams and bigrams.
///
/// Deterministic across runs and machines, so vectors persisted by one process
/// are comparable with queries from another. Texts sharing vocabulary score
/// higher; it carries no semantics beyond that.
pub struct HashEmbeddings {
    dims: usize,
    name: String,
}

impl HashEmbeddings {
    pub fn new(dims: usize) -> RagResult<Self> {
        if dims == 0 {
            return Err(RagError::InvalidConfig("hash embedding dimension must be positive".into()));
        }
        Ok(Self { dims, name: format!("hash-{dims}") })
    }

    fn add_feature(&self, v: &mut [f32], feature: &str, weight: f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut bucket = [0u8; 8];
        bucket.copy_from_slice(&digest[..8]);
        let idx = (u64::from_le_bytes(bucket) % self.dims as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        v[idx] += sign * weight;
    }

    fn encode_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        let tokens: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect();

        if tokens.is_empty() {
            // Punctuation-only text still gets a stable non-zero vector.
            self.add_feature(&mut v, text.trim(), 1.0);
            return v;
        }
        for token in &tokens {
            self.add_feature(&mut v, token, 1.0);
        }
        for pair in tokens.windows(2) {
            self.add_feature(&mut v, &format!("{} {}", pair[0], pair[1]), BIGRAM_WEIGHT);
        }
        v
    }
}

#[async_trait::async_trait]
impl EmbeddingBackend for HashEmbeddings {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.dims
    }

    async fn encode(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.encode_one(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::Embedder;
    use crate::rag::search::dot_similarity;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_deterministic() {
        let backend = HashEmbeddings::new(64).unwrap();
        let a = backend.encode(&["The borrow checker".to_string()]).await.unwrap();
        let b = backend.encode(&["the BORROW checker".to_string()]).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_shared_vocabulary_scores_higher() {
        let embedder = Embedder::new(Arc::new(HashEmbeddings::new(256).unwrap()));
        let query = embedder.embed_query("rust ownership and borrowing").await.unwrap();
        let docs = embedder
            .embed_batch(&[
                "ownership and borrowing rules in rust".to_string(),
                "baking sourdough bread at home".to_string(),
            ])
            .await
            .unwrap();
        assert!(dot_similarity(&query, &docs[0]) > dot_similarity(&query, &docs[1]));
    }

    #[tokio::test]
    async fn test_punctuation_only_text_is_non_zero() {
        let backend = HashEmbeddings::new(16).unwrap();
        let v = backend.encode(&["?!".to_string()]).await.unwrap();
        assert!(v[0].iter().any(|x| *x != 0.0));
    }

    #[test]
    fn test_zero_dimension_is_rejected() {
        assert!(matches!(HashEmbeddings::new(0), Err(RagError::InvalidConfig(_))));
    }
}
