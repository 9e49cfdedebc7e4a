use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::EmbeddingBackend;
use crate::error::{RagError, RagResult};

const PROBE_TEXT: &str = "dimension probe";

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

/// Embeddings served by a local Ollama instance (`POST /api/embed`).
pub struct OllamaEmbeddings {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dims: usize,
}

impl OllamaEmbeddings {
    /// Connect and learn the model's output width from one probe request.
    pub async fn connect(base_url: &str, model: &str, timeout_secs: u64) -> RagResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| RagError::Embedding(format!("Failed to build HTTP client: {e}")))?;

        let mut backend = Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dims: 0,
        };
        let probe = backend.request(&[PROBE_TEXT.to_string()]).await?;
        backend.dims = probe.first().map(|v| v.len()).unwrap_or(0);
        if backend.dims == 0 {
            return Err(RagError::Embedding(format!("model '{model}' returned an empty embedding")));
        }
        Ok(backend)
    }

    async fn request(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        let url = format!("{}/api/embed", self.base_url);
        let resp = self
            .client
            .post(url)
            .json(&EmbedRequest { model: &self.model, input: texts })
            .send()
            .await
            .map_err(|e| RagError::Embedding(format!("embedding request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RagError::Embedding(format!("Ollama embed error {status}: {body}")));
        }
        let parsed: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| RagError::Embedding(format!("invalid embedding response: {e}")))?;
        Ok(parsed.embeddings)
    }
}

#[async_trait::async_trait]
impl EmbeddingBackend for OllamaEmbeddings {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dims
    }

    async fn encode(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        self.request(texts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let input = vec!["hello".to_string(), "world".to_string()];
        let body = serde_json::to_value(EmbedRequest { model: "all-minilm", input: &input }).unwrap();
        assert_eq!(body["model"], "all-minilm");
        assert_eq!(body["input"][1], "world");
    }

    #[test]
    fn test_response_parsing() {
        let parsed: EmbedResponse =
            serde_json::from_str(r#"{"model":"all-minilm","embeddings":[[0.1,0.2],[0.3,0.4]]}"#).unwrap();
        assert_eq!(parsed.embeddings.len(), 2);
        assert_eq!(parsed.embeddings[1], vec![0.3, 0.4]);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_embedding_error() {
        // Port 9 (discard) on localhost is not an Ollama server.
        let result = OllamaEmbeddings::connect("http://127.0.0.1:9", "all-minilm", 2).await;
        assert!(matches!(result, Err(RagError::Embedding(_))));
    }
}
