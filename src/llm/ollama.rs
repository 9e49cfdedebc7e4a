use futures_util::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

use super::{ChatMessage, Generator, TokenStream};
use crate::error::{RagError, RagResult};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

/// One `/api/chat` reply object, or one NDJSON line of a streamed reply.
#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ResponseMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

/// Chat client for a local Ollama server.
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str, timeout_secs: u64) -> RagResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| RagError::InvalidConfig(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    /// Build the client and check the server's installed models.
    ///
    /// A missing model is replaced by the first installed one. An unreachable
    /// server is only logged; requests will report it when they are made.
    pub async fn connect(base_url: &str, model: &str, timeout_secs: u64) -> RagResult<Self> {
        let mut client = Self::new(base_url, model, timeout_secs)?;
        match client.list_models().await {
            Ok(installed) => client.select_model(&installed),
            Err(e) => tracing::warn!(url = %client.base_url, error = %e, "could not reach Ollama"),
        }
        Ok(client)
    }

    fn select_model(&mut self, installed: &[String]) {
        if installed.iter().any(|m| m == &self.model) {
            tracing::info!(model = %self.model, "connected to Ollama");
            return;
        }
        tracing::warn!(model = %self.model, available = ?installed, "model not installed");
        if let Some(first) = installed.first() {
            self.model = first.clone();
            tracing::info!(model = %self.model, "falling back to installed model");
        }
    }

    pub async fn list_models(&self) -> RagResult<Vec<String>> {
        let resp = self.client.get(format!("{}/api/tags", self.base_url)).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RagError::CollaboratorUnavailable(format!("Ollama tags error {status}")));
        }
        let tags: TagsResponse = resp
            .json()
            .await
            .map_err(|e| RagError::CollaboratorUnavailable(format!("invalid tags response: {e}")))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    async fn post_chat(&self, messages: &[ChatMessage], temperature: f32, stream: bool) -> RagResult<reqwest::Response> {
        let body = ChatRequest { model: &self.model, messages, stream, options: ChatOptions { temperature } };
        let resp = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(RagError::CollaboratorUnavailable(format!("Ollama API error {status}: {text}")));
        }
        Ok(resp)
    }
}

#[async_trait::async_trait]
impl Generator for OllamaClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, messages: &[ChatMessage], temperature: f32) -> RagResult<String> {
        let resp = self.post_chat(messages, temperature, false).await?;
        let chunk: ChatChunk = resp
            .json()
            .await
            .map_err(|e| RagError::CollaboratorUnavailable(format!("invalid chat response: {e}")))?;
        if let Some(error) = chunk.error {
            return Err(RagError::CollaboratorUnavailable(error));
        }
        Ok(chunk.message.unwrap_or_default().content.trim().to_string())
    }

    async fn chat_stream(&self, messages: &[ChatMessage], temperature: f32) -> RagResult<TokenStream> {
        let resp = self.post_chat(messages, temperature, true).await?;
        let body: BoxStream<'static, reqwest::Result<Vec<u8>>> =
            resp.bytes_stream().map(|chunk| chunk.map(|b| b.to_vec())).boxed();

        let state = StreamState { body, lines: NdjsonTokens::default(), pending: VecDeque::new(), finished: false };
        let tokens = stream::unfold(state, |mut st| async move {
            loop {
                if let Some(token) = st.pending.pop_front() {
                    return Some((Ok(token), st));
                }
                if st.finished {
                    return None;
                }
                let decoded = match st.body.next().await {
                    Some(Ok(bytes)) => st.lines.feed(&bytes),
                    Some(Err(e)) => Err(RagError::from(e)),
                    None => {
                        st.finished = true;
                        st.lines.finish()
                    }
                };
                match decoded {
                    Ok(tokens) => st.pending.extend(tokens),
                    Err(e) => {
                        st.finished = true;
                        return Some((Err(e), st));
                    }
                }
                if st.lines.is_done() {
                    st.finished = true;
                }
            }
        });
        Ok(tokens.boxed())
    }
}

struct StreamState {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    lines: NdjsonTokens,
    pending: VecDeque<String>,
    finished: bool,
}

/// Splits a streamed `/api/chat` body into answer tokens.
#[derive(Debug, Default)]
struct NdjsonTokens {
    buffer: Vec<u8>,
    done: bool,
}

impl NdjsonTokens {
    fn is_done(&self) -> bool {
        self.done
    }

    /// Consume bytes and return the tokens of every complete line. Lines after `done` are ignored.
    fn feed(&mut self, bytes: &[u8]) -> RagResult<Vec<String>> {
        self.buffer.extend_from_slice(bytes);
        let mut tokens = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if !self.done {
                self.decode_line(&line, &mut tokens)?;
            }
        }
        Ok(tokens)
    }

    /// Flush a final line that had no trailing newline.
    fn finish(&mut self) -> RagResult<Vec<String>> {
        let rest = std::mem::take(&mut self.buffer);
        let mut tokens = Vec::new();
        if !self.done {
            self.decode_line(&rest, &mut tokens)?;
        }
        Ok(tokens)
    }

    fn decode_line(&mut self, line: &[u8], tokens: &mut Vec<String>) -> RagResult<()> {
        let line = String::from_utf8_lossy(line);
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }
        let chunk: ChatChunk = serde_json::from_str(line)
            .map_err(|e| RagError::CollaboratorUnavailable(format!("invalid stream line: {e}")))?;
        if let Some(error) = chunk.error {
            return Err(RagError::CollaboratorUnavailable(error));
        }
        if let Some(message) = chunk.message {
            if !message.content.is_empty() {
                tokens.push(message.content);
            }
        }
        self.done = chunk.done;
        Ok(())
    }
}
