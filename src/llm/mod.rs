//! Answer generation by a chat model.
//!
//! [`Generator`] is the seam between the RAG pipeline and whatever serves the
//! model; [`OllamaClient`] talks to a local Ollama server.

use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::RagResult;

pub mod ollama;
pub mod prompt;

pub use ollama::OllamaClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Incremental answer tokens. An `Err` item ends the answer early.
pub type TokenStream = BoxStream<'static, RagResult<String>>;

#[async_trait::async_trait]
pub trait Generator: Send + Sync {
    fn model(&self) -> &str;

    /// Complete answer in one response.
    async fn chat(&self, messages: &[ChatMessage], temperature: f32) -> RagResult<String>;

    /// Answer as it is generated. Dropping the stream abandons the request.
    async fn chat_stream(&self, messages: &[ChatMessage], temperature: f32) -> RagResult<TokenStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_wire_format() {
        let json = serde_json::to_value(ChatMessage::assistant("hi")).unwrap();
        assert_eq!(json, serde_json::json!({ "role": "assistant", "content": "hi" }));

        let parsed: ChatMessage = serde_json::from_str(r#"{"role":"system","content":"rules"}"#).unwrap();
        assert_eq!(parsed, ChatMessage::system("rules"));
    }
}
