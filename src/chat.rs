use serde::Serialize;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{RagError, RagResult};
use crate::llm::prompt::build_messages;
use crate::llm::{ChatMessage, Generator, TokenStream};
use crate::rag::{Retrieval, Retriever};

pub const NO_CONTEXT_REPLY: &str = "I couldn't find relevant information in the selected documents.";

/// Messages exchanged so far, oldest first.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn record(&mut self, question: &str, answer: &str) {
        self.messages.push(ChatMessage::user(question));
        self.messages.push(ChatMessage::assistant(answer));
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[derive(Debug)]
pub enum ChatReply {
    Answered { answer: String, retrieval: Retrieval },
    /// Retrieval found nothing; the model was not asked.
    NoContext { retrieval: Retrieval },
    /// The model could not be reached. Retrying later may work.
    Unavailable { reason: String, retrieval: Retrieval },
}

impl ChatReply {
    /// What to show the user.
    pub fn text(&self) -> &str {
        match self {
            ChatReply::Answered { answer, .. } => answer,
            ChatReply::NoContext { .. } => NO_CONTEXT_REPLY,
            ChatReply::Unavailable { reason, .. } => reason,
        }
    }

    pub fn retrieval(&self) -> &Retrieval {
        match self {
            ChatReply::Answered { retrieval, .. }
            | ChatReply::NoContext { retrieval }
            | ChatReply::Unavailable { retrieval, .. } => retrieval,
        }
    }
}

pub enum StreamingReply {
    /// Tokens of the answer. Record the finished answer with [`Conversation::record`].
    Streaming { tokens: TokenStream, retrieval: Retrieval },
    NoContext { retrieval: Retrieval },
    Unavailable { reason: String, retrieval: Retrieval },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChatSettings {
    pub top_k: usize,
    pub temperature: f32,
    pub history_window: usize,
}

impl From<&Config> for ChatSettings {
    fn from(config: &Config) -> Self {
        Self {
            top_k: config.retrieval.top_k,
            temperature: config.generation.temperature,
            history_window: config.generation.history_window,
        }
    }
}

/// Retrieval followed by grounded generation.
pub struct ChatPipeline {
    retriever: Arc<Retriever>,
    generator: Arc<dyn Generator>,
    settings: ChatSettings,
}

impl ChatPipeline {
    pub fn new(retriever: Arc<Retriever>, generator: Arc<dyn Generator>, settings: ChatSettings) -> Self {
        Self { retriever, generator, settings }
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    pub fn generator(&self) -> &Arc<dyn Generator> {
        &self.generator
    }

    /// Answer `question` from `collections`. The exchange is added to `conversation`
    /// unless the model was unavailable.
    pub async fn ask(
        &self,
        question: &str,
        collections: &[String],
        conversation: &mut Conversation,
    ) -> RagResult<ChatReply> {
        let retrieval = self.retriever.retrieve(question, collections, self.settings.top_k).await?;
        if retrieval.is_empty() {
            conversation.record(question, NO_CONTEXT_REPLY);
            return Ok(ChatReply::NoContext { retrieval });
        }

        let messages = self.messages_for(question, &retrieval, conversation);
        match self.generator.chat(&messages, self.settings.temperature).await {
            Ok(answer) => {
                conversation.record(question, &answer);
                Ok(ChatReply::Answered { answer, retrieval })
            }
            Err(RagError::CollaboratorUnavailable(reason)) => {
                tracing::warn!(model = self.generator.model(), %reason, "generation unavailable");
                Ok(ChatReply::Unavailable { reason, retrieval })
            }
            Err(e) => Err(e),
        }
    }

    /// Like [`ChatPipeline::ask`] but hands back the answer as a token stream.
    pub async fn ask_streaming(
        &self,
        question: &str,
        collections: &[String],
        conversation: &Conversation,
    ) -> RagResult<StreamingReply> {
        let retrieval = self.retriever.retrieve(question, collections, self.settings.top_k).await?;
        if retrieval.is_empty() {
            return Ok(StreamingReply::NoContext { retrieval });
        }

        let messages = self.messages_for(question, &retrieval, conversation);
        match self.generator.chat_stream(&messages, self.settings.temperature).await {
            Ok(tokens) => Ok(StreamingReply::Streaming { tokens, retrieval }),
            Err(RagError::CollaboratorUnavailable(reason)) => {
                tracing::warn!(model = self.generator.model(), %reason, "generation unavailable");
                Ok(StreamingReply::Unavailable { reason, retrieval })
            }
            Err(e) => Err(e),
        }
    }

    fn messages_for(&self, question: &str, retrieval: &Retrieval, conversation: &Conversation) -> Vec<ChatMessage> {
        build_messages(question, &retrieval.hits, conversation.messages(), self.settings.history_window)
    }
}
