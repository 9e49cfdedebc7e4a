// ============================================
// VECTORDB CHAT - LOCAL RAG PIPELINE
// Chunk, embed and index documents per collection,
// then answer questions grounded in what was retrieved
// ============================================

pub mod app;
pub mod chat;
pub mod config;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod rag;

pub use app::App;
pub use chat::{ChatPipeline, ChatReply, Conversation, StreamingReply, NO_CONTEXT_REPLY};
pub use config::Config;
pub use embedding::{Embedder, EmbeddingBackend};
pub use error::{RagError, RagResult};
pub use rag::{CollectionStore, Retrieval, Retriever};
