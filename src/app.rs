use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::chat::{ChatPipeline, ChatSettings};
use crate::config::Config;
use crate::embedding::{build_backend, Embedder};
use crate::error::{RagError, RagResult};
use crate::ingest::{ingest_bytes, ingest_folder, IngestReport, DEFAULT_PATTERNS};
use crate::llm::{Generator, OllamaClient};
use crate::rag::{CollectionStore, Retriever};

/// Everything a session needs, built once at startup and passed by reference.
pub struct App {
    pub config: Config,
    pub store: Arc<CollectionStore>,
    pub retriever: Arc<Retriever>,
    pub chat: ChatPipeline,
}

impl App {
    /// Probe the embedding model, open the store and connect to the chat model.
    pub async fn init(config: Config) -> RagResult<Self> {
        config.validate()?;
        let backend = build_backend(&config.embedding, config.generation.timeout_secs).await?;
        let generation = &config.generation;
        let generator = OllamaClient::connect(&generation.base_url, &generation.model, generation.timeout_secs).await?;
        Self::with_parts(config, Embedder::new(backend), Arc::new(generator))
    }

    /// Assemble from an already-built embedder and generator.
    pub fn with_parts(config: Config, embedder: Embedder, generator: Arc<dyn Generator>) -> RagResult<Self> {
        let store = Arc::new(CollectionStore::open(&config.storage_dir, embedder)?);
        let retriever = Arc::new(Retriever::new(store.clone(), config.retrieval.min_score));
        let chat = ChatPipeline::new(retriever.clone(), generator, ChatSettings::from(&config));
        Ok(Self { config, store, retriever, chat })
    }

    /// Ingest files and folders into `collection`. Folders are scanned with the
    /// default patterns. Returns one report per stored file.
    pub async fn ingest_paths(&self, collection: &str, paths: &[PathBuf]) -> RagResult<Vec<IngestReport>> {
        if self.store.info(collection).is_none() {
            return Err(RagError::NotFound(collection.to_string()));
        }
        let chunking = &self.config.chunking;
        let mut reports = Vec::new();
        for path in paths {
            if path.is_dir() {
                reports.extend(ingest_folder(&self.store, collection, path, DEFAULT_PATTERNS, chunking).await?);
                continue;
            }
            let bytes = std::fs::read(path)
                .map_err(|e| RagError::Validation(format!("Failed to read {}: {e}", path.display())))?;
            let name = display_name(path);
            let chunks = ingest_bytes(&self.store, collection, &bytes, &name, chunking).await?;
            reports.push(IngestReport { file: name, chunks });
        }
        Ok(reports)
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatReply, Conversation};
    use crate::embedding::HashEmbeddings;
    use crate::llm::{ChatMessage, TokenStream};
    use tempfile::TempDir;

    struct EchoGenerator;

    #[async_trait::async_trait]
    impl Generator for EchoGenerator {
        fn model(&self) -> &str {
            "echo"
        }

        async fn chat(&self, messages: &[ChatMessage], _temperature: f32) -> RagResult<String> {
            Ok(messages.last().map(|m| m.content.clone()).unwrap_or_default())
        }

        async fn chat_stream(&self, _messages: &[ChatMessage], _temperature: f32) -> RagResult<TokenStream> {
            Err(RagError::CollaboratorUnavailable("streaming disabled".into()))
        }
    }

    fn test_app(dir: &Path) -> App {
        let config = Config { storage_dir: dir.join("storage"), ..Config::default() };
        let embedder = Embedder::new(Arc::new(HashEmbeddings::new(128).unwrap()));
        App::with_parts(config, embedder, Arc::new(EchoGenerator)).unwrap()
    }

    #[tokio::test]
    async fn test_ingest_paths_and_ask() {
        let dir = TempDir::new().unwrap();
        let app = test_app(dir.path());
        let file = dir.path().join("guide.md");
        std::fs::write(&file, "Cargo workspaces share one lockfile across member crates.").unwrap();

        app.store.create("Guide").await.unwrap();
        let reports = app.ingest_paths("guide", &[file]).await.unwrap();
        assert_eq!(reports, vec![IngestReport { file: "guide.md".into(), chunks: 1 }]);

        let mut conversation = Conversation::new();
        let reply = app
            .chat
            .ask("cargo workspaces lockfile", &["Guide".to_string()], &mut conversation)
            .await
            .unwrap();
        assert!(matches!(reply, ChatReply::Answered { .. }));
        assert!(reply.text().contains("Cargo workspaces share one lockfile"));
    }

    #[tokio::test]
    async fn test_ingest_into_missing_collection() {
        let dir = TempDir::new().unwrap();
        let app = test_app(dir.path());
        let err = app.ingest_paths("nope", &[dir.path().to_path_buf()]).await.unwrap_err();
        assert!(matches!(err, RagError::NotFound(_)));
    }
}
