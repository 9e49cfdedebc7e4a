// ============================================
// CONFIG - JSON settings with env overrides
// Lives at ~/.vectordb-chat/config.json by default
// ============================================

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{RagError, RagResult};
use crate::rag::ChunkStrategy;

pub const ENV_STORAGE: &str = "VECTORDB_CHAT_STORAGE";
pub const ENV_OLLAMA_URL: &str = "VECTORDB_CHAT_OLLAMA_URL";
pub const ENV_MODEL: &str = "VECTORDB_CHAT_MODEL";

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub storage_dir: PathBuf,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkingConfig {
    pub size: usize,
    pub overlap: usize,
    pub strategy: ChunkStrategy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    Ollama,
    Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub model: String,
    pub base_url: String,
    /// Expected width. Required for `hash`; checked against the model for `ollama`.
    pub dimension: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Results scoring below this are dropped before the global top-k cut. `None` keeps all.
    pub min_score: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
    /// Prior conversation messages sent along with each question.
    pub history_window: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_home().join("storage"),
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            generation: GenerationConfig::default(),
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { size: 500, overlap: 50, strategy: ChunkStrategy::Words }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Ollama,
            model: "all-minilm".into(),
            base_url: DEFAULT_OLLAMA_URL.into(),
            dimension: None,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 4, min_score: Some(0.4) }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_URL.into(),
            model: "deepseek-coder:6.7b".into(),
            temperature: 0.7,
            timeout_secs: 300,
            history_window: 4,
        }
    }
}

/// Returns `~/.vectordb-chat`, or a relative `.vectordb-chat` when there is no home directory.
fn default_home() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".vectordb-chat"))
        .unwrap_or_else(|| PathBuf::from(".vectordb-chat"))
}

impl Config {
    pub fn default_path() -> PathBuf {
        default_home().join("config.json")
    }

    /// Load from `path` (or the default location), apply env overrides and validate.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> RagResult<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| RagError::InvalidConfig(format!("Failed to read {}: {e}", path.display())))?;
            serde_json::from_str(&content)
                .map_err(|e| RagError::InvalidConfig(format!("Failed to parse {}: {e}", path.display())))?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = var(ENV_STORAGE).filter(|s| !s.is_empty()) {
            self.storage_dir = PathBuf::from(dir);
        }
        if let Some(url) = var(ENV_OLLAMA_URL).filter(|s| !s.is_empty()) {
            self.embedding.base_url = url.clone();
            self.generation.base_url = url;
        }
        if let Some(model) = var(ENV_MODEL).filter(|s| !s.is_empty()) {
            self.generation.model = model;
        }
    }

    pub fn validate(&self) -> RagResult<()> {
        if self.chunking.size == 0 {
            return Err(RagError::InvalidConfig("chunking.size must be at least 1".into()));
        }
        if self.chunking.overlap >= self.chunking.size {
            return Err(RagError::InvalidConfig(format!(
                "chunking.overlap ({}) must be smaller than chunking.size ({})",
                self.chunking.overlap, self.chunking.size
            )));
        }
        if self.retrieval.top_k == 0 {
            return Err(RagError::InvalidConfig("retrieval.top_k must be at least 1".into()));
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(RagError::InvalidConfig(format!(
                "generation.temperature must be within [0, 2], got {}",
                self.generation.temperature
            )));
        }
        if self.embedding.provider == EmbeddingProvider::Hash && self.embedding.dimension.unwrap_or(0) == 0 {
            return Err(RagError::InvalidConfig("embedding.dimension is required for the hash provider".into()));
        }
        Ok(())
    }
}
