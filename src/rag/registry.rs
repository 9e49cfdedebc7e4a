use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{RagError, RagResult};

use super::index::write_atomic;

pub const REGISTRY_FILE: &str = "registry.json";
pub const INDEX_DIR: &str = "indices";

/// Registry entry for one collection. Locations are relative to the storage root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionMeta {
    pub display_name: String,
    pub index_location: PathBuf,
    pub chunks_location: PathBuf,
    pub chunk_count: usize,
    #[serde(default)]
    pub dimension: usize,
    #[serde(default)]
    pub embedding_model: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

/// Durable map of collection key → metadata, rewritten in full on every change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Registry {
    entries: BTreeMap<String, CollectionMeta>,
}

impl Registry {
    /// A missing file is an empty registry. An unreadable one is an error: treating it
    /// as empty would drop every collection on the next save.
    pub fn load(path: &Path) -> RagResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| RagError::Storage(format!("Failed to read registry: {e}")))?;
        serde_json::from_str(&content)
            .map_err(|e| RagError::Storage(format!("Failed to parse registry: {e}")))
    }

    pub fn save(&self, path: &Path) -> RagResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        write_atomic(path, json.as_bytes())
    }

    pub fn get(&self, key: &str) -> Option<&CollectionMeta> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut CollectionMeta> {
        self.entries.get_mut(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&mut self, key: String, meta: CollectionMeta) {
        self.entries.insert(key, meta);
    }

    pub fn remove(&mut self, key: &str) -> Option<CollectionMeta> {
        self.entries.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CollectionMeta)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Collection identity: trimmed, lower-cased display name.
pub fn normalize_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Filesystem-safe, collision-free stem for a key's artifacts.
pub fn file_stem(key: &str) -> String {
    let slug: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(48)
        .collect();
    let digest = Sha256::digest(key.as_bytes());
    let hash: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
    format!("{slug}-{hash}")
}

/// Relative (index, chunks) locations for a key.
pub fn artifact_locations(key: &str) -> (PathBuf, PathBuf) {
    let stem = file_stem(key);
    let dir = Path::new(INDEX_DIR);
    (dir.join(format!("{stem}.index")), dir.join(format!("{stem}_chunks.json")))
}

pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
