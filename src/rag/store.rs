use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::embedding::{clean_texts, Embedder};
use crate::error::{RagError, RagResult};

use super::index::{ensure_private_dir, CollectionData, CollectionFiles};
use super::registry::{
    artifact_locations, normalize_key, now_iso, CollectionMeta, Registry, INDEX_DIR, REGISTRY_FILE,
};
use super::search::SearchResult;

/// Result of reloading one collection's artifacts from disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyReport {
    pub vectors: usize,
    pub chunks: usize,
    pub consistent: bool,
}

/// Named collections under one storage root.
///
/// Each collection is a vector index plus the chunk texts it was built from,
/// joined by position. Writers (`create`, `add`, `delete`) hold the key's lock
/// exclusively and readers (`search`, `chunks`, `verify`) share it; the same
/// discipline is repeated with `fs2` lock files so a second process sees it too.
/// The registry is rewritten last, after the collection files are in place.
pub struct CollectionStore {
    root: PathBuf,
    registry_path: PathBuf,
    registry: Mutex<Registry>,
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
    embedder: Embedder,
    faults: AtomicU64,
}

impl CollectionStore {
    /// Open (or initialize) the storage root and reload the registry.
    pub fn open(root: impl Into<PathBuf>, embedder: Embedder) -> RagResult<Self> {
        let root = root.into();
        ensure_private_dir(&root)?;
        ensure_private_dir(&root.join(INDEX_DIR))?;
        let registry_path = root.join(REGISTRY_FILE);
        let registry = Registry::load(&registry_path)?;
        tracing::info!(root = %root.display(), collections = registry.len(), "collection store opened");

        Ok(Self {
            root,
            registry_path,
            registry: Mutex::new(registry),
            locks: Mutex::new(HashMap::new()),
            embedder,
            faults: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    /// Number of consistency faults observed since the store was opened.
    pub fn consistency_faults(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }

    // Entries nobody else holds are dropped; a waiter or guard always owns a clone.
    fn key_lock(&self, key: &str) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(key.to_string()).or_default().clone()
    }

    fn files_for(&self, meta: &CollectionMeta) -> CollectionFiles {
        CollectionFiles::new(self.root.join(&meta.index_location), self.root.join(&meta.chunks_location))
    }

    fn meta(&self, key: &str) -> RagResult<CollectionMeta> {
        self.registry
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| RagError::NotFound(key.to_string()))
    }

    fn record_fault(&self, key: &str, detail: &str) {
        let total = self.faults.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::warn!(collection = key, faults = total, "consistency fault: {detail}");
    }

    /// Apply `update` to a copy of the registry, persist it, then publish it.
    /// On a failed save the cached registry is left as it was.
    fn update_registry<T>(&self, update: impl FnOnce(&mut Registry) -> T) -> RagResult<T> {
        let mut current = self.registry.lock();
        let mut next = current.clone();
        let out = update(&mut next);
        next.save(&self.registry_path)?;
        *current = next;
        Ok(out)
    }

    fn recover_if_needed(&self, files: &CollectionFiles) -> RagResult<()> {
        if files.needs_recovery() {
            let _flock = files.lock_exclusive()?;
            if files.recover()? {
                tracing::warn!(index = %files.index_path.display(), "recovered interrupted collection write");
            }
        }
        Ok(())
    }

    fn load_shared(&self, files: &CollectionFiles) -> RagResult<CollectionData> {
        self.recover_if_needed(files)?;
        let _flock = files.lock_shared()?;
        files.load()
    }

    /// Register a new, empty collection. Returns `false` if the name is taken.
    pub async fn create(&self, display_name: &str) -> RagResult<bool> {
        let key = normalize_key(display_name);
        if key.is_empty() {
            return Err(RagError::Validation("collection name cannot be empty".into()));
        }
        let lock = self.key_lock(&key);
        let _guard = lock.write().await;

        let exists = self.registry.lock().contains(&key);
        if exists {
            tracing::debug!(collection = %key, "collection already exists");
            return Ok(false);
        }

        let dims = self.embedder.dimension();
        let (index_location, chunks_location) = artifact_locations(&key);
        let now = now_iso();
        let meta = CollectionMeta {
            display_name: display_name.trim().to_string(),
            index_location,
            chunks_location,
            chunk_count: 0,
            dimension: dims,
            embedding_model: self.embedder.model_name().to_string(),
            created_at: now.clone(),
            updated_at: now,
        };

        let files = self.files_for(&meta);
        {
            let _flock = files.lock_exclusive()?;
            files.commit(&CollectionData::empty(dims))?;
        }

        if let Err(e) = self.update_registry(|r| r.insert(key.clone(), meta)) {
            let _ = files.remove();
            return Err(e);
        }
        tracing::info!(collection = %key, dimension = dims, "collection created");
        Ok(true)
    }

    /// Embed and append chunks. Returns how many were stored; blank chunks are skipped.
    pub async fn add(&self, name: &str, chunks: &[String]) -> RagResult<usize> {
        let key = normalize_key(name);
        let lock = self.key_lock(&key);
        let _guard = lock.write().await;

        let meta = self.meta(&key)?;
        let chunks = clean_texts(chunks);
        if chunks.is_empty() {
            return Ok(0);
        }
        let dims = self.embedder.dimension();
        if meta.dimension != 0 && meta.dimension != dims {
            return Err(RagError::DimensionMismatch { expected: meta.dimension, actual: dims });
        }

        let vectors = self.embedder.embed_batch(&chunks).await?;
        if vectors.len() != chunks.len() {
            return Err(RagError::Embedding(format!(
                "got {} embeddings for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }

        // No awaits past this point while the file lock is held.
        let files = self.files_for(&meta);
        let _flock = files.lock_exclusive()?;
        if files.recover()? {
            tracing::warn!(collection = %key, "recovered interrupted collection write");
        }
        let mut data = files.load()?;
        if !data.is_aligned() {
            let detail = format!("{} vectors vs {} chunks", data.index.len(), data.chunks.len());
            self.record_fault(&key, &detail);
            return Err(RagError::Consistency(format!("collection '{key}' is misaligned ({detail})")));
        }

        let previous_len = data.chunks.len();
        data.index.append(&vectors)?;
        data.chunks.extend(chunks);
        files.commit(&data)?;

        let total = data.chunks.len();
        let recorded = self.update_registry(|r| {
            if let Some(entry) = r.get_mut(&key) {
                entry.chunk_count = total;
                entry.updated_at = now_iso();
            }
        });
        if let Err(e) = recorded {
            data.truncate(previous_len);
            if let Err(undo) = files.commit(&data) {
                tracing::warn!(collection = %key, error = %undo, "failed to roll back chunk append");
            }
            return Err(e);
        }

        let added = total - previous_len;
        tracing::info!(collection = %key, added, total, "chunks added");
        Ok(added)
    }

    /// Nearest chunks to `query`, best first. At most `min(top_k, chunk_count)` results.
    pub async fn search(&self, name: &str, query: &[f32], top_k: usize) -> RagResult<Vec<SearchResult>> {
        let key = normalize_key(name);
        let lock = self.key_lock(&key);
        let _guard = lock.read().await;

        let meta = self.meta(&key)?;
        let data = self.load_shared(&self.files_for(&meta))?;
        if query.len() != data.index.dims() {
            return Err(RagError::DimensionMismatch { expected: data.index.dims(), actual: query.len() });
        }
        if data.chunks.is_empty() {
            return Ok(Vec::new());
        }
        if !data.is_aligned() {
            let detail = format!("{} vectors vs {} chunks", data.index.len(), data.chunks.len());
            self.record_fault(&key, &detail);
        }

        let k = top_k.min(data.chunks.len());
        let (scores, positions) = data.index.search(query, k)?;
        let mut results = Vec::with_capacity(positions.len());
        for (score, position) in scores.into_iter().zip(positions) {
            match data.chunks.get(position) {
                Some(text) => results.push(SearchResult { position, text: text.clone(), score }),
                None => self.record_fault(
                    &key,
                    &format!("position {position} outside {} chunks", data.chunks.len()),
                ),
            }
        }
        tracing::debug!(collection = %key, requested = top_k, returned = results.len(), "search");
        Ok(results)
    }

    /// Remove a collection. `Ok(false)` if it was not registered.
    ///
    /// The registry entry goes first, so a failed registry save leaves the collection
    /// intact. Files that then fail to be removed are reported but stay unregistered;
    /// a later `create` of the same name overwrites them.
    pub async fn delete(&self, name: &str) -> RagResult<bool> {
        let key = normalize_key(name);
        let lock = self.key_lock(&key);
        let _guard = lock.write().await;

        let meta = match self.registry.lock().get(&key).cloned() {
            Some(meta) => meta,
            None => return Ok(false),
        };

        self.update_registry(|r| r.remove(&key))?;

        let files = self.files_for(&meta);
        let removal = match files.lock_exclusive() {
            Ok(_flock) => files.remove(),
            Err(e) => {
                tracing::warn!(collection = %key, error = %e, "removing collection files without a lock");
                files.remove()
            }
        };
        match removal {
            Ok(()) => {
                tracing::info!(collection = %key, "collection deleted");
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(collection = %key, error = %e, "collection unregistered with leftover files");
                Err(e)
            }
        }
    }

    /// Display names, ordered by key.
    pub fn list(&self) -> Vec<String> {
        self.registry.lock().iter().map(|(_, meta)| meta.display_name.clone()).collect()
    }

    pub fn info(&self, name: &str) -> Option<CollectionMeta> {
        self.registry.lock().get(&normalize_key(name)).cloned()
    }

    /// Stored chunk texts in index order.
    pub async fn chunks(&self, name: &str) -> RagResult<Vec<String>> {
        let key = normalize_key(name);
        let lock = self.key_lock(&key);
        let _guard = lock.read().await;
        let meta = self.meta(&key)?;
        Ok(self.load_shared(&self.files_for(&meta))?.chunks)
    }

    /// Reload both artifacts and compare their lengths.
    pub async fn verify(&self, name: &str) -> RagResult<ConsistencyReport> {
        let key = normalize_key(name);
        let lock = self.key_lock(&key);
        let _guard = lock.read().await;
        let meta = self.meta(&key)?;
        let data = self.load_shared(&self.files_for(&meta))?;

        let report = ConsistencyReport {
            vectors: data.index.len(),
            chunks: data.chunks.len(),
            consistent: data.is_aligned(),
        };
        if !report.consistent {
            self.record_fault(&key, &format!("{} vectors vs {} chunks", report.vectors, report.chunks));
        }
        Ok(report)
    }
}
