use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{RagError, RagResult};

use super::search::top_k;

const VECTORS_MAGIC: u32 = 0x52414756; // "RAGV"
const VECTORS_VERSION: u32 = 1;
const HEADER_LEN: usize = 16;

/// Flat inner-product index: row-major unit vectors in insertion order.
///
/// Positions are the only link to the chunk list, so rows are never reordered
/// or removed.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dims: usize,
    data: Vec<f32>,
}

impl VectorIndex {
    pub fn new(dims: usize) -> Self {
        Self { dims, data: Vec::new() }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        if self.dims == 0 { 0 } else { self.data.len() / self.dims }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dims)?;
        self.data.get(start..start + self.dims)
    }

    /// Append vectors. Either all rows are added or none are.
    pub fn append(&mut self, vectors: &[Vec<f32>]) -> RagResult<()> {
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dims) {
            return Err(RagError::DimensionMismatch { expected: self.dims, actual: bad.len() });
        }
        self.data.reserve(vectors.len() * self.dims);
        for v in vectors {
            self.data.extend_from_slice(v);
        }
        Ok(())
    }

    fn truncate(&mut self, len: usize) {
        self.data.truncate(len * self.dims);
    }

    /// Nearest-neighbour search. Returns `(scores, positions)`, best first.
    pub fn search(&self, query: &[f32], k: usize) -> RagResult<(Vec<f32>, Vec<usize>)> {
        if query.len() != self.dims {
            return Err(RagError::DimensionMismatch { expected: self.dims, actual: query.len() });
        }
        Ok(top_k(query, &self.data, self.dims, k).into_iter().unzip())
    }

    /// vectors.bin layout: magic(u32) + version(u32) + dims(u32) + count(u32) + f32[], all LE.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.data.len() * 4);
        out.extend_from_slice(&VECTORS_MAGIC.to_le_bytes());
        out.extend_from_slice(&VECTORS_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.dims as u32).to_le_bytes());
        out.extend_from_slice(&(self.len() as u32).to_le_bytes());
        for val in &self.data {
            out.extend_from_slice(&val.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> RagResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(RagError::Storage("vector index too small (no header)".into()));
        }
        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);

        let magic = word(0);
        let version = word(4);
        let dims = word(8) as usize;
        let count = word(12) as usize;

        if magic != VECTORS_MAGIC {
            return Err(RagError::Storage(format!(
                "Invalid vector index magic: {magic:#X} (expected {VECTORS_MAGIC:#X})"
            )));
        }
        if version != VECTORS_VERSION {
            return Err(RagError::Storage(format!("Unsupported vector index version: {version}")));
        }
        let expected_len = HEADER_LEN + dims * count * 4;
        if bytes.len() != expected_len {
            return Err(RagError::Storage(format!(
                "vector index size mismatch: got {}, expected {expected_len} (dims={dims}, count={count})",
                bytes.len()
            )));
        }

        let data = bytes[HEADER_LEN..]
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(Self { dims, data })
    }

    pub fn load(path: &Path) -> RagResult<Self> {
        let file = File::open(path)
            .map_err(|e| RagError::Storage(format!("Failed to open {}: {e}", path.display())))?;
        let file_len = file.metadata()?.len() as usize;
        if file_len < HEADER_LEN {
            return Err(RagError::Storage(format!("{} too small (no header)", path.display())));
        }
        let mmap = unsafe {
            memmap2::MmapOptions::new()
                .map(&file)
                .map_err(|e| RagError::Storage(format!("Failed to mmap {}: {e}", path.display())))?
        };
        Self::from_bytes(&mmap)
    }

    pub fn save(&self, path: &Path) -> RagResult<()> {
        write_atomic(path, &self.to_bytes())
    }
}

pub fn read_chunks(path: &Path) -> RagResult<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| RagError::Storage(format!("Failed to read {}: {e}", path.display())))?;
    serde_json::from_str(&content)
        .map_err(|e| RagError::Storage(format!("Failed to parse {}: {e}", path.display())))
}

pub fn write_chunks(path: &Path, chunks: &[String]) -> RagResult<()> {
    let json = serde_json::to_string_pretty(chunks)?;
    write_atomic(path, json.as_bytes())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp-{}", uuid::Uuid::new_v4()))
}

fn backup_of(path: &Path) -> PathBuf {
    let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    path.with_file_name(format!("{name}.bak"))
}

fn write_temp(path: &Path, bytes: &[u8]) -> RagResult<PathBuf> {
    let temp = temp_sibling(path);
    let result = (|| -> std::io::Result<()> {
        let mut file = File::create(&temp)?;
        file.write_all(bytes)?;
        file.sync_all()
    })();
    match result {
        Ok(()) => {
            set_private(&temp);
            Ok(temp)
        }
        Err(e) => {
            let _ = std::fs::remove_file(&temp);
            Err(RagError::Storage(format!("Failed to write {}: {e}", path.display())))
        }
    }
}

/// Write to a temp sibling, then rename into place.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> RagResult<()> {
    let temp = write_temp(path, bytes)?;
    std::fs::rename(&temp, path).map_err(|e| {
        let _ = std::fs::remove_file(&temp);
        RagError::Storage(format!("Failed to move {} into place: {e}", path.display()))
    })
}

pub fn ensure_private_dir(dir: &Path) -> RagResult<()> {
    std::fs::create_dir_all(dir)
        .map_err(|e| RagError::Storage(format!("Failed to create {}: {e}", dir.display())))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700));
    }
    Ok(())
}

fn set_private(_path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(_path, std::fs::Permissions::from_mode(0o600));
    }
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Held file lock; released when dropped.
pub struct FileLock {
    file: File,
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

/// The persisted vectors and chunk texts of one collection, loaded together.
#[derive(Debug, Clone)]
pub struct CollectionData {
    pub index: VectorIndex,
    pub chunks: Vec<String>,
}

impl CollectionData {
    pub fn empty(dims: usize) -> Self {
        Self { index: VectorIndex::new(dims), chunks: Vec::new() }
    }

    pub fn is_aligned(&self) -> bool {
        self.index.len() == self.chunks.len()
    }

    /// Drop rows past `len`. Only for undoing an append that could not be recorded.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.index.truncate(len);
        self.chunks.truncate(len);
    }
}

/// The on-disk artifacts of one collection.
///
/// The vector index and the chunk list are only ever replaced together through
/// [`CollectionFiles::commit`], which stages both, swaps them in behind `.bak`
/// copies and rolls back if either swap fails. A crash mid-swap is repaired on
/// the next load by restoring the backups.
#[derive(Debug, Clone)]
pub struct CollectionFiles {
    pub index_path: PathBuf,
    pub chunks_path: PathBuf,
    pub lock_path: PathBuf,
}

impl CollectionFiles {
    pub fn new(index_path: PathBuf, chunks_path: PathBuf) -> Self {
        let lock_path = index_path.with_extension("lock");
        Self { index_path, chunks_path, lock_path }
    }

    pub fn lock_exclusive(&self) -> RagResult<FileLock> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| RagError::Storage(format!("Failed to create lock file: {e}")))?;
        fs2::FileExt::lock_exclusive(&file)
            .map_err(|e| RagError::Storage(format!("Failed to acquire lock: {e}")))?;
        Ok(FileLock { file })
    }

    /// Shared lock for reads. No lock file means no writer has ever run.
    pub fn lock_shared(&self) -> RagResult<Option<FileLock>> {
        if !self.lock_path.exists() {
            return Ok(None);
        }
        let file = File::open(&self.lock_path)
            .map_err(|e| RagError::Storage(format!("Failed to open lock file: {e}")))?;
        fs2::FileExt::lock_shared(&file)
            .map_err(|e| RagError::Storage(format!("Failed to acquire shared lock: {e}")))?;
        Ok(Some(FileLock { file }))
    }

    /// Finish or undo a commit interrupted between its renames.
    /// Returns true when something had to be repaired.
    pub fn recover(&self) -> RagResult<bool> {
        let index_bak = backup_of(&self.index_path);
        let chunks_bak = backup_of(&self.chunks_path);
        if !index_bak.exists() && !chunks_bak.exists() {
            return Ok(false);
        }

        if self.index_path.exists() && self.chunks_path.exists() {
            // Both new files landed; only the cleanup was lost.
            remove_if_exists(&index_bak)?;
            remove_if_exists(&chunks_bak)?;
        } else {
            for (bak, path) in [(&index_bak, &self.index_path), (&chunks_bak, &self.chunks_path)] {
                if bak.exists() {
                    std::fs::rename(bak, path)?;
                }
            }
        }
        Ok(true)
    }

    pub fn needs_recovery(&self) -> bool {
        backup_of(&self.index_path).exists() || backup_of(&self.chunks_path).exists()
    }

    /// Load both artifacts. Call [`CollectionFiles::recover`] first under an exclusive lock
    /// if [`CollectionFiles::needs_recovery`] reports leftovers.
    pub fn load(&self) -> RagResult<CollectionData> {
        let index = VectorIndex::load(&self.index_path)?;
        let chunks = read_chunks(&self.chunks_path)?;
        Ok(CollectionData { index, chunks })
    }

    /// Replace both artifacts. On error the previous pair is left in place.
    pub fn commit(&self, data: &CollectionData) -> RagResult<()> {
        if !data.is_aligned() {
            return Err(RagError::Consistency(format!(
                "refusing to persist {} vectors with {} chunks",
                data.index.len(),
                data.chunks.len()
            )));
        }
        if let Some(parent) = self.index_path.parent() {
            ensure_private_dir(parent)?;
        }

        let index_tmp = write_temp(&self.index_path, &data.index.to_bytes())?;
        let chunks_tmp = match serde_json::to_string_pretty(&data.chunks)
            .map_err(RagError::from)
            .and_then(|json| write_temp(&self.chunks_path, json.as_bytes()))
        {
            Ok(p) => p,
            Err(e) => {
                let _ = std::fs::remove_file(&index_tmp);
                return Err(e);
            }
        };

        let index_bak = backup_of(&self.index_path);
        let chunks_bak = backup_of(&self.chunks_path);
        let swap = || -> std::io::Result<()> {
            if self.index_path.exists() {
                std::fs::rename(&self.index_path, &index_bak)?;
            }
            if self.chunks_path.exists() {
                std::fs::rename(&self.chunks_path, &chunks_bak)?;
            }
            std::fs::rename(&chunks_tmp, &self.chunks_path)?;
            std::fs::rename(&index_tmp, &self.index_path)?;
            Ok(())
        };

        if let Err(e) = swap() {
            let _ = std::fs::remove_file(&index_tmp);
            let _ = std::fs::remove_file(&chunks_tmp);
            for (bak, path) in [(&index_bak, &self.index_path), (&chunks_bak, &self.chunks_path)] {
                if bak.exists() {
                    let _ = std::fs::rename(bak, path);
                }
            }
            return Err(RagError::Storage(format!("Failed to swap collection files: {e}")));
        }

        let _ = std::fs::remove_file(&index_bak);
        let _ = std::fs::remove_file(&chunks_bak);
        Ok(())
    }

    /// Remove every artifact. Missing files are fine; the first real failure is reported
    /// after all removals have been attempted.
    pub fn remove(&self) -> RagResult<()> {
        let mut first_err: Option<RagError> = None;
        for path in [
            &self.index_path,
            &self.chunks_path,
            &backup_of(&self.index_path),
            &backup_of(&self.chunks_path),
            &self.lock_path,
        ] {
            if let Err(e) = remove_if_exists(path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove collection file");
                if first_err.is_none() {
                    first_err = Some(RagError::Storage(format!(
                        "Failed to remove {}: {e}",
                        path.display()
                    )));
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::search::normalize;
    use tempfile::TempDir;

    fn make_normalized_vectors(dims: usize, count: usize) -> Vec<Vec<f32>> {
        (0..count)
            .map(|i| {
                let mut v: Vec<f32> = (0..dims).map(|j| (i * dims + j + 1) as f32).collect();
                normalize(&mut v);
                v
            })
            .collect()
    }

    fn files_in(dir: &Path) -> CollectionFiles {
        CollectionFiles::new(dir.join("notes.index"), dir.join("notes_chunks.json"))
    }

    #[test]
    fn test_vectors_bin_format() {
        let mut index = VectorIndex::new(4);
        index.append(&make_normalized_vectors(4, 3)).unwrap();
        let data = index.to_bytes();

        assert_eq!(u32::from_le_bytes(data[0..4].try_into().unwrap()), VECTORS_MAGIC);
        assert_eq!(u32::from_le_bytes(data[4..8].try_into().unwrap()), VECTORS_VERSION);
        assert_eq!(u32::from_le_bytes(data[8..12].try_into().unwrap()), 4);
        assert_eq!(u32::from_le_bytes(data[12..16].try_into().unwrap()), 3);
        assert_eq!(data.len(), 16 + 4 * 3 * 4);
    }

    #[test]
    fn test_save_load_preserves_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("v.index");
        let vectors = make_normalized_vectors(8, 5);
        let mut index = VectorIndex::new(8);
        index.append(&vectors).unwrap();
        index.save(&path).unwrap();

        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded, index);
        assert_eq!(loaded.vector(3).unwrap(), vectors[3].as_slice());
    }

    #[test]
    fn test_empty_index_keeps_dimension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.index");
        VectorIndex::new(384).save(&path).unwrap();

        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded.dims(), 384);
        assert!(loaded.is_empty());
        let (scores, positions) = loaded.search(&vec![0.0; 384], 5).unwrap();
        assert!(scores.is_empty() && positions.is_empty());
    }

    #[test]
    fn test_append_rejects_wrong_dimension() {
        let mut index = VectorIndex::new(4);
        let err = index.append(&[vec![1.0, 0.0, 0.0, 0.0], vec![1.0, 0.0]]).unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { expected: 4, actual: 2 }));
        assert!(index.is_empty(), "partial append must not happen");
    }

    #[test]
    fn test_search_rejects_wrong_query_dimension() {
        let index = VectorIndex::new(768);
        let err = index.search(&vec![0.1; 384], 3).unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { expected: 768, actual: 384 }));
    }

    #[test]
    fn test_bad_magic() {
        let mut data = vec![0u8; 16 + 4 * 4];
        data[0..4].copy_from_slice(&0xDEADBEEFu32.to_le_bytes());
        data[4..8].copy_from_slice(&1u32.to_le_bytes());
        data[8..12].copy_from_slice(&4u32.to_le_bytes());
        data[12..16].copy_from_slice(&1u32.to_le_bytes());
        let err = VectorIndex::from_bytes(&data).unwrap_err();
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn test_truncated_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.index");
        let mut data = vec![0u8; 16];
        data[0..4].copy_from_slice(&VECTORS_MAGIC.to_le_bytes());
        data[4..8].copy_from_slice(&1u32.to_le_bytes());
        data[8..12].copy_from_slice(&4u32.to_le_bytes());
        data[12..16].copy_from_slice(&10u32.to_le_bytes());
        std::fs::write(&path, &data).unwrap();

        let err = VectorIndex::load(&path).unwrap_err();
        assert!(err.to_string().contains("mismatch"));
    }

    #[test]
    fn test_commit_and_load_pair() {
        let dir = TempDir::new().unwrap();
        let files = files_in(dir.path());
        let mut data = CollectionData::empty(4);
        files.commit(&data).unwrap();

        data.index.append(&make_normalized_vectors(4, 2)).unwrap();
        data.chunks = vec!["first".into(), "second".into()];
        files.commit(&data).unwrap();

        let loaded = files.load().unwrap();
        assert!(loaded.is_aligned());
        assert_eq!(loaded.chunks, vec!["first", "second"]);
        assert_eq!(loaded.index.len(), 2);
        assert!(!backup_of(&files.index_path).exists());
    }

    #[test]
    fn test_commit_refuses_misaligned_pair() {
        let dir = TempDir::new().unwrap();
        let files = files_in(dir.path());
        let mut data = CollectionData::empty(4);
        data.chunks.push("orphan".into());
        assert!(matches!(files.commit(&data), Err(RagError::Consistency(_))));
        assert!(!files.index_path.exists());
    }

    #[test]
    fn test_recover_restores_backups_after_partial_swap() {
        let dir = TempDir::new().unwrap();
        let files = files_in(dir.path());
        let mut old = CollectionData::empty(4);
        old.index.append(&make_normalized_vectors(4, 1)).unwrap();
        old.chunks.push("kept".into());
        files.commit(&old).unwrap();

        // Simulate a crash after the new chunk list landed but before the index did.
        std::fs::rename(&files.index_path, backup_of(&files.index_path)).unwrap();
        std::fs::rename(&files.chunks_path, backup_of(&files.chunks_path)).unwrap();
        write_chunks(&files.chunks_path, &["kept".to_string(), "new".to_string()]).unwrap();

        assert!(files.needs_recovery());
        assert!(files.recover().unwrap());
        assert!(!files.needs_recovery());
        let loaded = files.load().unwrap();
        assert!(loaded.is_aligned());
        assert_eq!(loaded.chunks, vec!["kept"]);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let files = files_in(dir.path());
        files.commit(&CollectionData::empty(4)).unwrap();
        let _lock = files.lock_exclusive().unwrap();
        drop(_lock);

        files.remove().unwrap();
        assert!(!files.index_path.exists());
        assert!(!files.chunks_path.exists());
        assert!(!files.lock_path.exists());
        files.remove().unwrap();
    }

    #[test]
    fn test_shared_lock_without_lock_file() {
        let dir = TempDir::new().unwrap();
        let files = files_in(dir.path());
        assert!(files.lock_shared().unwrap().is_none());
        files.lock_exclusive().unwrap();
        assert!(files.lock_shared().unwrap().is_some());
    }

    #[test]
    fn test_shared_lock_excludes_writers_until_dropped() {
        let dir = TempDir::new().unwrap();
        let files = files_in(dir.path());
        drop(files.lock_exclusive().unwrap());

        let reader = files.lock_shared().unwrap().unwrap();
        let second_reader = files.lock_shared().unwrap();
        assert!(second_reader.is_some());

        let writer = File::open(&files.lock_path).unwrap();
        assert!(fs2::FileExt::try_lock_exclusive(&writer).is_err());
        drop(second_reader);
        drop(reader);
        assert!(fs2::FileExt::try_lock_exclusive(&writer).is_ok());
        fs2::FileExt::unlock(&writer).unwrap();
    }
}
