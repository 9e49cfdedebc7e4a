use serde::Serialize;
use std::path::Path;

use crate::config::ChunkingConfig;
use crate::error::{RagError, RagResult};
use crate::rag::{chunk_text, CollectionStore};

/// Default glob patterns for folder ingestion.
pub const DEFAULT_PATTERNS: &str = "*.txt,*.md,*.py,*.js,*.ts,*.rs,*.html,*.css,*.json,*.xml,*.csv,*.yaml,*.yml,*.toml";

/// Formats that need a document parser this crate does not ship.
const UNSUPPORTED: &[(&str, &str)] = &[
    (".pdf", "PDF text extraction is not supported; convert the file to text first"),
    (".docx", "Word document extraction is not supported; convert the file to text first"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub file: String,
    pub chunks: usize,
}

fn extract(bytes: &[u8], file_name: &str) -> Result<String, String> {
    let lower = file_name.to_lowercase();
    if let Some((_, reason)) = UNSUPPORTED.iter().find(|(ext, _)| lower.ends_with(ext)) {
        return Err(format!("Error reading file {file_name}: {reason}"));
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => Ok(text.to_string()),
        // Every byte is a Latin-1 code point.
        Err(_) => Ok(bytes.iter().map(|&b| b as char).collect()),
    }
}

/// Best-effort text of an uploaded file. Never fails: problems come back as an
/// `Error ...` description instead of the text.
pub fn extract_text(bytes: &[u8], file_name: &str) -> String {
    extract(bytes, file_name).unwrap_or_else(|message| message)
}

/// Extract, chunk and add one file's content. Returns the number of chunks stored.
pub async fn ingest_bytes(
    store: &CollectionStore,
    collection: &str,
    bytes: &[u8],
    file_name: &str,
    chunking: &ChunkingConfig,
) -> RagResult<usize> {
    let text = extract(bytes, file_name).map_err(RagError::Validation)?;
    let chunks = chunk_text(&text, chunking.strategy, chunking.size, chunking.overlap)?;
    if chunks.is_empty() {
        tracing::debug!(file = file_name, "no text content, skipped");
        return Ok(0);
    }
    let added = store.add(collection, &chunks).await?;
    tracing::info!(collection, file = file_name, chunks = added, "file ingested");
    Ok(added)
}

/// Relative paths of files under `folder` matching any comma-separated glob pattern, sorted.
pub fn scan_docs(folder: &Path, patterns: &str) -> Vec<String> {
    let mut files = Vec::new();
    for pattern in patterns.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let glob_pattern = format!("{}/**/{}", folder.display(), pattern);
        let entries = match glob::glob(&glob_pattern) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(pattern, error = %e, "invalid glob pattern");
                continue;
            }
        };
        for entry in entries.flatten() {
            if !entry.is_file() {
                continue;
            }
            if let Ok(rel) = entry.strip_prefix(folder) {
                files.push(rel.to_string_lossy().to_string());
            }
        }
    }
    files.sort();
    files.dedup();
    files
}

/// Ingest every matching file under `folder`. Files that cannot be read or
/// extracted are logged and skipped; store errors abort.
pub async fn ingest_folder(
    store: &CollectionStore,
    collection: &str,
    folder: &Path,
    patterns: &str,
    chunking: &ChunkingConfig,
) -> RagResult<Vec<IngestReport>> {
    if !folder.is_dir() {
        return Err(RagError::Validation(format!("Docs folder not found: {}", folder.display())));
    }
    if store.info(collection).is_none() {
        return Err(RagError::NotFound(collection.to_string()));
    }

    let mut reports = Vec::new();
    for rel_path in scan_docs(folder, patterns) {
        let bytes = match std::fs::read(folder.join(&rel_path)) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(file = %rel_path, error = %e, "unreadable file skipped");
                continue;
            }
        };
        match ingest_bytes(store, collection, &bytes, &rel_path, chunking).await {
            Ok(chunks) => reports.push(IngestReport { file: rel_path, chunks }),
            Err(RagError::Validation(reason)) => tracing::warn!(file = %rel_path, %reason, "file skipped"),
            Err(e) => return Err(e),
        }
    }
    Ok(reports)
}
