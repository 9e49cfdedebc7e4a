use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{RagError, RagResult};

use super::format::join_context;
use super::registry::normalize_key;
use super::search::SearchResult;
use super::store::CollectionStore;

/// A chunk selected for the context, tagged with the collection it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedChunk {
    pub collection: String,
    pub text: String,
    pub score: f32,
}

/// A collection that could not be searched. It contributes nothing to the result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionWarning {
    pub collection: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Retrieval {
    /// Chunk texts separated by blank lines, best first.
    pub context: String,
    pub hits: Vec<RetrievedChunk>,
    pub warnings: Vec<CollectionWarning>,
}

impl Retrieval {
    /// Nothing cleared the threshold. A valid outcome, not a failure.
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Searches several collections with one query embedding and merges the hits.
pub struct Retriever {
    store: Arc<CollectionStore>,
    min_score: Option<f32>,
}

impl Retriever {
    pub fn new(store: Arc<CollectionStore>, min_score: Option<f32>) -> Self {
        Self { store, min_score }
    }

    pub fn store(&self) -> &Arc<CollectionStore> {
        &self.store
    }

    pub fn min_score(&self) -> Option<f32> {
        self.min_score
    }

    /// Global top `k` across `collections`.
    ///
    /// The query is embedded once. A collection that fails to search is reported
    /// in `warnings` and skipped; only query-level failures (empty query,
    /// embedding errors) fail the whole call.
    pub async fn retrieve(&self, query: &str, collections: &[String], k: usize) -> RagResult<Retrieval> {
        if collections.is_empty() {
            return Err(RagError::Validation("select at least one collection".into()));
        }
        let query_vector = self.store.embedder().embed_query(query).await?;

        let mut seen = HashSet::new();
        let mut per_collection = Vec::with_capacity(collections.len());
        let mut warnings = Vec::new();
        for name in collections {
            if !seen.insert(normalize_key(name)) {
                continue;
            }
            match self.store.search(name, &query_vector, k).await {
                Ok(results) => per_collection.push((name.clone(), results)),
                Err(e) => {
                    tracing::warn!(collection = %name, error = %e, "collection skipped during retrieval");
                    warnings.push(CollectionWarning { collection: name.clone(), message: e.to_string() });
                }
            }
        }

        let hits = merge_results(per_collection, k, self.min_score);
        tracing::debug!(
            collections = collections.len(),
            hits = hits.len(),
            skipped = warnings.len(),
            "retrieval finished"
        );
        Ok(Retrieval { context: join_context(&hits), hits, warnings })
    }
}

/// Tag, threshold, rank and cut per-collection results down to the global top `k`.
///
/// The sort is stable, so equal scores keep collection order and then rank order.
pub fn merge_results(
    per_collection: Vec<(String, Vec<SearchResult>)>,
    k: usize,
    min_score: Option<f32>,
) -> Vec<RetrievedChunk> {
    let mut merged: Vec<RetrievedChunk> = per_collection
        .into_iter()
        .flat_map(|(collection, results)| {
            results.into_iter().map(move |r| RetrievedChunk {
                collection: collection.clone(),
                text: r.text,
                score: r.score,
            })
        })
        .filter(|hit| min_score.map_or(true, |min| hit.score >= min))
        .collect();

    merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    merged.truncate(k);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{Embedder, HashEmbeddings};
    use tempfile::TempDir;

    fn results(scores: &[f32], prefix: &str) -> Vec<SearchResult> {
        scores
            .iter()
            .enumerate()
            .map(|(position, &score)| SearchResult { position, text: format!("{prefix}{position}"), score })
            .collect()
    }

    #[test]
    fn test_merge_takes_global_top_k() {
        let merged = merge_results(
            vec![
                ("a".into(), results(&[0.9, 0.7], "a")),
                ("b".into(), results(&[0.85, 0.3], "b")),
                ("c".into(), results(&[0.6, 0.5], "c")),
            ],
            3,
            None,
        );
        let scores: Vec<f32> = merged.iter().map(|h| h.score).collect();
        assert_eq!(scores, vec![0.9, 0.85, 0.7]);
        let sources: Vec<&str> = merged.iter().map(|h| h.collection.as_str()).collect();
        assert_eq!(sources, vec!["a", "b", "a"]);
        assert_eq!(merged[2].text, "a1");
    }

    #[test]
    fn test_threshold_applies_before_cut() {
        let merged = merge_results(
            vec![("a".into(), results(&[0.9, 0.2], "a")), ("b".into(), results(&[0.35, 0.5], "b"))],
            3,
            Some(0.4),
        );
        let scores: Vec<f32> = merged.iter().map(|h| h.score).collect();
        assert_eq!(scores, vec![0.9, 0.5]);
    }

    #[test]
    fn test_equal_scores_keep_collection_order() {
        let merged = merge_results(
            vec![("first".into(), results(&[0.5], "x")), ("second".into(), results(&[0.5], "y"))],
            2,
            None,
        );
        assert_eq!(merged[0].collection, "first");
        assert_eq!(merged[1].collection, "second");
    }

    async fn seeded_retriever(dir: &TempDir, min_score: Option<f32>) -> Retriever {
        let embedder = Embedder::new(Arc::new(HashEmbeddings::new(256).unwrap()));
        let store = Arc::new(CollectionStore::open(dir.path(), embedder).unwrap());
        store.create("rust").await.unwrap();
        store.create("baking").await.unwrap();
        store
            .add(
                "rust",
                &["ownership and borrowing in rust".to_string(), "rust traits and generics".to_string()],
            )
            .await
            .unwrap();
        store
            .add("baking", &["sourdough bread needs a starter".to_string()])
            .await
            .unwrap();
        Retriever::new(store, min_score)
    }

    #[tokio::test]
    async fn test_missing_collection_becomes_warning() {
        let dir = TempDir::new().unwrap();
        let retriever = seeded_retriever(&dir, None).await;
        let retrieval = retriever
            .retrieve("borrowing in rust", &["rust".to_string(), "vanished".to_string()], 2)
            .await
            .unwrap();

        assert_eq!(retrieval.warnings.len(), 1);
        assert_eq!(retrieval.warnings[0].collection, "vanished");
        assert_eq!(retrieval.hits[0].collection, "rust");
        assert_eq!(retrieval.hits[0].text, "ownership and borrowing in rust");
    }

    #[tokio::test]
    async fn test_context_joins_hits_with_blank_lines() {
        let dir = TempDir::new().unwrap();
        let retriever = seeded_retriever(&dir, None).await;
        let retrieval = retriever
            .retrieve("rust", &["rust".to_string(), "baking".to_string()], 2)
            .await
            .unwrap();
        assert_eq!(retrieval.hits.len(), 2);
        assert_eq!(
            retrieval.context,
            format!("{}\n\n{}", retrieval.hits[0].text, retrieval.hits[1].text)
        );
    }

    #[tokio::test]
    async fn test_unrelated_query_yields_no_context() {
        let dir = TempDir::new().unwrap();
        let retriever = seeded_retriever(&dir, Some(0.99)).await;
        let retrieval = retriever
            .retrieve("completely unrelated words", &["rust".to_string(), "baking".to_string()], 4)
            .await
            .unwrap();
        assert!(retrieval.is_empty());
        assert!(retrieval.context.is_empty());
        assert!(retrieval.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_collections_searched_once() {
        let dir = TempDir::new().unwrap();
        let retriever = seeded_retriever(&dir, None).await;
        let retrieval = retriever
            .retrieve("sourdough", &["baking".to_string(), "Baking".to_string()], 4)
            .await
            .unwrap();
        assert_eq!(retrieval.hits.len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_empty_selection_and_query() {
        let dir = TempDir::new().unwrap();
        let retriever = seeded_retriever(&dir, None).await;
        assert!(matches!(retriever.retrieve("rust", &[], 2).await, Err(RagError::Validation(_))));
        assert!(matches!(
            retriever.retrieve("  ", &["rust".to_string()], 2).await,
            Err(RagError::EmptyInput(_))
        ));
    }
}
