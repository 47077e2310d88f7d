//! Identity resolution for incoming articles.
//!
//! An article is matched to an existing row by title first, then by url.
//! [`plan`] is the whole decision table; [`UpsertResolver`] embeds each
//! article, applies the plan through the store, and syncs the vector index
//! once per batch.

use crate::config::IndexConfig;
use crate::embeddings::{embed_text, EmbeddingProvider};
use crate::store::RecordStore;
use crate::types::{BatchReport, FailedArticle, NewArticle, RecordId, SyncMode, UpsertOutcome};
use crate::vector_index::VectorIndex;
use newsrag_core::{AppError, AppResult};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// What to do with an incoming article.
///
/// | title match      | url                 | resolution        |
/// |------------------|---------------------|-------------------|
/// | T, same url      |                     | `Refresh { T }`   |
/// | T, other url     | held by U           | `Retitle { U }`   |
/// | T, other url     | unused              | `Relink { T }`    |
/// | none             | held by U           | `Retitle { U }`   |
/// | none             | unused              | `Insert`          |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Insert,
    /// Same title and url: replace content and embedding
    Refresh { id: RecordId },
    /// Title matched, url is free: move the record to the new url
    Relink { id: RecordId },
    /// Url already taken: the url holder takes the new title and content
    Retitle { id: RecordId },
}

impl Resolution {
    pub fn outcome(&self) -> UpsertOutcome {
        match self {
            Resolution::Insert => UpsertOutcome::Inserted,
            _ => UpsertOutcome::Updated,
        }
    }

    pub fn branch(&self) -> &'static str {
        match self {
            Resolution::Insert => "new record",
            Resolution::Refresh { .. } => "same title and url",
            Resolution::Relink { .. } => "title match, url moved",
            Resolution::Retitle { .. } => "url match",
        }
    }
}

/// Decide how an article with `incoming_url` lands in the store.
///
/// `title_match` is the lowest-id record sharing the article's title, with
/// its current url. `url_match` is the record already holding `incoming_url`.
pub fn plan(
    title_match: Option<(RecordId, &str)>,
    url_match: Option<RecordId>,
    incoming_url: &str,
) -> Resolution {
    match (title_match, url_match) {
        (Some((id, url)), _) if url == incoming_url => Resolution::Refresh { id },
        (Some((title_id, _)), Some(url_id)) if url_id != title_id => Resolution::Retitle { id: url_id },
        (Some((id, _)), _) => Resolution::Relink { id },
        (None, Some(id)) => Resolution::Retitle { id },
        (None, None) => Resolution::Insert,
    }
}

/// Writes article batches into the store and keeps the vector index in step.
#[derive(Debug)]
pub struct UpsertResolver {
    store: RecordStore,
    index: VectorIndex,
    provider: Arc<dyn EmbeddingProvider>,
}

impl UpsertResolver {
    pub fn new(store: RecordStore, index: VectorIndex, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            store,
            index,
            provider,
        }
    }

    /// Open the store and index named by `config`.
    pub fn open(config: &IndexConfig, provider: Arc<dyn EmbeddingProvider>) -> AppResult<Self> {
        Ok(Self::new(
            RecordStore::open(config)?,
            VectorIndex::new(config),
            provider,
        ))
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Embed and write one article. The index is not touched.
    ///
    /// An embedding failure is logged and the article is stored with a null
    /// embedding. Returns the embedding actually stored.
    pub async fn upsert_one(
        &self,
        article: &NewArticle,
    ) -> AppResult<(RecordId, UpsertOutcome, Option<Vec<f32>>)> {
        if article.url.trim().is_empty() {
            return Err(AppError::Other("article has an empty url".to_string()));
        }

        let embedding = match embed_text(self.provider.as_ref(), &article.embedding_text()).await {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!(
                    "Storing {} without embedding: {}",
                    article.url,
                    e
                );
                None
            }
        };

        let (id, outcome) = self.store.upsert(article, embedding.as_deref())?;
        Ok((id, outcome, embedding))
    }

    /// Resolve `articles` in order, then sync the index once.
    ///
    /// Each article commits on its own; a failure is recorded in the report
    /// and the rest of the batch still runs. Only the index sync can fail the
    /// whole call, and only after every article has been written.
    pub async fn resolve_batch(&self, articles: &[NewArticle]) -> AppResult<BatchReport> {
        let mut report = BatchReport {
            inserted_ids: BTreeSet::new(),
            updated_ids: BTreeSet::new(),
            embeddings: Vec::with_capacity(articles.len()),
            failed: Vec::new(),
            sync: SyncMode::Skipped,
            synced_vectors: 0,
            index_vectors: 0,
        };

        // Last embedding seen per id; a later touch overrides an earlier one
        let mut latest: BTreeMap<RecordId, Option<Vec<f32>>> = BTreeMap::new();

        for (position, article) in articles.iter().enumerate() {
            match self.upsert_one(article).await {
                Ok((id, outcome, embedding)) => {
                    match outcome {
                        UpsertOutcome::Inserted => {
                            report.inserted_ids.insert(id);
                        }
                        UpsertOutcome::Updated => {
                            if !report.inserted_ids.contains(&id) {
                                report.updated_ids.insert(id);
                            }
                        }
                    }
                    latest.insert(id, embedding.clone());
                    report.embeddings.push(embedding);
                }
                Err(e) => {
                    tracing::warn!("Failed to upsert article {} ({}): {}", position, article.url, e);
                    report.failed.push(FailedArticle {
                        index: position,
                        url: article.url.clone(),
                        error: e.to_string(),
                    });
                    report.embeddings.push(None);
                }
            }
        }

        let to_sync: Vec<(RecordId, Vec<f32>)> = latest
            .into_iter()
            .filter_map(|(id, embedding)| embedding.map(|e| (id, e)))
            .collect();

        if to_sync.is_empty() {
            tracing::debug!("No embeddings to sync");
            report.index_vectors = self
                .index
                .inspect()
                .map(|s| s.vector_count)
                .unwrap_or(0);
            return Ok(report);
        }

        // A missing index may only be trained on this batch when the batch is
        // everything the store has embedded
        let (_, embedded) = self.store.counts()?;
        let summary = if !self.index.exists() && embedded > to_sync.len() as u64 {
            tracing::warn!(
                "Index missing with {} embedded records in store; rebuilding",
                embedded
            );
            report.sync = SyncMode::Rebuilt;
            self.index.rebuild(&self.store.get_embedded_records()?)?
        } else {
            match self.index.sync_incremental(&to_sync) {
                Ok(summary) => {
                    report.sync = SyncMode::Incremental;
                    summary
                }
                Err(e) if e.is_index_unavailable() => {
                    tracing::warn!("Incremental sync failed ({}); rebuilding index", e);
                    report.sync = SyncMode::Rebuilt;
                    self.index.rebuild(&self.store.get_embedded_records()?)?
                }
                Err(e) => return Err(e),
            }
        };

        report.synced_vectors = to_sync.len();
        report.index_vectors = summary.vector_count;

        tracing::info!(
            "Batch of {}: {} inserted, {} updated, {} failed, {} vectors synced ({:?})",
            articles.len(),
            report.inserted_ids.len(),
            report.updated_ids.len(),
            report.failed.len(),
            report.synced_vectors,
            report.sync
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::providers::trigram::TrigramProvider;
    use tempfile::TempDir;

    fn resolver(temp: &TempDir) -> UpsertResolver {
        let mut config = IndexConfig::in_dir(temp.path());
        config.embedding.dimensions = 64;
        UpsertResolver::open(&config, Arc::new(TrigramProvider::new(64))).unwrap()
    }

    #[test]
    fn test_plan_same_title_same_url() {
        assert_eq!(plan(Some((3, "u")), Some(3), "u"), Resolution::Refresh { id: 3 });
    }

    #[test]
    fn test_plan_title_match_url_taken() {
        assert_eq!(plan(Some((3, "u1")), Some(8), "u2"), Resolution::Retitle { id: 8 });
    }

    #[test]
    fn test_plan_title_match_url_free() {
        assert_eq!(plan(Some((3, "u1")), None, "u2"), Resolution::Relink { id: 3 });
    }

    #[test]
    fn test_plan_url_only() {
        assert_eq!(plan(None, Some(8), "u"), Resolution::Retitle { id: 8 });
    }

    #[test]
    fn test_plan_new() {
        let resolution = plan(None, None, "u");
        assert_eq!(resolution, Resolution::Insert);
        assert_eq!(resolution.outcome(), UpsertOutcome::Inserted);
    }

    #[tokio::test]
    async fn test_title_match_moves_url() {
        let temp = TempDir::new().unwrap();
        let resolver = resolver(&temp);

        let first = resolver
            .resolve_batch(&[NewArticle::new("X", "first body", "u1")])
            .await
            .unwrap();
        let second = resolver
            .resolve_batch(&[NewArticle::new("X", "second body", "u2")])
            .await
            .unwrap();

        assert!(second.inserted_ids.is_empty());
        assert_eq!(second.updated_ids, first.inserted_ids);

        let rows = resolver.store().get_by_title("X").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].url, "u2");
        assert!(resolver.store().get_by_url("u1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_then_update_in_one_batch_counts_as_insert() {
        let temp = TempDir::new().unwrap();
        let resolver = resolver(&temp);

        let report = resolver
            .resolve_batch(&[
                NewArticle::new("Storm warning", "draft", "https://n/1"),
                NewArticle::new("Storm warning", "final text", "https://n/1"),
            ])
            .await
            .unwrap();

        assert_eq!(report.inserted_ids.len(), 1);
        assert!(report.updated_ids.is_empty());
        assert_eq!(report.synced_vectors, 1);
        assert_eq!(report.index_vectors, 1);
        assert_eq!(report.embeddings.len(), 2);
        let stored = resolver.store().get_embedded_records().unwrap();
        assert_eq!(report.embeddings[1].as_ref(), Some(&stored[0].1));
    }

    #[tokio::test]
    async fn test_empty_url_is_reported_not_fatal() {
        let temp = TempDir::new().unwrap();
        let resolver = resolver(&temp);

        let report = resolver
            .resolve_batch(&[
                NewArticle::new("No link", "body", " "),
                NewArticle::new("Linked", "body", "https://n/2"),
            ])
            .await
            .unwrap();

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].index, 0);
        assert_eq!(report.inserted_ids.len(), 1);
        assert_eq!(report.sync, SyncMode::Incremental);
    }

    #[tokio::test]
    async fn test_empty_batch_skips_sync() {
        let temp = TempDir::new().unwrap();
        let resolver = resolver(&temp);

        let report = resolver.resolve_batch(&[]).await.unwrap();
        assert_eq!(report.sync, SyncMode::Skipped);
        assert!(!resolver.index().exists());
    }

    #[tokio::test]
    async fn test_corrupt_index_falls_back_to_rebuild() {
        let temp = TempDir::new().unwrap();
        let resolver = resolver(&temp);

        resolver
            .resolve_batch(&[NewArticle::new("One", "a", "https://n/1")])
            .await
            .unwrap();
        std::fs::write(resolver.index().index_path(), b"garbage").unwrap();

        let report = resolver
            .resolve_batch(&[NewArticle::new("Two", "b", "https://n/2")])
            .await
            .unwrap();

        assert_eq!(report.sync, SyncMode::Rebuilt);
        assert_eq!(report.index_vectors, 2);
        assert_eq!(resolver.index().inspect().unwrap().mapping_len, 2);
    }
}
