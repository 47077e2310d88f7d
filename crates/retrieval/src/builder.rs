//! Maintenance operations: full rebuilds, re-embedding and health stats.

use crate::config::IndexConfig;
use crate::embeddings::{embed_text, EmbeddingProvider};
use crate::store::RecordStore;
use crate::types::embedding_text;
use crate::vector_index::{IndexSummary, VectorIndex};
use newsrag_core::AppResult;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;

/// Store and index health, as reported by `newsrag stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub records: u64,
    pub embedded: u64,

    /// `None` when the index is missing or unreadable
    pub index: Option<IndexSummary>,

    pub database_bytes: u64,
    pub index_bytes: u64,
    pub mapping_bytes: u64,

    /// Index and mapping load together and agree on length
    pub consistent: bool,
}

/// Outcome of a re-embedding pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReembedStats {
    pub records: usize,
    pub embedded: usize,
    /// Records whose text was blank
    pub skipped: usize,
    pub failed: usize,
    pub duration_secs: f64,
}

#[derive(Debug)]
pub struct IndexBuilder {
    store: RecordStore,
    index: VectorIndex,
}

impl IndexBuilder {
    pub fn new(store: RecordStore, index: VectorIndex) -> Self {
        Self { store, index }
    }

    pub fn open(config: &IndexConfig) -> AppResult<Self> {
        Ok(Self::new(RecordStore::open(config)?, VectorIndex::new(config)))
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Rebuild the vector index from every embedded record in the store.
    pub fn rebuild_index(&self) -> AppResult<IndexSummary> {
        let records = self.store.get_embedded_records()?;
        tracing::info!("Rebuilding index from {} embedded records", records.len());
        self.index.rebuild(&records)
    }

    /// Recompute and store the embedding of every record.
    ///
    /// Does not touch the index; follow with [`IndexBuilder::rebuild_index`]
    /// or use [`IndexBuilder::force_rebuild`].
    pub async fn reembed_all(&self, provider: &dyn EmbeddingProvider) -> AppResult<ReembedStats> {
        let start = Instant::now();
        let texts = self.store.all_texts()?;
        let mut stats = ReembedStats {
            records: texts.len(),
            ..Default::default()
        };

        for (id, title, content) in texts {
            let text = embedding_text(&title, content.as_deref());
            let embedding = match embed_text(provider, &text).await {
                Ok(Some(embedding)) => {
                    stats.embedded += 1;
                    Some(embedding)
                }
                Ok(None) => {
                    stats.skipped += 1;
                    None
                }
                Err(e) => {
                    tracing::warn!("Failed to re-embed record {}: {}", id, e);
                    stats.failed += 1;
                    None
                }
            };
            self.store.set_embedding(id, embedding.as_deref())?;
        }

        stats.duration_secs = start.elapsed().as_secs_f64();
        tracing::info!(
            "Re-embedded {} of {} records ({} failed) in {:.2}s",
            stats.embedded,
            stats.records,
            stats.failed,
            stats.duration_secs
        );
        Ok(stats)
    }

    /// Re-embed everything, then rebuild the index.
    pub async fn force_rebuild(
        &self,
        provider: &dyn EmbeddingProvider,
    ) -> AppResult<(ReembedStats, IndexSummary)> {
        let stats = self.reembed_all(provider).await?;
        let summary = self.rebuild_index()?;
        Ok((stats, summary))
    }

    /// Build the index if its file does not exist yet.
    ///
    /// Returns the summary of a freshly built index, or `None` when an index
    /// file was already present.
    pub fn ensure_index(&self) -> AppResult<Option<IndexSummary>> {
        if self.index.exists() {
            tracing::debug!("Index present at {:?}", self.index.index_path());
            return Ok(None);
        }
        tracing::info!("No index at {:?}, building from store", self.index.index_path());
        self.rebuild_index().map(Some)
    }

    pub fn stats(&self) -> AppResult<IndexStats> {
        let (records, embedded) = self.store.counts()?;

        let index = match self.index.inspect() {
            Ok(summary) => Some(summary),
            Err(e) if e.is_index_unavailable() => {
                tracing::debug!("Index not loadable: {}", e);
                None
            }
            Err(e) => return Err(e),
        };
        let consistent = index
            .as_ref()
            .map(|s| s.mapping_len == s.vector_count)
            .unwrap_or(false);

        Ok(IndexStats {
            records,
            embedded,
            consistent,
            index,
            database_bytes: file_size(self.store.path()),
            index_bytes: file_size(self.index.index_path()),
            mapping_bytes: file_size(self.index.mapping_path()),
        })
    }
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
