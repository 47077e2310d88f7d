//! Similarity queries over the indexed articles.

use crate::config::IndexConfig;
use crate::embeddings::{embed_text, EmbeddingProvider};
use crate::store::RecordStore;
use crate::types::{RecordId, ScoredArticle};
use crate::vector_index::VectorIndex;
use newsrag_core::{AppError, AppResult};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Embeds a query, searches the index and joins hits back to store records.
#[derive(Debug)]
pub struct QueryService {
    store: RecordStore,
    index: VectorIndex,
    provider: Arc<dyn EmbeddingProvider>,
}

impl QueryService {
    pub fn new(config: &IndexConfig, provider: Arc<dyn EmbeddingProvider>) -> AppResult<Self> {
        Ok(Self {
            store: RecordStore::open(config)?,
            index: VectorIndex::new(config),
            provider,
        })
    }

    /// Up to `k` articles most similar to `text`, best first.
    ///
    /// A missing or inconsistent index is rebuilt from the store before
    /// searching. An empty index yields no results. Each record is scored by
    /// its most recently synced vector among the candidates.
    #[tracing::instrument(skip(self, text))]
    pub async fn query(&self, text: &str, k: usize) -> AppResult<Vec<ScoredArticle>> {
        if text.trim().is_empty() {
            return Err(AppError::Embedding("Query text is empty".to_string()));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let embedding = embed_text(self.provider.as_ref(), text)
            .await?
            .ok_or_else(|| AppError::Embedding("Query produced no embedding".to_string()))?;

        let loaded = self.index.open_or_rebuild(&self.store)?;
        if loaded.is_empty() {
            tracing::debug!("Index is empty");
            return Ok(Vec::new());
        }

        // Over-fetch so that duplicate positions for one record still fill k
        let candidates = k.saturating_mul(2).min(loaded.len());
        let hits = loaded.search(&embedding, candidates)?;

        // A record updated since the last rebuild owns several positions; the
        // highest one holds its current vector, so that one scores the record
        let mut current: HashMap<RecordId, (usize, f32)> = HashMap::new();
        for (position, score) in hits {
            match loaded.resolve(position) {
                Some(id) => {
                    let entry = current.entry(id).or_insert((position, score));
                    if position > entry.0 {
                        *entry = (position, score);
                    }
                }
                None => tracing::debug!("Dropping unmapped position {}", position),
            }
        }
        let mut ranked: Vec<(RecordId, usize, f32)> = current
            .into_iter()
            .map(|(id, (position, score))| (id, position, score))
            .collect();
        ranked.sort_by(|a, b| b.2.total_cmp(&a.2).then(a.1.cmp(&b.1)));

        let ids: BTreeSet<RecordId> = ranked.iter().map(|(id, _, _)| *id).collect();
        let mut records = self.store.get_by_ids(&ids)?;

        let results: Vec<ScoredArticle> = ranked
            .into_iter()
            .filter_map(|(id, _, score)| {
                records
                    .remove(&id)
                    .map(|record| ScoredArticle::from_record(record, score))
            })
            .take(k)
            .collect();

        tracing::debug!(
            "Query returned {} results (top score {:.3})",
            results.len(),
            results.first().map(|r| r.score).unwrap_or(0.0)
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::providers::trigram::TrigramProvider;
    use crate::types::NewArticle;
    use tempfile::TempDir;

    const DIM: usize = 64;

    fn config(temp: &TempDir) -> IndexConfig {
        let mut config = IndexConfig::in_dir(temp.path());
        config.embedding.dimensions = DIM;
        config
    }

    fn service(temp: &TempDir) -> QueryService {
        QueryService::new(&config(temp), Arc::new(TrigramProvider::new(DIM))).unwrap()
    }

    #[tokio::test]
    async fn test_blank_query_is_embedding_error() {
        let temp = TempDir::new().unwrap();
        let result = service(&temp).query("  ", 3).await;
        assert!(matches!(result, Err(AppError::Embedding(_))));
    }

    #[tokio::test]
    async fn test_zero_k_is_empty() {
        let temp = TempDir::new().unwrap();
        assert!(service(&temp).query("anything", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_store_is_empty_result() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        assert!(service.query("elections", 5).await.unwrap().is_empty());
        // The rebuild left an empty index behind rather than nothing
        assert_eq!(service.index.inspect().unwrap().vector_count, 0);
    }

    #[tokio::test]
    async fn test_stale_positions_are_deduplicated() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let provider = TrigramProvider::new(DIM);

        let article = NewArticle::new("Flood defences upgraded", "River walls", "https://n/1");
        let text = article.embedding_text();
        let embedding = embed_text(&provider, &text).await.unwrap().unwrap();
        let (id, _) = service.store.upsert(&article, Some(embedding.as_slice())).unwrap();

        // The same record synced twice owns two positions
        service.index.rebuild(&[(id, embedding.clone())]).unwrap();
        service.index.sync_incremental(&[(id, embedding)]).unwrap();

        let results = service.query("Flood defences upgraded", 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, id);
    }

    #[tokio::test]
    async fn test_updated_record_is_scored_by_its_latest_vector() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        let provider = TrigramProvider::new(DIM);

        let before = NewArticle::new("Flood defences upgraded", "River walls", "https://n/1");
        let after = NewArticle::new("Ferry timetable changes", "Winter sailings", "https://n/1");
        let old = embed_text(&provider, &before.embedding_text()).await.unwrap().unwrap();
        let new = embed_text(&provider, &after.embedding_text()).await.unwrap().unwrap();

        let (id, _) = service.store.upsert(&before, Some(old.as_slice())).unwrap();
        service.index.rebuild(&[(id, old)]).unwrap();
        service.store.upsert(&after, Some(new.as_slice())).unwrap();
        service.index.sync_incremental(&[(id, new.clone())]).unwrap();

        let query = before.embedding_text();
        let results = service.query(&query, 1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Ferry timetable changes");

        // Position 1 holds the vector synced after the update
        let query_embedding = embed_text(&provider, &query).await.unwrap().unwrap();
        let expected = service
            .index
            .load()
            .unwrap()
            .search(&query_embedding, 2)
            .unwrap()
            .into_iter()
            .find(|(position, _)| *position == 1)
            .map(|(_, score)| score)
            .unwrap();
        assert!((results[0].score - expected).abs() < 1e-6);
        assert!(results[0].score < 0.99);
    }

    #[tokio::test]
    async fn test_ids_missing_from_store_are_dropped() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);
        service.index.rebuild(&[(404, vec![1.0; DIM])]).unwrap();

        assert!(service.query("ghost", 3).await.unwrap().is_empty());
    }
}
