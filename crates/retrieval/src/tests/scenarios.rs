use crate::builder::IndexBuilder;
use crate::config::IndexConfig;
use crate::embeddings::providers::trigram::TrigramProvider;
use crate::embeddings::EmbeddingProvider;
use crate::query::QueryService;
use crate::resolver::UpsertResolver;
use crate::types::{NewArticle, SyncMode};
use async_trait::async_trait;
use newsrag_core::{AppError, AppResult};
use std::sync::Arc;
use tempfile::TempDir;

const DIM: usize = 128;

/// Trigram embeddings, except for texts mentioning "unembeddable".
#[derive(Debug)]
struct FlakyProvider {
    inner: TrigramProvider,
}

#[async_trait]
impl EmbeddingProvider for FlakyProvider {
    fn provider_name(&self) -> &str {
        "flaky"
    }

    fn model_name(&self) -> &str {
        "flaky-v1"
    }

    fn dimensions(&self) -> usize {
        DIM
    }

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        if texts.iter().any(|t| t.contains("unembeddable")) {
            return Err(AppError::Embedding("provider refused text".to_string()));
        }
        self.inner.embed_batch(texts).await
    }
}

/// An embedder whose server is down: every call fails.
#[derive(Debug)]
struct OfflineProvider;

#[async_trait]
impl EmbeddingProvider for OfflineProvider {
    fn provider_name(&self) -> &str {
        "offline"
    }

    fn model_name(&self) -> &str {
        "offline-v1"
    }

    fn dimensions(&self) -> usize {
        DIM
    }

    async fn embed_batch(&self, _texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        Err(AppError::Embedding("connection refused".to_string()))
    }
}

fn config(temp: &TempDir) -> IndexConfig {
    let mut config = IndexConfig::in_dir(temp.path());
    config.embedding.dimensions = DIM;
    config
}

fn provider() -> Arc<dyn EmbeddingProvider> {
    Arc::new(FlakyProvider {
        inner: TrigramProvider::new(DIM),
    })
}

fn headlines() -> Vec<NewArticle> {
    vec![
        NewArticle::new(
            "Central bank raises interest rates",
            "Borrowing costs climb for the third time this year.",
            "https://news.example/economy/rates",
        ),
        NewArticle::new(
            "Wildfire spreads across northern forests",
            "Evacuation orders issued for several villages.",
            "https://news.example/climate/wildfire",
        ),
        NewArticle::new(
            "Champions league final tickets sold out",
            "Supporters queued overnight outside the stadium.",
            "https://news.example/sport/final",
        ),
    ]
}

#[tokio::test]
async fn test_batch_records_are_retrievable_by_url_and_title() {
    let temp = TempDir::new().unwrap();
    let resolver = UpsertResolver::open(&config(&temp), provider()).unwrap();

    let report = resolver.resolve_batch(&headlines()).await.unwrap();
    assert_eq!(report.inserted_ids.len(), 3);
    assert_eq!(report.sync, SyncMode::Incremental);

    for article in headlines() {
        let by_url = resolver.store().get_by_url(&article.url).unwrap().unwrap();
        let by_title = resolver.store().get_by_title(&article.title).unwrap();
        assert_eq!(by_title.len(), 1);
        assert_eq!(by_title[0].id, by_url.id);
        assert!(report.inserted_ids.contains(&by_url.id));
    }

    let summary = resolver.index().inspect().unwrap();
    assert_eq!(summary.vector_count, 3);
    assert_eq!(summary.mapping_len, summary.vector_count);
}

#[tokio::test]
async fn test_resubmitting_a_batch_only_updates() {
    let temp = TempDir::new().unwrap();
    let resolver = UpsertResolver::open(&config(&temp), provider()).unwrap();

    let first = resolver.resolve_batch(&headlines()).await.unwrap();

    let mut revised = headlines();
    for article in &mut revised {
        article.content = Some(format!("{} (updated)", article.content.as_deref().unwrap_or("")));
    }
    let second = resolver.resolve_batch(&revised).await.unwrap();

    assert!(second.inserted_ids.is_empty());
    assert_eq!(second.updated_ids, first.inserted_ids);
    assert_eq!(resolver.store().counts().unwrap(), (3, 3));

    for article in &revised {
        let stored = resolver.store().get_by_url(&article.url).unwrap().unwrap();
        assert_eq!(stored.content, article.content);
    }
}

#[tokio::test]
async fn test_embedding_failure_is_isolated_to_one_article() {
    let temp = TempDir::new().unwrap();
    let resolver = UpsertResolver::open(&config(&temp), provider()).unwrap();

    let mut batch = headlines();
    batch.insert(
        1,
        NewArticle::new(
            "Council publishes budget",
            "The unembeddable appendix runs to 400 pages.",
            "https://news.example/local/budget",
        ),
    );

    let report = resolver.resolve_batch(&batch).await.unwrap();
    assert!(report.failed.is_empty());
    assert_eq!(report.inserted_ids.len(), 4);
    assert!(report.embeddings[1].is_none());
    assert_eq!(report.synced_vectors, 3);

    let budget = resolver
        .store()
        .get_by_url("https://news.example/local/budget")
        .unwrap()
        .unwrap();
    assert!(budget.embedding.is_none());

    let embedded: Vec<_> = resolver
        .store()
        .get_embedded_records()
        .unwrap()
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    assert_eq!(embedded.len(), 3);
    assert!(!embedded.contains(&budget.id));
    assert_eq!(resolver.index().inspect().unwrap().vector_count, 3);
}

#[tokio::test]
async fn test_title_query_returns_that_article_first() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp);
    let resolver = UpsertResolver::open(&config, provider()).unwrap();
    resolver.resolve_batch(&headlines()).await.unwrap();

    let service = QueryService::new(&config, provider()).unwrap();
    let results = service
        .query("Wildfire spreads across northern forests", 3)
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].url, "https://news.example/climate/wildfire");
    assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test]
async fn test_truncated_mapping_triggers_transparent_rebuild() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp);
    let resolver = UpsertResolver::open(&config, provider()).unwrap();
    resolver.resolve_batch(&headlines()).await.unwrap();

    let mapping = std::fs::read_to_string(config.mapping_path()).unwrap();
    std::fs::write(config.mapping_path(), &mapping[..mapping.len() / 2]).unwrap();

    let service = QueryService::new(&config, provider()).unwrap();
    let results = service
        .query("Champions league final tickets sold out", 1)
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].url, "https://news.example/sport/final");

    let summary = resolver.index().inspect().unwrap();
    assert_eq!(summary.mapping_len, 3);
}

#[tokio::test]
async fn test_missing_index_is_rebuilt_on_query() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp);
    let resolver = UpsertResolver::open(&config, provider()).unwrap();
    resolver.resolve_batch(&headlines()).await.unwrap();

    std::fs::remove_file(config.index_path()).unwrap();

    let service = QueryService::new(&config, provider()).unwrap();
    let results = service.query("interest rates", 2).await.unwrap();
    assert_eq!(results[0].url, "https://news.example/economy/rates");
    assert!(config.index_path().exists());
}

#[tokio::test]
async fn test_missing_index_is_rebuilt_on_next_batch() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp);
    let resolver = UpsertResolver::open(&config, provider()).unwrap();
    resolver.resolve_batch(&headlines()).await.unwrap();

    std::fs::remove_file(config.index_path()).unwrap();

    let report = resolver
        .resolve_batch(&[NewArticle::new(
            "Ferry service resumes",
            "Crossings restart after the storm.",
            "https://news.example/ferry",
        )])
        .await
        .unwrap();
    assert_eq!(report.sync, SyncMode::Rebuilt);
    assert_eq!(report.index_vectors, 4);

    let service = QueryService::new(&config, provider()).unwrap();
    let results = service
        .query("Central bank raises interest rates", 1)
        .await
        .unwrap();
    assert_eq!(results[0].url, "https://news.example/economy/rates");
}

#[tokio::test]
async fn test_offline_embedder_still_stores_the_batch() {
    let temp = TempDir::new().unwrap();
    let resolver = UpsertResolver::open(&config(&temp), Arc::new(OfflineProvider)).unwrap();

    let report = resolver.resolve_batch(&headlines()).await.unwrap();
    assert!(report.failed.is_empty());
    assert_eq!(report.inserted_ids.len(), 3);
    assert!(report.embeddings.iter().all(|e| e.is_none()));
    assert_eq!(report.sync, SyncMode::Skipped);
    assert_eq!(resolver.store().counts().unwrap(), (3, 0));

    // Once the embedder is back, a forced rebuild fills the gaps
    let builder = IndexBuilder::open(&config(&temp)).unwrap();
    let (stats, summary) = builder
        .force_rebuild(&TrigramProvider::new(DIM))
        .await
        .unwrap();
    assert_eq!(stats.embedded, 3);
    assert_eq!(summary.vector_count, 3);
}
