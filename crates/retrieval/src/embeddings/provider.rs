//! Embedding provider trait and factory.

use crate::embeddings::config::EmbeddingConfig;
use newsrag_core::{AppError, AppResult};
use std::sync::Arc;

/// Trait for embedding providers.
///
/// Implementations must return vectors of exactly `dimensions()` length.
/// Empty input may yield a zero vector or an error; callers treat an error
/// as "no embedding".
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync + std::fmt::Debug {
    /// Get provider name (e.g., "trigram", "ollama")
    fn provider_name(&self) -> &str;

    /// Get model identifier
    fn model_name(&self) -> &str;

    /// Get embedding dimensions
    fn dimensions(&self) -> usize;

    /// Generate embeddings for multiple texts in a batch.
    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>>;

    /// Generate embedding for a single text (convenience method).
    async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
        let mut results = self.embed_batch(&[text.to_string()]).await?;
        results
            .pop()
            .ok_or_else(|| AppError::Embedding("No embedding returned".to_string()))
    }
}

/// Create an embedding provider based on configuration.
///
/// Remote providers are checked against their server before being returned.
pub async fn create_provider(config: &EmbeddingConfig) -> AppResult<Arc<dyn EmbeddingProvider>> {
    build_provider(config, true).await
}

/// Like [`create_provider`], but skips the server check.
///
/// For writers that must store articles even while embeddings fail; each
/// call then fails on its own instead of construction failing up front.
pub async fn create_provider_unverified(
    config: &EmbeddingConfig,
) -> AppResult<Arc<dyn EmbeddingProvider>> {
    build_provider(config, false).await
}

async fn build_provider(config: &EmbeddingConfig, verify: bool) -> AppResult<Arc<dyn EmbeddingProvider>> {
    config.validate()?;

    match config.provider.as_str() {
        "trigram" => {
            let provider = super::providers::trigram::TrigramProvider::new(config.dimensions);
            Ok(Arc::new(provider))
        }

        "ollama" => {
            let provider = if verify {
                super::providers::ollama::OllamaProvider::new(config).await?
            } else {
                super::providers::ollama::OllamaProvider::unverified(config)?
            };
            Ok(Arc::new(provider))
        }

        _ => Err(AppError::Config(format!(
            "Unknown embedding provider: '{}'. Supported providers: trigram, ollama",
            config.provider
        ))),
    }
}
