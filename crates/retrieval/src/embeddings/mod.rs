//! Embedding providers.
//!
//! Text goes in, a fixed-dimension vector comes out. Everything else in the
//! crate talks to providers through [`EmbeddingProvider`] and the checked
//! helper [`embed_text`].

pub mod config;
pub mod provider;
pub mod providers;

pub use config::EmbeddingConfig;
pub use provider::{create_provider, create_provider_unverified, EmbeddingProvider};

use newsrag_core::{AppError, AppResult};

/// Embed `text`, enforcing the provider's declared dimension.
///
/// Returns `Ok(None)` without calling the provider when `text` is empty or
/// whitespace only. Any provider failure or wrong-length vector is an
/// `AppError::Embedding`.
pub async fn embed_text(provider: &dyn EmbeddingProvider, text: &str) -> AppResult<Option<Vec<f32>>> {
    if text.trim().is_empty() {
        return Ok(None);
    }

    let embedding = provider
        .embed(text)
        .await
        .map_err(|e| match e {
            AppError::Embedding(_) => e,
            other => AppError::Embedding(other.to_string()),
        })?;

    if embedding.len() != provider.dimensions() {
        return Err(AppError::Embedding(format!(
            "Provider '{}' returned {} dimensions, expected {}",
            provider.provider_name(),
            embedding.len(),
            provider.dimensions()
        )));
    }

    Ok(Some(embedding))
}
