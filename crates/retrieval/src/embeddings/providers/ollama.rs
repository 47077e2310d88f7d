//! Ollama embedding provider.
//!
//! Talks to a local Ollama server through its batch `/api/embed` endpoint,
//! e.g. with `all-minilm` (384 dimensions) to match the default index
//! configuration.
//!
//! # Example
//! ```no_run
//! use newsrag_retrieval::embeddings::{EmbeddingConfig, EmbeddingProvider};
//! use newsrag_retrieval::embeddings::providers::ollama::OllamaProvider;
//!
//! # async fn run() -> newsrag_core::AppResult<()> {
//! let config = EmbeddingConfig {
//!     provider: "ollama".to_string(),
//!     model: "all-minilm".to_string(),
//!     dimensions: 384,
//!     ..Default::default()
//! };
//!
//! let provider = OllamaProvider::new(&config).await?;
//! let embedding = provider.embed("Central bank raises rates").await?;
//! assert_eq!(embedding.len(), 384);
//! # Ok(())
//! # }
//! ```

use crate::embeddings::{EmbeddingConfig, EmbeddingProvider};
use async_trait::async_trait;
use newsrag_core::{AppError, AppResult};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const EMBED_PATH: &str = "/api/embed";

/// Attempts per request before giving up
const MAX_ATTEMPTS: u32 = 3;

/// First retry delay; doubles on each further attempt
const BASE_DELAY_MS: u64 = 100;

#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
    dimensions: usize,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct OllamaError {
    error: String,
}

impl OllamaProvider {
    /// Build a provider and check the server returns vectors of the
    /// configured dimension.
    pub async fn new(config: &EmbeddingConfig) -> AppResult<Self> {
        let provider = Self::unverified(config)?;
        provider.probe().await?;
        Ok(provider)
    }

    /// Build a provider without contacting the server.
    pub fn unverified(config: &EmbeddingConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Embedding(format!("Cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: resolve_base_url(config.endpoint.as_deref()),
            model: config.model.clone(),
            dimensions: config.dimensions,
        })
    }

    #[instrument(skip(self), fields(model = %self.model))]
    async fn probe(&self) -> AppResult<()> {
        debug!("Probing Ollama at {}", self.base_url);
        self.request(&["probe".to_string()]).await.map(|_| ()).map_err(|e| {
            AppError::Embedding(format!(
                "Ollama not usable at {} ({}). Is the server running and '{}' pulled?",
                self.base_url, e, self.model
            ))
        })
    }

    /// POST one batch, retrying transport and server errors with backoff.
    async fn request(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        let mut attempt = 1;
        loop {
            match self.post_once(texts).await {
                Ok(embeddings) => return Ok(embeddings),
                Err(e) if attempt < MAX_ATTEMPTS => {
                    let delay = BASE_DELAY_MS << attempt;
                    warn!(
                        "Ollama request failed (attempt {} of {}): {}; retrying in {}ms",
                        attempt, MAX_ATTEMPTS, e, delay
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn post_once(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, EMBED_PATH))
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| AppError::Embedding(format!("Request to Ollama failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<OllamaError>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            return Err(AppError::Embedding(format!("Ollama returned {}: {}", status, message)));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| AppError::Embedding(format!("Unreadable Ollama response: {}", e)))?;

        if parsed.embeddings.len() != texts.len() {
            return Err(AppError::Embedding(format!(
                "Ollama returned {} embeddings for {} inputs",
                parsed.embeddings.len(),
                texts.len()
            )));
        }
        if let Some(bad) = parsed.embeddings.iter().find(|e| e.len() != self.dimensions) {
            return Err(AppError::Embedding(format!(
                "Ollama returned {} dimensions, expected {}",
                bad.len(),
                self.dimensions
            )));
        }

        Ok(parsed.embeddings)
    }
}

fn resolve_base_url(endpoint: Option<&str>) -> String {
    let url = match endpoint {
        Some(url) => url.to_string(),
        None => std::env::var("OLLAMA_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
    };
    url.trim_end_matches('/').to_string()
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn provider_name(&self) -> &str {
        "ollama"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[instrument(skip(self, texts), fields(batch = texts.len(), model = %self.model))]
    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(AppError::Embedding("Ollama refuses blank input".to_string()));
        }
        self.request(texts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "ollama".to_string(),
            model: "all-minilm".to_string(),
            dimensions: 384,
            endpoint: Some("http://127.0.0.1:9/".to_string()),
            timeout_secs: 1,
        }
    }

    #[test]
    fn test_configured_endpoint_is_trimmed() {
        assert_eq!(
            resolve_base_url(Some("http://ollama.internal:11434/")),
            "http://ollama.internal:11434"
        );
    }

    #[tokio::test]
    async fn test_blank_input_is_refused() {
        let provider = OllamaProvider::unverified(&unreachable_config()).unwrap();
        let result = provider.embed("   ").await;
        assert!(matches!(result, Err(AppError::Embedding(_))));
    }

    #[tokio::test]
    async fn test_empty_batch_needs_no_server() {
        let provider = OllamaProvider::unverified(&unreachable_config()).unwrap();
        assert!(provider.embed_batch(&[]).await.unwrap().is_empty());
        assert_eq!(provider.model_name(), "all-minilm");
        assert_eq!(provider.dimensions(), 384);
    }

    #[tokio::test]
    async fn test_unreachable_server_fails_construction() {
        let result = OllamaProvider::new(&unreachable_config()).await;
        assert!(matches!(result, Err(AppError::Embedding(_))));
    }
}
