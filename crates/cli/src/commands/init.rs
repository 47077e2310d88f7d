//! Init command handler.

use clap::Args;
use newsrag_core::{config::AppConfig, AppResult};
use newsrag_retrieval::{save_config, IndexBuilder};

/// Create the data directory, store and index configuration
#[derive(Args, Debug)]
pub struct InitCommand {
    /// Embedding provider (trigram, ollama)
    #[arg(long)]
    pub provider: Option<String>,

    /// Embedding model identifier
    #[arg(long)]
    pub model: Option<String>,

    /// Embedding dimensions
    #[arg(long)]
    pub dimensions: Option<usize>,

    /// Embedding service endpoint (ollama)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Overwrite an existing index.yaml
    #[arg(long)]
    pub force: bool,
}

impl InitCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing init command");

        let mut index_config = super::index_config(config)?;
        let exists = index_config.config_path().exists();

        if !exists || self.force {
            if let Some(provider) = &self.provider {
                index_config.embedding.provider = provider.clone();
            }
            if let Some(model) = &self.model {
                index_config.embedding.model = model.clone();
            }
            if let Some(dimensions) = self.dimensions {
                index_config.embedding.dimensions = dimensions;
            }
            if self.endpoint.is_some() {
                index_config.embedding.endpoint = self.endpoint.clone();
            }
            index_config.validate()?;
            save_config(&index_config)?;
        } else {
            tracing::debug!("Keeping existing {:?}", index_config.config_path());
        }

        let builder = IndexBuilder::open(&index_config)?;
        let built = builder.ensure_index()?;

        println!("Initialized {}", index_config.data_dir.display());
        println!(
            "  embedding: {} / {} ({} dimensions)",
            index_config.embedding.provider,
            index_config.embedding.model,
            index_config.dimensions()
        );
        if let Some(summary) = built {
            println!(
                "  index: built {} index with {} vectors",
                summary.kind.as_str(),
                summary.vector_count
            );
        }

        Ok(())
    }
}
