//! Query command handler.

use clap::Args;
use newsrag_core::{config::AppConfig, AppResult};
use newsrag_retrieval::{create_provider, QueryService};

/// Find the articles most similar to a text
#[derive(Args, Debug)]
pub struct QueryCommand {
    /// Query text
    pub text: String,

    /// Number of articles to return (default from index.yaml)
    #[arg(short = 'k', long)]
    pub top_k: Option<usize>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl QueryCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing query command");

        let index_config = super::index_config(config)?;
        let k = self.top_k.unwrap_or(index_config.default_top_k);

        let provider = create_provider(&index_config.embedding).await?;
        let service = QueryService::new(&index_config, provider)?;
        let results = service.query(&self.text, k).await?;

        if self.json {
            return super::print_json(&results);
        }

        if results.is_empty() {
            println!("No matching articles.");
            return Ok(());
        }

        for (rank, article) in results.iter().enumerate() {
            println!("{}. [{:.3}] {}", rank + 1, article.score, article.title);
            println!("   {}", article.url);
        }

        Ok(())
    }
}
