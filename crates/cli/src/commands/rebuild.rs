//! Rebuild command handler.

use clap::Args;
use newsrag_core::{config::AppConfig, AppResult};
use newsrag_retrieval::{create_provider, IndexBuilder};

/// Rebuild the vector index from the store
#[derive(Args, Debug)]
pub struct RebuildCommand {
    /// Recompute every embedding first
    #[arg(long)]
    pub reembed: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl RebuildCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing rebuild command (reembed: {})", self.reembed);

        let index_config = super::index_config(config)?;
        let builder = IndexBuilder::open(&index_config)?;

        let (reembed, summary) = if self.reembed {
            let provider = create_provider(&index_config.embedding).await?;
            let (stats, summary) = builder.force_rebuild(provider.as_ref()).await?;
            (Some(stats), summary)
        } else {
            (None, builder.rebuild_index()?)
        };

        if self.json {
            return super::print_json(&serde_json::json!({
                "reembed": reembed,
                "index": summary,
            }));
        }

        if let Some(stats) = &reembed {
            println!(
                "Re-embedded {} of {} records ({} blank, {} failed) in {:.2}s",
                stats.embedded, stats.records, stats.skipped, stats.failed, stats.duration_secs
            );
        }
        println!(
            "Rebuilt {} index: {} vectors, {} partitions",
            summary.kind.as_str(),
            summary.vector_count,
            summary.partitions
        );

        Ok(())
    }
}
