//! Stats command handler.

use super::format_bytes;
use clap::Args;
use newsrag_core::{config::AppConfig, AppResult};
use newsrag_retrieval::IndexBuilder;

/// Show store and index statistics
#[derive(Args, Debug)]
pub struct StatsCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl StatsCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing stats command");

        let index_config = super::index_config(config)?;
        let stats = IndexBuilder::open(&index_config)?.stats()?;

        if self.json {
            return super::print_json(&stats);
        }

        println!("Records:   {} ({} embedded)", stats.records, stats.embedded);
        match &stats.index {
            Some(index) => println!(
                "Index:     {} ({} vectors, {} partitions, nprobe {})",
                index.kind.as_str(),
                index.vector_count,
                index.partitions,
                index.nprobe
            ),
            None => println!("Index:     unavailable (run `newsrag rebuild`)"),
        }
        println!("Database:  {}", format_bytes(stats.database_bytes));
        println!(
            "Index file: {} (+ {} mapping)",
            format_bytes(stats.index_bytes),
            format_bytes(stats.mapping_bytes)
        );
        println!("Consistent: {}", if stats.consistent { "yes" } else { "no" });

        Ok(())
    }
}
