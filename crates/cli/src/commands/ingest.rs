//! Ingest command handler.
//!
//! Reads scraped articles and upserts them as one batch.

use clap::Args;
use newsrag_core::{config::AppConfig, AppError, AppResult};
use newsrag_retrieval::{create_provider_unverified, NewArticle, UpsertResolver};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Upsert articles from JSON or JSON Lines files
#[derive(Args, Debug)]
pub struct IngestCommand {
    /// Files or directories holding articles (`*.json`, `*.jsonl`)
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl IngestCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing ingest command");

        let mut articles = Vec::new();
        for file in collect_files(&self.paths)? {
            let mut parsed = read_articles(&file)?;
            tracing::debug!("Read {} articles from {:?}", parsed.len(), file);
            articles.append(&mut parsed);
        }

        let index_config = super::index_config(config)?;
        // Articles are stored even when the embedder is down
        let provider = create_provider_unverified(&index_config.embedding).await?;
        let resolver = UpsertResolver::open(&index_config, provider)?;

        let report = resolver.resolve_batch(&articles).await?;

        if self.json {
            super::print_json(&report)?;
        } else {
            println!(
                "Ingested {} articles: {} inserted, {} updated, {} failed",
                articles.len(),
                report.inserted_ids.len(),
                report.updated_ids.len(),
                report.failed.len()
            );
            // Failed articles also carry a `None` embedding
            let unembedded = report
                .embeddings
                .iter()
                .filter(|e| e.is_none())
                .count()
                .saturating_sub(report.failed.len());
            if unembedded > 0 {
                println!("{} articles stored without embedding", unembedded);
            }
            println!(
                "Index: {} vectors ({:?} sync, {} new)",
                report.index_vectors, report.sync, report.synced_vectors
            );
            for failed in &report.failed {
                println!("  failed #{} {}: {}", failed.index, failed.url, failed.error);
            }
        }

        Ok(())
    }
}

/// Expand directories into their `*.json` / `*.jsonl` files, sorted.
fn collect_files(paths: &[PathBuf]) -> AppResult<Vec<PathBuf>> {
    let mut files = Vec::new();

    for path in paths {
        if path.is_file() {
            files.push(path.clone());
        } else if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
                .map(|e| e.into_path())
                .filter(|p| p.is_file() && is_article_file(p))
                .collect();
            found.sort();
            files.extend(found);
        } else {
            return Err(AppError::Config(format!("No such file or directory: {:?}", path)));
        }
    }

    Ok(files)
}

fn is_article_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("json") | Some("jsonl")
    )
}

/// Parse one file: JSON Lines for `.jsonl`, otherwise a JSON array or a
/// single JSON object.
fn read_articles(path: &Path) -> AppResult<Vec<NewArticle>> {
    let text = fs::read_to_string(path)?;
    let context = |e: serde_json::Error| {
        AppError::Serialization(format!("Failed to parse articles in {:?}: {}", path, e))
    };

    if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
        return text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(context))
            .collect();
    }

    match serde_json::from_str::<serde_json::Value>(&text).map_err(context)? {
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(|item| serde_json::from_value(item).map_err(context))
            .collect(),
        other => Ok(vec![serde_json::from_value(other).map_err(context)?]),
    }
}
