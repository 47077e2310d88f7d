//! News article retrieval engine.
//!
//! Articles live in a SQLite record store together with their embeddings.
//! A persisted inner-product vector index answers similarity queries, and
//! a position mapping joins index hits back to store records.
//!
//! - [`UpsertResolver`] writes scraped batches and keeps the index in step.
//! - [`QueryService`] answers "which articles are closest to this text".
//! - [`IndexBuilder`] rebuilds, re-embeds and reports health.

pub mod builder;
pub mod config;
pub mod embeddings;
pub mod query;
pub mod resolver;
pub mod store;
pub mod types;
pub mod vector_index;

#[cfg(test)]
mod tests;

pub use builder::{IndexBuilder, IndexStats, ReembedStats};
pub use config::{load_config, save_config, IndexConfig};
pub use embeddings::{create_provider, create_provider_unverified, EmbeddingConfig, EmbeddingProvider};
pub use query::QueryService;
pub use resolver::{plan, Resolution, UpsertResolver};
pub use store::RecordStore;
pub use types::{
    ArticleRecord, BatchReport, FailedArticle, NewArticle, RecordId, ScoredArticle, SyncMode,
    UpsertOutcome,
};
pub use vector_index::{IndexKind, IndexSummary, LoadedIndex, VectorIndex};
