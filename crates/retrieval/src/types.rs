//! Retrieval type definitions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Record id assigned by the store.
pub type RecordId = i64;

/// An article as supplied by the scraper, before identity resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewArticle {
    pub title: String,

    #[serde(default)]
    pub content: Option<String>,

    pub url: String,
}

impl NewArticle {
    pub fn new(title: impl Into<String>, content: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: Some(content.into()),
            url: url.into(),
        }
    }

    /// Text that gets embedded: title and full content separated by a newline.
    pub fn embedding_text(&self) -> String {
        embedding_text(&self.title, self.content.as_deref())
    }
}

/// Build the embedding input for a title/content pair.
///
/// Content is never truncated.
pub fn embedding_text(title: &str, content: Option<&str>) -> String {
    format!("{}\n{}", title, content.unwrap_or(""))
}

/// A persisted article row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub id: RecordId,
    pub title: String,
    pub content: Option<String>,
    pub url: String,

    /// Raw (unnormalized) embedding as stored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Whether an upsert created a row or merged into an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

impl UpsertOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpsertOutcome::Inserted => "insert",
            UpsertOutcome::Updated => "update",
        }
    }
}

/// An article that could not be written during a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedArticle {
    /// Position of the article within the submitted batch
    pub index: usize,
    pub url: String,
    pub error: String,
}

/// How the vector index was brought up to date after a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Nothing changed, no sync triggered
    Skipped,
    Incremental,
    /// Incremental sync was impossible; the index was rebuilt from the store
    Rebuilt,
}

/// Result of resolving a batch of articles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub inserted_ids: BTreeSet<RecordId>,
    pub updated_ids: BTreeSet<RecordId>,

    /// Embedding computed for each submitted article, in batch order.
    /// `None` when embedding was skipped or failed.
    #[serde(skip)]
    pub embeddings: Vec<Option<Vec<f32>>>,

    pub failed: Vec<FailedArticle>,

    pub sync: SyncMode,

    /// Vectors synced into the index by this batch
    pub synced_vectors: usize,

    /// Total vectors in the index after the sync
    pub index_vectors: usize,
}

impl BatchReport {
    pub fn touched_ids(&self) -> BTreeSet<RecordId> {
        self.inserted_ids.union(&self.updated_ids).copied().collect()
    }
}

/// A query hit: the article plus its cosine similarity to the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredArticle {
    pub id: RecordId,
    pub title: String,
    pub url: String,
    pub content: Option<String>,
    pub score: f32,
}

impl ScoredArticle {
    pub fn from_record(record: ArticleRecord, score: f32) -> Self {
        Self {
            id: record.id,
            title: record.title,
            url: record.url,
            content: record.content,
            score,
        }
    }
}
