//! SQLite-backed record store for articles and their embeddings.

use crate::config::IndexConfig;
use crate::resolver::{plan, Resolution};
use crate::types::{ArticleRecord, NewArticle, RecordId, UpsertOutcome};
use newsrag_core::{AppError, AppResult};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

/// SQLite caps host parameters per statement; stay well below it.
const MAX_IDS_PER_QUERY: usize = 500;

/// Durable table of article records.
///
/// `url` is unique, `title` is indexed but not unique. Embeddings are stored
/// as little-endian f32 blobs and may be null.
pub struct RecordStore {
    conn: Connection,
    path: PathBuf,
    dimensions: usize,
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("path", &self.path)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl RecordStore {
    /// Open (or create) the store described by `config`.
    pub fn open(config: &IndexConfig) -> AppResult<Self> {
        Self::open_path(&config.database_path(), config.dimensions())
    }

    /// Open (or create) a store at `db_path` holding `dimensions`-long embeddings.
    ///
    /// Creates the schema if needed and runs the embedding-column upgrade.
    pub fn open_path(db_path: &Path, dimensions: usize) -> AppResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AppError::Store(format!("Failed to create store directory: {}", e)))?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| AppError::Store(format!("Failed to open SQLite store: {}", e)))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS news (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                content TEXT,
                url TEXT UNIQUE,
                embedding BLOB
            );

            CREATE INDEX IF NOT EXISTS idx_news_title ON news(title);
            "#,
        )
        .map_err(|e| AppError::Store(format!("Failed to create tables: {}", e)))?;

        let store = Self {
            conn,
            path: db_path.to_path_buf(),
            dimensions,
        };
        store.add_embedding_column_if_missing()?;

        tracing::debug!("Opened record store at {:?}", db_path);
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Add the `embedding` column to tables created before it existed.
    ///
    /// Returns `true` when the column was added. Safe to call repeatedly.
    pub fn add_embedding_column_if_missing(&self) -> AppResult<bool> {
        let mut stmt = self.conn.prepare("PRAGMA table_info(news)")?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        let has_embedding = columns.iter().any(|name| name == "embedding");

        if has_embedding {
            return Ok(false);
        }

        self.conn
            .execute("ALTER TABLE news ADD COLUMN embedding BLOB", [])
            .map_err(|e| AppError::Store(format!("Failed to add embedding column: {}", e)))?;
        tracing::info!("Added 'embedding' column to table 'news'");
        Ok(true)
    }

    /// Lowest-id record with exactly this title, with its url.
    pub fn find_by_title(&self, title: &str) -> AppResult<Option<(RecordId, String)>> {
        let found = self
            .conn
            .query_row(
                "SELECT id, url FROM news WHERE title = ?1 ORDER BY id LIMIT 1",
                params![title],
                |row| Ok((row.get(0)?, row.get::<_, Option<String>>(1)?.unwrap_or_default())),
            )
            .optional()?;
        Ok(found)
    }

    pub fn find_by_url(&self, url: &str) -> AppResult<Option<RecordId>> {
        let found = self
            .conn
            .query_row("SELECT id FROM news WHERE url = ?1", params![url], |row| row.get(0))
            .optional()?;
        Ok(found)
    }

    /// Resolve `article` against the current rows and write it.
    ///
    /// `embedding` is stored as given; `None` clears any previous embedding.
    pub fn upsert(
        &self,
        article: &NewArticle,
        embedding: Option<&[f32]>,
    ) -> AppResult<(RecordId, UpsertOutcome)> {
        if let Some(embedding) = embedding {
            self.check_dimensions(embedding)?;
        }

        let title_match = self.find_by_title(&article.title)?;
        let url_match = self.find_by_url(&article.url)?;
        let resolution = plan(
            title_match.as_ref().map(|(id, url)| (*id, url.as_str())),
            url_match,
            &article.url,
        );

        let blob = embedding.map(embedding_to_bytes);
        let id = match resolution {
            Resolution::Insert => {
                self.conn.execute(
                    "INSERT INTO news (title, content, url, embedding) VALUES (?1, ?2, ?3, ?4)",
                    params![article.title, article.content, article.url, blob],
                )?;
                self.conn.last_insert_rowid()
            }
            Resolution::Refresh { id } => {
                self.expect_one(
                    id,
                    self.conn.execute(
                        "UPDATE news SET content = ?1, embedding = ?2 WHERE id = ?3",
                        params![article.content, blob, id],
                    )?,
                )?;
                id
            }
            Resolution::Relink { id } => {
                self.expect_one(
                    id,
                    self.conn.execute(
                        "UPDATE news SET content = ?1, url = ?2, embedding = ?3 WHERE id = ?4",
                        params![article.content, article.url, blob, id],
                    )?,
                )?;
                id
            }
            Resolution::Retitle { id } => {
                self.expect_one(
                    id,
                    self.conn.execute(
                        "UPDATE news SET title = ?1, content = ?2, embedding = ?3 WHERE id = ?4",
                        params![article.title, article.content, blob, id],
                    )?,
                )?;
                id
            }
        };

        let outcome = resolution.outcome();
        tracing::debug!(
            "{} ({}) id={} url={}",
            outcome.as_str(),
            resolution.branch(),
            id,
            article.url
        );
        Ok((id, outcome))
    }

    /// Every `(id, embedding)` with a non-null embedding, ascending by id.
    ///
    /// Blobs that do not decode to the configured dimension are skipped.
    pub fn get_embedded_records(&self) -> AppResult<Vec<(RecordId, Vec<f32>)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, embedding FROM news WHERE embedding IS NOT NULL ORDER BY id")?;

        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, RecordId>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, bytes) = row?;
            match bytes_to_embedding(&bytes) {
                Ok(embedding) if embedding.len() == self.dimensions => records.push((id, embedding)),
                Ok(embedding) => tracing::warn!(
                    "Skipping record {}: embedding has {} dimensions, expected {}",
                    id,
                    embedding.len(),
                    self.dimensions
                ),
                Err(e) => tracing::warn!("Skipping record {}: {}", id, e),
            }
        }

        Ok(records)
    }

    /// Fetch records by id. Unknown ids are absent from the result.
    pub fn get_by_ids(&self, ids: &BTreeSet<RecordId>) -> AppResult<HashMap<RecordId, ArticleRecord>> {
        let ids: Vec<RecordId> = ids.iter().copied().collect();
        let mut found = HashMap::with_capacity(ids.len());

        for chunk in ids.chunks(MAX_IDS_PER_QUERY) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!(
                "SELECT id, title, content, url, embedding FROM news WHERE id IN ({})",
                placeholders
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), row_to_record)?;
            for record in rows {
                let record = record?;
                found.insert(record.id, record);
            }
        }

        Ok(found)
    }

    pub fn get_by_url(&self, url: &str) -> AppResult<Option<ArticleRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT id, title, content, url, embedding FROM news WHERE url = ?1",
                params![url],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// All records with this exact title, ascending by id.
    pub fn get_by_title(&self, title: &str) -> AppResult<Vec<ArticleRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, content, url, embedding FROM news WHERE title = ?1 ORDER BY id",
        )?;
        let records = stmt
            .query_map(params![title], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// `(id, title, content)` for every record, ascending by id.
    pub fn all_texts(&self) -> AppResult<Vec<(RecordId, String, Option<String>)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, title, content FROM news ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Overwrite one record's embedding (`None` clears it).
    pub fn set_embedding(&self, id: RecordId, embedding: Option<&[f32]>) -> AppResult<()> {
        if let Some(embedding) = embedding {
            self.check_dimensions(embedding)?;
        }
        let changed = self.conn.execute(
            "UPDATE news SET embedding = ?1 WHERE id = ?2",
            params![embedding.map(embedding_to_bytes), id],
        )?;
        self.expect_one(id, changed)
    }

    /// `(records, records_with_embedding)`
    pub fn counts(&self) -> AppResult<(u64, u64)> {
        let counts = self.conn.query_row(
            "SELECT COUNT(*), COUNT(embedding) FROM news",
            [],
            |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, i64>(1)? as u64)),
        )?;
        Ok(counts)
    }

    fn check_dimensions(&self, embedding: &[f32]) -> AppResult<()> {
        if embedding.len() != self.dimensions {
            return Err(AppError::Store(format!(
                "Embedding has {} dimensions, store expects {}",
                embedding.len(),
                self.dimensions
            )));
        }
        Ok(())
    }

    fn expect_one(&self, id: RecordId, changed: usize) -> AppResult<()> {
        if changed != 1 {
            return Err(AppError::Store(format!(
                "Expected to update record {}, {} rows changed",
                id, changed
            )));
        }
        Ok(())
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ArticleRecord> {
    let blob: Option<Vec<u8>> = row.get(4)?;
    Ok(ArticleRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        url: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        embedding: blob.and_then(|b| bytes_to_embedding(&b).ok()),
    })
}

/// Convert embedding vector to bytes for storage.
fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Convert bytes back to embedding vector.
fn bytes_to_embedding(bytes: &[u8]) -> AppResult<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(AppError::Store(format!(
            "Invalid embedding blob length {}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
