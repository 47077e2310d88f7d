//! Persistent inner-product vector index.
//!
//! Two files make up the index: the binary vector file (see [`format`]) and
//! a JSON position mapping (see [`mapping`]). Both are replaced by
//! temp-file-and-rename, index first. If the two disagree, or either is
//! missing or unreadable, loading fails with `AppError::IndexUnavailable`
//! and the caller is expected to rebuild from the record store.
//!
//! Small collections get a flat index searched exhaustively. Larger ones are
//! split into k-means partitions and only the closest `nprobe` partitions
//! are scanned, so results there are approximate.

pub mod format;
pub mod mapping;
pub mod partition;

use crate::config::IndexConfig;
use crate::store::RecordStore;
use crate::types::RecordId;
use format::IndexFile;
use mapping::PositionMap;
use newsrag_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Index structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Exhaustive scan
    Flat,
    /// Partitioned, probed scan
    Partitioned,
}

impl IndexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexKind::Flat => "flat",
            IndexKind::Partitioned => "partitioned",
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            IndexKind::Flat => 0,
            IndexKind::Partitioned => 1,
        }
    }

    pub(crate) fn from_u8(value: u8) -> AppResult<Self> {
        match value {
            0 => Ok(IndexKind::Flat),
            1 => Ok(IndexKind::Partitioned),
            other => Err(AppError::IndexUnavailable(format!(
                "index file is corrupt: unknown index kind {}",
                other
            ))),
        }
    }
}

/// Shape of a persisted index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSummary {
    pub kind: IndexKind,
    pub dimension: usize,
    pub vector_count: usize,
    pub mapping_len: usize,
    pub partitions: usize,
    pub nprobe: usize,
}

/// An index and its mapping read from disk together.
///
/// Positions returned by [`LoadedIndex::search`] resolve through the same
/// snapshot, so a concurrent rewrite on disk cannot mismatch them.
#[derive(Debug, Clone)]
pub struct LoadedIndex {
    file: IndexFile,
    mapping: PositionMap,
}

impl LoadedIndex {
    pub fn kind(&self) -> IndexKind {
        self.file.kind
    }

    pub fn dimension(&self) -> usize {
        self.file.dimension
    }

    pub fn len(&self) -> usize {
        self.file.count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn resolve(&self, position: usize) -> Option<RecordId> {
        self.mapping.get(position)
    }

    pub fn summary(&self) -> IndexSummary {
        IndexSummary {
            kind: self.file.kind,
            dimension: self.file.dimension,
            vector_count: self.file.count(),
            mapping_len: self.mapping.len(),
            partitions: self.file.partitions(),
            nprobe: self.file.nprobe,
        }
    }

    /// Top `k` `(position, score)` pairs for `query`, best first.
    ///
    /// The query is normalized, so scores are cosine similarities. Ties are
    /// broken by ascending position.
    pub fn search(&self, query: &[f32], k: usize) -> AppResult<Vec<(usize, f32)>> {
        if query.len() != self.file.dimension {
            return Err(AppError::Embedding(format!(
                "Query has {} dimensions, index expects {}",
                query.len(),
                self.file.dimension
            )));
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = query.to_vec();
        partition::normalize(&mut query);

        let mut hits: Vec<(usize, f32)> = match self.file.kind {
            IndexKind::Flat => (0..self.len())
                .map(|position| (position, partition::dot(self.file.vector(position), &query)))
                .collect(),
            IndexKind::Partitioned => {
                let nprobe = self.file.nprobe.clamp(1, self.file.partitions());
                partition::select_probes(&self.file.centroids, self.file.dimension, &query, nprobe)
                    .into_iter()
                    .flat_map(|c| self.file.lists[c].iter())
                    .map(|&position| {
                        let position = position as usize;
                        (position, partition::dot(self.file.vector(position), &query))
                    })
                    .collect()
            }
        };

        hits.sort_by(partition::rank);
        hits.truncate(k);
        Ok(hits)
    }
}

/// Handle on the index files named by an [`IndexConfig`].
#[derive(Debug, Clone)]
pub struct VectorIndex {
    index_path: PathBuf,
    mapping_path: PathBuf,
    dimension: usize,
    flat_threshold: usize,
    max_partitions: usize,
    nprobe: usize,
    kmeans_iterations: usize,
}

impl VectorIndex {
    pub fn new(config: &IndexConfig) -> Self {
        Self {
            index_path: config.index_path(),
            mapping_path: config.mapping_path(),
            dimension: config.dimensions(),
            flat_threshold: config.flat_threshold,
            max_partitions: config.max_partitions,
            nprobe: config.nprobe,
            kmeans_iterations: config.kmeans_iterations,
        }
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn mapping_path(&self) -> &Path {
        &self.mapping_path
    }

    pub fn exists(&self) -> bool {
        self.index_path.exists()
    }

    /// Read the index and mapping, checking they agree with each other and
    /// with the configured dimension.
    pub fn load(&self) -> AppResult<LoadedIndex> {
        let file = IndexFile::load(&self.index_path)?;
        let mapping = PositionMap::load(&self.mapping_path)?;

        if mapping.len() != file.count() {
            return Err(AppError::IndexUnavailable(format!(
                "mapping has {} entries but index holds {} vectors",
                mapping.len(),
                file.count()
            )));
        }
        if file.dimension != self.dimension {
            return Err(AppError::IndexUnavailable(format!(
                "index was built with {} dimensions, configuration says {}",
                file.dimension, self.dimension
            )));
        }

        Ok(LoadedIndex { file, mapping })
    }

    /// Load, then search. See [`LoadedIndex::search`].
    pub fn search(&self, query: &[f32], k: usize) -> AppResult<Vec<(usize, f32)>> {
        self.load()?.search(query, k)
    }

    pub fn inspect(&self) -> AppResult<IndexSummary> {
        Ok(self.load()?.summary())
    }

    /// Replace the index with one built from `records`.
    ///
    /// Up to `flat_threshold` records produce a flat index; more produce a
    /// partitioned one with `min(max_partitions, n)` partitions. Zero
    /// records produce an empty flat index.
    pub fn rebuild(&self, records: &[(RecordId, Vec<f32>)]) -> AppResult<IndexSummary> {
        let (vectors, mapping) = self.normalized(records)?;
        let count = mapping.len();

        let file = if count <= self.flat_threshold {
            IndexFile {
                kind: IndexKind::Flat,
                dimension: self.dimension,
                nprobe: 0,
                vectors,
                centroids: Vec::new(),
                lists: Vec::new(),
            }
        } else {
            self.partitioned(vectors)
        };

        let loaded = self.write(file, mapping)?;
        let summary = loaded.summary();
        tracing::info!(
            "Rebuilt {} index with {} vectors ({} partitions)",
            summary.kind.as_str(),
            summary.vector_count,
            summary.partitions
        );
        Ok(summary)
    }

    /// Append `records` to the persisted index.
    ///
    /// Flat indexes grow in place; partitioned indexes route each new vector
    /// to its nearest centroid without retraining. If no index file exists
    /// yet, a partitioned index is trained on this batch alone, so callers
    /// holding other embedded records should [`VectorIndex::rebuild`] instead.
    ///
    /// Fails with `IndexUnavailable` when an existing index or mapping
    /// cannot be read, or the two disagree.
    pub fn sync_incremental(&self, records: &[(RecordId, Vec<f32>)]) -> AppResult<IndexSummary> {
        if !self.exists() {
            if records.is_empty() {
                return self.rebuild(records);
            }
            let (vectors, mapping) = self.normalized(records)?;
            let file = self.partitioned(vectors);
            let summary = self.write(file, mapping)?.summary();
            tracing::info!(
                "Created partitioned index from a batch of {} vectors",
                summary.vector_count
            );
            return Ok(summary);
        }

        let LoadedIndex {
            mut file,
            mut mapping,
        } = self.load()?;

        if records.is_empty() {
            return Ok(LoadedIndex { file, mapping }.summary());
        }

        let (vectors, additions) = self.normalized(records)?;
        let start = file.count();
        for (offset, row) in vectors.chunks_exact(self.dimension).enumerate() {
            if file.kind == IndexKind::Partitioned {
                let c = partition::nearest_centroid(&file.centroids, file.dimension, row);
                let position = u32::try_from(start + offset).map_err(|_| {
                    AppError::Other("index position does not fit the index format".to_string())
                })?;
                file.lists[c].push(position);
            }
            file.vectors.extend_from_slice(row);
        }
        mapping.append(additions);

        let summary = self.write(file, mapping)?.summary();
        tracing::debug!(
            "Appended {} vectors; index now holds {}",
            records.len(),
            summary.vector_count
        );
        Ok(summary)
    }

    /// Load the index, rebuilding it from `store` if it is unavailable.
    pub fn open_or_rebuild(&self, store: &RecordStore) -> AppResult<LoadedIndex> {
        match self.load() {
            Ok(loaded) => Ok(loaded),
            Err(e) if e.is_index_unavailable() => {
                tracing::warn!("{}; rebuilding index from the record store", e);
                let records = store.get_embedded_records()?;
                self.rebuild(&records)?;
                self.load()
            }
            Err(e) => Err(e),
        }
    }

    fn partitioned(&self, vectors: Vec<f32>) -> IndexFile {
        let centroids = partition::train_centroids(
            &vectors,
            self.dimension,
            self.max_partitions,
            self.kmeans_iterations,
        );
        let lists = partition::assign_lists(&vectors, self.dimension, &centroids);
        IndexFile {
            kind: IndexKind::Partitioned,
            dimension: self.dimension,
            nprobe: self.nprobe,
            vectors,
            centroids,
            lists,
        }
    }

    /// Flatten and normalize `records`, checking every dimension.
    fn normalized(&self, records: &[(RecordId, Vec<f32>)]) -> AppResult<(Vec<f32>, PositionMap)> {
        if self.dimension == 0 {
            return Err(AppError::Config("Index dimension must be greater than zero".to_string()));
        }
        let mut vectors = Vec::with_capacity(records.len() * self.dimension);
        let mut ids = Vec::with_capacity(records.len());

        for (id, embedding) in records {
            if embedding.len() != self.dimension {
                return Err(AppError::Embedding(format!(
                    "Record {} has {} dimensions, index expects {}",
                    id,
                    embedding.len(),
                    self.dimension
                )));
            }
            let start = vectors.len();
            vectors.extend_from_slice(embedding);
            if !partition::normalize(&mut vectors[start..]) {
                tracing::debug!("Record {} has a zero embedding", id);
            }
            ids.push(*id);
        }

        Ok((vectors, PositionMap::new(ids)))
    }

    /// Persist index then mapping.
    fn write(&self, file: IndexFile, mapping: PositionMap) -> AppResult<LoadedIndex> {
        file.save(&self.index_path)?;
        mapping.save(&self.mapping_path)?;
        Ok(LoadedIndex { file, mapping })
    }
}
