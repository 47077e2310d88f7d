//! On-disk layout of the vector index.
//!
//! ```text
//! magic "NRVX" | version u16 | kind u8 | dimension u32 | count u32
//! | partitions u32 | nprobe u32
//! vectors    count * dimension f32
//! centroids  partitions * dimension f32
//! lists      per partition: len u32, then len positions u32
//! ```
//!
//! All integers and floats are little-endian.

use super::IndexKind;
use newsrag_core::{AppError, AppResult};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::Path;

pub const INDEX_MAGIC: [u8; 4] = *b"NRVX";
pub const INDEX_VERSION: u16 = 1;

const HEADER_LEN: usize = 4 + 2 + 1 + 4 * 4;

/// Decoded index file. Vectors are stored normalized, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexFile {
    pub kind: IndexKind,
    pub dimension: usize,
    pub nprobe: usize,
    pub vectors: Vec<f32>,
    pub centroids: Vec<f32>,
    pub lists: Vec<Vec<u32>>,
}

impl IndexFile {
    pub fn empty_flat(dimension: usize) -> Self {
        Self {
            kind: IndexKind::Flat,
            dimension,
            nprobe: 0,
            vectors: Vec::new(),
            centroids: Vec::new(),
            lists: Vec::new(),
        }
    }

    pub fn count(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.vectors.len() / self.dimension
        }
    }

    pub fn partitions(&self) -> usize {
        self.lists.len()
    }

    pub fn vector(&self, position: usize) -> &[f32] {
        let start = position * self.dimension;
        &self.vectors[start..start + self.dimension]
    }

    pub fn centroid(&self, partition: usize) -> &[f32] {
        let start = partition * self.dimension;
        &self.centroids[start..start + self.dimension]
    }

    /// Check structural invariants: slab sizes, and for a partitioned index
    /// that every position is listed exactly once.
    pub fn validate(&self) -> AppResult<()> {
        if self.dimension == 0 {
            return Err(corrupt("dimension is zero"));
        }
        if self.vectors.len() % self.dimension != 0 {
            return Err(corrupt("vector slab is not a multiple of the dimension"));
        }
        if self.centroids.len() != self.lists.len() * self.dimension {
            return Err(corrupt("centroid count does not match partition count"));
        }

        match self.kind {
            IndexKind::Flat => {
                if !self.lists.is_empty() {
                    return Err(corrupt("flat index carries partitions"));
                }
            }
            IndexKind::Partitioned => {
                if self.lists.is_empty() {
                    return Err(corrupt("partitioned index has no partitions"));
                }
                let count = self.count();
                let mut seen = vec![false; count];
                for &position in self.lists.iter().flatten() {
                    let slot = seen
                        .get_mut(position as usize)
                        .ok_or_else(|| corrupt(&format!("position {} out of range", position)))?;
                    if *slot {
                        return Err(corrupt(&format!("position {} listed twice", position)));
                    }
                    *slot = true;
                }
                if seen.iter().any(|s| !s) {
                    return Err(corrupt("some positions belong to no partition"));
                }
            }
        }

        Ok(())
    }

    pub fn to_bytes(&self) -> AppResult<Vec<u8>> {
        self.validate()?;

        let list_len: usize = self.lists.iter().map(|l| 4 + l.len() * 4).sum();
        let mut buf = Vec::with_capacity(
            HEADER_LEN + (self.vectors.len() + self.centroids.len()) * 4 + list_len,
        );

        buf.extend_from_slice(&INDEX_MAGIC);
        buf.extend_from_slice(&INDEX_VERSION.to_le_bytes());
        buf.push(self.kind.to_u8());
        buf.extend_from_slice(&to_u32(self.dimension, "dimension")?.to_le_bytes());
        buf.extend_from_slice(&to_u32(self.count(), "count")?.to_le_bytes());
        buf.extend_from_slice(&to_u32(self.partitions(), "partitions")?.to_le_bytes());
        buf.extend_from_slice(&to_u32(self.nprobe, "nprobe")?.to_le_bytes());

        for value in self.vectors.iter().chain(self.centroids.iter()) {
            buf.extend_from_slice(&value.to_le_bytes());
        }
        for list in &self.lists {
            buf.extend_from_slice(&to_u32(list.len(), "list length")?.to_le_bytes());
            for position in list {
                buf.extend_from_slice(&position.to_le_bytes());
            }
        }

        Ok(buf)
    }

    pub fn from_bytes(bytes: &[u8]) -> AppResult<Self> {
        let mut reader = ByteReader::new(bytes);

        let magic = reader.take(4)?;
        if magic != INDEX_MAGIC {
            return Err(corrupt(&format!("invalid magic {:?}", magic)));
        }
        let version = reader.u16()?;
        if version != INDEX_VERSION {
            return Err(corrupt(&format!("unsupported version {}", version)));
        }
        let kind = IndexKind::from_u8(reader.u8()?)?;
        let dimension = reader.u32()? as usize;
        let count = reader.u32()? as usize;
        let partitions = reader.u32()? as usize;
        let nprobe = reader.u32()? as usize;

        let vector_len = count
            .checked_mul(dimension)
            .ok_or_else(|| corrupt("vector slab size overflows"))?;
        let vectors = reader.f32s(vector_len)?;
        let centroid_len = partitions
            .checked_mul(dimension)
            .ok_or_else(|| corrupt("centroid slab size overflows"))?;
        let centroids = reader.f32s(centroid_len)?;

        let mut lists = Vec::with_capacity(partitions.min(reader.remaining() / 4));
        for _ in 0..partitions {
            let len = reader.u32()? as usize;
            let mut list = Vec::with_capacity(len.min(reader.remaining() / 4));
            for _ in 0..len {
                list.push(reader.u32()?);
            }
            lists.push(list);
        }

        if reader.remaining() != 0 {
            return Err(corrupt(&format!("{} trailing bytes", reader.remaining())));
        }

        let file = Self {
            kind,
            dimension,
            nprobe,
            vectors,
            centroids,
            lists,
        };
        file.validate()?;
        Ok(file)
    }

    /// Read and validate the index at `path`.
    ///
    /// A missing or malformed file is `AppError::IndexUnavailable`.
    pub fn load(path: &Path) -> AppResult<Self> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(AppError::IndexUnavailable(format!(
                    "index file {:?} does not exist",
                    path
                )))
            }
            Err(e) => {
                return Err(AppError::IndexUnavailable(format!(
                    "failed to read index file {:?}: {}",
                    path, e
                )))
            }
        };
        Self::from_bytes(&bytes)
    }

    pub fn save(&self, path: &Path) -> AppResult<()> {
        write_atomic(path, &self.to_bytes()?)
    }
}

/// Write `bytes` to a sibling temp file, fsync it, then rename over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> AppResult<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = Path::new(&temp_name);

    let mut file = File::create(temp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    fs::rename(temp_path, path)?;
    Ok(())
}

fn corrupt(reason: &str) -> AppError {
    AppError::IndexUnavailable(format!("index file is corrupt: {}", reason))
}

fn to_u32(value: usize, what: &str) -> AppResult<u32> {
    u32::try_from(value)
        .map_err(|_| AppError::Other(format!("{} {} does not fit the index format", what, value)))
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn take(&mut self, len: usize) -> AppResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(corrupt(&format!(
                "truncated at byte {} (needed {} more)",
                self.offset, len
            )));
        }
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn u8(&mut self) -> AppResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> AppResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> AppResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f32s(&mut self, len: usize) -> AppResult<Vec<f32>> {
        let byte_len = len
            .checked_mul(4)
            .ok_or_else(|| corrupt("slab size overflows"))?;
        let bytes = self.take(byte_len)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn partitioned() -> IndexFile {
        IndexFile {
            kind: IndexKind::Partitioned,
            dimension: 2,
            nprobe: 1,
            vectors: vec![1.0, 0.0, 0.0, 1.0, 0.6, 0.8],
            centroids: vec![1.0, 0.0, 0.0, 1.0],
            lists: vec![vec![0], vec![1, 2]],
        }
    }

    #[test]
    fn test_bytes_roundtrip() {
        let file = partitioned();
        let bytes = file.to_bytes().unwrap();
        assert_eq!(&bytes[..4], b"NRVX");
        assert_eq!(IndexFile::from_bytes(&bytes).unwrap(), file);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = partitioned().to_bytes().unwrap();
        bytes[0] = b'X';
        let err = IndexFile::from_bytes(&bytes).unwrap_err();
        assert!(err.is_index_unavailable());
    }

    #[test]
    fn test_truncated_file_rejected() {
        let bytes = partitioned().to_bytes().unwrap();
        for cut in [3, HEADER_LEN, bytes.len() - 1] {
            let err = IndexFile::from_bytes(&bytes[..cut]).unwrap_err();
            assert!(err.is_index_unavailable(), "cut at {}", cut);
        }
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = IndexFile::empty_flat(4).to_bytes().unwrap();
        bytes.push(0);
        assert!(IndexFile::from_bytes(&bytes).unwrap_err().is_index_unavailable());
    }

    #[test]
    fn test_duplicate_position_rejected() {
        let mut file = partitioned();
        file.lists = vec![vec![0, 1], vec![1, 2]];
        assert!(file.validate().unwrap_err().is_index_unavailable());
    }

    #[test]
    fn test_unlisted_position_rejected() {
        let mut file = partitioned();
        file.lists = vec![vec![0], vec![2]];
        assert!(file.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_unavailable() {
        let temp = TempDir::new().unwrap();
        let err = IndexFile::load(&temp.path().join("vectors.idx")).unwrap_err();
        assert!(err.is_index_unavailable());
    }

    #[test]
    fn test_save_replaces_and_leaves_no_temp() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("vectors.idx");

        IndexFile::empty_flat(2).save(&path).unwrap();
        partitioned().save(&path).unwrap();

        assert_eq!(IndexFile::load(&path).unwrap(), partitioned());
        assert!(!temp.path().join("vectors.idx.tmp").exists());
    }
}
