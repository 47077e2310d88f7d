//! Position-to-record mapping persisted next to the index.
//!
//! Stored as a JSON object keyed by the decimal position, e.g.
//! `{"0": 17, "1": 4}`. Keys must cover `0..n` with no gaps.

use super::format::write_atomic;
use crate::types::RecordId;
use newsrag_core::{AppError, AppResult};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionMap {
    ids: Vec<RecordId>,
}

impl PositionMap {
    pub fn new(ids: Vec<RecordId>) -> Self {
        Self { ids }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<RecordId> {
        self.ids.get(position).copied()
    }

    /// Append `other`'s ids after this map's last position.
    pub fn append(&mut self, other: PositionMap) {
        self.ids.extend(other.ids);
    }

    pub fn to_json(&self) -> AppResult<String> {
        let object: BTreeMap<String, RecordId> = self
            .ids
            .iter()
            .enumerate()
            .map(|(position, id)| (position.to_string(), *id))
            .collect();
        Ok(serde_json::to_string(&object)?)
    }

    pub fn from_json(json: &str) -> AppResult<Self> {
        let object: BTreeMap<String, RecordId> = serde_json::from_str(json)
            .map_err(|e| AppError::IndexUnavailable(format!("mapping is not valid JSON: {}", e)))?;

        let len = object.len();
        let mut slots: Vec<Option<RecordId>> = vec![None; len];
        for (key, id) in object {
            let position: usize = key.parse().map_err(|_| {
                AppError::IndexUnavailable(format!("mapping key '{}' is not a position", key))
            })?;
            let slot = slots.get_mut(position).ok_or_else(|| {
                AppError::IndexUnavailable(format!(
                    "mapping position {} is outside 0..{}",
                    position, len
                ))
            })?;
            // "01" and "1" parse to the same position
            if slot.replace(id).is_some() {
                return Err(AppError::IndexUnavailable(format!(
                    "mapping position {} appears twice",
                    position
                )));
            }
        }

        // Keys are unique and all below len, so every slot is filled
        let ids = slots.into_iter().flatten().collect();
        Ok(Self { ids })
    }

    /// Read the mapping at `path`. Missing or malformed is `IndexUnavailable`.
    pub fn load(path: &Path) -> AppResult<Self> {
        match fs::read_to_string(path) {
            Ok(json) => Self::from_json(&json),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(AppError::IndexUnavailable(format!(
                "mapping file {:?} does not exist",
                path
            ))),
            Err(e) => Err(AppError::IndexUnavailable(format!(
                "failed to read mapping file {:?}: {}",
                path, e
            ))),
        }
    }

    pub fn save(&self, path: &Path) -> AppResult<()> {
        write_atomic(path, self.to_json()?.as_bytes())
    }
}
