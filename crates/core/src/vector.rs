//! Core record types.
//!
//! A [`Vector`] is a dense float array plus [`Metadata`]; a [`SparseVector`] stores
//! `(index, value)` entries under a logical dimension. Callers always receive copies:
//! the engine owns its storage and hands out [`Record`]s inside [`SearchResult`]s.

use crate::config;
use crate::error::{Result, VectorDbError};
use serde::{Deserialize, Serialize};

/// Ordered string key/value metadata.
///
/// Insertion order is preserved and keys are unique: setting an existing key
/// replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    entries: Vec<(String, String)>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds metadata from pairs. Later duplicates overwrite earlier values.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut meta = Self::new();
        for (k, v) in pairs {
            meta.set(k, v);
        }
        meta
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Sets `key` to `value`. Returns the previous value if the key existed.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => Some(std::mem::replace(v, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    /// Overwrites or appends every entry of `other`, keeping this map's order for existing keys.
    pub fn merge(&mut self, other: &Metadata) {
        for (k, v) in other.iter() {
            self.set(k, v);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Approximate heap footprint in bytes.
    pub fn heap_bytes(&self) -> usize {
        self.entries
            .iter()
            .map(|(k, v)| k.capacity() + v.capacity() + 48)
            .sum()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.entries.len() > config::MAX_METADATA_KEYS {
            return Err(VectorDbError::InvalidArgument(format!(
                "too many metadata entries: {} (max {})",
                self.entries.len(),
                config::MAX_METADATA_KEYS
            )));
        }
        if self.entries.iter().any(|(k, _)| k.is_empty()) {
            return Err(VectorDbError::InvalidArgument(
                "metadata keys must be non-empty".into(),
            ));
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

/// A dense vector with metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vector {
    pub data: Vec<f32>,
    pub metadata: Metadata,
}

impl Vector {
    pub fn new(data: Vec<f32>) -> Self {
        Self {
            data,
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(data: Vec<f32>, metadata: Metadata) -> Self {
        Self { data, metadata }
    }

    pub fn dimension(&self) -> usize {
        self.data.len()
    }
}

/// One non-zero coordinate of a sparse vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SparseEntry {
    pub index: u32,
    pub value: f32,
}

/// A sparse vector: `nnz` entries under a logical `dimension`.
///
/// Entries are always sorted by index, unique, non-zero and inside
/// `dimension`; the constructors enforce it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SparseVector {
    dimension: usize,
    entries: Vec<SparseEntry>,
    pub metadata: Metadata,
}

impl SparseVector {
    /// Builds a sparse vector from parallel index/value slices.
    ///
    /// Entries are sorted by index; duplicate indices are summed and explicit
    /// zeros dropped. Fails if the slices differ in length or an index is
    /// outside `dimension`.
    pub fn new(dimension: usize, indices: &[u32], values: &[f32]) -> Result<Self> {
        if indices.len() != values.len() {
            return Err(VectorDbError::InvalidArgument(format!(
                "sparse indices ({}) and values ({}) differ in length",
                indices.len(),
                values.len()
            )));
        }
        let mut entries: Vec<SparseEntry> = indices
            .iter()
            .zip(values)
            .map(|(&index, &value)| SparseEntry { index, value })
            .collect();
        if let Some(bad) = entries.iter().find(|e| e.index as usize >= dimension) {
            return Err(VectorDbError::InvalidArgument(format!(
                "sparse index {} out of range for dimension {}",
                bad.index, dimension
            )));
        }
        if entries.iter().any(|e| !e.value.is_finite()) {
            return Err(VectorDbError::InvalidArgument(
                "sparse values must be finite".into(),
            ));
        }
        entries.sort_by_key(|e| e.index);
        let mut merged: Vec<SparseEntry> = Vec::with_capacity(entries.len());
        for e in entries {
            match merged.last_mut() {
                Some(last) if last.index == e.index => last.value += e.value,
                _ => merged.push(e),
            }
        }
        merged.retain(|e| e.value != 0.0);
        Ok(Self {
            dimension,
            entries: merged,
            metadata: Metadata::new(),
        })
    }

    /// Converts a dense slice, keeping non-zero coordinates.
    pub fn from_dense(data: &[f32]) -> Self {
        let entries = data
            .iter()
            .enumerate()
            .filter(|(_, &v)| v != 0.0)
            .map(|(i, &v)| SparseEntry {
                index: i as u32,
                value: v,
            })
            .collect();
        Self {
            dimension: data.len(),
            entries,
            metadata: Metadata::new(),
        }
    }

    /// Wraps entries already known to satisfy the ordering invariant.
    pub(crate) fn from_sorted(dimension: usize, entries: Vec<SparseEntry>, metadata: Metadata) -> Self {
        Self {
            dimension,
            entries,
            metadata,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn entries(&self) -> &[SparseEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<SparseEntry> {
        self.entries
    }

    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    pub fn to_dense(&self) -> Vec<f32> {
        let mut out = vec![0.0f32; self.dimension];
        for e in &self.entries {
            out[e.index as usize] = e.value;
        }
        out
    }
}

/// A record copied out of the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Dense(Vector),
    Sparse(SparseVector),
}

impl Record {
    pub fn metadata(&self) -> &Metadata {
        match self {
            Record::Dense(v) => &v.metadata,
            Record::Sparse(s) => &s.metadata,
        }
    }

    /// Dense coordinates, if this is a dense record.
    pub fn data(&self) -> Option<&[f32]> {
        match self {
            Record::Dense(v) => Some(&v.data),
            Record::Sparse(_) => None,
        }
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, Record::Sparse(_))
    }
}

/// A search hit: slot index, distance (lower is closer) and a copy of the record.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub index: usize,
    pub distance: f32,
    pub record: Record,
}

/// Per-query overrides. `None` falls back to the index configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchParams {
    /// HNSW beam width at layer 0.
    pub ef_search: Option<usize>,
    /// IVF lists probed.
    pub nprobe: Option<usize>,
    /// Approximate candidates reranked with exact distances (IVF-PQ, PQ).
    pub rerank_top: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Metadata ───────────────────────────────────────────────────────

    #[test]
    fn test_metadata_preserves_insertion_order() {
        let meta = Metadata::from_pairs([("b", "1"), ("a", "2"), ("c", "3")]);
        let keys: Vec<&str> = meta.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_metadata_set_replaces_in_place() {
        let mut meta = Metadata::from_pairs([("x", "1"), ("y", "2")]);
        assert_eq!(meta.set("x", "9"), Some("1".to_string()));
        assert_eq!(meta.len(), 2);
        let pairs: Vec<(&str, &str)> = meta.iter().collect();
        assert_eq!(pairs, vec![("x", "9"), ("y", "2")]);
    }

    #[test]
    fn test_metadata_merge() {
        let mut meta = Metadata::from_pairs([("color", "red"), ("size", "m")]);
        meta.merge(&Metadata::from_pairs([("size", "l"), ("shape", "round")]));
        let pairs: Vec<(&str, &str)> = meta.iter().collect();
        assert_eq!(
            pairs,
            vec![("color", "red"), ("size", "l"), ("shape", "round")]
        );
    }

    #[test]
    fn test_metadata_remove() {
        let mut meta = Metadata::from_pairs([("a", "1")]);
        assert_eq!(meta.remove("a"), Some("1".to_string()));
        assert!(meta.is_empty());
        assert_eq!(meta.remove("a"), None);
    }

    #[test]
    fn test_metadata_rejects_empty_key() {
        let meta = Metadata::from_pairs([("", "v")]);
        assert!(meta.validate().is_err());
    }

    // ── Sparse vectors ─────────────────────────────────────────────────

    #[test]
    fn test_sparse_new_sorts_and_merges() {
        let sv = SparseVector::new(10, &[7, 2, 7, 4], &[1.0, 2.0, 0.5, 0.0]).unwrap();
        let idx: Vec<u32> = sv.entries().iter().map(|e| e.index).collect();
        assert_eq!(idx, vec![2, 7]);
        assert_eq!(sv.entries()[1].value, 1.5);
    }

    #[test]
    fn test_sparse_new_rejects_out_of_range() {
        assert!(SparseVector::new(4, &[4], &[1.0]).is_err());
        assert!(SparseVector::new(4, &[1, 2], &[1.0]).is_err());
    }

    #[test]
    fn test_sparse_dense_conversion() {
        let sv = SparseVector::from_dense(&[0.0, 3.0, 0.0, -1.0]);
        assert_eq!(sv.nnz(), 2);
        assert_eq!(sv.to_dense(), vec![0.0, 3.0, 0.0, -1.0]);
    }
}
