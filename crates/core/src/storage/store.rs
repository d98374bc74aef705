//! Slot-addressed record storage.
//!
//! Records live in parallel arrays indexed by slot (insertion order). Dense
//! vectors share one contiguous `f32` arena; sparse vectors keep one sorted entry
//! list per slot. Deletion only sets a tombstone: data stays in place until
//! [`VectorStore::compacted`] rebuilds the arrays without gaps.

use crate::distance::{dense_sparse_distance, DistanceMetric};
use crate::error::{Result, VectorDbError};
use crate::vector::{Metadata, Record, SparseEntry, SparseVector, Vector};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStore {
    dimension: usize,
    sparse: bool,
    /// Dense vectors scaled to unit length at insert time.
    normalized: bool,
    data: Vec<f32>,
    sparse_rows: Vec<Vec<SparseEntry>>,
    metadata: Vec<Metadata>,
    deleted: Vec<bool>,
    live: usize,
}

impl VectorStore {
    pub fn new(dimension: usize, sparse: bool) -> Self {
        Self {
            dimension,
            sparse,
            normalized: false,
            data: Vec::new(),
            sparse_rows: Vec::new(),
            metadata: Vec::new(),
            deleted: Vec::new(),
            live: 0,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn is_sparse(&self) -> bool {
        self.sparse
    }

    pub fn is_normalized(&self) -> bool {
        self.normalized
    }

    pub(crate) fn set_normalized(&mut self, on: bool) {
        self.normalized = on;
    }

    /// Number of slots, live and tombstoned.
    pub fn len(&self) -> usize {
        self.deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.live
    }

    pub fn deleted_count(&self) -> usize {
        self.len() - self.live
    }

    /// Fraction of slots that are tombstoned (0 for an empty store).
    pub fn deleted_ratio(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            self.deleted_count() as f64 / self.len() as f64
        }
    }

    #[inline]
    pub fn is_deleted(&self, slot: u32) -> bool {
        self.deleted.get(slot as usize).copied().unwrap_or(true)
    }

    #[inline]
    pub fn is_live(&self, slot: u32) -> bool {
        !self.is_deleted(slot)
    }

    /// Fails unless `slot` names a live record.
    pub fn check_live(&self, slot: usize) -> Result<()> {
        if slot >= self.len() {
            return Err(VectorDbError::IndexOutOfRange {
                index: slot,
                count: self.len(),
            });
        }
        if self.deleted[slot] {
            return Err(VectorDbError::Deleted(slot));
        }
        Ok(())
    }

    /// Dense coordinates of `slot`. Empty for sparse stores.
    #[inline]
    pub fn vector(&self, slot: u32) -> &[f32] {
        if self.sparse {
            return &[];
        }
        let start = slot as usize * self.dimension;
        &self.data[start..start + self.dimension]
    }

    /// Sparse entries of `slot`. Empty for dense stores.
    #[inline]
    pub fn sparse_entries(&self, slot: u32) -> &[SparseEntry] {
        self.sparse_rows
            .get(slot as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn metadata(&self, slot: u32) -> &Metadata {
        &self.metadata[slot as usize]
    }

    /// Distance from a dense query to `slot`.
    ///
    /// The query must already be normalized when the store is and `metric` is Cosine.
    #[inline]
    pub fn distance(&self, metric: DistanceMetric, query: &[f32], slot: u32) -> f32 {
        if self.sparse {
            return dense_sparse_distance(metric, query, self.sparse_entries(slot));
        }
        let v = self.vector(slot);
        if self.normalized {
            metric.distance_normalized(query, v)
        } else {
            metric.distance(query, v)
        }
    }

    /// Distance between two stored dense records.
    #[inline]
    pub fn distance_between(&self, metric: DistanceMetric, a: u32, b: u32) -> f32 {
        if self.normalized {
            metric.distance_normalized(self.vector(a), self.vector(b))
        } else {
            metric.distance(self.vector(a), self.vector(b))
        }
    }

    /// Copy of the record at `slot`.
    pub fn record(&self, slot: u32) -> Record {
        let metadata = self.metadata(slot).clone();
        if self.sparse {
            Record::Sparse(SparseVector::from_sorted(
                self.dimension,
                self.sparse_entries(slot).to_vec(),
                metadata,
            ))
        } else {
            Record::Dense(Vector::with_metadata(self.vector(slot).to_vec(), metadata))
        }
    }

    /// Live slots in ascending order.
    pub fn live_slots(&self) -> impl Iterator<Item = u32> + '_ {
        self.deleted
            .iter()
            .enumerate()
            .filter(|(_, &d)| !d)
            .map(|(i, _)| i as u32)
    }

    /// Appends a dense record. Returns its slot.
    pub(crate) fn push_dense(&mut self, data: &[f32], metadata: Metadata) -> u32 {
        debug_assert!(!self.sparse && data.len() == self.dimension);
        let slot = self.len() as u32;
        self.data.extend_from_slice(data);
        self.metadata.push(metadata);
        self.deleted.push(false);
        self.live += 1;
        slot
    }

    /// Appends a sparse record. Returns its slot.
    pub(crate) fn push_sparse(&mut self, entries: Vec<SparseEntry>, metadata: Metadata) -> u32 {
        debug_assert!(self.sparse);
        let slot = self.len() as u32;
        self.sparse_rows.push(entries);
        self.metadata.push(metadata);
        self.deleted.push(false);
        self.live += 1;
        slot
    }

    pub(crate) fn set_dense(&mut self, slot: u32, data: &[f32]) {
        let start = slot as usize * self.dimension;
        self.data[start..start + self.dimension].copy_from_slice(data);
    }

    pub(crate) fn set_sparse(&mut self, slot: u32, entries: Vec<SparseEntry>) {
        self.sparse_rows[slot as usize] = entries;
    }

    pub(crate) fn metadata_mut(&mut self, slot: u32) -> &mut Metadata {
        &mut self.metadata[slot as usize]
    }

    /// Tombstones `slot`. Returns false if it was already deleted or out of range.
    pub(crate) fn tombstone(&mut self, slot: u32) -> bool {
        match self.deleted.get_mut(slot as usize) {
            Some(d) if !*d => {
                *d = true;
                self.live -= 1;
                true
            }
            _ => false,
        }
    }

    /// Builds a gap-free copy holding only live records.
    ///
    /// Returns the new store and `remap[old_slot] = Some(new_slot)` for live slots.
    pub(crate) fn compacted(&self) -> (VectorStore, Vec<Option<u32>>) {
        let mut out = VectorStore::new(self.dimension, self.sparse);
        out.normalized = self.normalized;
        let mut remap = vec![None; self.len()];
        for slot in self.live_slots() {
            let meta = self.metadata(slot).clone();
            let new_slot = if self.sparse {
                out.push_sparse(self.sparse_entries(slot).to_vec(), meta)
            } else {
                out.push_dense(self.vector(slot), meta)
            };
            remap[slot as usize] = Some(new_slot);
        }
        (out, remap)
    }

    /// Live dense vectors as one flat arena, in slot order.
    pub fn live_arena(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.live * self.dimension);
        for slot in self.live_slots() {
            out.extend_from_slice(self.vector(slot));
        }
        out
    }

    /// Bytes held by vector data.
    pub fn vector_bytes(&self) -> usize {
        self.data.capacity() * std::mem::size_of::<f32>()
            + self
                .sparse_rows
                .iter()
                .map(|r| r.capacity() * std::mem::size_of::<SparseEntry>() + 24)
                .sum::<usize>()
            + self.deleted.capacity()
    }

    /// Bytes held by metadata.
    pub fn metadata_bytes(&self) -> usize {
        self.metadata.iter().map(Metadata::heap_bytes).sum::<usize>()
            + self.metadata.capacity() * std::mem::size_of::<Metadata>()
    }

    /// Structural consistency check for loaded snapshots.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let n = self.deleted.len();
        if self.metadata.len() != n {
            return Err(format!("metadata len {} != slot count {}", self.metadata.len(), n));
        }
        if self.sparse {
            if self.sparse_rows.len() != n {
                return Err(format!("sparse rows {} != slot count {}", self.sparse_rows.len(), n));
            }
            for (slot, row) in self.sparse_rows.iter().enumerate() {
                if row.iter().any(|e| e.index as usize >= self.dimension) {
                    return Err(format!("sparse slot {slot} has an out-of-range index"));
                }
            }
        } else if self.data.len() != n * self.dimension {
            return Err(format!(
                "vector arena len {} != {} slots x dim {}",
                self.data.len(),
                n,
                self.dimension
            ));
        }
        let live = self.deleted.iter().filter(|&&d| !d).count();
        if live != self.live {
            return Err(format!("live count {} != {} untombstoned slots", self.live, live));
        }
        Ok(())
    }
}
