//! Inverted-list index for sparse vectors.
//!
//! Postings map a dimension to the `(slot, value)` pairs that are non-zero there.
//! Dot and Cosine queries accumulate scores only over the query's non-zero
//! dimensions; other metrics scan every live record. Results are exact.

use crate::distance::{cmp_hits, DistanceMetric};
use crate::search::exact::TopK;
use crate::storage::VectorStore;
use crate::vector::SparseEntry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SparseIndex {
    postings: HashMap<u32, Vec<(u32, f32)>>,
    /// Dimensions each slot was posted under, for removal after the store changed.
    terms_of: Vec<Vec<u32>>,
    norms: Vec<f32>,
}

/// Non-zero entries of a dense query.
fn query_entries(query: &[f32]) -> Vec<SparseEntry> {
    query
        .iter()
        .enumerate()
        .filter(|(_, &v)| v != 0.0)
        .map(|(i, &value)| SparseEntry {
            index: i as u32,
            value,
        })
        .collect()
}

impl SparseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reassign_all(&mut self, store: &VectorStore) {
        self.postings.clear();
        self.terms_of = vec![Vec::new(); store.len()];
        self.norms = vec![0.0; store.len()];
        for slot in store.live_slots() {
            self.insert(store, slot);
        }
    }

    pub fn insert(&mut self, store: &VectorStore, slot: u32) {
        let entries = store.sparse_entries(slot);
        let s = slot as usize;
        if self.terms_of.len() <= s {
            self.terms_of.resize(s + 1, Vec::new());
            self.norms.resize(s + 1, 0.0);
        }
        let mut terms = Vec::with_capacity(entries.len());
        let mut norm_sq = 0.0f32;
        for e in entries {
            self.postings.entry(e.index).or_default().push((slot, e.value));
            terms.push(e.index);
            norm_sq += e.value * e.value;
        }
        self.terms_of[s] = terms;
        self.norms[s] = norm_sq.sqrt();
    }

    pub fn remove(&mut self, slot: u32) {
        let Some(terms) = self.terms_of.get_mut(slot as usize).map(std::mem::take) else {
            return;
        };
        for term in terms {
            if let Some(list) = self.postings.get_mut(&term) {
                list.retain(|&(s, _)| s != slot);
                if list.is_empty() {
                    self.postings.remove(&term);
                }
            }
        }
        self.norms[slot as usize] = 0.0;
    }

    pub fn update(&mut self, store: &VectorStore, slot: u32) {
        self.remove(slot);
        self.insert(store, slot);
    }

    /// Dot products with every slot sharing a dimension with the query.
    fn accumulate(&self, q: &[SparseEntry]) -> HashMap<u32, f32> {
        let mut scores: HashMap<u32, f32> = HashMap::new();
        for e in q {
            if let Some(list) = self.postings.get(&e.index) {
                for &(slot, value) in list {
                    *scores.entry(slot).or_insert(0.0) += e.value * value;
                }
            }
        }
        scores
    }

    fn score_to_distance(&self, metric: DistanceMetric, dot: f32, q_norm: f32, slot: u32) -> f32 {
        match metric {
            DistanceMetric::Cosine => {
                let d_norm = self.norms.get(slot as usize).copied().unwrap_or(0.0);
                if q_norm == 0.0 || d_norm == 0.0 {
                    1.0
                } else {
                    1.0 - (dot / (q_norm * d_norm)).clamp(-1.0, 1.0)
                }
            }
            _ => -dot,
        }
    }

    /// Exact k nearest. `query` is dense over the logical dimension.
    pub fn search<A>(
        &self,
        store: &VectorStore,
        query: &[f32],
        metric: DistanceMetric,
        k: usize,
        accept: &A,
    ) -> Vec<(f32, u32)>
    where
        A: Fn(u32) -> bool,
    {
        let mut top = TopK::new(k);
        if k == 0 {
            return Vec::new();
        }
        if !matches!(metric, DistanceMetric::DotProduct | DistanceMetric::Cosine) {
            for slot in store.live_slots().filter(|&s| accept(s)) {
                top.push(store.distance(metric, query, slot), slot);
            }
            return top.into_sorted();
        }

        let q = query_entries(query);
        let q_norm = q.iter().map(|e| e.value * e.value).sum::<f32>().sqrt();
        let scores = self.accumulate(&q);
        for (&slot, &dot) in &scores {
            if accept(slot) {
                top.push(self.score_to_distance(metric, dot, q_norm, slot), slot);
            }
        }
        // Records with no shared dimension all score a dot of zero.
        let zero = self.score_to_distance(metric, 0.0, q_norm, u32::MAX);
        if !top.is_full() || top.worst() >= zero {
            for slot in store.live_slots() {
                if !scores.contains_key(&slot) && accept(slot) {
                    top.push(self.score_to_distance(metric, 0.0, q_norm, slot), slot);
                }
            }
        }
        top.into_sorted()
    }

    pub fn range_search<A>(
        &self,
        store: &VectorStore,
        query: &[f32],
        metric: DistanceMetric,
        radius: f32,
        max_results: usize,
        accept: &A,
    ) -> Vec<(f32, u32)>
    where
        A: Fn(u32) -> bool,
    {
        let dotlike = matches!(metric, DistanceMetric::DotProduct | DistanceMetric::Cosine);
        let (scores, q_norm) = if dotlike {
            let q = query_entries(query);
            let n = q.iter().map(|e| e.value * e.value).sum::<f32>().sqrt();
            (self.accumulate(&q), n)
        } else {
            (HashMap::new(), 0.0)
        };
        let mut hits: Vec<(f32, u32)> = store
            .live_slots()
            .filter(|&s| accept(s))
            .map(|s| {
                let d = if dotlike {
                    let dot = scores.get(&s).copied().unwrap_or(0.0);
                    self.score_to_distance(metric, dot, q_norm, s)
                } else {
                    store.distance(metric, query, s)
                };
                (d, s)
            })
            .filter(|&(d, _)| d <= radius)
            .collect();
        hits.sort_unstable_by(cmp_hits);
        hits.truncate(max_results);
        hits
    }

    /// Number of distinct dimensions with at least one posting.
    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    pub fn heap_bytes(&self) -> usize {
        self.postings.values().map(|l| l.capacity() * 8 + 40).sum::<usize>()
            + self.terms_of.iter().map(|t| t.capacity() * 4 + 24).sum::<usize>()
            + self.norms.capacity() * 4
    }

    pub fn validate(&self, slots: usize) -> std::result::Result<(), String> {
        if self.terms_of.len() > slots || self.norms.len() != self.terms_of.len() {
            return Err("sparse index slot tables do not match the store".into());
        }
        if self.postings.values().flatten().any(|&(s, _)| s as usize >= slots) {
            return Err("sparse posting out of range".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::{Metadata, SparseVector};

    fn sparse_store(rows: &[&[(u32, f32)]]) -> VectorStore {
        let mut store = VectorStore::new(100, true);
        for row in rows {
            let (idx, vals): (Vec<u32>, Vec<f32>) = row.iter().copied().unzip();
            let sv = SparseVector::new(100, &idx, &vals).unwrap();
            store.push_sparse(sv.into_entries(), Metadata::new());
        }
        store
    }

    fn dense(pairs: &[(usize, f32)]) -> Vec<f32> {
        let mut q = vec![0.0; 100];
        for &(i, v) in pairs {
            q[i] = v;
        }
        q
    }

    #[test]
    fn test_dot_product_ranking() {
        let store = sparse_store(&[&[(1, 1.0), (5, 2.0)], &[(5, 3.0)], &[(7, 1.0)]]);
        let mut idx = SparseIndex::new();
        idx.reassign_all(&store);
        let hits = idx.search(&store, &dense(&[(5, 1.0)]), DistanceMetric::DotProduct, 3, &|_| true);
        assert_eq!(hits, vec![(-3.0, 1), (-2.0, 0), (0.0, 2)]);
    }

    #[test]
    fn test_zero_overlap_beats_negative_dot() {
        let store = sparse_store(&[&[(1, -4.0)], &[(9, 1.0)]]);
        let mut idx = SparseIndex::new();
        idx.reassign_all(&store);
        let hits = idx.search(&store, &dense(&[(1, 1.0)]), DistanceMetric::DotProduct, 2, &|_| true);
        assert_eq!(hits, vec![(0.0, 1), (4.0, 0)]);
    }

    #[test]
    fn test_cosine_matches_scan() {
        let store = sparse_store(&[&[(1, 1.0), (2, 1.0)], &[(2, 5.0)], &[(3, 1.0)]]);
        let mut idx = SparseIndex::new();
        idx.reassign_all(&store);
        let q = dense(&[(2, 1.0)]);
        let hits = idx.search(&store, &q, DistanceMetric::Cosine, 3, &|_| true);
        for &(d, s) in &hits {
            assert!((d - store.distance(DistanceMetric::Cosine, &q, s)).abs() < 1e-5);
        }
        assert_eq!(hits[0].1, 1);
    }

    #[test]
    fn test_update_moves_postings() {
        let mut store = sparse_store(&[&[(1, 1.0)], &[(2, 1.0)]]);
        let mut idx = SparseIndex::new();
        idx.reassign_all(&store);
        store.set_sparse(0, vec![SparseEntry { index: 2, value: 9.0 }]);
        idx.update(&store, 0);
        let hits = idx.search(&store, &dense(&[(2, 1.0)]), DistanceMetric::DotProduct, 1, &|_| true);
        assert_eq!(hits, vec![(-9.0, 0)]);
        assert_eq!(idx.term_count(), 1);
    }

    #[test]
    fn test_euclidean_scan_and_range() {
        let store = sparse_store(&[&[(0, 3.0)], &[(0, 1.0)]]);
        let mut idx = SparseIndex::new();
        idx.reassign_all(&store);
        let q = dense(&[(0, 1.0)]);
        let hits = idx.search(&store, &q, DistanceMetric::Euclidean, 2, &|_| true);
        assert_eq!(hits, vec![(0.0, 1), (2.0, 0)]);
        let ranged = idx.range_search(&store, &q, DistanceMetric::Euclidean, 1.0, 10, &|_| true);
        assert_eq!(ranged, vec![(0.0, 1)]);
    }
}
