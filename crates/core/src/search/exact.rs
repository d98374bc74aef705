//! Brute-force exact search over the store.
//!
//! Used by the Flat index, by the exact-search fallback and as the reference
//! the approximate indexes are tested against.

use crate::distance::{cmp_hits, DistanceMetric};
use crate::storage::VectorStore;
use ordered_float::OrderedFloat;
use std::collections::BinaryHeap;

/// Bounded max-heap keeping the `k` smallest `(distance, slot)` pairs.
pub(crate) struct TopK {
    heap: BinaryHeap<(OrderedFloat<f32>, u32)>,
    k: usize,
}

impl TopK {
    pub(crate) fn new(k: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(k + 1),
            k,
        }
    }

    #[inline]
    pub(crate) fn push(&mut self, dist: f32, slot: u32) {
        if self.k == 0 {
            return;
        }
        let entry = (OrderedFloat(dist), slot);
        if self.heap.len() < self.k {
            self.heap.push(entry);
        } else if self.heap.peek().is_some_and(|top| entry < *top) {
            self.heap.pop();
            self.heap.push(entry);
        }
    }

    pub(crate) fn is_full(&self) -> bool {
        self.heap.len() >= self.k
    }

    /// Current k-th distance, or `f32::MAX` while not full.
    pub(crate) fn worst(&self) -> f32 {
        if self.is_full() {
            self.heap.peek().map_or(f32::MAX, |e| e.0 .0)
        } else {
            f32::MAX
        }
    }

    pub(crate) fn into_sorted(self) -> Vec<(f32, u32)> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|(d, s)| (d.0, s))
            .collect()
    }
}

/// Exact k nearest accepted slots, closest first, ties by slot.
pub fn exact_knn<A>(
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
    for slot in store.live_slots() {
        if accept(slot) {
            top.push(store.distance(metric, query, slot), slot);
        }
    }
    top.into_sorted()
}

/// Exact k-NN restricted to `candidates`.
pub fn exact_knn_among<A>(
    store: &VectorStore,
    query: &[f32],
    metric: DistanceMetric,
    k: usize,
    candidates: impl IntoIterator<Item = u32>,
    accept: &A,
) -> Vec<(f32, u32)>
where
    A: Fn(u32) -> bool,
{
    let mut top = TopK::new(k);
    for slot in candidates {
        if store.is_live(slot) && accept(slot) {
            top.push(store.distance(metric, query, slot), slot);
        }
    }
    top.into_sorted()
}

/// All accepted slots within `radius`, closest first, at most `max_results`.
pub fn exact_range<A>(
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
    let mut hits: Vec<(f32, u32)> = store
        .live_slots()
        .filter(|&s| accept(s))
        .map(|s| (store.distance(metric, query, s), s))
        .filter(|&(d, _)| d <= radius)
        .collect();
    hits.sort_unstable_by(cmp_hits);
    hits.truncate(max_results);
    hits
}
