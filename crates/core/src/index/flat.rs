//! Flat index: no auxiliary structure, every search is an exact scan.

use crate::distance::DistanceMetric;
use crate::search::exact::{exact_knn, exact_range};
use crate::storage::VectorStore;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlatIndex;

impl FlatIndex {
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
        exact_knn(store, query, metric, k, accept)
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
        exact_range(store, query, metric, radius, max_results, accept)
    }
}
