//! IVF-Flat: inverted lists over k-means centroids, exact distances inside lists.

use crate::config;
use crate::distance::{cmp_hits, normalized, DistanceMetric};
use crate::error::{Result, VectorDbError};
use crate::quantization::kmeans::{kmeans, nearest_centroid, nearest_centroids, SimpleRng, TRAIN_SEED};
use crate::search::exact::TopK;
use crate::storage::VectorStore;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

pub(crate) const UNASSIGNED: u32 = u32::MAX;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IvfFlatConfig {
    pub nlist: usize,
    pub nprobe: usize,
    pub train_iters: usize,
    /// Normalize vectors before centroid assignment.
    pub use_cosine: bool,
}

impl Default for IvfFlatConfig {
    fn default() -> Self {
        Self {
            nlist: config::IVF_DEFAULT_NLIST,
            nprobe: config::IVF_DEFAULT_NPROBE,
            train_iters: config::DEFAULT_TRAIN_ITERS,
            use_cosine: false,
        }
    }
}

impl IvfFlatConfig {
    pub fn validate(&self) -> Result<()> {
        if self.nlist == 0 || self.nprobe == 0 || self.train_iters == 0 {
            return Err(VectorDbError::InvalidConfig(
                "IVF-Flat nlist, nprobe and train_iters must be > 0".into(),
            ));
        }
        if self.nprobe > self.nlist {
            return Err(VectorDbError::InvalidConfig(format!(
                "IVF-Flat nprobe {} exceeds nlist {}",
                self.nprobe, self.nlist
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IvfFlatIndex {
    pub config: IvfFlatConfig,
    dimension: usize,
    /// `nlist × dimension`; empty until trained.
    centroids: Vec<f32>,
    lists: Vec<Vec<u32>>,
    /// List of each slot, or `UNASSIGNED`.
    assignment: Vec<u32>,
}

impl IvfFlatIndex {
    pub fn new(dimension: usize, config: IvfFlatConfig) -> Self {
        Self {
            config,
            dimension,
            centroids: Vec::new(),
            lists: Vec::new(),
            assignment: Vec::new(),
        }
    }

    pub fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
    }

    fn assign_key<'a>(&self, v: &'a [f32]) -> Cow<'a, [f32]> {
        if self.config.use_cosine {
            Cow::Owned(normalized(v))
        } else {
            Cow::Borrowed(v)
        }
    }

    /// Learns `nlist` centroids from `data` (`count × dimension`, flat).
    /// Existing list membership is dropped; the caller reassigns live slots.
    pub fn train(&mut self, data: &[f32]) -> Result<()> {
        let count = data.len() / self.dimension;
        if count < self.config.nlist {
            return Err(VectorDbError::InvalidTrainingData(format!(
                "IVF-Flat needs at least nlist={} training vectors (got {count})",
                self.config.nlist
            )));
        }
        let prepared: Vec<f32> = if self.config.use_cosine {
            data.chunks_exact(self.dimension).flat_map(normalized).collect()
        } else {
            data.to_vec()
        };
        let mut rng = SimpleRng::new(TRAIN_SEED);
        self.centroids = kmeans(
            &prepared,
            self.dimension,
            self.config.nlist,
            self.config.train_iters,
            &mut rng,
        );
        self.lists = vec![Vec::new(); self.config.nlist];
        self.assignment.clear();
        tracing::debug!(nlist = self.config.nlist, count, "IVF-Flat trained");
        Ok(())
    }

    /// Assigns every live slot of `store` from scratch.
    pub fn reassign_all(&mut self, store: &VectorStore) {
        for list in &mut self.lists {
            list.clear();
        }
        self.assignment = vec![UNASSIGNED; store.len()];
        for slot in store.live_slots() {
            self.insert(store, slot);
        }
    }

    pub fn insert(&mut self, store: &VectorStore, slot: u32) {
        let key = self.assign_key(store.vector(slot));
        let (list, _) = nearest_centroid(&self.centroids, self.dimension, &key);
        self.lists[list].push(slot);
        if self.assignment.len() <= slot as usize {
            self.assignment.resize(slot as usize + 1, UNASSIGNED);
        }
        self.assignment[slot as usize] = list as u32;
    }

    pub fn remove(&mut self, slot: u32) {
        let Some(list) = self.assignment.get_mut(slot as usize) else {
            return;
        };
        if *list == UNASSIGNED {
            return;
        }
        let members = &mut self.lists[*list as usize];
        if let Some(pos) = members.iter().position(|&s| s == slot) {
            members.swap_remove(pos);
        }
        *list = UNASSIGNED;
    }

    pub fn update(&mut self, store: &VectorStore, slot: u32) {
        self.remove(slot);
        self.insert(store, slot);
    }

    fn probe(&self, query: &[f32], nprobe: Option<usize>) -> Vec<usize> {
        let n = nprobe.unwrap_or(self.config.nprobe).clamp(1, self.config.nlist);
        let key = self.assign_key(query);
        nearest_centroids(&self.centroids, self.dimension, &key, n)
    }

    pub fn search<A>(
        &self,
        store: &VectorStore,
        query: &[f32],
        metric: DistanceMetric,
        k: usize,
        nprobe: Option<usize>,
        accept: &A,
    ) -> Vec<(f32, u32)>
    where
        A: Fn(u32) -> bool,
    {
        if !self.is_trained() {
            return Vec::new();
        }
        let mut top = TopK::new(k);
        for list in self.probe(query, nprobe) {
            for &slot in &self.lists[list] {
                if accept(slot) {
                    top.push(store.distance(metric, query, slot), slot);
                }
            }
        }
        top.into_sorted()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn range_search<A>(
        &self,
        store: &VectorStore,
        query: &[f32],
        metric: DistanceMetric,
        radius: f32,
        max_results: usize,
        nprobe: Option<usize>,
        accept: &A,
    ) -> Vec<(f32, u32)>
    where
        A: Fn(u32) -> bool,
    {
        if !self.is_trained() {
            return Vec::new();
        }
        let mut hits = Vec::new();
        for list in self.probe(query, nprobe) {
            for &slot in &self.lists[list] {
                if accept(slot) {
                    let d = store.distance(metric, query, slot);
                    if d <= radius {
                        hits.push((d, slot));
                    }
                }
            }
        }
        hits.sort_unstable_by(cmp_hits);
        hits.truncate(max_results);
        hits
    }

    pub fn list_sizes(&self) -> Vec<usize> {
        self.lists.iter().map(Vec::len).collect()
    }

    pub fn heap_bytes(&self) -> usize {
        self.centroids.capacity() * 4
            + self.lists.iter().map(|l| l.capacity() * 4 + 24).sum::<usize>()
            + self.assignment.capacity() * 4
    }

    pub fn validate(&self, slots: usize) -> std::result::Result<(), String> {
        if self.is_trained() && self.centroids.len() != self.config.nlist * self.dimension {
            return Err("IVF-Flat centroid array has the wrong length".into());
        }
        if self.lists.iter().flatten().any(|&s| s as usize >= slots) {
            return Err("IVF-Flat list entry out of range".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::exact::exact_knn;
    use crate::vector::Metadata;
    use rand::{Rng, SeedableRng};

    fn setup(n: usize, dim: usize, config: IvfFlatConfig) -> (VectorStore, IvfFlatIndex) {
        let mut rng = rand::rngs::StdRng::seed_from_u64(21);
        let mut store = VectorStore::new(dim, false);
        for _ in 0..n {
            let v: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
            store.push_dense(&v, Metadata::new());
        }
        let mut idx = IvfFlatIndex::new(dim, config);
        idx.train(&store.live_arena()).unwrap();
        idx.reassign_all(&store);
        (store, idx)
    }

    #[test]
    fn test_train_requires_nlist_vectors() {
        let mut idx = IvfFlatIndex::new(2, IvfFlatConfig {
            nlist: 8,
            ..Default::default()
        });
        assert!(matches!(
            idx.train(&[0.0; 6]),
            Err(VectorDbError::InvalidTrainingData(_))
        ));
        assert!(!idx.is_trained());
    }

    #[test]
    fn test_full_probe_is_exact() {
        let config = IvfFlatConfig {
            nlist: 8,
            nprobe: 8,
            ..Default::default()
        };
        let (store, idx) = setup(500, 6, config);
        let q = [0.1, 0.2, -0.3, 0.0, 0.5, -0.5];
        let got = idx.search(&store, &q, DistanceMetric::Euclidean, 10, None, &|_| true);
        let want = exact_knn(&store, &q, DistanceMetric::Euclidean, 10, &|_| true);
        assert_eq!(got, want);
    }

    #[test]
    fn test_every_slot_assigned_once() {
        let (store, idx) = setup(300, 4, IvfFlatConfig {
            nlist: 16,
            ..Default::default()
        });
        assert_eq!(idx.list_sizes().iter().sum::<usize>(), store.len());
    }

    #[test]
    fn test_remove_and_update() {
        let (mut store, mut idx) = setup(200, 4, IvfFlatConfig {
            nlist: 4,
            nprobe: 4,
            ..Default::default()
        });
        idx.remove(5);
        assert_eq!(idx.list_sizes().iter().sum::<usize>(), 199);
        store.set_dense(6, &[9.0, 9.0, 9.0, 9.0]);
        idx.update(&store, 6);
        let hit = idx.search(&store, &[9.0, 9.0, 9.0, 9.0], DistanceMetric::Euclidean, 1, None, &|_| true);
        assert_eq!(hit[0].1, 6);
    }
}
