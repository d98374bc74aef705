//! Index structures and the [`VectorIndex`] sum type the database dispatches through.
//!
//! Every index addresses records by store slot and reads vectors from the shared
//! [`VectorStore`] at search time. Searches take an `accept` predicate that must
//! reject tombstoned slots (and any slot failing the query's metadata filter).

pub mod flat;
pub mod ivf_flat;
pub mod ivf_pq;
pub mod kdtree;
pub mod lsh;
pub mod pq;
pub mod sparse;

use crate::config;
use crate::distance::DistanceMetric;
use crate::error::{Result, VectorDbError};
use crate::hnsw::{HnswConfig, HnswGraph};
use crate::storage::VectorStore;
use crate::vector::SearchParams;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use flat::FlatIndex;
pub use ivf_flat::{IvfFlatConfig, IvfFlatIndex};
pub use ivf_pq::{IvfPqConfig, IvfPqIndex};
pub use kdtree::KdTree;
pub use lsh::{LshConfig, LshIndex};
pub use pq::{PqConfig, PqIndex};
pub use sparse::SparseIndex;

/// Index structure selected when a database is opened. Discriminants are the
/// values used on disk and across the C ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexType {
    KdTree = 0,
    Hnsw = 1,
    IvfPq = 2,
    Sparse = 3,
    Flat = 4,
    IvfFlat = 5,
    Pq = 6,
    Lsh = 7,
}

impl IndexType {
    pub const ALL: [IndexType; 8] = [
        IndexType::KdTree,
        IndexType::Hnsw,
        IndexType::IvfPq,
        IndexType::Sparse,
        IndexType::Flat,
        IndexType::IvfFlat,
        IndexType::Pq,
        IndexType::Lsh,
    ];

    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.code() == code)
            .ok_or_else(|| VectorDbError::InvalidArgument(format!("unknown index type {code}")))
    }

    /// Whether inserts must wait for an explicit `train`.
    pub fn requires_training(self) -> bool {
        matches!(self, IndexType::IvfPq | IndexType::IvfFlat | IndexType::Pq)
    }

    /// Picks an index type for an expected collection size.
    pub fn suggest(dimension: usize, expected_count: usize) -> IndexType {
        if expected_count <= config::SUGGEST_KDTREE_MAX_COUNT && dimension <= config::SUGGEST_KDTREE_MAX_DIM {
            IndexType::KdTree
        } else if expected_count >= config::SUGGEST_IVFPQ_MIN_COUNT && dimension >= config::SUGGEST_IVFPQ_MIN_DIM {
            IndexType::IvfPq
        } else {
            IndexType::Hnsw
        }
    }
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IndexType::KdTree => "KD-Tree",
            IndexType::Hnsw => "HNSW",
            IndexType::IvfPq => "IVF-PQ",
            IndexType::Sparse => "Sparse",
            IndexType::Flat => "Flat",
            IndexType::IvfFlat => "IVF-Flat",
            IndexType::Pq => "PQ",
            IndexType::Lsh => "LSH",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for IndexType {
    type Err = VectorDbError;

    fn from_str(s: &str) -> Result<Self> {
        let key: String = s.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
        match key.to_ascii_lowercase().as_str() {
            "kdtree" => Ok(IndexType::KdTree),
            "hnsw" => Ok(IndexType::Hnsw),
            "ivfpq" => Ok(IndexType::IvfPq),
            "sparse" => Ok(IndexType::Sparse),
            "flat" => Ok(IndexType::Flat),
            "ivfflat" => Ok(IndexType::IvfFlat),
            "pq" => Ok(IndexType::Pq),
            "lsh" => Ok(IndexType::Lsh),
            _ => Err(VectorDbError::InvalidArgument(format!("unknown index type '{s}'"))),
        }
    }
}

/// Construction parameters, fixed for the lifetime of the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexConfig {
    KdTree,
    Hnsw(HnswConfig),
    IvfPq(IvfPqConfig),
    Sparse,
    Flat,
    IvfFlat(IvfFlatConfig),
    Pq(PqConfig),
    Lsh(LshConfig),
}

impl IndexConfig {
    pub fn default_for(index_type: IndexType) -> Self {
        match index_type {
            IndexType::KdTree => IndexConfig::KdTree,
            IndexType::Hnsw => IndexConfig::Hnsw(HnswConfig::default()),
            IndexType::IvfPq => IndexConfig::IvfPq(IvfPqConfig::default()),
            IndexType::Sparse => IndexConfig::Sparse,
            IndexType::Flat => IndexConfig::Flat,
            IndexType::IvfFlat => IndexConfig::IvfFlat(IvfFlatConfig::default()),
            IndexType::Pq => IndexConfig::Pq(PqConfig::default()),
            IndexType::Lsh => IndexConfig::Lsh(LshConfig::default()),
        }
    }

    pub fn index_type(&self) -> IndexType {
        match self {
            IndexConfig::KdTree => IndexType::KdTree,
            IndexConfig::Hnsw(_) => IndexType::Hnsw,
            IndexConfig::IvfPq(_) => IndexType::IvfPq,
            IndexConfig::Sparse => IndexType::Sparse,
            IndexConfig::Flat => IndexType::Flat,
            IndexConfig::IvfFlat(_) => IndexType::IvfFlat,
            IndexConfig::Pq(_) => IndexType::Pq,
            IndexConfig::Lsh(_) => IndexType::Lsh,
        }
    }

    pub fn validate(&self, dimension: usize) -> Result<()> {
        match self {
            IndexConfig::Hnsw(c) => c.validate(),
            IndexConfig::IvfPq(c) => c.validate(dimension),
            IndexConfig::IvfFlat(c) => c.validate(),
            IndexConfig::Pq(c) => c.validate(dimension),
            IndexConfig::Lsh(c) => c.validate(),
            IndexConfig::KdTree | IndexConfig::Sparse | IndexConfig::Flat => Ok(()),
        }
    }
}

/// The active index of a database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VectorIndex {
    KdTree(KdTree),
    Hnsw(HnswGraph),
    IvfPq(IvfPqIndex),
    Sparse(SparseIndex),
    Flat(FlatIndex),
    IvfFlat(IvfFlatIndex),
    Pq(PqIndex),
    Lsh(LshIndex),
}

impl VectorIndex {
    pub fn new(dimension: usize, config: &IndexConfig) -> Self {
        match config {
            IndexConfig::KdTree => VectorIndex::KdTree(KdTree::new(dimension)),
            IndexConfig::Hnsw(c) => VectorIndex::Hnsw(HnswGraph::new(dimension, c.clone())),
            IndexConfig::IvfPq(c) => VectorIndex::IvfPq(IvfPqIndex::new(dimension, c.clone())),
            IndexConfig::Sparse => VectorIndex::Sparse(SparseIndex::new()),
            IndexConfig::Flat => VectorIndex::Flat(FlatIndex),
            IndexConfig::IvfFlat(c) => VectorIndex::IvfFlat(IvfFlatIndex::new(dimension, c.clone())),
            IndexConfig::Pq(c) => VectorIndex::Pq(PqIndex::new(dimension, c.clone())),
            IndexConfig::Lsh(c) => VectorIndex::Lsh(LshIndex::new(dimension, c.clone())),
        }
    }

    pub fn index_type(&self) -> IndexType {
        match self {
            VectorIndex::KdTree(_) => IndexType::KdTree,
            VectorIndex::Hnsw(_) => IndexType::Hnsw,
            VectorIndex::IvfPq(_) => IndexType::IvfPq,
            VectorIndex::Sparse(_) => IndexType::Sparse,
            VectorIndex::Flat(_) => IndexType::Flat,
            VectorIndex::IvfFlat(_) => IndexType::IvfFlat,
            VectorIndex::Pq(_) => IndexType::Pq,
            VectorIndex::Lsh(_) => IndexType::Lsh,
        }
    }

    pub fn config(&self) -> IndexConfig {
        match self {
            VectorIndex::KdTree(_) => IndexConfig::KdTree,
            VectorIndex::Hnsw(g) => IndexConfig::Hnsw(g.config.clone()),
            VectorIndex::IvfPq(i) => IndexConfig::IvfPq(i.config.clone()),
            VectorIndex::Sparse(_) => IndexConfig::Sparse,
            VectorIndex::Flat(_) => IndexConfig::Flat,
            VectorIndex::IvfFlat(i) => IndexConfig::IvfFlat(i.config.clone()),
            VectorIndex::Pq(i) => IndexConfig::Pq(i.config.clone()),
            VectorIndex::Lsh(i) => IndexConfig::Lsh(i.config.clone()),
        }
    }

    /// True unless the index needs training and has not been trained.
    pub fn is_trained(&self) -> bool {
        match self {
            VectorIndex::IvfPq(i) => i.is_trained(),
            VectorIndex::IvfFlat(i) => i.is_trained(),
            VectorIndex::Pq(i) => i.is_trained(),
            _ => true,
        }
    }

    /// Trains on `data` (`n × dimension`, flat), then re-encodes every live slot of `store`.
    pub fn train(&mut self, store: &VectorStore, data: &[f32]) -> Result<()> {
        match self {
            VectorIndex::IvfPq(i) => {
                i.train(data)?;
                i.reassign_all(store);
            }
            VectorIndex::IvfFlat(i) => {
                i.train(data)?;
                i.reassign_all(store);
            }
            VectorIndex::Pq(i) => {
                i.train(data)?;
                i.reassign_all(store);
            }
            VectorIndex::Lsh(i) => {
                i.train(data)?;
                i.reassign_all(store);
            }
            other => {
                return Err(VectorDbError::Unsupported {
                    index: other.index_type(),
                    op: "train",
                })
            }
        }
        Ok(())
    }

    /// Indexes a slot just appended to `store`.
    pub fn insert(&mut self, store: &VectorStore, slot: u32) {
        match self {
            VectorIndex::KdTree(t) => t.insert(store, slot),
            VectorIndex::Hnsw(g) => g.insert(store, slot),
            VectorIndex::IvfPq(i) => i.insert(store, slot),
            VectorIndex::Sparse(i) => i.insert(store, slot),
            VectorIndex::Flat(_) => {}
            VectorIndex::IvfFlat(i) => i.insert(store, slot),
            VectorIndex::Pq(i) => i.insert(store, slot),
            VectorIndex::Lsh(i) => i.insert(store, slot),
        }
    }

    /// Re-indexes a slot whose data was replaced in `store`.
    pub fn update(&mut self, store: &VectorStore, slot: u32) {
        match self {
            VectorIndex::KdTree(t) => t.update(store, slot),
            VectorIndex::Hnsw(g) => g.update(store, slot),
            VectorIndex::IvfPq(i) => i.update(store, slot),
            VectorIndex::Sparse(i) => i.update(store, slot),
            VectorIndex::Flat(_) => {}
            VectorIndex::IvfFlat(i) => i.update(store, slot),
            VectorIndex::Pq(i) => i.update(store, slot),
            VectorIndex::Lsh(i) => i.update(store, slot),
        }
    }

    /// Drops a tombstoned slot. HNSW keeps the node for routing until the next rebuild.
    pub fn remove(&mut self, slot: u32) {
        match self {
            VectorIndex::KdTree(t) => t.remove(slot),
            VectorIndex::Hnsw(_) | VectorIndex::Flat(_) => {}
            VectorIndex::IvfPq(i) => i.remove(slot),
            VectorIndex::Sparse(i) => i.remove(slot),
            VectorIndex::IvfFlat(i) => i.remove(slot),
            VectorIndex::Pq(i) => i.remove(slot),
            VectorIndex::Lsh(i) => i.remove(slot),
        }
    }

    /// Rebuilds from scratch over a freshly compacted `store`. Training state is kept.
    pub fn rebuild(&mut self, store: &VectorStore) {
        match self {
            VectorIndex::KdTree(t) => *t = KdTree::rebuild(store),
            VectorIndex::Hnsw(g) => *g = HnswGraph::rebuild(store, g.config.clone()),
            VectorIndex::IvfPq(i) => i.reassign_all(store),
            VectorIndex::Sparse(i) => i.reassign_all(store),
            VectorIndex::Flat(_) => {}
            VectorIndex::IvfFlat(i) => i.reassign_all(store),
            VectorIndex::Pq(i) => i.reassign_all(store),
            VectorIndex::Lsh(i) => i.reassign_all(store),
        }
    }

    /// k nearest accepted slots, closest first. `filtered` tells HNSW to use ACORN.
    #[allow(clippy::too_many_arguments)]
    pub fn search<A>(
        &self,
        store: &VectorStore,
        query: &[f32],
        metric: DistanceMetric,
        k: usize,
        params: &SearchParams,
        accept: &A,
        filtered: bool,
    ) -> Vec<(f32, u32)>
    where
        A: Fn(u32) -> bool,
    {
        match self {
            VectorIndex::KdTree(t) => t.search(store, query, metric, k, accept),
            VectorIndex::Hnsw(g) => g.search(store, query, metric, k, params.ef_search, accept, filtered),
            VectorIndex::IvfPq(i) => i.search(store, query, metric, k, params.nprobe, params.rerank_top, accept),
            VectorIndex::Sparse(i) => i.search(store, query, metric, k, accept),
            VectorIndex::Flat(i) => i.search(store, query, metric, k, accept),
            VectorIndex::IvfFlat(i) => i.search(store, query, metric, k, params.nprobe, accept),
            VectorIndex::Pq(i) => i.search(store, query, metric, k, params.rerank_top, accept),
            VectorIndex::Lsh(i) => i.search(store, query, metric, k, accept),
        }
    }

    /// Accepted slots within `radius`, closest first, at most `max_results`.
    ///
    /// HNSW has no native range query; it widens a k-NN search to `max_results`.
    #[allow(clippy::too_many_arguments)]
    pub fn range_search<A>(
        &self,
        store: &VectorStore,
        query: &[f32],
        metric: DistanceMetric,
        radius: f32,
        max_results: usize,
        params: &SearchParams,
        accept: &A,
    ) -> Vec<(f32, u32)>
    where
        A: Fn(u32) -> bool,
    {
        match self {
            VectorIndex::KdTree(t) => t.range_search(store, query, metric, radius, max_results, accept),
            VectorIndex::Hnsw(g) => {
                let mut hits = g.search(store, query, metric, max_results, params.ef_search, accept, false);
                hits.retain(|&(d, _)| d <= radius);
                hits
            }
            VectorIndex::IvfPq(i) => i.range_search(store, query, metric, radius, max_results, params.nprobe, accept),
            VectorIndex::Sparse(i) => i.range_search(store, query, metric, radius, max_results, accept),
            VectorIndex::Flat(i) => i.range_search(store, query, metric, radius, max_results, accept),
            VectorIndex::IvfFlat(i) => i.range_search(store, query, metric, radius, max_results, params.nprobe, accept),
            VectorIndex::Pq(i) => i.range_search(store, query, metric, radius, max_results, accept),
            VectorIndex::Lsh(i) => i.range_search(store, query, metric, radius, max_results, accept),
        }
    }

    pub fn heap_bytes(&self) -> usize {
        match self {
            VectorIndex::KdTree(t) => t.heap_bytes(),
            VectorIndex::Hnsw(g) => g.heap_bytes(),
            VectorIndex::IvfPq(i) => i.heap_bytes(),
            VectorIndex::Sparse(i) => i.heap_bytes(),
            VectorIndex::Flat(_) => 0,
            VectorIndex::IvfFlat(i) => i.heap_bytes(),
            VectorIndex::Pq(i) => i.heap_bytes(),
            VectorIndex::Lsh(i) => i.heap_bytes(),
        }
    }

    /// Structural check against the store's slot count.
    pub fn validate(&self, slots: usize) -> std::result::Result<(), String> {
        match self {
            VectorIndex::KdTree(t) => t.validate(slots),
            VectorIndex::Hnsw(g) => g.validate(slots),
            VectorIndex::IvfPq(i) => i.validate(slots),
            VectorIndex::Sparse(i) => i.validate(slots),
            VectorIndex::Flat(_) => Ok(()),
            VectorIndex::IvfFlat(i) => i.validate(slots),
            VectorIndex::Pq(i) => i.validate(slots),
            VectorIndex::Lsh(i) => i.validate(slots),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::Metadata;

    // ── IndexType ──────────────────────────────────────────────────────

    #[test]
    fn test_index_type_codes_round_trip() {
        for t in IndexType::ALL {
            assert_eq!(IndexType::from_code(t.code()).unwrap(), t);
        }
        assert!(IndexType::from_code(8).is_err());
        assert_eq!(IndexType::Lsh.code(), 7);
    }

    #[test]
    fn test_index_type_parse() {
        assert_eq!("ivf-pq".parse::<IndexType>().unwrap(), IndexType::IvfPq);
        assert_eq!("KD_Tree".parse::<IndexType>().unwrap(), IndexType::KdTree);
        assert!("btree".parse::<IndexType>().is_err());
    }

    #[test]
    fn test_suggest() {
        assert_eq!(IndexType::suggest(32, 10_000), IndexType::KdTree);
        assert_eq!(IndexType::suggest(768, 1_000_000), IndexType::IvfPq);
        assert_eq!(IndexType::suggest(768, 100_000), IndexType::Hnsw);
        assert_eq!(IndexType::suggest(32, 1_000_000), IndexType::Hnsw);
    }

    // ── Dispatch ───────────────────────────────────────────────────────

    #[test]
    fn test_train_unsupported_on_kdtree() {
        let store = VectorStore::new(2, false);
        let mut idx = VectorIndex::new(2, &IndexConfig::KdTree);
        let err = idx.train(&store, &[0.0, 1.0]).unwrap_err();
        assert!(matches!(err, VectorDbError::Unsupported { op: "train", .. }));
    }

    #[test]
    fn test_every_dense_index_finds_exact_match() {
        let dim = 8;
        let mut store = VectorStore::new(dim, false);
        let mut data = Vec::new();
        for i in 0..300 {
            let v: Vec<f32> = (0..dim).map(|d| ((i * 7 + d * 13) % 29) as f32 - 14.0).collect();
            data.extend_from_slice(&v);
            store.push_dense(&v, Metadata::new());
        }
        let configs = [
            IndexConfig::KdTree,
            IndexConfig::Hnsw(HnswConfig::default()),
            IndexConfig::Flat,
            IndexConfig::IvfFlat(IvfFlatConfig {
                nlist: 4,
                nprobe: 4,
                ..Default::default()
            }),
            IndexConfig::IvfPq(IvfPqConfig {
                nlist: 4,
                nprobe: 4,
                m: 2,
                nbits: 4,
                default_rerank: 300,
                ..Default::default()
            }),
            IndexConfig::Pq(PqConfig {
                m: 2,
                nbits: 4,
                train_iters: 5,
            }),
            IndexConfig::Lsh(LshConfig::default()),
        ];
        for config in configs {
            config.validate(dim).unwrap();
            let mut idx = VectorIndex::new(dim, &config);
            if idx.index_type().requires_training() {
                assert!(!idx.is_trained());
                idx.train(&store, &data).unwrap();
            } else {
                for slot in 0..store.len() as u32 {
                    idx.insert(&store, slot);
                }
            }
            let q = store.vector(123).to_vec();
            let hits = idx.search(
                &store,
                &q,
                DistanceMetric::Euclidean,
                1,
                &SearchParams::default(),
                &|s| store.is_live(s),
                false,
            );
            assert_eq!(hits[0].0, 0.0, "{} missed the exact match", idx.index_type());
            assert!(idx.validate(store.len()).is_ok());
        }
    }
}
