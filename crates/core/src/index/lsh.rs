//! Random-hyperplane LSH.
//!
//! `num_tables` tables, each keyed by `num_hash_bits` sign bits of projections onto
//! Gaussian hyperplanes. A query unions the buckets it lands in across tables and
//! scores those candidates exactly. Inserting needs no training; `train` only
//! learns a centering offset so projections split non-centered data evenly.

use crate::config;
use crate::distance::{cmp_hits, dot, DistanceMetric};
use crate::error::{Result, VectorDbError};
use crate::search::exact::TopK;
use crate::storage::VectorStore;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LshConfig {
    pub num_tables: usize,
    /// Bits per table key, 1..=64.
    pub num_hash_bits: usize,
    pub seed: u64,
}

impl Default for LshConfig {
    fn default() -> Self {
        Self {
            num_tables: config::LSH_DEFAULT_NUM_TABLES,
            num_hash_bits: config::LSH_DEFAULT_HASH_BITS,
            seed: config::LSH_DEFAULT_SEED,
        }
    }
}

impl LshConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_tables == 0 {
            return Err(VectorDbError::InvalidConfig("LSH num_tables must be > 0".into()));
        }
        if !(1..=64).contains(&self.num_hash_bits) {
            return Err(VectorDbError::InvalidConfig(format!(
                "LSH num_hash_bits must be in 1..=64 (got {})",
                self.num_hash_bits
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LshIndex {
    pub config: LshConfig,
    dimension: usize,
    /// `num_tables × num_hash_bits × dimension` hyperplane normals.
    planes: Vec<f32>,
    /// Subtracted before projecting; empty means zero.
    center: Vec<f32>,
    tables: Vec<HashMap<u64, Vec<u32>>>,
    /// Key per table for each slot, `None` if the slot is not bucketed.
    keys: Vec<Option<Vec<u64>>>,
}

/// Standard normal sample (Box-Muller).
fn gaussian(rng: &mut StdRng) -> f32 {
    let u1: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
    let u2: f64 = rng.gen();
    ((-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()) as f32
}

impl LshIndex {
    pub fn new(dimension: usize, config: LshConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let planes = (0..config.num_tables * config.num_hash_bits * dimension)
            .map(|_| gaussian(&mut rng))
            .collect();
        let tables = vec![HashMap::new(); config.num_tables];
        Self {
            config,
            dimension,
            planes,
            center: Vec::new(),
            tables,
            keys: Vec::new(),
        }
    }

    /// Learns the mean of `data` as the projection center.
    pub fn train(&mut self, data: &[f32]) -> Result<()> {
        let dim = self.dimension;
        if data.is_empty() || data.len() % dim != 0 {
            return Err(VectorDbError::InvalidTrainingData(
                "LSH training needs at least one full vector".into(),
            ));
        }
        let count = data.len() / dim;
        let mut center = vec![0.0f32; dim];
        for v in data.chunks_exact(dim) {
            for (c, x) in center.iter_mut().zip(v) {
                *c += x;
            }
        }
        for c in center.iter_mut() {
            *c /= count as f32;
        }
        self.center = center;
        tracing::debug!(count, "LSH center trained");
        Ok(())
    }

    fn key(&self, table: usize, v: &[f32]) -> u64 {
        let bits = self.config.num_hash_bits;
        let dim = self.dimension;
        let mut key = 0u64;
        for b in 0..bits {
            let start = (table * bits + b) * dim;
            let plane = &self.planes[start..start + dim];
            let mut p = dot(plane, v);
            if !self.center.is_empty() {
                p -= dot(plane, &self.center);
            }
            if p > 0.0 {
                key |= 1 << b;
            }
        }
        key
    }

    fn keys_for(&self, v: &[f32]) -> Vec<u64> {
        (0..self.config.num_tables).map(|t| self.key(t, v)).collect()
    }

    pub fn reassign_all(&mut self, store: &VectorStore) {
        for table in &mut self.tables {
            table.clear();
        }
        self.keys = vec![None; store.len()];
        for slot in store.live_slots() {
            self.insert(store, slot);
        }
    }

    /// Buckets `slot` in every table. A table whose bucket is already full skips it.
    pub fn insert(&mut self, store: &VectorStore, slot: u32) {
        let keys = self.keys_for(store.vector(slot));
        for (table, &key) in self.tables.iter_mut().zip(&keys) {
            let bucket = table.entry(key).or_default();
            if bucket.len() < config::LSH_MAX_BUCKET_SIZE {
                bucket.push(slot);
            }
        }
        let s = slot as usize;
        if self.keys.len() <= s {
            self.keys.resize(s + 1, None);
        }
        self.keys[s] = Some(keys);
    }

    pub fn remove(&mut self, slot: u32) {
        let Some(keys) = self.keys.get_mut(slot as usize).and_then(Option::take) else {
            return;
        };
        for (table, key) in self.tables.iter_mut().zip(keys) {
            if let Some(bucket) = table.get_mut(&key) {
                if let Some(pos) = bucket.iter().position(|&s| s == slot) {
                    bucket.swap_remove(pos);
                }
                if bucket.is_empty() {
                    table.remove(&key);
                }
            }
        }
    }

    pub fn update(&mut self, store: &VectorStore, slot: u32) {
        self.remove(slot);
        self.insert(store, slot);
    }

    /// Union of the query's buckets across tables, ascending and deduplicated.
    fn candidates(&self, query: &[f32]) -> Vec<u32> {
        let mut out: Vec<u32> = self
            .keys_for(query)
            .into_iter()
            .zip(&self.tables)
            .filter_map(|(key, table)| table.get(&key))
            .flatten()
            .copied()
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

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
        for slot in self.candidates(query) {
            if accept(slot) {
                top.push(store.distance(metric, query, slot), slot);
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
        let mut hits: Vec<(f32, u32)> = self
            .candidates(query)
            .into_iter()
            .filter(|&s| accept(s))
            .map(|s| (store.distance(metric, query, s), s))
            .filter(|&(d, _)| d <= radius)
            .collect();
        hits.sort_unstable_by(cmp_hits);
        hits.truncate(max_results);
        hits
    }

    pub fn bucket_count(&self) -> usize {
        self.tables.iter().map(HashMap::len).sum()
    }

    pub fn heap_bytes(&self) -> usize {
        let buckets: usize = self
            .tables
            .iter()
            .flat_map(|t| t.values())
            .map(|b| b.capacity() * 4 + 32)
            .sum();
        let keys: usize = self
            .keys
            .iter()
            .map(|k| k.as_ref().map_or(0, |k| k.capacity() * 8) + 24)
            .sum();
        self.planes.capacity() * 4 + self.center.capacity() * 4 + buckets + keys
    }

    pub fn validate(&self, slots: usize) -> std::result::Result<(), String> {
        let planes = self.config.num_tables * self.config.num_hash_bits * self.dimension;
        if self.planes.len() != planes {
            return Err("LSH hyperplane array has the wrong length".into());
        }
        if self.tables.len() != self.config.num_tables {
            return Err("LSH table count does not match config".into());
        }
        if self.keys.len() > slots {
            return Err("LSH key table longer than the store".into());
        }
        if self
            .tables
            .iter()
            .flat_map(|t| t.values())
            .flatten()
            .any(|&s| s as usize >= slots)
        {
            return Err("LSH bucket entry out of range".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::Metadata;
    use rand::{Rng, SeedableRng};

    fn store_of(n: usize, dim: usize, seed: u64) -> VectorStore {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut store = VectorStore::new(dim, false);
        for _ in 0..n {
            let v: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
            store.push_dense(&v, Metadata::new());
        }
        store
    }

    fn index_over(store: &VectorStore, config: LshConfig) -> LshIndex {
        let mut idx = LshIndex::new(store.dimension(), config);
        idx.reassign_all(store);
        idx
    }

    #[test]
    fn test_config_validation() {
        assert!(LshConfig::default().validate().is_ok());
        let bad = LshConfig {
            num_hash_bits: 65,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_same_seed_same_planes() {
        let a = LshIndex::new(16, LshConfig::default());
        let b = LshIndex::new(16, LshConfig::default());
        assert_eq!(a.planes, b.planes);
    }

    #[test]
    fn test_self_query_finds_itself() {
        let store = store_of(200, 16, 9);
        let idx = index_over(&store, LshConfig::default());
        for slot in [0u32, 50, 199] {
            let q = store.vector(slot).to_vec();
            let hits = idx.search(&store, &q, DistanceMetric::Euclidean, 1, &|_| true);
            assert_eq!(hits[0].1, slot);
        }
    }

    #[test]
    fn test_remove_and_update() {
        let store = store_of(50, 8, 3);
        let mut idx = index_over(&store, LshConfig {
            num_tables: 4,
            num_hash_bits: 4,
            seed: 1,
        });
        let q = store.vector(10).to_vec();
        idx.remove(10);
        let hits = idx.search(&store, &q, DistanceMetric::Euclidean, 50, &|_| true);
        assert!(hits.iter().all(|h| h.1 != 10));
        idx.update(&store, 10);
        let hits = idx.search(&store, &q, DistanceMetric::Euclidean, 1, &|_| true);
        assert_eq!(hits[0].1, 10);
        assert!(idx.validate(store.len()).is_ok());
    }

    #[test]
    fn test_train_rejects_ragged_data() {
        let mut idx = LshIndex::new(4, LshConfig::default());
        assert!(idx.train(&[1.0, 2.0, 3.0]).is_err());
        assert!(idx.train(&[]).is_err());
        assert!(idx.train(&[1.0, 2.0, 3.0, 4.0]).is_ok());
    }
}
