//! HNSW graph structure and configuration.
//!
//! [`HnswConfig`] holds the tuning parameters. [`HnswGraph`] holds only topology:
//! node ids are store slots, so vectors are read from the shared
//! [`VectorStore`](crate::storage::VectorStore) and never duplicated here. With
//! binary quantization enabled the graph additionally keeps one packed sign code
//! per node for Hamming-distance traversal.

use crate::config;
use crate::distance::DistanceMetric;
use crate::error::{Result, VectorDbError};
use crate::quantization::binary;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Configuration parameters for an HNSW index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswConfig {
    /// Links per node on layers above 0. Layer 0 allows `2 * m`.
    pub m: usize,
    /// Candidate list size during construction.
    pub ef_construction: usize,
    /// Default candidate list size during search.
    pub ef_search: usize,
    /// Maximum number of layers.
    pub max_level: usize,
    /// Metric used to build the graph. Queries may use any metric.
    pub metric: DistanceMetric,
    /// Traverse with Hamming distance over sign codes, then rerank exactly.
    pub use_binary_quant: bool,
    /// Number of Hamming-ranked candidates reranked with exact distances.
    pub quant_rerank: usize,
    /// Predicate-aware traversal for filtered queries.
    pub use_acorn: bool,
    /// Extra hops explored around neighbors that fail the predicate.
    pub acorn_hops: usize,
    /// Seed for level assignment.
    pub seed: u64,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: config::HNSW_DEFAULT_M,
            ef_construction: config::HNSW_DEFAULT_EF_CONSTRUCTION,
            ef_search: config::HNSW_DEFAULT_EF_SEARCH,
            max_level: config::HNSW_DEFAULT_MAX_LEVEL,
            metric: DistanceMetric::Euclidean,
            use_binary_quant: false,
            quant_rerank: 0,
            use_acorn: false,
            acorn_hops: config::HNSW_DEFAULT_ACORN_HOPS,
            seed: 0x5eed,
        }
    }
}

impl HnswConfig {
    pub fn validate(&self) -> Result<()> {
        if self.m < 2 {
            return Err(VectorDbError::InvalidConfig(format!(
                "HNSW m must be >= 2 (got {})",
                self.m
            )));
        }
        if self.ef_construction == 0 || self.ef_search == 0 {
            return Err(VectorDbError::InvalidConfig(
                "HNSW ef_construction and ef_search must be > 0".into(),
            ));
        }
        if self.max_level == 0 || self.max_level > u8::MAX as usize {
            return Err(VectorDbError::InvalidConfig(format!(
                "HNSW max_level must be in 1..=255 (got {})",
                self.max_level
            )));
        }
        if self.use_acorn && self.acorn_hops == 0 {
            return Err(VectorDbError::InvalidConfig(
                "ACORN requires acorn_hops >= 1".into(),
            ));
        }
        Ok(())
    }

    /// Maximum links on `layer`.
    #[inline]
    pub fn max_links(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m * 2
        } else {
            self.m
        }
    }
}

/// HNSW topology. Node `i` is store slot `i`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswGraph {
    pub config: HnswConfig,
    pub(crate) neighbors: Vec<Vec<Vec<u32>>>, // [node][layer][neighbor ids]
    pub(crate) levels: Vec<u8>,
    /// Packed sign codes, `code_words` per node. Empty unless binary quantization is on.
    pub(crate) codes: Vec<u64>,
    pub(crate) code_words: usize,
    pub(crate) entry_point: Option<u32>,
    pub(crate) max_layer: usize,
}

impl HnswGraph {
    pub fn new(dimension: usize, config: HnswConfig) -> Self {
        let code_words = if config.use_binary_quant {
            binary::words_for(dimension)
        } else {
            0
        };
        Self {
            config,
            neighbors: Vec::new(),
            levels: Vec::new(),
            codes: Vec::new(),
            code_words,
            entry_point: None,
            max_layer: 0,
        }
    }

    /// Number of nodes, including tombstoned ones.
    pub fn node_count(&self) -> usize {
        self.levels.len()
    }

    pub fn entry_point(&self) -> Option<u32> {
        self.entry_point
    }

    pub fn max_layer(&self) -> usize {
        self.max_layer
    }

    /// Layer assigned to `node`.
    #[inline]
    pub fn level(&self, node: u32) -> usize {
        self.levels[node as usize] as usize
    }

    #[inline]
    pub fn neighbors(&self, node: u32, layer: usize) -> &[u32] {
        self.neighbors[node as usize]
            .get(layer)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    #[inline]
    pub(crate) fn code(&self, node: u32) -> &[u64] {
        let start = node as usize * self.code_words;
        &self.codes[start..start + self.code_words]
    }

    pub(crate) fn set_code(&mut self, node: u32, vector: &[f32]) {
        if self.code_words == 0 {
            return;
        }
        let start = node as usize * self.code_words;
        let fresh = binary::encode(vector);
        self.codes[start..start + self.code_words].copy_from_slice(&fresh);
    }

    /// Geometric level for `node` with `ml = 1 / ln(m)`, capped at `max_level - 1`.
    ///
    /// Derived from the node id and the configured seed, so rebuilding or replaying
    /// the same inserts produces the same layer structure.
    pub fn random_level(&self, node: u32) -> usize {
        let ml = 1.0 / (self.config.m as f64).ln();
        let mut rng = StdRng::seed_from_u64(self.config.seed ^ (node as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15));
        let r: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
        let level = (-r.ln() * ml).floor() as usize;
        level.min(self.config.max_level - 1)
    }

    /// Approximate heap footprint in bytes.
    pub fn heap_bytes(&self) -> usize {
        let links: usize = self
            .neighbors
            .iter()
            .map(|layers| {
                layers
                    .iter()
                    .map(|l| l.capacity() * 4 + 24)
                    .sum::<usize>()
                    + 24
            })
            .sum();
        links + self.levels.capacity() + self.codes.capacity() * 8
    }

    /// Structural check against the store's slot count.
    pub fn validate(&self, slots: usize) -> std::result::Result<(), String> {
        if self.levels.len() != slots || self.neighbors.len() != slots {
            return Err(format!(
                "HNSW has {} nodes, store has {} slots",
                self.levels.len(),
                slots
            ));
        }
        if self.codes.len() != slots * self.code_words {
            return Err("HNSW binary code arena has the wrong length".into());
        }
        if let Some(ep) = self.entry_point {
            if ep as usize >= slots {
                return Err(format!("HNSW entry point {ep} out of range"));
            }
        } else if slots > 0 {
            return Err("HNSW has nodes but no entry point".into());
        }
        for (node, layers) in self.neighbors.iter().enumerate() {
            if layers.len() != self.levels[node] as usize + 1 {
                return Err(format!("HNSW node {node} has inconsistent layers"));
            }
            if layers.iter().flatten().any(|&n| n as usize >= slots) {
                return Err(format!("HNSW node {node} links out of range"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(HnswConfig::default().validate().is_ok());
        let bad = HnswConfig {
            m: 1,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = HnswConfig {
            max_level: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_random_level_distribution_and_cap() {
        let graph = HnswGraph::new(4, HnswConfig {
            max_level: 3,
            ..Default::default()
        });
        let levels: Vec<usize> = (0..5000).map(|i| graph.random_level(i)).collect();
        assert!(levels.iter().all(|&l| l < 3));
        let zeros = levels.iter().filter(|&&l| l == 0).count();
        // P(level 0) = 1 - 1/m = 0.9375 for m = 16
        assert!(zeros > 4300 && zeros < 4900, "layer-0 share off: {zeros}");
    }

    #[test]
    fn test_random_level_is_deterministic() {
        let graph = HnswGraph::new(4, HnswConfig::default());
        assert_eq!(graph.random_level(42), graph.random_level(42));
    }
}
