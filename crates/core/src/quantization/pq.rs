//! Product Quantization (PQ) for fast approximate distance computation.
//!
//! Splits vectors into `m` subspaces and learns `2^nbits` centroids per subspace
//! via k-means. Each vector is encoded as `m` bytes (one centroid id per subspace).
//! Distance computation uses a precomputed lookup table: `m` table lookups + `m`
//! additions instead of `dim` multiply-adds.

use super::kmeans::{kmeans, nearest_centroid, SimpleRng, TRAIN_SEED};
use crate::error::{Result, VectorDbError};
use serde::{Deserialize, Serialize};

/// PQ codebook: `m` subspaces × `k` centroids × `sub_dim` floats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PqCodebook {
    pub num_subspaces: usize,
    pub num_centroids: usize,
    pub sub_dim: usize,
    /// Flat centroid array: `centroids[m * K * sub_dim + k * sub_dim .. + sub_dim]`
    pub centroids: Vec<f32>,
}

/// Which partial distance the lookup table holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdcMode {
    /// Squared L2 per subspace; the table sum is the squared L2 estimate.
    L2,
    /// Negative inner product per subspace; the table sum is `-dot` estimate.
    InnerProduct,
}

/// Precomputed distance table for a single query: `[m][k]` partial distances.
pub struct PqDistanceTable {
    table: Vec<f32>,
    num_subspaces: usize,
    num_centroids: usize,
}

impl PqCodebook {
    /// Train a codebook on `vectors`, a contiguous arena of `n × dim` floats.
    pub fn train(vectors: &[f32], dim: usize, m: usize, nbits: u8, iterations: usize) -> Result<Self> {
        if m == 0 || dim % m != 0 {
            return Err(VectorDbError::InvalidConfig(format!(
                "PQ m={m} must divide dimension {dim}"
            )));
        }
        if !(1..=8).contains(&nbits) {
            return Err(VectorDbError::InvalidConfig(format!(
                "PQ nbits={nbits} must be in 1..=8"
            )));
        }
        if dim == 0 || vectors.is_empty() || vectors.len() % dim != 0 {
            return Err(VectorDbError::InvalidTrainingData(
                "PQ training needs at least one full vector".into(),
            ));
        }
        let k = 1usize << nbits;
        let sub_dim = dim / m;
        let n = vectors.len() / dim;
        let mut rng = SimpleRng::new(TRAIN_SEED);
        let mut centroids = vec![0.0f32; m * k * sub_dim];
        let mut sub_vectors = vec![0.0f32; n * sub_dim];

        for sub in 0..m {
            for i in 0..n {
                let src = i * dim + sub * sub_dim;
                sub_vectors[i * sub_dim..(i + 1) * sub_dim]
                    .copy_from_slice(&vectors[src..src + sub_dim]);
            }
            let sub_centroids = kmeans(&sub_vectors, sub_dim, k, iterations, &mut rng);
            let out = sub * k * sub_dim;
            centroids[out..out + k * sub_dim].copy_from_slice(&sub_centroids);
        }

        Ok(Self {
            num_subspaces: m,
            num_centroids: k,
            sub_dim,
            centroids,
        })
    }

    pub fn dimension(&self) -> usize {
        self.num_subspaces * self.sub_dim
    }

    #[inline]
    fn centroid(&self, sub: usize, ci: usize) -> &[f32] {
        let start = (sub * self.num_centroids + ci) * self.sub_dim;
        &self.centroids[start..start + self.sub_dim]
    }

    fn subspace(&self, sub: usize) -> &[f32] {
        let start = sub * self.num_centroids * self.sub_dim;
        &self.centroids[start..start + self.num_centroids * self.sub_dim]
    }

    /// Encode a single vector into `m` codes.
    pub fn encode(&self, vector: &[f32]) -> Vec<u8> {
        let mut codes = Vec::with_capacity(self.num_subspaces);
        self.encode_into(vector, &mut codes);
        codes
    }

    /// Appends the `m` codes of `vector` to `out`.
    pub fn encode_into(&self, vector: &[f32], out: &mut Vec<u8>) {
        for sub in 0..self.num_subspaces {
            let sub_vec = &vector[sub * self.sub_dim..(sub + 1) * self.sub_dim];
            let (ci, _) = nearest_centroid(self.subspace(sub), self.sub_dim, sub_vec);
            out.push(ci as u8);
        }
    }

    /// Reconstruct the approximate vector for `codes`.
    pub fn decode(&self, codes: &[u8]) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.dimension());
        for (sub, &c) in codes.iter().enumerate().take(self.num_subspaces) {
            out.extend_from_slice(self.centroid(sub, c as usize));
        }
        out
    }

    /// Build the lookup table for `query`.
    pub fn build_distance_table(&self, query: &[f32], mode: AdcMode) -> PqDistanceTable {
        let k = self.num_centroids;
        let mut table = vec![0.0f32; self.num_subspaces * k];
        for sub in 0..self.num_subspaces {
            let q_sub = &query[sub * self.sub_dim..(sub + 1) * self.sub_dim];
            for ci in 0..k {
                let c = self.centroid(sub, ci);
                table[sub * k + ci] = match mode {
                    AdcMode::L2 => crate::distance::euclidean_sq(q_sub, c),
                    AdcMode::InnerProduct => -crate::distance::dot(q_sub, c),
                };
            }
        }
        PqDistanceTable {
            table,
            num_subspaces: self.num_subspaces,
            num_centroids: k,
        }
    }

    pub fn heap_bytes(&self) -> usize {
        self.centroids.capacity() * std::mem::size_of::<f32>()
    }
}

impl PqDistanceTable {
    /// Approximate distance for a PQ-encoded vector (`m` bytes).
    #[inline]
    pub fn distance(&self, codes: &[u8]) -> f32 {
        let k = self.num_centroids;
        codes
            .iter()
            .take(self.num_subspaces)
            .enumerate()
            .map(|(m, &c)| self.table[m * k + c as usize])
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_data(n: usize, dim: usize, seed: u64) -> Vec<f32> {
        let mut rng = SimpleRng::new(seed);
        (0..n * dim).map(|_| rng.next_f64() as f32 * 2.0 - 1.0).collect()
    }

    #[test]
    fn test_train_rejects_bad_config() {
        let data = random_data(10, 8, 1);
        assert!(PqCodebook::train(&data, 8, 3, 8, 5).is_err());
        assert!(PqCodebook::train(&data, 8, 2, 9, 5).is_err());
        assert!(PqCodebook::train(&[], 8, 2, 4, 5).is_err());
    }

    #[test]
    fn test_encode_decode_reduces_error() {
        let dim = 8;
        let data = random_data(300, dim, 3);
        let cb = PqCodebook::train(&data, dim, 4, 6, 10).unwrap();
        let mut err = 0.0f32;
        let mut energy = 0.0f32;
        for v in data.chunks_exact(dim).take(50) {
            let rec = cb.decode(&cb.encode(v));
            err += crate::distance::euclidean_sq(v, &rec);
            energy += crate::distance::dot(v, v);
        }
        assert!(err < energy * 0.5, "reconstruction error {err} vs energy {energy}");
    }

    #[test]
    fn test_adc_l2_matches_reconstruction() {
        let dim = 8;
        let data = random_data(200, dim, 5);
        let cb = PqCodebook::train(&data, dim, 2, 4, 8).unwrap();
        let query = &data[..dim];
        let table = cb.build_distance_table(query, AdcMode::L2);
        let codes = cb.encode(&data[dim..2 * dim]);
        let adc = table.distance(&codes);
        let direct = crate::distance::euclidean_sq(query, &cb.decode(&codes));
        assert!((adc - direct).abs() < 1e-4, "{adc} vs {direct}");
    }

    #[test]
    fn test_adc_inner_product_sign() {
        let dim = 4;
        let data = random_data(64, dim, 9);
        let cb = PqCodebook::train(&data, dim, 2, 3, 5).unwrap();
        let q = [1.0, 1.0, 1.0, 1.0];
        let table = cb.build_distance_table(&q, AdcMode::InnerProduct);
        let codes = cb.encode(&data[..dim]);
        let expect = -crate::distance::dot(&q, &cb.decode(&codes));
        assert!((table.distance(&codes) - expect).abs() < 1e-4);
    }
}
