//! K-means clustering shared by IVF coarse quantizers and PQ codebooks.
//!
//! k-means++ seeding followed by Lloyd refinement. Training is seeded and fully
//! deterministic: replaying a logged `train` call rebuilds bit-identical centroids.

use crate::distance::euclidean_sq;

/// Seed used by all quantizer training.
pub const TRAIN_SEED: u64 = 0x517c_c1b7_2722_0a95;

/// Minimal deterministic PRNG (xorshift64).
#[derive(Debug, Clone)]
pub struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    pub fn new(seed: u64) -> Self {
        // xorshift has a fixed point at 0
        Self {
            state: if seed == 0 { TRAIN_SEED } else { seed },
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    pub fn next_usize(&mut self) -> usize {
        self.next_u64() as usize
    }

    /// Uniform in [0, 1).
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}

/// Index and squared L2 distance of the centroid nearest to `point`.
///
/// `centroids` is a flat `k × dim` array. Ties resolve to the lower centroid id.
#[inline]
pub fn nearest_centroid(centroids: &[f32], dim: usize, point: &[f32]) -> (usize, f32) {
    let mut best = 0usize;
    let mut best_dist = f32::MAX;
    for (ci, c) in centroids.chunks_exact(dim).enumerate() {
        let d = euclidean_sq(point, c);
        if d < best_dist {
            best_dist = d;
            best = ci;
        }
    }
    (best, best_dist)
}

/// Ids of the `n` centroids nearest to `point`, closest first.
pub fn nearest_centroids(centroids: &[f32], dim: usize, point: &[f32], n: usize) -> Vec<usize> {
    let mut scored: Vec<(f32, u32)> = centroids
        .chunks_exact(dim)
        .enumerate()
        .map(|(ci, c)| (euclidean_sq(point, c), ci as u32))
        .collect();
    crate::distance::sort_hits(&mut scored);
    scored.truncate(n);
    scored.into_iter().map(|(_, ci)| ci as usize).collect()
}

/// Clusters `data` (`n × dim`, flat) into `k` centroids.
///
/// Returns `k × dim` floats. With `n <= k` every point becomes its own centroid and
/// the remaining slots are zero. Empty clusters keep their previous centroid.
pub fn kmeans(data: &[f32], dim: usize, k: usize, iterations: usize, rng: &mut SimpleRng) -> Vec<f32> {
    let n = data.len() / dim;
    let mut centroids = vec![0.0f32; k * dim];
    if n <= k {
        centroids[..n * dim].copy_from_slice(&data[..n * dim]);
        return centroids;
    }

    // k-means++ seeding
    let first = rng.next_usize() % n;
    centroids[..dim].copy_from_slice(&data[first * dim..(first + 1) * dim]);
    let mut min_dists = vec![f32::MAX; n];

    for ci in 1..k {
        let last = &centroids[(ci - 1) * dim..ci * dim];
        let mut total = 0.0f64;
        for (i, point) in data.chunks_exact(dim).enumerate() {
            let d = euclidean_sq(point, last);
            if d < min_dists[i] {
                min_dists[i] = d;
            }
            total += min_dists[i] as f64;
        }

        let chosen = if total < 1e-30 {
            rng.next_usize() % n
        } else {
            let threshold = rng.next_f64() * total;
            let mut cumulative = 0.0f64;
            let mut chosen = n - 1;
            for (i, &d) in min_dists.iter().enumerate() {
                cumulative += d as f64;
                if cumulative >= threshold {
                    chosen = i;
                    break;
                }
            }
            chosen
        };
        centroids[ci * dim..(ci + 1) * dim].copy_from_slice(&data[chosen * dim..(chosen + 1) * dim]);
    }

    // Lloyd iterations
    let mut assignments = vec![usize::MAX; n];
    let mut sums = vec![0.0f64; k * dim];
    let mut counts = vec![0u32; k];
    for _ in 0..iterations {
        let mut changed = false;
        for (i, point) in data.chunks_exact(dim).enumerate() {
            let (best, _) = nearest_centroid(&centroids, dim, point);
            if assignments[i] != best {
                assignments[i] = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        sums.fill(0.0);
        counts.fill(0);
        for (i, point) in data.chunks_exact(dim).enumerate() {
            let ci = assignments[i];
            counts[ci] += 1;
            let s = &mut sums[ci * dim..(ci + 1) * dim];
            for (acc, &x) in s.iter_mut().zip(point) {
                *acc += x as f64;
            }
        }
        for ci in 0..k {
            if counts[ci] == 0 {
                continue;
            }
            let inv = 1.0 / counts[ci] as f64;
            for d in 0..dim {
                centroids[ci * dim + d] = (sums[ci * dim + d] * inv) as f32;
            }
        }
    }

    centroids
}
