//! Distance metrics.
//!
//! All metrics return a distance where **lower is closer**:
//! Euclidean is true L2, Cosine is `1 - cos`, DotProduct is `-dot`, Manhattan is L1
//! and Hamming counts coordinates whose sign bits differ.
//!
//! Kernels use fixed-width chunked loops with independent lane accumulators so the
//! compiler can auto-vectorize them.

use crate::error::{Result, VectorDbError};
use crate::vector::SparseEntry;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Distance metric used for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DistanceMetric {
    /// L2 distance. Range: \[0, ∞).
    Euclidean,
    /// `1 - cosine_similarity`. Range: \[0, 2\].
    Cosine,
    /// Negative dot product. Lower = more similar.
    DotProduct,
    /// L1 distance.
    Manhattan,
    /// Number of coordinates whose sign (`x > 0`) differs.
    Hamming,
}

impl DistanceMetric {
    /// Maps the C ABI enum value onto a metric.
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            0 => Ok(DistanceMetric::Euclidean),
            1 => Ok(DistanceMetric::Cosine),
            2 => Ok(DistanceMetric::DotProduct),
            3 => Ok(DistanceMetric::Manhattan),
            4 => Ok(DistanceMetric::Hamming),
            other => Err(VectorDbError::InvalidArgument(format!(
                "unknown distance type {other}"
            ))),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            DistanceMetric::Euclidean => 0,
            DistanceMetric::Cosine => 1,
            DistanceMetric::DotProduct => 2,
            DistanceMetric::Manhattan => 3,
            DistanceMetric::Hamming => 4,
        }
    }

    /// Exact f32-vs-f32 distance.
    #[inline]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        match self {
            DistanceMetric::Euclidean => euclidean_sq(a, b).sqrt(),
            DistanceMetric::Cosine => 1.0 - cosine_similarity(a, b),
            DistanceMetric::DotProduct => -dot(a, b),
            DistanceMetric::Manhattan => manhattan(a, b),
            DistanceMetric::Hamming => sign_hamming(a, b) as f32,
        }
    }

    /// Distance for vectors already scaled to unit length.
    /// Cosine degenerates to `1 - dot`; every other metric is unchanged.
    #[inline]
    pub fn distance_normalized(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Cosine => 1.0 - dot(a, b),
            other => other.distance(a, b),
        }
    }

    /// Whether per-axis gaps are lower bounds of this metric (KD-Tree pruning).
    pub fn supports_axis_pruning(self) -> bool {
        matches!(self, DistanceMetric::Euclidean | DistanceMetric::Manhattan)
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::DotProduct => "dot",
            DistanceMetric::Manhattan => "manhattan",
            DistanceMetric::Hamming => "hamming",
        };
        f.write_str(name)
    }
}

const LANES: usize = 8;

/// Dot product.
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    let chunks = n / LANES;
    let mut acc = [0.0f32; LANES];
    for c in 0..chunks {
        let base = c * LANES;
        for l in 0..LANES {
            acc[l] += a[base + l] * b[base + l];
        }
    }
    let mut sum: f32 = acc.iter().sum();
    for i in chunks * LANES..n {
        sum += a[i] * b[i];
    }
    sum
}

/// Squared Euclidean distance.
#[inline]
pub fn euclidean_sq(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    let chunks = n / LANES;
    let mut acc = [0.0f32; LANES];
    for c in 0..chunks {
        let base = c * LANES;
        for l in 0..LANES {
            let d = a[base + l] - b[base + l];
            acc[l] += d * d;
        }
    }
    let mut sum: f32 = acc.iter().sum();
    for i in chunks * LANES..n {
        let d = a[i] - b[i];
        sum += d * d;
    }
    sum
}

/// L1 distance.
#[inline]
pub fn manhattan(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    let chunks = n / LANES;
    let mut acc = [0.0f32; LANES];
    for c in 0..chunks {
        let base = c * LANES;
        for l in 0..LANES {
            acc[l] += (a[base + l] - b[base + l]).abs();
        }
    }
    let mut sum: f32 = acc.iter().sum();
    for i in chunks * LANES..n {
        sum += (a[i] - b[i]).abs();
    }
    sum
}

/// Cosine similarity in \[-1, 1\]. Zero vectors have similarity 0.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    let chunks = n / LANES;
    let mut acc_dot = [0.0f32; LANES];
    let mut acc_na = [0.0f32; LANES];
    let mut acc_nb = [0.0f32; LANES];
    for c in 0..chunks {
        let base = c * LANES;
        for l in 0..LANES {
            let x = a[base + l];
            let y = b[base + l];
            acc_dot[l] += x * y;
            acc_na[l] += x * x;
            acc_nb[l] += y * y;
        }
    }
    let mut d: f32 = acc_dot.iter().sum();
    let mut na: f32 = acc_na.iter().sum();
    let mut nb: f32 = acc_nb.iter().sum();
    for i in chunks * LANES..n {
        d += a[i] * b[i];
        na += a[i] * a[i];
        nb += b[i] * b[i];
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (d / (na.sqrt() * nb.sqrt())).clamp(-1.0, 1.0)
}

/// Number of coordinates where `x > 0` differs between `a` and `b`.
#[inline]
pub fn sign_hamming(a: &[f32], b: &[f32]) -> u32 {
    a.iter()
        .zip(b)
        .filter(|(&x, &y)| (x > 0.0) != (y > 0.0))
        .count() as u32
}

/// Euclidean norm.
#[inline]
pub fn norm(a: &[f32]) -> f32 {
    dot(a, a).sqrt()
}

/// Scales `v` to unit length in place. Zero vectors are left untouched.
pub fn normalize_in_place(v: &mut [f32]) {
    let n = norm(v);
    if n > 0.0 {
        let inv = 1.0 / n;
        for x in v.iter_mut() {
            *x *= inv;
        }
    }
}

/// Returns a unit-length copy of `v`.
pub fn normalized(v: &[f32]) -> Vec<f32> {
    let mut out = v.to_vec();
    normalize_in_place(&mut out);
    out
}

/// Dot product of two index-sorted sparse vectors.
pub fn sparse_dot(a: &[SparseEntry], b: &[SparseEntry]) -> f32 {
    let (mut i, mut j) = (0, 0);
    let mut sum = 0.0f32;
    while i < a.len() && j < b.len() {
        match a[i].index.cmp(&b[j].index) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => {
                sum += a[i].value * b[j].value;
                i += 1;
                j += 1;
            }
        }
    }
    sum
}

/// Squared norm of a sparse vector.
pub fn sparse_norm_sq(a: &[SparseEntry]) -> f32 {
    a.iter().map(|e| e.value * e.value).sum()
}

/// Distance between two index-sorted sparse vectors under `metric`.
pub fn sparse_distance(metric: DistanceMetric, a: &[SparseEntry], b: &[SparseEntry]) -> f32 {
    match metric {
        DistanceMetric::DotProduct => -sparse_dot(a, b),
        DistanceMetric::Cosine => {
            let na = sparse_norm_sq(a);
            let nb = sparse_norm_sq(b);
            if na == 0.0 || nb == 0.0 {
                1.0
            } else {
                1.0 - (sparse_dot(a, b) / (na.sqrt() * nb.sqrt())).clamp(-1.0, 1.0)
            }
        }
        DistanceMetric::Euclidean => {
            (sparse_norm_sq(a) + sparse_norm_sq(b) - 2.0 * sparse_dot(a, b))
                .max(0.0)
                .sqrt()
        }
        DistanceMetric::Manhattan | DistanceMetric::Hamming => {
            let (mut i, mut j) = (0, 0);
            let mut sum = 0.0f32;
            let mut differing = 0u32;
            while i < a.len() || j < b.len() {
                let (x, y) = match (a.get(i), b.get(j)) {
                    (Some(ea), Some(eb)) if ea.index == eb.index => {
                        i += 1;
                        j += 1;
                        (ea.value, eb.value)
                    }
                    (Some(ea), Some(eb)) if ea.index < eb.index => {
                        i += 1;
                        (ea.value, 0.0)
                    }
                    (Some(_), Some(eb)) => {
                        j += 1;
                        (0.0, eb.value)
                    }
                    (Some(ea), None) => {
                        i += 1;
                        (ea.value, 0.0)
                    }
                    (None, Some(eb)) => {
                        j += 1;
                        (0.0, eb.value)
                    }
                    (None, None) => break,
                };
                sum += (x - y).abs();
                if (x > 0.0) != (y > 0.0) {
                    differing += 1;
                }
            }
            if metric == DistanceMetric::Manhattan {
                sum
            } else {
                differing as f32
            }
        }
    }
}

/// Distance between a dense query and an index-sorted sparse vector of the same
/// logical dimension, without materializing either side.
pub fn dense_sparse_distance(metric: DistanceMetric, dense: &[f32], sparse: &[SparseEntry]) -> f32 {
    let mut it = sparse.iter().peekable();
    let mut dot_sum = 0.0f32;
    let mut norm_d = 0.0f32;
    let mut norm_s = 0.0f32;
    let mut l1 = 0.0f32;
    let mut differing = 0u32;
    for (i, &x) in dense.iter().enumerate() {
        let y = match it.peek() {
            Some(e) if e.index as usize == i => {
                let v = e.value;
                it.next();
                v
            }
            _ => 0.0,
        };
        dot_sum += x * y;
        norm_d += x * x;
        norm_s += y * y;
        l1 += (x - y).abs();
        if (x > 0.0) != (y > 0.0) {
            differing += 1;
        }
    }
    match metric {
        DistanceMetric::DotProduct => -dot_sum,
        DistanceMetric::Cosine => {
            if norm_d == 0.0 || norm_s == 0.0 {
                1.0
            } else {
                1.0 - (dot_sum / (norm_d.sqrt() * norm_s.sqrt())).clamp(-1.0, 1.0)
            }
        }
        DistanceMetric::Euclidean => (norm_d + norm_s - 2.0 * dot_sum).max(0.0).sqrt(),
        DistanceMetric::Manhattan => l1,
        DistanceMetric::Hamming => differing as f32,
    }
}

/// Total order over `(distance, index)` pairs: ascending distance, ties by ascending index.
#[inline]
pub fn cmp_hits(a: &(f32, u32), b: &(f32, u32)) -> Ordering {
    OrderedFloat(a.0)
        .cmp(&OrderedFloat(b.0))
        .then_with(|| a.1.cmp(&b.1))
}

/// Sorts hits in place by [`cmp_hits`].
#[inline]
pub fn sort_hits(hits: &mut [(f32, u32)]) {
    hits.sort_unstable_by(cmp_hits);
}
