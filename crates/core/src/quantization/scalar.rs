//! Scalar quantization.
//!
//! Each f32 component is linearly mapped onto `2^bits - 1` levels between a
//! trained min and max, either one range for the whole vector space or one range
//! per dimension. Codes are packed: 4-bit codes two per byte (low nibble first),
//! 8-bit codes one per byte, 16-bit codes little-endian.

use crate::config;
use crate::error::{Result, VectorDbError};
use serde::{Deserialize, Serialize};

/// Scalar quantization settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalarQuantConfig {
    /// Bits per component: 4, 8 or 16.
    pub bits: u8,
    /// Learn one min/max range per dimension instead of a single global range.
    pub per_dimension: bool,
}

impl Default for ScalarQuantConfig {
    fn default() -> Self {
        Self {
            bits: config::SCALAR_QUANT_DEFAULT_BITS,
            per_dimension: false,
        }
    }
}

impl ScalarQuantConfig {
    pub fn validate(&self) -> Result<()> {
        match self.bits {
            4 | 8 | 16 => Ok(()),
            b => Err(VectorDbError::InvalidConfig(format!(
                "scalar quantization bits must be 4, 8 or 16 (got {b})"
            ))),
        }
    }
}

/// A trained scalar quantizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarQuantizer {
    pub config: ScalarQuantConfig,
    pub dimension: usize,
    /// One entry, or `dimension` entries when `per_dimension`.
    mins: Vec<f32>,
    maxs: Vec<f32>,
}

impl ScalarQuantizer {
    /// Learn value ranges from `data` (`n × dim`, flat).
    pub fn train(data: &[f32], dim: usize, config: ScalarQuantConfig) -> Result<Self> {
        config.validate()?;
        if dim == 0 || data.is_empty() || data.len() % dim != 0 {
            return Err(VectorDbError::InvalidTrainingData(
                "scalar quantizer needs at least one full vector".into(),
            ));
        }
        let ranges = if config.per_dimension { dim } else { 1 };
        let mut mins = vec![f32::MAX; ranges];
        let mut maxs = vec![f32::MIN; ranges];
        for v in data.chunks_exact(dim) {
            for (d, &x) in v.iter().enumerate() {
                let r = if config.per_dimension { d } else { 0 };
                mins[r] = mins[r].min(x);
                maxs[r] = maxs[r].max(x);
            }
        }
        Ok(Self {
            config,
            dimension: dim,
            mins,
            maxs,
        })
    }

    #[inline]
    fn range(&self, d: usize) -> (f32, f32) {
        let r = if self.config.per_dimension { d } else { 0 };
        (self.mins[r], self.maxs[r])
    }

    fn levels(&self) -> f32 {
        ((1u32 << self.config.bits) - 1) as f32
    }

    pub fn bytes_per_vector(&self) -> usize {
        (self.dimension * self.config.bits as usize).div_ceil(8)
    }

    fn quantize_component(&self, d: usize, x: f32) -> u16 {
        let (lo, hi) = self.range(d);
        let span = hi - lo;
        if span <= f32::EPSILON {
            return 0;
        }
        (((x - lo) / span) * self.levels()).round().clamp(0.0, self.levels()) as u16
    }

    fn dequantize_component(&self, d: usize, q: u16) -> f32 {
        let (lo, hi) = self.range(d);
        let span = hi - lo;
        if span <= f32::EPSILON {
            return lo;
        }
        lo + (q as f32 / self.levels()) * span
    }

    /// Appends the packed codes of `vector` to `out`.
    pub fn encode_into(&self, vector: &[f32], out: &mut Vec<u8>) {
        match self.config.bits {
            4 => {
                for (pair_idx, pair) in vector.chunks(2).enumerate() {
                    let lo = self.quantize_component(pair_idx * 2, pair[0]) as u8;
                    let hi = pair
                        .get(1)
                        .map(|&x| self.quantize_component(pair_idx * 2 + 1, x) as u8)
                        .unwrap_or(0);
                    out.push(lo | (hi << 4));
                }
            }
            8 => out.extend(
                vector
                    .iter()
                    .enumerate()
                    .map(|(d, &x)| self.quantize_component(d, x) as u8),
            ),
            _ => {
                for (d, &x) in vector.iter().enumerate() {
                    out.extend_from_slice(&self.quantize_component(d, x).to_le_bytes());
                }
            }
        }
    }

    pub fn encode(&self, vector: &[f32]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.bytes_per_vector());
        self.encode_into(vector, &mut out);
        out
    }

    /// Reconstruct an approximate vector from packed codes.
    pub fn decode(&self, codes: &[u8]) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.dimension);
        for d in 0..self.dimension {
            let q = match self.config.bits {
                4 => {
                    let byte = codes[d / 2];
                    if d % 2 == 0 {
                        (byte & 0x0f) as u16
                    } else {
                        (byte >> 4) as u16
                    }
                }
                8 => codes[d] as u16,
                _ => u16::from_le_bytes([codes[2 * d], codes[2 * d + 1]]),
            };
            out.push(self.dequantize_component(d, q));
        }
        out
    }

    pub fn heap_bytes(&self) -> usize {
        (self.mins.capacity() + self.maxs.capacity()) * std::mem::size_of::<f32>()
    }
}
