//! Sign-bit binary quantization.
//!
//! Bit `d` of a code is set when component `d` is strictly positive. Codes are
//! packed into `u64` words so Hamming distance is a popcount per word.

/// Number of `u64` words needed for `dim` bits.
#[inline]
pub fn words_for(dim: usize) -> usize {
    dim.div_ceil(64)
}

/// Appends the packed sign code of `v` to `out`.
pub fn encode_into(v: &[f32], out: &mut Vec<u64>) {
    for chunk in v.chunks(64) {
        let mut word = 0u64;
        for (bit, &x) in chunk.iter().enumerate() {
            if x > 0.0 {
                word |= 1u64 << bit;
            }
        }
        out.push(word);
    }
}

pub fn encode(v: &[f32]) -> Vec<u64> {
    let mut out = Vec::with_capacity(words_for(v.len()));
    encode_into(v, &mut out);
    out
}

/// Hamming distance between two packed codes.
#[inline]
pub fn hamming(a: &[u64], b: &[u64]) -> u32 {
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
}
