//! Raw pointer conversions. Null is accepted only where an empty or absent value makes sense.

use crate::error::invalid;
use std::ffi::{c_char, CStr};
use std::path::Path;
use vectordb_core::storage::metadata_from_json;
use vectordb_core::{Metadata, Result, SearchResult};

/// # Safety
/// `ptr` must be null or point to `len` readable, initialized `T`s.
pub(crate) unsafe fn slice<'a, T>(ptr: *const T, len: usize, what: &str) -> Result<&'a [T]> {
    if ptr.is_null() {
        return if len == 0 {
            Ok(&[])
        } else {
            Err(invalid(format!("{what} is null")))
        };
    }
    Ok(std::slice::from_raw_parts(ptr, len))
}

/// # Safety
/// `ptr` must be null or point to `len` writable `T`s not aliased elsewhere.
pub(crate) unsafe fn slice_mut<'a, T>(ptr: *mut T, len: usize, what: &str) -> Result<&'a mut [T]> {
    if ptr.is_null() {
        return if len == 0 {
            Ok(&mut [])
        } else {
            Err(invalid(format!("{what} is null")))
        };
    }
    Ok(std::slice::from_raw_parts_mut(ptr, len))
}

/// # Safety
/// `ptr` must be null or a NUL-terminated string.
pub(crate) unsafe fn opt_str<'a>(ptr: *const c_char) -> Result<Option<&'a str>> {
    if ptr.is_null() {
        return Ok(None);
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map(Some)
        .map_err(|_| invalid("string is not valid UTF-8"))
}

/// # Safety
/// As [`opt_str`].
pub(crate) unsafe fn req_str<'a>(ptr: *const c_char, what: &str) -> Result<&'a str> {
    opt_str(ptr)?.ok_or_else(|| invalid(format!("{what} is null")))
}

/// # Safety
/// As [`opt_str`].
pub(crate) unsafe fn opt_path<'a>(ptr: *const c_char) -> Result<Option<&'a Path>> {
    Ok(opt_str(ptr)?.map(Path::new))
}

/// Parses a JSON object into metadata. Null gives `None`.
///
/// # Safety
/// As [`opt_str`].
pub(crate) unsafe fn metadata_json(ptr: *const c_char) -> Result<Option<Metadata>> {
    let Some(text) = opt_str(ptr)? else {
        return Ok(None);
    };
    let map: serde_json::Map<String, serde_json::Value> = serde_json::from_str(text)
        .map_err(|e| invalid(format!("metadata must be a JSON object: {e}")))?;
    Ok(Some(metadata_from_json(&map)))
}

/// Builds metadata from parallel key/value string arrays.
///
/// # Safety
/// `keys` and `values` must each be null (with `n == 0`) or point to `n` valid strings.
pub(crate) unsafe fn metadata_pairs(
    keys: *const *const c_char,
    values: *const *const c_char,
    n: usize,
) -> Result<Metadata> {
    let keys = slice(keys, n, "metadata keys")?;
    let values = slice(values, n, "metadata values")?;
    let mut metadata = Metadata::new();
    for (&k, &v) in keys.iter().zip(values) {
        metadata.set(req_str(k, "metadata key")?, req_str(v, "metadata value")?);
    }
    Ok(metadata)
}

/// Copies hits into caller buffers. Returns how many were written.
pub(crate) fn write_hits(hits: &[SearchResult], indices: &mut [u64], distances: &mut [f32]) -> usize {
    let n = hits.len().min(indices.len()).min(distances.len());
    for (i, hit) in hits.iter().take(n).enumerate() {
        indices[i] = hit.index as u64;
        distances[i] = hit.distance;
    }
    n
}

/// Copies `text` plus a NUL terminator into `buf` when it fits. Returns the
/// text length, so callers can size a retry.
///
/// # Safety
/// `buf` must be null (with `len == 0`) or point to `len` writable bytes.
pub(crate) unsafe fn write_text(text: &str, buf: *mut c_char, len: usize) -> Result<usize> {
    let out = slice_mut(buf.cast::<u8>(), len, "output buffer")?;
    if text.len() < out.len() {
        out[..text.len()].copy_from_slice(text.as_bytes());
        out[text.len()] = 0;
    }
    Ok(text.len())
}
