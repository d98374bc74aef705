//! Search, range, scroll and read-back entry points.
//!
//! Result-producing calls fill caller buffers (`out_indices`, `out_distances`)
//! sized for `k` or `max_results` entries and return how many were written.

use crate::error::{count, invalid};
use crate::handles::with_db;
use crate::ptr::{req_str, slice, slice_mut, write_hits, write_text};
use std::ffi::c_char;
use vectordb_core::storage::metadata_to_json;
use vectordb_core::{
    DistanceMetric, Record, Result, SearchParams, SearchResult, SparseVector, VectorDbError,
};

/// # Safety
/// `out_indices` and `out_distances` must each point to `capacity` writable elements.
unsafe fn fill(
    hits: &[SearchResult],
    out_indices: *mut u64,
    out_distances: *mut f32,
    capacity: usize,
) -> Result<usize> {
    let indices = slice_mut(out_indices, capacity, "out_indices")?;
    let distances = slice_mut(out_distances, capacity, "out_distances")?;
    Ok(write_hits(hits, indices, distances))
}

/// # Safety
/// `query` must point to `dim` floats; outputs to `k` elements each.
#[no_mangle]
pub unsafe extern "C" fn vdb_search(
    handle: u64,
    query: *const f32,
    dim: u32,
    k: u32,
    metric: i32,
    out_indices: *mut u64,
    out_distances: *mut f32,
) -> i64 {
    count(|| {
        let query = slice(query, dim as usize, "query")?;
        let metric = DistanceMetric::from_code(metric)?;
        let hits = with_db(handle, |db| db.search(query, k as usize, metric))?;
        fill(&hits, out_indices, out_distances, k as usize)
    })
}

/// k nearest among records whose metadata `key` equals `value`.
///
/// # Safety
/// As [`vdb_search`]; `key` and `value` must be strings.
#[no_mangle]
pub unsafe extern "C" fn vdb_search_filtered(
    handle: u64,
    query: *const f32,
    dim: u32,
    k: u32,
    metric: i32,
    key: *const c_char,
    value: *const c_char,
    out_indices: *mut u64,
    out_distances: *mut f32,
) -> i64 {
    count(|| {
        let query = slice(query, dim as usize, "query")?;
        let metric = DistanceMetric::from_code(metric)?;
        let key = req_str(key, "key")?;
        let value = req_str(value, "value")?;
        let hits = with_db(handle, |db| db.search_filtered(query, k as usize, metric, key, value))?;
        fill(&hits, out_indices, out_distances, k as usize)
    })
}

/// # Safety
/// As [`vdb_search`]; `expr` must be a string.
#[no_mangle]
pub unsafe extern "C" fn vdb_search_with_filter_expr(
    handle: u64,
    query: *const f32,
    dim: u32,
    k: u32,
    metric: i32,
    expr: *const c_char,
    out_indices: *mut u64,
    out_distances: *mut f32,
) -> i64 {
    count(|| {
        let query = slice(query, dim as usize, "query")?;
        let metric = DistanceMetric::from_code(metric)?;
        let expr = req_str(expr, "filter expression")?;
        let hits = with_db(handle, |db| db.search_with_filter_expr(query, k as usize, metric, expr))?;
        fill(&hits, out_indices, out_distances, k as usize)
    })
}

/// Per-query overrides; 0 keeps the index default.
///
/// # Safety
/// As [`vdb_search`].
#[no_mangle]
pub unsafe extern "C" fn vdb_search_with_params(
    handle: u64,
    query: *const f32,
    dim: u32,
    k: u32,
    metric: i32,
    ef_search: u32,
    nprobe: u32,
    rerank_top: u32,
    out_indices: *mut u64,
    out_distances: *mut f32,
) -> i64 {
    let nonzero = |v: u32| (v > 0).then_some(v as usize);
    count(|| {
        let query = slice(query, dim as usize, "query")?;
        let metric = DistanceMetric::from_code(metric)?;
        let params = SearchParams {
            ef_search: nonzero(ef_search),
            nprobe: nonzero(nprobe),
            rerank_top: nonzero(rerank_top),
        };
        let hits = with_db(handle, |db| db.search_with_params(query, k as usize, metric, &params))?;
        fill(&hits, out_indices, out_distances, k as usize)
    })
}

/// Runs `n_queries` searches. Row `i` of the outputs (`k` slots) holds query
/// `i`'s hits and `out_counts[i]` how many are valid. Returns the total written.
///
/// # Safety
/// `queries` must point to `n_queries * dim` floats, the outputs to `n_queries * k`
/// elements, and `out_counts` to `n_queries` elements.
#[no_mangle]
pub unsafe extern "C" fn vdb_search_batch(
    handle: u64,
    queries: *const f32,
    n_queries: u32,
    dim: u32,
    k: u32,
    metric: i32,
    out_indices: *mut u64,
    out_distances: *mut f32,
    out_counts: *mut u32,
) -> i64 {
    count(|| {
        let (n, dim, k) = (n_queries as usize, dim as usize, k as usize);
        if dim == 0 {
            return Err(invalid("dimension must be positive"));
        }
        let flat = slice(queries, n * dim, "queries")?;
        let metric = DistanceMetric::from_code(metric)?;
        let indices = slice_mut(out_indices, n * k, "out_indices")?;
        let distances = slice_mut(out_distances, n * k, "out_distances")?;
        let counts = slice_mut(out_counts, n, "out_counts")?;

        let queries: Vec<Vec<f32>> = flat.chunks_exact(dim).map(<[f32]>::to_vec).collect();
        let results = with_db(handle, |db| db.search_batch(&queries, k, metric))?;
        let mut total = 0;
        for (i, hits) in results.iter().enumerate() {
            let row = i * k..(i + 1) * k;
            let written = write_hits(hits, &mut indices[row.clone()], &mut distances[row]);
            counts[i] = written as u32;
            total += written;
        }
        Ok(total)
    })
}

/// # Safety
/// `indices` and `values` must point to `nnz` elements; outputs to `k` elements each.
#[no_mangle]
pub unsafe extern "C" fn vdb_search_sparse(
    handle: u64,
    indices: *const u32,
    values: *const f32,
    nnz: u32,
    k: u32,
    metric: i32,
    out_indices: *mut u64,
    out_distances: *mut f32,
) -> i64 {
    count(|| {
        let idx = slice(indices, nnz as usize, "indices")?;
        let vals = slice(values, nnz as usize, "values")?;
        let metric = DistanceMetric::from_code(metric)?;
        let hits = with_db(handle, |db| {
            let query = SparseVector::new(db.dimension(), idx, vals)?;
            db.search_sparse(&query, k as usize, metric)
        })?;
        fill(&hits, out_indices, out_distances, k as usize)
    })
}

/// # Safety
/// `query` must point to `dim` floats; outputs to `max_results` elements each.
#[no_mangle]
pub unsafe extern "C" fn vdb_range_search(
    handle: u64,
    query: *const f32,
    dim: u32,
    radius: f32,
    max_results: u32,
    metric: i32,
    out_indices: *mut u64,
    out_distances: *mut f32,
) -> i64 {
    count(|| {
        let query = slice(query, dim as usize, "query")?;
        let metric = DistanceMetric::from_code(metric)?;
        let max = max_results as usize;
        let hits = with_db(handle, |db| db.range_search(query, radius, max, metric))?;
        fill(&hits, out_indices, out_distances, max)
    })
}

/// # Safety
/// As [`vdb_range_search`]; `expr` must be a string.
#[no_mangle]
pub unsafe extern "C" fn vdb_range_search_filtered(
    handle: u64,
    query: *const f32,
    dim: u32,
    radius: f32,
    max_results: u32,
    metric: i32,
    expr: *const c_char,
    out_indices: *mut u64,
    out_distances: *mut f32,
) -> i64 {
    count(|| {
        let query = slice(query, dim as usize, "query")?;
        let metric = DistanceMetric::from_code(metric)?;
        let expr = req_str(expr, "filter expression")?;
        let max = max_results as usize;
        let hits = with_db(handle, |db| db.range_search_filtered(query, radius, max, metric, expr))?;
        fill(&hits, out_indices, out_distances, max)
    })
}

/// Indices of live records, skipping `offset`, at most `limit`.
///
/// # Safety
/// `out_indices` must point to `limit` writable elements.
#[no_mangle]
pub unsafe extern "C" fn vdb_scroll(handle: u64, offset: u64, limit: u32, out_indices: *mut u64) -> i64 {
    count(|| {
        let out = slice_mut(out_indices, limit as usize, "out_indices")?;
        let page = with_db(handle, |db| db.scroll(offset as usize, limit as usize))?;
        for (slot, (index, _)) in out.iter_mut().zip(&page) {
            *slot = *index as u64;
        }
        Ok(page.len().min(out.len()))
    })
}

/// Copies the dense vector at `index` into `out`. Returns its dimension.
///
/// # Safety
/// `out` must point to `dim` writable floats.
#[no_mangle]
pub unsafe extern "C" fn vdb_get_vector(handle: u64, index: u64, out: *mut f32, dim: u32) -> i64 {
    count(|| {
        let out = slice_mut(out, dim as usize, "out")?;
        let record = with_db(handle, |db| db.get_vector(index as usize))?;
        let dense = match record {
            Record::Dense(v) => v.data,
            Record::Sparse(s) => s.to_dense(),
        };
        if dense.len() != out.len() {
            return Err(VectorDbError::DimensionMismatch {
                expected: dense.len(),
                got: out.len(),
            });
        }
        out.copy_from_slice(&dense);
        Ok(dense.len())
    })
}

/// Writes the metadata of `index` as a JSON object into `buf` (NUL-terminated)
/// when it fits. Returns the JSON length in bytes; retry with a larger buffer
/// when it is `>= buf_len`.
///
/// # Safety
/// `buf` must be null (with `buf_len == 0`) or point to `buf_len` writable bytes.
#[no_mangle]
pub unsafe extern "C" fn vdb_get_metadata_json(
    handle: u64,
    index: u64,
    buf: *mut c_char,
    buf_len: usize,
) -> i64 {
    count(|| {
        let record = with_db(handle, |db| db.get_vector(index as usize))?;
        let json = serde_json::Value::Object(metadata_to_json(record.metadata())).to_string();
        write_text(&json, buf, buf_len)
    })
}

/// Index of the record with point ID `id`.
///
/// # Safety
/// `id` must be a NUL-terminated UTF-8 string.
#[no_mangle]
pub unsafe extern "C" fn vdb_get_index_by_id(handle: u64, id: *const c_char) -> i64 {
    count(|| {
        let id = req_str(id, "id")?;
        with_db(handle, |db| db.get_by_id(id).map(|(index, _)| index))
    })
}

/// # Safety
/// `expr` must be a NUL-terminated UTF-8 string.
#[no_mangle]
pub unsafe extern "C" fn vdb_count_by_filter(handle: u64, expr: *const c_char) -> i64 {
    count(|| {
        let expr = req_str(expr, "filter expression")?;
        with_db(handle, |db| db.count_by_filter(expr))
    })
}

#[no_mangle]
pub extern "C" fn vdb_count(handle: u64) -> i64 {
    count(|| with_db(handle, |db| Ok(db.live_count())))
}
