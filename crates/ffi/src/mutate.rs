//! Insert, update, delete and training entry points.
//!
//! Insert-style calls return the index written (>= 0) or a negative code.

use crate::error::{count, invalid, status};
use crate::handles::with_db;
use crate::ptr::{metadata_json, metadata_pairs, opt_str, req_str, slice};
use std::ffi::c_char;
use vectordb_core::{IndexType, Metadata, SparseVector, Vector};

/// # Safety
/// `data` must point to `dim` floats.
#[no_mangle]
pub unsafe extern "C" fn vdb_add_vector(handle: u64, data: *const f32, dim: u32) -> i64 {
    count(|| {
        let data = slice(data, dim as usize, "data")?;
        with_db(handle, |db| db.add_vector(data))
    })
}

/// Metadata as parallel arrays of `n_meta` key and value strings.
///
/// # Safety
/// `data` must point to `dim` floats; `keys` and `values` to `n_meta` strings each.
#[no_mangle]
pub unsafe extern "C" fn vdb_add_vector_with_metadata(
    handle: u64,
    data: *const f32,
    dim: u32,
    keys: *const *const c_char,
    values: *const *const c_char,
    n_meta: u32,
) -> i64 {
    count(|| {
        let data = slice(data, dim as usize, "data")?;
        let metadata = metadata_pairs(keys, values, n_meta as usize)?;
        with_db(handle, |db| db.add_vector_with_metadata(data, metadata))
    })
}

/// Metadata as a JSON object; non-string values are stored as their JSON text.
///
/// # Safety
/// `data` must point to `dim` floats; `metadata_json` must be null or a string.
#[no_mangle]
pub unsafe extern "C" fn vdb_add_vector_with_rich_metadata(
    handle: u64,
    data: *const f32,
    dim: u32,
    metadata_json_ptr: *const c_char,
) -> i64 {
    count(|| {
        let data = slice(data, dim as usize, "data")?;
        let metadata = metadata_json(metadata_json_ptr)?.unwrap_or_default();
        with_db(handle, |db| db.add_vector_with_metadata(data, metadata))
    })
}

/// Inserts under a point ID. A null `id` generates a UUID.
///
/// # Safety
/// `data` must point to `dim` floats; `id` and `metadata_json` must be null or strings.
#[no_mangle]
pub unsafe extern "C" fn vdb_add_vector_with_id(
    handle: u64,
    data: *const f32,
    dim: u32,
    id: *const c_char,
    metadata_json_ptr: *const c_char,
) -> i64 {
    count(|| {
        let data = slice(data, dim as usize, "data")?;
        let id = opt_str(id)?;
        let metadata = metadata_json(metadata_json_ptr)?.unwrap_or_default();
        with_db(handle, |db| db.add_vector_with_id(data, metadata, id).map(|(i, _)| i))
    })
}

/// Inserts `count` vectors of `dim` floats (row-major) atomically.
/// Returns the number inserted.
///
/// # Safety
/// `data` must point to `n * dim` floats.
#[no_mangle]
pub unsafe extern "C" fn vdb_add_vectors(handle: u64, data: *const f32, n: u32, dim: u32) -> i64 {
    count(|| {
        let dim = dim as usize;
        if dim == 0 {
            return Err(invalid("dimension must be positive"));
        }
        let data = slice(data, n as usize * dim, "data")?;
        let vectors: Vec<Vector> = data.chunks_exact(dim).map(|c| Vector::new(c.to_vec())).collect();
        with_db(handle, |db| db.add_vectors(&vectors).map(|v| v.len()))
    })
}

/// # Safety
/// `indices` and `values` must each point to `nnz` elements.
#[no_mangle]
pub unsafe extern "C" fn vdb_add_sparse_vector(
    handle: u64,
    indices: *const u32,
    values: *const f32,
    nnz: u32,
    metadata_json_ptr: *const c_char,
) -> i64 {
    count(|| {
        let indices = slice(indices, nnz as usize, "indices")?;
        let values = slice(values, nnz as usize, "values")?;
        let metadata = metadata_json(metadata_json_ptr)?.unwrap_or_default();
        with_db(handle, |db| {
            let mut vector = SparseVector::new(db.dimension(), indices, values)?;
            vector.metadata = metadata;
            db.add_sparse_vector(&vector)
        })
    })
}

/// Updates the live record at `index` or appends a new one. Metadata, when
/// given as JSON, is merged. Returns the index written.
///
/// # Safety
/// `data` must point to `dim` floats; `metadata_json` must be null or a string.
#[no_mangle]
pub unsafe extern "C" fn vdb_upsert(
    handle: u64,
    index: u64,
    data: *const f32,
    dim: u32,
    metadata_json_ptr: *const c_char,
) -> i64 {
    count(|| {
        let data = slice(data, dim as usize, "data")?;
        let metadata = metadata_json(metadata_json_ptr)?;
        with_db(handle, |db| db.upsert(index as usize, data, metadata))
    })
}

#[no_mangle]
pub extern "C" fn vdb_delete_vector(handle: u64, index: u64) -> i32 {
    status(|| with_db(handle, |db| db.delete_vector(index as usize)))
}

/// Returns how many of the given indices were live and are now deleted.
///
/// # Safety
/// `indices` must point to `n` elements.
#[no_mangle]
pub unsafe extern "C" fn vdb_delete_vectors(handle: u64, indices: *const u64, n: u32) -> i64 {
    count(|| {
        let indices: Vec<usize> = slice(indices, n as usize, "indices")?
            .iter()
            .map(|&i| i as usize)
            .collect();
        with_db(handle, |db| db.delete_vectors(&indices))
    })
}

/// Returns 1 if a record was deleted, 0 if the ID was unknown.
///
/// # Safety
/// `id` must be a NUL-terminated UTF-8 string.
#[no_mangle]
pub unsafe extern "C" fn vdb_delete_by_id(handle: u64, id: *const c_char) -> i32 {
    match crate::error::guard(|| {
        let id = req_str(id, "id")?;
        with_db(handle, |db| db.delete_by_id(id))
    }) {
        Ok(deleted) => i32::from(deleted),
        Err(code) => code,
    }
}

/// # Safety
/// `data` must point to `dim` floats.
#[no_mangle]
pub unsafe extern "C" fn vdb_update_vector(handle: u64, index: u64, data: *const f32, dim: u32) -> i32 {
    status(|| {
        let data = slice(data, dim as usize, "data")?;
        with_db(handle, |db| db.update_vector(index as usize, data))
    })
}

/// Merges a JSON object into the record's metadata.
///
/// # Safety
/// `metadata_json` must be a NUL-terminated UTF-8 string.
#[no_mangle]
pub unsafe extern "C" fn vdb_update_vector_metadata(
    handle: u64,
    index: u64,
    metadata_json_ptr: *const c_char,
) -> i32 {
    status(|| {
        let metadata = metadata_json(metadata_json_ptr)?.unwrap_or_else(Metadata::new);
        with_db(handle, |db| db.update_metadata(index as usize, metadata))
    })
}

/// # Safety
/// `data` must point to `n * dim` floats.
unsafe fn train_as(expected: Option<IndexType>, handle: u64, data: *const f32, n: u32, dim: u32) -> i32 {
    status(|| {
        let data = slice(data, n as usize * dim as usize, "training data")?;
        with_db(handle, |db| {
            if let Some(expected) = expected {
                if db.index_type() != expected {
                    return Err(invalid(format!(
                        "{expected} training called on a {} database",
                        db.index_type()
                    )));
                }
            }
            db.train(data, dim as usize)
        })
    })
}

/// Trains whatever trainable index the database uses.
///
/// # Safety
/// `data` must point to `n * dim` floats.
#[no_mangle]
pub unsafe extern "C" fn vdb_train(handle: u64, data: *const f32, n: u32, dim: u32) -> i32 {
    train_as(None, handle, data, n, dim)
}

/// # Safety
/// As [`vdb_train`].
#[no_mangle]
pub unsafe extern "C" fn vdb_ivfpq_train(handle: u64, data: *const f32, n: u32, dim: u32) -> i32 {
    train_as(Some(IndexType::IvfPq), handle, data, n, dim)
}

/// # Safety
/// As [`vdb_train`].
#[no_mangle]
pub unsafe extern "C" fn vdb_ivfflat_train(handle: u64, data: *const f32, n: u32, dim: u32) -> i32 {
    train_as(Some(IndexType::IvfFlat), handle, data, n, dim)
}

/// # Safety
/// As [`vdb_train`].
#[no_mangle]
pub unsafe extern "C" fn vdb_pq_train(handle: u64, data: *const f32, n: u32, dim: u32) -> i32 {
    train_as(Some(IndexType::Pq), handle, data, n, dim)
}
