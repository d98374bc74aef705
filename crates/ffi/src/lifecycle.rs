//! Open, close and persistence entry points.

use crate::error::{count, guard, invalid, status};
use crate::handles;
use crate::ptr::{opt_path, req_str, slice};
use std::ffi::c_char;
use std::path::Path;
use vectordb_core::hnsw::HnswConfig;
use vectordb_core::index::{IvfFlatConfig, IvfPqConfig, LshConfig, PqConfig};
use vectordb_core::{Database, IndexConfig, IndexType, Result};

fn open_handle(open: impl FnOnce() -> Result<Database>) -> u64 {
    guard(|| open().map(handles::register)).unwrap_or(0)
}

fn dimension(dim: u32) -> usize {
    dim as usize
}

/// Opens (or creates) a database. `path` null gives an in-memory database.
/// Returns a handle, or 0 on failure.
///
/// # Safety
/// `path` must be null or a NUL-terminated UTF-8 string.
#[no_mangle]
pub unsafe extern "C" fn vdb_open(path: *const c_char, dim: u32, index_type: u32) -> u64 {
    open_handle(|| {
        let path = opt_path(path)?;
        Database::open(path, dimension(dim), IndexType::from_code(index_type)?)
    })
}

/// Opens with an explicit index configuration given as JSON, e.g.
/// `{"Hnsw":{"m":32}}` or `"KdTree"`. Missing fields take their defaults.
///
/// # Safety
/// `path` as for [`vdb_open`]; `config_json` must be a NUL-terminated UTF-8 string.
#[no_mangle]
pub unsafe extern "C" fn vdb_open_with_config(
    path: *const c_char,
    dim: u32,
    config_json: *const c_char,
) -> u64 {
    open_handle(|| {
        let path = opt_path(path)?;
        let config: IndexConfig = serde_json::from_str(req_str(config_json, "config")?)
            .map_err(|e| invalid(format!("bad index config: {e}")))?;
        Database::open_with_config(path, dimension(dim), config)
    })
}

/// # Safety
/// `path` as for [`vdb_open`].
#[no_mangle]
pub unsafe extern "C" fn vdb_open_hnsw(
    path: *const c_char,
    dim: u32,
    m: u32,
    ef_construction: u32,
    ef_search: u32,
) -> u64 {
    open_handle(|| {
        let config = HnswConfig {
            m: m as usize,
            ef_construction: ef_construction as usize,
            ef_search: ef_search as usize,
            ..HnswConfig::default()
        };
        Database::open_with_config(opt_path(path)?, dimension(dim), IndexConfig::Hnsw(config))
    })
}

/// # Safety
/// `path` as for [`vdb_open`].
#[no_mangle]
pub unsafe extern "C" fn vdb_open_ivfpq(
    path: *const c_char,
    dim: u32,
    nlist: u32,
    m: u32,
    nbits: u8,
    nprobe: u32,
) -> u64 {
    open_handle(|| {
        let config = IvfPqConfig {
            nlist: nlist as usize,
            m: m as usize,
            nbits,
            nprobe: nprobe as usize,
            ..IvfPqConfig::default()
        };
        Database::open_with_config(opt_path(path)?, dimension(dim), IndexConfig::IvfPq(config))
    })
}

/// # Safety
/// `path` as for [`vdb_open`].
#[no_mangle]
pub unsafe extern "C" fn vdb_open_ivfflat(path: *const c_char, dim: u32, nlist: u32, nprobe: u32) -> u64 {
    open_handle(|| {
        let config = IvfFlatConfig {
            nlist: nlist as usize,
            nprobe: nprobe as usize,
            ..IvfFlatConfig::default()
        };
        Database::open_with_config(opt_path(path)?, dimension(dim), IndexConfig::IvfFlat(config))
    })
}

/// # Safety
/// `path` as for [`vdb_open`].
#[no_mangle]
pub unsafe extern "C" fn vdb_open_pq(path: *const c_char, dim: u32, m: u32, nbits: u8) -> u64 {
    open_handle(|| {
        let config = PqConfig {
            m: m as usize,
            nbits,
            ..PqConfig::default()
        };
        Database::open_with_config(opt_path(path)?, dimension(dim), IndexConfig::Pq(config))
    })
}

/// # Safety
/// `path` as for [`vdb_open`].
#[no_mangle]
pub unsafe extern "C" fn vdb_open_lsh(
    path: *const c_char,
    dim: u32,
    num_tables: u32,
    num_hash_bits: u32,
) -> u64 {
    open_handle(|| {
        let config = LshConfig {
            num_tables: num_tables as usize,
            num_hash_bits: num_hash_bits as usize,
            ..LshConfig::default()
        };
        Database::open_with_config(opt_path(path)?, dimension(dim), IndexConfig::Lsh(config))
    })
}

/// Opens a snapshot read-only through a memory map.
///
/// # Safety
/// `path` must be a NUL-terminated UTF-8 string.
#[no_mangle]
pub unsafe extern "C" fn vdb_open_mmap(path: *const c_char, dim: u32, index_type: u32) -> u64 {
    open_handle(|| {
        let path = Path::new(req_str(path, "path")?);
        Database::open_mmap(path, dimension(dim), IndexType::from_code(index_type)?)
    })
}

/// Loads a read-only database from a snapshot image in memory.
///
/// # Safety
/// `bytes` must point to `len` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn vdb_open_from_memory(bytes: *const u8, len: usize) -> u64 {
    open_handle(|| Database::open_from_memory(slice(bytes, len, "bytes")?))
}

/// Closes and releases a handle. Unknown or already-closed handles are a no-op.
#[no_mangle]
pub extern "C" fn vdb_close(handle: u64) -> i32 {
    status(|| match handles::remove(handle) {
        Some(db) => db.close(),
        None => Ok(()),
    })
}

/// Number of handles currently open in this process.
#[no_mangle]
pub extern "C" fn vdb_open_handles() -> u64 {
    handles::open_count() as u64
}

/// Writes a snapshot to `path`, or to the database's own path when null
/// (which also truncates its WAL).
///
/// # Safety
/// `path` must be null or a NUL-terminated UTF-8 string.
#[no_mangle]
pub unsafe extern "C" fn vdb_save(handle: u64, path: *const c_char) -> i32 {
    status(|| {
        let path = opt_path(path)?;
        handles::with_db(handle, |db| db.save(path).map(|_| ()))
    })
}

/// Exports live records as NDJSON. Returns the number written.
///
/// # Safety
/// `path` must be a NUL-terminated UTF-8 string.
#[no_mangle]
pub unsafe extern "C" fn vdb_export_json(handle: u64, path: *const c_char) -> i64 {
    count(|| {
        let path = Path::new(req_str(path, "path")?);
        handles::with_db(handle, |db| db.export_json(path))
    })
}

/// Imports NDJSON records atomically. Returns the number imported.
///
/// # Safety
/// `path` must be a NUL-terminated UTF-8 string.
#[no_mangle]
pub unsafe extern "C" fn vdb_import_json(handle: u64, path: *const c_char) -> i64 {
    count(|| {
        let path = Path::new(req_str(path, "path")?);
        handles::with_db(handle, |db| db.import_json(path))
    })
}

/// Index type code suggested for a collection of `expected_count` vectors.
#[no_mangle]
pub extern "C" fn vdb_suggest_index_type(dim: u32, expected_count: u64) -> u32 {
    IndexType::suggest(dim as usize, expected_count as usize).code()
}
