//! Compaction, settings, resource limits and observability.

use crate::error::{count, guard, invalid, status};
use crate::handles::with_db;
use crate::ptr::{slice_mut, write_text};
use std::ffi::c_char;
use vectordb_core::ResourceLimits;

/// Fixed-layout counters returned by [`vdb_get_stats`].
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VdbStats {
    pub dimension: u32,
    pub index_type: u32,
    pub count: u64,
    pub live: u64,
    pub deleted: u64,
    pub deleted_ratio: f64,
    pub trained: u8,
    pub cosine_normalized: u8,
    pub read_only: u8,
    pub memory_bytes: u64,
    pub wal_bytes: u64,
    pub total_inserts: u64,
    pub total_queries: u64,
}

/// Zero means unlimited.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VdbResourceLimits {
    pub max_memory_bytes: u64,
    pub max_vectors: u64,
    pub max_concurrent_operations: u64,
}

// ── compaction ──────────────────────────────────────────────────────────

#[no_mangle]
pub extern "C" fn vdb_start_background_compaction(handle: u64) -> i32 {
    status(|| with_db(handle, |db| db.start_background_compaction()))
}

#[no_mangle]
pub extern "C" fn vdb_stop_background_compaction(handle: u64) -> i32 {
    status(|| with_db(handle, |db| db.stop_background_compaction()))
}

/// Compacts now. Returns the live record count afterwards; indices held by
/// the caller are renumbered.
#[no_mangle]
pub extern "C" fn vdb_compact(handle: u64) -> i64 {
    count(|| with_db(handle, |db| db.compact().map(|remap| remap.iter().flatten().count())))
}

#[no_mangle]
pub extern "C" fn vdb_set_compaction_interval(handle: u64, seconds: u64) -> i32 {
    status(|| with_db(handle, |db| db.set_compaction_interval(seconds)))
}

#[no_mangle]
pub extern "C" fn vdb_set_wal_compaction_threshold(handle: u64, bytes: u64) -> i32 {
    status(|| {
        with_db(handle, |db| {
            db.set_wal_compaction_threshold(bytes);
            Ok(())
        })
    })
}

#[no_mangle]
pub extern "C" fn vdb_set_deleted_ratio_threshold(handle: u64, ratio: f64) -> i32 {
    status(|| with_db(handle, |db| db.set_deleted_ratio_threshold(ratio)))
}

// ── search settings ─────────────────────────────────────────────────────

/// Live counts at or below `threshold` are searched exactly; 0 disables.
#[no_mangle]
pub extern "C" fn vdb_set_exact_search_threshold(handle: u64, threshold: u64) -> i32 {
    status(|| {
        with_db(handle, |db| {
            db.set_exact_search_threshold(threshold as usize);
            Ok(())
        })
    })
}

#[no_mangle]
pub extern "C" fn vdb_set_force_exact_search(handle: u64, enabled: i32) -> i32 {
    status(|| {
        with_db(handle, |db| {
            db.set_force_exact_search(enabled != 0);
            Ok(())
        })
    })
}

/// Only accepted while the database is empty.
#[no_mangle]
pub extern "C" fn vdb_set_cosine_normalized(handle: u64, enabled: i32) -> i32 {
    status(|| with_db(handle, |db| db.set_cosine_normalized(enabled != 0)))
}

// ── resource limits ─────────────────────────────────────────────────────

#[no_mangle]
pub extern "C" fn vdb_set_resource_limits(
    handle: u64,
    max_memory_bytes: u64,
    max_vectors: u64,
    max_concurrent_operations: u64,
) -> i32 {
    status(|| {
        with_db(handle, |db| {
            db.set_resource_limits(ResourceLimits {
                max_memory_bytes,
                max_vectors,
                max_concurrent_operations,
            });
            Ok(())
        })
    })
}

/// # Safety
/// `out` must point to one writable [`VdbResourceLimits`].
#[no_mangle]
pub unsafe extern "C" fn vdb_get_resource_limits(handle: u64, out: *mut VdbResourceLimits) -> i32 {
    status(|| {
        let out = slice_mut(out, 1, "out")?;
        let limits = with_db(handle, |db| Ok(db.resource_limits()))?;
        out[0] = VdbResourceLimits {
            max_memory_bytes: limits.max_memory_bytes,
            max_vectors: limits.max_vectors,
            max_concurrent_operations: limits.max_concurrent_operations,
        };
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn vdb_get_memory_usage(handle: u64) -> i64 {
    count(|| with_db(handle, |db| Ok(db.memory_usage() as usize)))
}

#[no_mangle]
pub extern "C" fn vdb_get_concurrent_operations(handle: u64) -> i64 {
    count(|| with_db(handle, |db| Ok(db.concurrent_operations() as usize)))
}

// ── observability ───────────────────────────────────────────────────────

/// # Safety
/// `out` must point to one writable [`VdbStats`].
#[no_mangle]
pub unsafe extern "C" fn vdb_get_stats(handle: u64, out: *mut VdbStats) -> i32 {
    status(|| {
        let out = slice_mut(out, 1, "out")?;
        let s = with_db(handle, |db| Ok(db.stats()))?;
        out[0] = VdbStats {
            dimension: s.dimension as u32,
            index_type: s.index_type.code(),
            count: s.count as u64,
            live: s.live as u64,
            deleted: s.deleted as u64,
            deleted_ratio: s.deleted_ratio,
            trained: u8::from(s.trained),
            cosine_normalized: u8::from(s.cosine_normalized),
            read_only: u8::from(s.read_only),
            memory_bytes: s.memory_bytes,
            wal_bytes: s.wal_bytes,
            total_inserts: s.total_inserts,
            total_queries: s.total_queries,
        };
        Ok(())
    })
}

/// Detailed stats (latency histograms, memory breakdown, rates, recall,
/// health) as JSON into `buf`. Returns the JSON length; retry with a larger
/// buffer when it is `>= buf_len`. Reading resets the per-second rate window.
///
/// # Safety
/// `buf` must be null (with `buf_len == 0`) or point to `buf_len` writable bytes.
#[no_mangle]
pub unsafe extern "C" fn vdb_get_detailed_stats(handle: u64, buf: *mut c_char, buf_len: usize) -> i64 {
    count(|| {
        let stats = with_db(handle, |db| Ok(db.detailed_stats()))?;
        let json = serde_json::to_string(&stats)?;
        write_text(&json, buf, buf_len)
    })
}

/// Healthy 0, degraded -1, unhealthy -2. Other negative values are errors.
#[no_mangle]
pub extern "C" fn vdb_health(handle: u64) -> i32 {
    match guard(|| with_db(handle, |db| Ok(db.health()))) {
        Ok(health) => health.code(),
        Err(code) => code,
    }
}

/// Records an externally measured latency in microseconds.
#[no_mangle]
pub extern "C" fn vdb_record_latency(handle: u64, micros: f64, is_insert: i32) -> i32 {
    status(|| {
        if !micros.is_finite() || micros < 0.0 {
            return Err(invalid("latency must be a finite, non-negative number"));
        }
        with_db(handle, |db| {
            db.record_latency(micros, is_insert != 0);
            Ok(())
        })
    })
}

/// Records a measured recall in `[0, 1]`.
#[no_mangle]
pub extern "C" fn vdb_record_recall(handle: u64, recall: f64) -> i32 {
    status(|| {
        with_db(handle, |db| {
            db.record_recall(recall);
            Ok(())
        })
    })
}
