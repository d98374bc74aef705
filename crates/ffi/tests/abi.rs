use std::ffi::{CStr, CString};
use std::ptr;
use tempfile::TempDir;
use vectordb::*;

const EUCLIDEAN: i32 = 0;
const KDTREE: u32 = 0;
const HNSW: u32 = 1;
const IVFPQ: u32 = 2;

fn cstr(s: &str) -> CString {
    CString::new(s).unwrap()
}

fn last_error() -> String {
    let p = vdb_last_error_message();
    assert!(!p.is_null());
    unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned()
}

fn search(handle: u64, query: &[f32], k: usize) -> Vec<(u64, f32)> {
    let mut idx = vec![0u64; k];
    let mut dist = vec![0f32; k];
    let n = unsafe {
        vdb_search(
            handle,
            query.as_ptr(),
            query.len() as u32,
            k as u32,
            EUCLIDEAN,
            idx.as_mut_ptr(),
            dist.as_mut_ptr(),
        )
    };
    assert!(n >= 0, "search failed: {}", last_error());
    idx.into_iter().zip(dist).take(n as usize).collect()
}

// ── lifecycle ────────────────────────────────────────────────────────

#[test]
fn test_open_add_search_close() {
    let h = unsafe { vdb_open(ptr::null(), 4, HNSW) };
    assert_ne!(h, 0);
    for v in [[1.0f32, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0]] {
        assert!(unsafe { vdb_add_vector(h, v.as_ptr(), 4) } >= 0);
    }
    assert_eq!(vdb_set_exact_search_threshold(h, 0), VDB_OK);

    let hits = search(h, &[1.0, 0.0, 0.0, 0.0], 1);
    assert_eq!(hits, vec![(0, 0.0)]);

    assert_eq!(vdb_close(h), VDB_OK);
    assert_eq!(vdb_close(h), VDB_OK);
    assert_eq!(vdb_count(h), -4);
    assert!(last_error().contains("closed"));
}

#[test]
fn test_open_failures_return_zero() {
    assert_eq!(unsafe { vdb_open(ptr::null(), 0, KDTREE) }, 0);
    assert_eq!(unsafe { vdb_open(ptr::null(), 4, 99) }, 0);
    assert!(last_error().contains("99"));
    let bad = cstr("{\"Hnsw\":{\"m\":1}}");
    assert_eq!(unsafe { vdb_open_with_config(ptr::null(), 4, bad.as_ptr()) }, 0);
    let good = cstr("{\"Hnsw\":{\"m\":8}}");
    let h = unsafe { vdb_open_with_config(ptr::null(), 4, good.as_ptr()) };
    assert_ne!(h, 0);
    vdb_close(h);
}

// ── errors ───────────────────────────────────────────────────────────

#[test]
fn test_error_codes_by_kind() {
    let h = unsafe { vdb_open(ptr::null(), 4, KDTREE) };
    let short = [1.0f32, 2.0];
    assert_eq!(unsafe { vdb_add_vector(h, short.as_ptr(), 2) }, -1);
    assert!(last_error().contains("dimension mismatch"));
    assert_eq!(unsafe { vdb_add_vector(h, ptr::null(), 4) }, -1);

    assert_eq!(vdb_set_resource_limits(h, 0, 1, 0), VDB_OK);
    let v = [0.0f32; 4];
    assert_eq!(unsafe { vdb_add_vector(h, v.as_ptr(), 4) }, 0);
    assert_eq!(unsafe { vdb_add_vector(h, v.as_ptr(), 4) }, -2);

    let mut limits = VdbResourceLimits::default();
    assert_eq!(unsafe { vdb_get_resource_limits(h, &mut limits) }, VDB_OK);
    assert_eq!(limits.max_vectors, 1);
    vdb_close(h);

    let ivf = unsafe { vdb_open(ptr::null(), 8, IVFPQ) };
    let v = [0.0f32; 8];
    assert_eq!(unsafe { vdb_add_vector(ivf, v.as_ptr(), 8) }, -4);
    assert_eq!(unsafe { vdb_pq_train(ivf, v.as_ptr(), 1, 8) }, -1);
    vdb_close(ivf);
}

// ── metadata and filters ─────────────────────────────────────────────

#[test]
fn test_metadata_and_filtered_search() {
    let h = unsafe { vdb_open(ptr::null(), 2, KDTREE) };
    let keys = [cstr("color")];
    let key_ptrs = [keys[0].as_ptr()];
    for i in 0..10 {
        let v = [i as f32, 0.0];
        let color = cstr(if i % 2 == 0 { "red" } else { "blue" });
        let val_ptrs = [color.as_ptr()];
        let idx = unsafe {
            vdb_add_vector_with_metadata(h, v.as_ptr(), 2, key_ptrs.as_ptr(), val_ptrs.as_ptr(), 1)
        };
        assert_eq!(idx, i as i64);
    }
    let rich = cstr(r#"{"n": 7, "tag": "x"}"#);
    assert_eq!(unsafe { vdb_update_vector_metadata(h, 3, rich.as_ptr()) }, VDB_OK);

    let mut buf = vec![0 as std::ffi::c_char; 128];
    let len = unsafe { vdb_get_metadata_json(h, 3, buf.as_mut_ptr(), buf.len()) };
    let json = unsafe { CStr::from_ptr(buf.as_ptr()) }.to_str().unwrap();
    assert_eq!(len as usize, json.len());
    assert_eq!(json, r#"{"color":"blue","n":"7","tag":"x"}"#);
    assert!(unsafe { vdb_get_metadata_json(h, 3, ptr::null_mut(), 0) } > 0);

    let q = [4.2f32, 0.0];
    let (mut idx, mut dist) = ([0u64; 2], [0f32; 2]);
    let (key, value) = (cstr("color"), cstr("blue"));
    let n = unsafe {
        vdb_search_filtered(h, q.as_ptr(), 2, 2, EUCLIDEAN, key.as_ptr(), value.as_ptr(),
            idx.as_mut_ptr(), dist.as_mut_ptr())
    };
    assert_eq!(n, 2);
    assert_eq!(idx, [5, 3]);

    let expr = cstr("color == \"red\"");
    assert_eq!(unsafe { vdb_count_by_filter(h, expr.as_ptr()) }, 5);
    vdb_close(h);
}

// ── batch, delete, scroll ────────────────────────────────────────────

#[test]
fn test_batch_delete_scroll() {
    let h = unsafe { vdb_open(ptr::null(), 2, KDTREE) };
    let data: Vec<f32> = (0..10).flat_map(|i| [i as f32, 1.0]).collect();
    assert_eq!(unsafe { vdb_add_vectors(h, data.as_ptr(), 10, 2) }, 10);

    let bad: Vec<f32> = vec![0.0; 3];
    assert_eq!(unsafe { vdb_add_vectors(h, bad.as_ptr(), 1, 3) }, -1);
    assert_eq!(vdb_count(h), 10);

    let doomed = [1u64, 2, 2, 50];
    assert_eq!(unsafe { vdb_delete_vectors(h, doomed.as_ptr(), 4) }, 2);
    assert_eq!(vdb_delete_vector(h, 1), -1);

    let mut page = [0u64; 4];
    assert_eq!(unsafe { vdb_scroll(h, 0, 4, page.as_mut_ptr()) }, 4);
    assert_eq!(page, [0, 3, 4, 5]);

    let queries = [0.0f32, 1.0, 9.0, 1.0];
    let (mut idx, mut dist, mut counts) = ([0u64; 4], [0f32; 4], [0u32; 2]);
    let total = unsafe {
        vdb_search_batch(h, queries.as_ptr(), 2, 2, 2, EUCLIDEAN, idx.as_mut_ptr(),
            dist.as_mut_ptr(), counts.as_mut_ptr())
    };
    assert_eq!(total, 4);
    assert_eq!(counts, [2, 2]);
    assert_eq!(idx, [0, 3, 9, 8]);

    assert_eq!(vdb_compact(h), 8);
    let mut stats = VdbStats::default();
    assert_eq!(unsafe { vdb_get_stats(h, &mut stats) }, VDB_OK);
    assert_eq!(stats.deleted, 0);
    assert_eq!(stats.live, 8);
    vdb_close(h);
}

// ── persistence ──────────────────────────────────────────────────────

#[test]
fn test_save_reopen_and_mmap() {
    let dir = TempDir::new().unwrap();
    let path = cstr(dir.path().join("db.vdb").to_str().unwrap());

    let h = unsafe { vdb_open(path.as_ptr(), 3, KDTREE) };
    assert_ne!(h, 0);
    let id = cstr("alpha");
    let v = [1.0f32, 2.0, 3.0];
    assert_eq!(unsafe { vdb_add_vector_with_id(h, v.as_ptr(), 3, id.as_ptr(), ptr::null()) }, 0);
    assert_eq!(unsafe { vdb_save(h, ptr::null()) }, VDB_OK);
    vdb_close(h);

    let h = unsafe { vdb_open(path.as_ptr(), 3, KDTREE) };
    assert_eq!(unsafe { vdb_get_index_by_id(h, id.as_ptr()) }, 0);
    let mut out = [0f32; 3];
    assert_eq!(unsafe { vdb_get_vector(h, 0, out.as_mut_ptr(), 3) }, 3);
    assert_eq!(out, v);
    vdb_close(h);

    let ro = unsafe { vdb_open_mmap(path.as_ptr(), 3, KDTREE) };
    assert_ne!(ro, 0);
    assert_eq!(unsafe { vdb_add_vector(ro, v.as_ptr(), 3) }, -4);
    assert_eq!(search(ro, &v, 1), vec![(0, 0.0)]);
    vdb_close(ro);
}

// ── observability ────────────────────────────────────────────────────

#[test]
fn test_detailed_stats_and_health() {
    let h = unsafe { vdb_open(ptr::null(), 2, KDTREE) };
    let v = [1.0f32, 1.0];
    unsafe { vdb_add_vector(h, v.as_ptr(), 2) };
    search(h, &v, 1);
    assert_eq!(vdb_record_latency(h, 120.0, 0), VDB_OK);
    assert_eq!(vdb_record_latency(h, -1.0, 0), -1);
    assert_eq!(vdb_record_recall(h, 0.9), VDB_OK);
    assert_eq!(vdb_health(h), 0);

    let needed = unsafe { vdb_get_detailed_stats(h, ptr::null_mut(), 0) };
    assert!(needed > 0);
    let mut buf = vec![0 as std::ffi::c_char; needed as usize + 1];
    assert_eq!(unsafe { vdb_get_detailed_stats(h, buf.as_mut_ptr(), buf.len()) }, needed);
    let text = unsafe { CStr::from_ptr(buf.as_ptr()) }.to_str().unwrap();
    let json: serde_json::Value = serde_json::from_str(text).unwrap();
    assert_eq!(json["stats"]["live"], 1);
    assert_eq!(json["recall"]["samples"], 1);
    assert!(vdb_get_memory_usage(h) > 0);
    vdb_close(h);
}

#[test]
fn test_background_compaction_lifecycle() {
    let h = unsafe { vdb_open(ptr::null(), 2, KDTREE) };
    assert_eq!(vdb_set_compaction_interval(h, 0), -1);
    assert_eq!(vdb_set_deleted_ratio_threshold(h, 2.0), -1);
    assert_eq!(vdb_start_background_compaction(h), VDB_OK);
    assert_eq!(vdb_start_background_compaction(h), VDB_OK);
    assert_eq!(vdb_stop_background_compaction(h), VDB_OK);
    assert_eq!(vdb_close(h), VDB_OK);
    assert_eq!(vdb_suggest_index_type(32, 1_000), KDTREE);
    assert!(!vdb_version().is_null());
}
