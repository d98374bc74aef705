//! # vectordb-ffi
//!
//! C ABI over `vectordb-core`.
//!
//! Conventions:
//! - `vdb_open*` returns a non-zero handle, or 0 on failure. Handles are never
//!   reused; `vdb_close` on an unknown or closed handle is a no-op.
//! - Status calls return 0 on success; count and index calls return a value
//!   `>= 0`. Failures are negative: -1 validation, -2 resource limit, -3 I/O,
//!   -4 index state (untrained, read-only, closed handle), -5 corruption,
//!   -7 internal panic.
//! - After a failure, `vdb_last_error_message` describes it (per thread).
//! - Distance codes: 0 Euclidean, 1 Cosine, 2 DotProduct, 3 Manhattan, 4 Hamming.
//!   Index type codes: 0 KD-Tree, 1 HNSW, 2 IVF-PQ, 3 Sparse, 4 Flat, 5 IVF-Flat,
//!   6 PQ, 7 LSH.
//! - Pointer arguments must be valid for the lengths passed alongside them.
//!   Strings are NUL-terminated UTF-8. Null is accepted only where documented.

#![allow(clippy::too_many_arguments)]

mod admin;
mod error;
mod handles;
mod lifecycle;
mod mutate;
mod ptr;
mod query;

pub use admin::*;
pub use error::{vdb_clear_last_error, vdb_last_error_message, VDB_ERR_PANIC, VDB_OK};
pub use lifecycle::*;
pub use mutate::*;
pub use query::*;

use std::ffi::c_char;

/// Library version as a static NUL-terminated string.
#[no_mangle]
pub extern "C" fn vdb_version() -> *const c_char {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr().cast()
}
