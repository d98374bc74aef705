//! Status codes and the per-thread last-error slot.

use std::cell::RefCell;
use std::ffi::{c_char, CString};
use std::panic::{self, AssertUnwindSafe};
use vectordb_core::{Result, VectorDbError};

pub const VDB_OK: i32 = 0;
/// A Rust panic was caught at the boundary. The handle may be in an unknown state.
pub const VDB_ERR_PANIC: i32 = -7;

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(message: String) {
    let message = CString::new(message.replace('\0', " ")).unwrap_or_default();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(message));
}

/// Message of the last failed call on this thread, or null.
///
/// The pointer stays valid until the next failing call on the same thread.
#[no_mangle]
pub extern "C" fn vdb_last_error_message() -> *const c_char {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map_or(std::ptr::null(), |m| m.as_ptr())
    })
}

#[no_mangle]
pub extern "C" fn vdb_clear_last_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

/// Runs `f`, catching panics. Failures record their message and become a code.
pub(crate) fn guard<T>(f: impl FnOnce() -> Result<T>) -> std::result::Result<T, i32> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            tracing::debug!(error = %e, code = e.code(), "ffi call failed");
            let code = e.code();
            set_last_error(e.to_string());
            Err(code)
        }
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".into());
            tracing::error!(detail, "panic caught at ffi boundary");
            set_last_error(format!("internal panic: {detail}"));
            Err(VDB_ERR_PANIC)
        }
    }
}

/// `0` on success, a negative code on failure.
pub(crate) fn status(f: impl FnOnce() -> Result<()>) -> i32 {
    match guard(f) {
        Ok(()) => VDB_OK,
        Err(code) => code,
    }
}

/// A non-negative count or index on success, a negative code on failure.
pub(crate) fn count(f: impl FnOnce() -> Result<usize>) -> i64 {
    match guard(f) {
        Ok(n) => i64::try_from(n).unwrap_or(i64::MAX),
        Err(code) => i64::from(code),
    }
}

pub(crate) fn invalid(message: impl Into<String>) -> VectorDbError {
    VectorDbError::InvalidArgument(message.into())
}
