//! Handle arena. Each open database is owned by exactly one registry entry.
//!
//! Handles are never reused within a process, so a stale handle can only ever
//! resolve to "closed".

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use vectordb_core::{Database, Result, VectorDbError};

static REGISTRY: LazyLock<RwLock<HashMap<u64, Arc<Database>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));
static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

pub(crate) fn register(db: Database) -> u64 {
    let handle = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
    REGISTRY.write().insert(handle, Arc::new(db));
    handle
}

pub(crate) fn get(handle: u64) -> Result<Arc<Database>> {
    REGISTRY
        .read()
        .get(&handle)
        .cloned()
        .ok_or(VectorDbError::Closed)
}

pub(crate) fn remove(handle: u64) -> Option<Arc<Database>> {
    REGISTRY.write().remove(&handle)
}

pub(crate) fn open_count() -> usize {
    REGISTRY.read().len()
}

/// Resolves `handle` and runs `f` against the database.
pub(crate) fn with_db<T>(handle: u64, f: impl FnOnce(&Arc<Database>) -> Result<T>) -> Result<T> {
    let db = get(handle)?;
    f(&db)
}
