//! Resource ceilings checked before admitting mutations.

use crate::error::{ResourceLimit, Result, VectorDbError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-database ceilings. Zero means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub max_memory_bytes: u64,
    pub max_vectors: u64,
    pub max_concurrent_operations: u64,
}

impl ResourceLimits {
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Fails if admitting `additional` vectors would exceed `max_vectors`.
    pub fn check_vectors(&self, current: u64, additional: u64) -> Result<()> {
        if self.max_vectors > 0 && current + additional > self.max_vectors {
            tracing::warn!(current, additional, max = self.max_vectors, "vector limit reached");
            return Err(VectorDbError::ResourceExhausted {
                limit: ResourceLimit::Vectors,
                current,
                max: self.max_vectors,
            });
        }
        Ok(())
    }

    /// Fails if `current` plus an estimated `additional` bytes exceeds `max_memory_bytes`.
    pub fn check_memory(&self, current: u64, additional: u64) -> Result<()> {
        if self.max_memory_bytes > 0 && current + additional > self.max_memory_bytes {
            tracing::warn!(current, additional, max = self.max_memory_bytes, "memory limit reached");
            return Err(VectorDbError::ResourceExhausted {
                limit: ResourceLimit::Memory,
                current,
                max: self.max_memory_bytes,
            });
        }
        Ok(())
    }
}

/// Counts in-flight operations against `max_concurrent_operations`.
#[derive(Debug, Default)]
pub struct ConcurrencyGate {
    active: AtomicU64,
}

impl ConcurrencyGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Acquire)
    }

    /// Admits one operation, or fails when `max` (non-zero) are already running.
    pub fn enter(&self, max: u64) -> Result<OperationGuard<'_>> {
        let prev = self.active.fetch_add(1, Ordering::AcqRel);
        if max > 0 && prev >= max {
            self.active.fetch_sub(1, Ordering::AcqRel);
            tracing::warn!(active = prev, max, "concurrent operation limit reached");
            return Err(VectorDbError::ResourceExhausted {
                limit: ResourceLimit::ConcurrentOperations,
                current: prev,
                max,
            });
        }
        Ok(OperationGuard { gate: self })
    }
}

/// Releases its slot in the [`ConcurrencyGate`] on drop.
#[derive(Debug)]
pub struct OperationGuard<'a> {
    gate: &'a ConcurrencyGate,
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.gate.active.fetch_sub(1, Ordering::AcqRel);
    }
}
