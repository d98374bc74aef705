//! Error taxonomy for the engine.
//!
//! Every fallible operation returns [`Result<T>`]. Errors fall into five kinds
//! (see [`ErrorKind`]) that callers use to decide whether a retry can succeed:
//! validation errors never do, I/O errors may.

use crate::index::IndexType;
use std::fmt;

/// Coarse classification of a [`VectorDbError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input detected before any state mutation. Retrying with the same input fails again.
    Validation,
    /// A memory, vector-count or concurrency ceiling rejected the operation.
    Resource,
    /// Disk I/O failed (WAL append, snapshot save/load). May be transient.
    Io,
    /// The index or handle is in the wrong state (untrained, read-only, closed).
    IndexState,
    /// Snapshot or WAL contents failed integrity checks.
    Corrupted,
}

impl ErrorKind {
    /// Stable negative status code used across the C ABI.
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::Validation => -1,
            ErrorKind::Resource => -2,
            ErrorKind::Io => -3,
            ErrorKind::IndexState => -4,
            ErrorKind::Corrupted => -5,
        }
    }
}

/// Which resource ceiling was hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceLimit {
    Memory,
    Vectors,
    ConcurrentOperations,
}

impl fmt::Display for ResourceLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceLimit::Memory => f.write_str("max_memory_bytes"),
            ResourceLimit::Vectors => f.write_str("max_vectors"),
            ResourceLimit::ConcurrentOperations => f.write_str("max_concurrent_operations"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VectorDbError {
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("index {index} out of range (slots: {count})")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("vector at index {0} has been deleted")]
    Deleted(usize),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid training data: {0}")]
    InvalidTrainingData(String),

    #[error("filter parse error at byte {position}: {message}")]
    FilterParse { position: usize, message: String },

    #[error("resource limit exceeded: {limit} (current {current}, limit {max})")]
    ResourceExhausted {
        limit: ResourceLimit,
        current: u64,
        max: u64,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("{0} index is not trained")]
    NotTrained(IndexType),

    #[error("{op} is not supported by the {index} index")]
    Unsupported { index: IndexType, op: &'static str },

    #[error("database is read-only")]
    ReadOnly,

    #[error("database handle is closed")]
    Closed,

    #[error("corrupted {what}: {detail}")]
    Corrupted { what: &'static str, detail: String },
}

impl VectorDbError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VectorDbError::DimensionMismatch { .. }
            | VectorDbError::IndexOutOfRange { .. }
            | VectorDbError::Deleted(_)
            | VectorDbError::InvalidConfig(_)
            | VectorDbError::InvalidArgument(_)
            | VectorDbError::InvalidTrainingData(_)
            | VectorDbError::FilterParse { .. }
            | VectorDbError::Unsupported { .. } => ErrorKind::Validation,
            VectorDbError::ResourceExhausted { .. } => ErrorKind::Resource,
            VectorDbError::Io(_) | VectorDbError::Serialization(_) => ErrorKind::Io,
            VectorDbError::NotTrained(_) | VectorDbError::ReadOnly | VectorDbError::Closed => {
                ErrorKind::IndexState
            }
            VectorDbError::Corrupted { .. } => ErrorKind::Corrupted,
        }
    }

    /// Negative status code for this error (see [`ErrorKind::code`]).
    pub fn code(&self) -> i32 {
        self.kind().code()
    }

    pub(crate) fn corrupted(what: &'static str, detail: impl Into<String>) -> Self {
        VectorDbError::Corrupted {
            what,
            detail: detail.into(),
        }
    }
}

impl From<bincode::Error> for VectorDbError {
    fn from(e: bincode::Error) -> Self {
        match *e {
            bincode::ErrorKind::Io(io) => VectorDbError::Io(io),
            other => VectorDbError::Serialization(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for VectorDbError {
    fn from(e: serde_json::Error) -> Self {
        VectorDbError::Serialization(e.to_string())
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, VectorDbError>;

/// Fail with [`VectorDbError::DimensionMismatch`] unless `got == expected`.
#[inline]
pub(crate) fn check_dimension(expected: usize, got: usize) -> Result<()> {
    if expected == got {
        Ok(())
    } else {
        Err(VectorDbError::DimensionMismatch { expected, got })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_map_to_distinct_codes() {
        let errors = [
            VectorDbError::DimensionMismatch {
                expected: 4,
                got: 3,
            },
            VectorDbError::ResourceExhausted {
                limit: ResourceLimit::Vectors,
                current: 10,
                max: 10,
            },
            VectorDbError::Io(std::io::Error::other("disk full")),
            VectorDbError::NotTrained(IndexType::IvfPq),
            VectorDbError::corrupted("snapshot", "bad crc"),
        ];
        let codes: Vec<i32> = errors.iter().map(|e| e.code()).collect();
        assert_eq!(codes, vec![-1, -2, -3, -4, -5]);
    }

    #[test]
    fn test_display_messages() {
        let e = VectorDbError::DimensionMismatch {
            expected: 128,
            got: 64,
        };
        assert_eq!(e.to_string(), "dimension mismatch: expected 128, got 64");
        let e = VectorDbError::Unsupported {
            index: IndexType::Sparse,
            op: "update_vector",
        };
        assert!(e.to_string().contains("Sparse"));
    }

    #[test]
    fn test_check_dimension() {
        assert!(check_dimension(3, 3).is_ok());
        assert!(matches!(
            check_dimension(3, 4),
            Err(VectorDbError::DimensionMismatch {
                expected: 3,
                got: 4
            })
        ));
    }
}
