//! # vectordb-core
//!
//! Embeddable in-memory vector database engine: a slot-addressed record store,
//! a choice of approximate and exact indexes (KD-Tree, HNSW, IVF-PQ, IVF-Flat,
//! PQ, LSH, sparse inverted index, flat scan), a checksummed write-ahead log,
//! snapshots, compaction, and resource governance.
//!
//! This is the core library crate with zero async dependencies. The C ABI lives
//! in `vectordb-ffi`; the `vectordb-inspect` binary reads snapshots and WALs.

/// Global configuration constants: limits, defaults, and tuning parameters.
pub mod config;
/// Distance metrics and kernels for dense and sparse vectors.
pub mod distance;
/// Error taxonomy and the crate-wide `Result` alias.
pub mod error;
/// Resource limits, concurrency gating, telemetry, and health.
pub mod governor;
/// HNSW graph: layered proximity graph with binary-quantized traversal and filtered search.
pub mod hnsw;
/// Index structures and the `VectorIndex` dispatch type.
pub mod index;
/// Quantizers: k-means, product, scalar, and binary.
pub mod quantization;
/// Exact search and metadata filter expressions.
pub mod search;
/// Storage layer: record store, WAL, snapshots, database, and compaction.
pub mod storage;
/// Core record types: vectors, sparse vectors, metadata, search results.
pub mod vector;

pub use distance::DistanceMetric;
pub use error::{ErrorKind, Result, VectorDbError};
pub use governor::{HealthStatus, ResourceLimits};
pub use index::{IndexConfig, IndexType};
pub use search::Filter;
pub use storage::{Database, DatabaseStats, DetailedStats, MemoryBreakdown, Settings};
pub use vector::{Metadata, Record, SearchParams, SearchResult, SparseEntry, SparseVector, Vector};
