//! Storage layer: record store, write-ahead log, snapshots, and the database.
//!
//! Records live in a slot-addressed [`VectorStore`] owned by a [`Database`].
//! Durability is provided by a [`WriteAheadLog`] (CRC32 + fsync) and bincode
//! snapshots (atomic temp-file + rename). Compaction renumbers slots and keeps
//! the WAL bounded.

/// Compaction passes and the background compaction worker.
pub mod compaction;
/// The database handle: mutation pipeline, query engine, settings, and stats.
pub mod database;
/// NDJSON export and import.
pub mod interchange;
/// Equality index over metadata values.
pub mod metadata_index;
/// Disk persistence: snapshot save/load with atomic writes and mmap.
pub mod persistence;
/// User-facing point IDs mapped to slots.
pub mod point_id;
/// Slot-addressed dense and sparse record storage.
pub mod store;
/// Write-Ahead Log with CRC32 checksums.
pub mod wal;

pub use database::{Database, DatabaseStats, DetailedStats, MemoryBreakdown, Settings};
pub use interchange::{metadata_from_json, metadata_to_json, read_ndjson, write_ndjson, JsonRecord};
pub use metadata_index::MetadataIndex;
pub use persistence::{decode_snapshot, load_snapshot, map_snapshot, verify_snapshot, SnapshotHeader};
pub use point_id::PointIdMap;
pub use store::VectorStore;
pub use wal::{
    read_records, wal_path_for, BatchItem, ReplayStats, VectorData, WalHeader, WalOp, WalRecord,
    WriteAheadLog,
};
