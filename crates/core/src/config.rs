//! Global configuration constants for the engine.
//!
//! Index defaults, validation limits, WAL and snapshot format parameters, and
//! compaction/telemetry tuning live here. Per-database runtime configuration is
//! carried by the index config structs (`HnswConfig`, `IvfPqConfig`, ...) and the
//! setters on [`Database`](crate::storage::Database).

/// Default number of bidirectional links per HNSW node.
///
/// Higher values improve recall but increase memory and build time.
/// Typical range: 8–64. Default: 16.
pub const HNSW_DEFAULT_M: usize = 16;

/// Default ef parameter during HNSW index construction.
///
/// Controls the size of the dynamic candidate list during insertion.
/// Higher values produce a better graph but slow down build time.
pub const HNSW_DEFAULT_EF_CONSTRUCTION: usize = 200;

/// Default ef parameter during HNSW search.
pub const HNSW_DEFAULT_EF_SEARCH: usize = 50;

/// Maximum number of layers in the HNSW graph.
pub const HNSW_DEFAULT_MAX_LEVEL: usize = 16;

/// Default number of extra hops ACORN takes around nodes that fail the predicate.
pub const HNSW_DEFAULT_ACORN_HOPS: usize = 1;

/// Default number of IVF coarse centroids (inverted lists).
pub const IVF_DEFAULT_NLIST: usize = 64;

/// Default number of inverted lists probed per query.
pub const IVF_DEFAULT_NPROBE: usize = 4;

/// Default number of Lloyd iterations when training IVF centroids or PQ codebooks.
pub const DEFAULT_TRAIN_ITERS: usize = 15;

/// Default number of PQ sub-quantizers.
pub const PQ_DEFAULT_M: usize = 8;

/// Default bits per PQ code. Codebook size is `2^nbits`, at most 256.
pub const PQ_DEFAULT_NBITS: u8 = 8;

/// Shortlist size reranked with exact distances by the standalone PQ index.
pub const PQ_DEFAULT_RERANK: usize = 32;

/// Default number of IVF-PQ candidates reranked with exact distances.
pub const IVFPQ_DEFAULT_RERANK: usize = 32;

/// Default candidate oversampling factor for IVF-PQ (1.0 = no oversampling).
pub const IVFPQ_DEFAULT_OVERSAMPLING: f32 = 1.0;

/// Default scalar quantization width in bits.
pub const SCALAR_QUANT_DEFAULT_BITS: u8 = 8;

/// Default number of LSH hash tables.
pub const LSH_DEFAULT_NUM_TABLES: usize = 8;

/// Default number of hyperplane bits per LSH table key.
pub const LSH_DEFAULT_HASH_BITS: usize = 16;

/// Default LSH hyperplane seed.
pub const LSH_DEFAULT_SEED: u64 = 42;

/// Maximum number of entries held by a single LSH bucket.
pub const LSH_MAX_BUCKET_SIZE: usize = 65_536;

/// Live-count threshold at or below which search bypasses the approximate index.
pub const DEFAULT_EXACT_SEARCH_THRESHOLD: usize = 1000;

/// Maximum allowed vector dimension.
pub const MAX_DIMENSION: usize = 65_536;

/// Maximum number of results (`k`) per search request.
pub const MAX_K: usize = 100_000;

/// Maximum number of metadata entries per vector.
pub const MAX_METADATA_KEYS: usize = 256;

/// Maximum nesting of `NOT` and parentheses in a filter expression.
pub const MAX_FILTER_DEPTH: usize = 256;

/// Oversampling multiplier for post-filtered searches (`k * FILTER_OVERSAMPLE`).
pub const FILTER_OVERSAMPLE: usize = 4;

/// Candidate sets from the metadata index at or below this size are scored exactly.
pub const METADATA_INDEX_EXACT_LIMIT: usize = 4096;

/// Default interval between background compaction passes, in seconds.
pub const DEFAULT_COMPACTION_INTERVAL_SECS: u64 = 60;

/// Default WAL size in bytes that triggers log compaction (snapshot + truncate).
pub const DEFAULT_WAL_COMPACTION_THRESHOLD: u64 = 64 * 1024 * 1024;

/// Default fraction of tombstoned slots that triggers compaction.
pub const DEFAULT_DELETED_RATIO_THRESHOLD: f64 = 0.1;

/// Upper bound on how long `stop_background_compaction` waits for the worker.
pub const COMPACTION_STOP_TIMEOUT_SECS: u64 = 30;

/// Environment variable overriding the directory holding WAL files.
pub const WAL_DIR_ENV: &str = "VECTORDB_WAL_DIR";

/// Suffix appended to the snapshot file name to form the WAL file name.
pub const WAL_FILE_SUFFIX: &str = ".wal";

/// Largest WAL frame payload accepted on append and on replay.
pub const MAX_WAL_FRAME_BYTES: usize = 1 << 30;

/// WAL file magic.
pub const WAL_MAGIC: &[u8; 4] = b"VWAL";

/// WAL on-disk format version.
pub const WAL_VERSION: u32 = 1;

/// Snapshot file magic.
pub const SNAPSHOT_MAGIC: &[u8; 4] = b"VSNP";

/// Snapshot on-disk format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Upper bucket boundaries (microseconds) of the latency histograms.
/// A final overflow bucket catches everything above the last boundary.
pub const LATENCY_BUCKETS_US: [f64; 12] = [
    10.0, 50.0, 100.0, 250.0, 500.0, 1_000.0, 2_500.0, 5_000.0, 10_000.0, 50_000.0, 100_000.0,
    1_000_000.0,
];

/// Memory usage fraction of `max_memory_bytes` above which health is degraded.
pub const HEALTH_MEMORY_DEGRADED_RATIO: f64 = 0.9;

/// `IndexType::suggest`: collections up to this size may use the KD-Tree.
pub const SUGGEST_KDTREE_MAX_COUNT: usize = 20_000;

/// `IndexType::suggest`: dimensions up to this value may use the KD-Tree.
pub const SUGGEST_KDTREE_MAX_DIM: usize = 64;

/// `IndexType::suggest`: collections at least this large consider IVF-PQ.
pub const SUGGEST_IVFPQ_MIN_COUNT: usize = 500_000;

/// `IndexType::suggest`: dimensions at least this large consider IVF-PQ.
pub const SUGGEST_IVFPQ_MIN_DIM: usize = 128;
