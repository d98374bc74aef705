//! The database: one record store, one active index, a WAL, and the query engine.
//!
//! All mutations go through [`Database::mutate`]: the write lock is taken, the
//! operation is validated against the current state, appended to the WAL, and
//! only then applied. Replay on open feeds the same [`WalOp`]s through
//! [`State::apply`], so a recovered database is built by exactly the code that
//! built the original.

use crate::config;
use crate::distance::{self, DistanceMetric};
use crate::error::{check_dimension, Result, VectorDbError};
use crate::governor::{
    ConcurrencyGate, HealthStatus, HistogramSnapshot, RecallStats, ResourceLimits, Telemetry,
};
use crate::index::{IndexConfig, IndexType, VectorIndex};
use crate::search::{exact_knn, exact_knn_among, exact_range, Filter};
use crate::storage::compaction::CompactionWorker;
use crate::storage::persistence::{self, Snapshot, SnapshotHeader, SnapshotRef};
use crate::storage::wal::{wal_path_for, BatchItem, VectorData, WalOp, WriteAheadLog};
use crate::storage::{MetadataIndex, PointIdMap, VectorStore};
use crate::vector::{Metadata, Record, SearchParams, SearchResult, SparseEntry, SparseVector, Vector};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Runtime settings, persisted with every snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Live counts at or below this use brute force. 0 disables the fallback.
    pub exact_search_threshold: usize,
    pub force_exact_search: bool,
    pub compaction_interval_secs: u64,
    /// WAL size in bytes above which the background worker checkpoints.
    pub wal_compaction_threshold: u64,
    pub deleted_ratio_threshold: f64,
    pub limits: ResourceLimits,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            exact_search_threshold: config::DEFAULT_EXACT_SEARCH_THRESHOLD,
            force_exact_search: false,
            compaction_interval_secs: config::DEFAULT_COMPACTION_INTERVAL_SECS,
            wal_compaction_threshold: config::DEFAULT_WAL_COMPACTION_THRESHOLD,
            deleted_ratio_threshold: config::DEFAULT_DELETED_RATIO_THRESHOLD,
            limits: ResourceLimits::unlimited(),
        }
    }
}

impl Settings {
    fn use_exact(&self, live: usize) -> bool {
        self.force_exact_search
            || (self.exact_search_threshold > 0 && live <= self.exact_search_threshold)
    }
}

/// Counts and sizes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseStats {
    pub dimension: usize,
    pub index_type: IndexType,
    /// Slots, live and tombstoned.
    pub count: usize,
    pub live: usize,
    pub deleted: usize,
    pub deleted_ratio: f64,
    pub trained: bool,
    pub cosine_normalized: bool,
    pub read_only: bool,
    pub point_ids: usize,
    pub memory_bytes: u64,
    pub wal_bytes: u64,
    pub total_inserts: u64,
    pub total_queries: u64,
}

/// Heap usage by component, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryBreakdown {
    pub vectors: u64,
    pub metadata: u64,
    pub index: u64,
    pub metadata_index: u64,
    pub point_ids: u64,
    pub wal: u64,
    /// In-memory total; excludes the WAL file.
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailedStats {
    pub stats: DatabaseStats,
    pub insert_latency: HistogramSnapshot,
    pub search_latency: HistogramSnapshot,
    pub queries_per_sec: f64,
    pub inserts_per_sec: f64,
    pub memory: MemoryBreakdown,
    pub recall: RecallStats,
    pub health: HealthStatus,
    pub wal_last_seq: u64,
}

/// Everything guarded by the database lock.
#[derive(Debug)]
pub(crate) struct State {
    pub(crate) store: VectorStore,
    pub(crate) index: VectorIndex,
    pub(crate) metadata_index: MetadataIndex,
    pub(crate) point_ids: PointIdMap,
}

/// What an applied operation did.
#[derive(Debug)]
pub(crate) enum Outcome {
    Inserted(Vec<u32>),
    Written(u32),
    Deleted(usize),
    Compacted(Vec<Option<u32>>),
    Done,
}

impl Outcome {
    fn first_slot(&self) -> usize {
        match self {
            Outcome::Inserted(slots) => slots.first().map_or(0, |&s| s as usize),
            Outcome::Written(slot) => *slot as usize,
            _ => 0,
        }
    }
}

impl State {
    fn new(dimension: usize, config: &IndexConfig) -> Self {
        let sparse = config.index_type() == IndexType::Sparse;
        Self {
            store: VectorStore::new(dimension, sparse),
            index: VectorIndex::new(dimension, config),
            metadata_index: MetadataIndex::new(),
            point_ids: PointIdMap::new(),
        }
    }

    fn from_snapshot(snapshot: Snapshot) -> (Self, Settings) {
        let state = Self {
            store: snapshot.store,
            index: snapshot.index,
            metadata_index: snapshot.metadata_index,
            point_ids: snapshot.point_ids,
        };
        (state, snapshot.settings)
    }

    fn dimension(&self) -> usize {
        self.store.dimension()
    }

    // ── validation ─────────────────────────────────────────────────────

    /// Rejects `op` without touching state.
    fn check(&self, op: &WalOp, limits: &ResourceLimits) -> Result<()> {
        match op {
            WalOp::Insert { data, metadata, id } => {
                self.check_trained()?;
                self.check_data(data)?;
                metadata.validate()?;
                if let Some(id) = id {
                    self.check_new_id(id)?;
                }
                self.check_capacity(limits, 1, record_bytes(data, metadata))
            }
            WalOp::InsertBatch { items } => {
                self.check_trained()?;
                let mut ids = HashSet::new();
                let mut bytes = 0;
                for item in items {
                    self.check_data(&item.data)?;
                    item.metadata.validate()?;
                    if let Some(id) = &item.id {
                        self.check_new_id(id)?;
                        if !ids.insert(id.as_str()) {
                            return Err(VectorDbError::InvalidArgument(format!(
                                "point id '{id}' appears twice in the batch"
                            )));
                        }
                    }
                    bytes += record_bytes(&item.data, &item.metadata);
                }
                self.check_capacity(limits, items.len() as u64, bytes)
            }
            WalOp::Update { index, data } => {
                self.store.check_live(*index as usize)?;
                self.check_trained()?;
                self.check_data(data)
            }
            WalOp::UpdateMetadata { index, metadata } => {
                self.store.check_live(*index as usize)?;
                let mut merged = self.store.metadata(*index as u32).clone();
                merged.merge(metadata);
                merged.validate()
            }
            WalOp::Upsert {
                index,
                data,
                metadata,
            } => {
                self.check_trained()?;
                self.check_data(data)?;
                match self.live_slot(*index) {
                    Some(slot) => {
                        let mut merged = self.store.metadata(slot).clone();
                        if let Some(m) = metadata {
                            merged.merge(m);
                        }
                        merged.validate()
                    }
                    None => {
                        let metadata = metadata.clone().unwrap_or_default();
                        metadata.validate()?;
                        self.check_capacity(limits, 1, record_bytes(data, &metadata))
                    }
                }
            }
            WalOp::Delete { .. } | WalOp::Compact => Ok(()),
            WalOp::Train { data } => self.check_training_data(data),
            WalOp::SetCosineNormalized { .. } => {
                if self.store.is_sparse() {
                    return Err(VectorDbError::Unsupported {
                        index: self.index.index_type(),
                        op: "cosine normalization",
                    });
                }
                if !self.store.is_empty() {
                    return Err(VectorDbError::InvalidArgument(
                        "cosine normalization can only change while the database is empty".into(),
                    ));
                }
                Ok(())
            }
        }
    }

    fn check_trained(&self) -> Result<()> {
        if self.index.is_trained() {
            Ok(())
        } else {
            Err(VectorDbError::NotTrained(self.index.index_type()))
        }
    }

    fn check_data(&self, data: &VectorData) -> Result<()> {
        match data {
            VectorData::Dense(v) => {
                check_dimension(self.dimension(), v.len())?;
                if v.iter().any(|x| !x.is_finite()) {
                    return Err(VectorDbError::InvalidArgument(
                        "vector contains NaN or infinite values".into(),
                    ));
                }
            }
            VectorData::Sparse(entries) => {
                if let Some(e) = entries.iter().find(|e| e.index as usize >= self.dimension()) {
                    return Err(VectorDbError::InvalidArgument(format!(
                        "sparse index {} out of range for dimension {}",
                        e.index,
                        self.dimension()
                    )));
                }
                if entries.iter().any(|e| !e.value.is_finite()) {
                    return Err(VectorDbError::InvalidArgument(
                        "sparse values must be finite".into(),
                    ));
                }
                if entries.windows(2).any(|w| w[0].index >= w[1].index) {
                    return Err(VectorDbError::InvalidArgument(
                        "sparse indices must be strictly increasing".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn check_new_id(&self, id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(VectorDbError::InvalidArgument("point id must be non-empty".into()));
        }
        if self.point_ids.has(id) {
            return Err(VectorDbError::InvalidArgument(format!("point id '{id}' already exists")));
        }
        Ok(())
    }

    fn check_capacity(&self, limits: &ResourceLimits, vectors: u64, bytes: u64) -> Result<()> {
        limits.check_vectors(self.store.live_count() as u64, vectors)?;
        if limits.max_memory_bytes > 0 {
            limits.check_memory(self.memory().total, bytes)?;
        }
        Ok(())
    }

    fn check_training_data(&self, data: &[f32]) -> Result<()> {
        if data.is_empty() {
            return Err(VectorDbError::InvalidTrainingData("no training vectors".into()));
        }
        if data.len() % self.dimension() != 0 {
            return Err(VectorDbError::InvalidTrainingData(format!(
                "{} values is not a whole number of {}-dimensional vectors",
                data.len(),
                self.dimension()
            )));
        }
        if data.iter().any(|x| !x.is_finite()) {
            return Err(VectorDbError::InvalidTrainingData(
                "training data contains NaN or infinite values".into(),
            ));
        }
        Ok(())
    }

    fn live_slot(&self, index: u64) -> Option<u32> {
        u32::try_from(index).ok().filter(|&s| self.store.is_live(s))
    }

    // ── application ────────────────────────────────────────────────────

    /// Applies a validated operation.
    pub(crate) fn apply(&mut self, op: &WalOp) -> Result<Outcome> {
        match op {
            WalOp::Insert { data, metadata, id } => {
                let slot = self.append(data, metadata.clone());
                if let Some(id) = id {
                    self.point_ids.set(id, slot)?;
                }
                Ok(Outcome::Inserted(vec![slot]))
            }
            WalOp::InsertBatch { items } => {
                let mut slots = Vec::with_capacity(items.len());
                for item in items {
                    let slot = self.append(&item.data, item.metadata.clone());
                    if let Some(id) = &item.id {
                        self.point_ids.set(id, slot)?;
                    }
                    slots.push(slot);
                }
                Ok(Outcome::Inserted(slots))
            }
            WalOp::Update { index, data } => {
                let slot = *index as u32;
                self.store.check_live(slot as usize)?;
                self.replace_data(slot, data);
                Ok(Outcome::Written(slot))
            }
            WalOp::UpdateMetadata { index, metadata } => {
                let slot = *index as u32;
                self.store.check_live(slot as usize)?;
                self.merge_metadata(slot, metadata);
                Ok(Outcome::Written(slot))
            }
            WalOp::Upsert {
                index,
                data,
                metadata,
            } => match self.live_slot(*index) {
                Some(slot) => {
                    self.replace_data(slot, data);
                    if let Some(m) = metadata {
                        self.merge_metadata(slot, m);
                    }
                    Ok(Outcome::Written(slot))
                }
                None => {
                    let slot = self.append(data, metadata.clone().unwrap_or_default());
                    Ok(Outcome::Written(slot))
                }
            },
            WalOp::Delete { indices } => {
                let mut deleted = 0;
                for &index in indices {
                    let Ok(slot) = u32::try_from(index) else {
                        continue;
                    };
                    if self.store.tombstone(slot) {
                        self.metadata_index.remove(slot, self.store.metadata(slot));
                        self.index.remove(slot);
                        self.point_ids.remove_slot(slot);
                        deleted += 1;
                    }
                }
                Ok(Outcome::Deleted(deleted))
            }
            WalOp::Train { data } => {
                self.index = self.trained_index(data)?;
                Ok(Outcome::Done)
            }
            WalOp::SetCosineNormalized { enabled } => {
                self.store.set_normalized(*enabled);
                Ok(Outcome::Done)
            }
            WalOp::Compact => Ok(Outcome::Compacted(self.compact())),
        }
    }

    /// Trains a copy of the active index so a failure leaves the original untouched.
    pub(crate) fn trained_index(&self, data: &[f32]) -> Result<VectorIndex> {
        self.check_training_data(data)?;
        let data: Cow<'_, [f32]> = if self.store.is_normalized() {
            let mut rows = data.to_vec();
            for row in rows.chunks_exact_mut(self.dimension()) {
                distance::normalize_in_place(row);
            }
            Cow::Owned(rows)
        } else {
            Cow::Borrowed(data)
        };
        let mut index = self.index.clone();
        index.train(&self.store, &data)?;
        Ok(index)
    }

    fn append(&mut self, data: &VectorData, metadata: Metadata) -> u32 {
        let slot = if self.store.is_sparse() {
            self.store.push_sparse(sparse_entries(data), metadata)
        } else {
            let row = self.dense_row(data);
            self.store.push_dense(&row, metadata)
        };
        self.metadata_index.add(slot, self.store.metadata(slot));
        self.index.insert(&self.store, slot);
        slot
    }

    fn replace_data(&mut self, slot: u32, data: &VectorData) {
        if self.store.is_sparse() {
            self.store.set_sparse(slot, sparse_entries(data));
        } else {
            let row = self.dense_row(data);
            self.store.set_dense(slot, &row);
        }
        self.index.update(&self.store, slot);
    }

    fn merge_metadata(&mut self, slot: u32, update: &Metadata) {
        let old = self.store.metadata(slot).clone();
        self.store.metadata_mut(slot).merge(update);
        self.metadata_index.update(slot, &old, self.store.metadata(slot));
    }

    fn dense_row(&self, data: &VectorData) -> Vec<f32> {
        let mut row = match data {
            VectorData::Dense(v) => v.clone(),
            VectorData::Sparse(entries) => {
                let mut row = vec![0.0; self.dimension()];
                for e in entries {
                    row[e.index as usize] = e.value;
                }
                row
            }
        };
        if self.store.is_normalized() {
            distance::normalize_in_place(&mut row);
        }
        row
    }

    // ── accounting ─────────────────────────────────────────────────────

    pub(crate) fn memory(&self) -> MemoryBreakdown {
        let vectors = self.store.vector_bytes() as u64;
        let metadata = self.store.metadata_bytes() as u64;
        let index = self.index.heap_bytes() as u64;
        let metadata_index = self.metadata_index.heap_bytes() as u64;
        let point_ids = self.point_ids.heap_bytes() as u64;
        MemoryBreakdown {
            vectors,
            metadata,
            index,
            metadata_index,
            point_ids,
            wal: 0,
            total: vectors + metadata + index + metadata_index + point_ids,
        }
    }
}

fn sparse_entries(data: &VectorData) -> Vec<SparseEntry> {
    match data {
        VectorData::Sparse(entries) => entries.clone(),
        VectorData::Dense(v) => SparseVector::from_dense(v).into_entries(),
    }
}

/// Rough heap cost of admitting one record.
fn record_bytes(data: &VectorData, metadata: &Metadata) -> u64 {
    let payload = match data {
        VectorData::Dense(v) => v.len() * std::mem::size_of::<f32>(),
        VectorData::Sparse(e) => e.len() * std::mem::size_of::<SparseEntry>(),
    };
    (payload + metadata.heap_bytes()) as u64
}

fn check_k(k: usize) -> Result<()> {
    if k > config::MAX_K {
        return Err(VectorDbError::InvalidArgument(format!(
            "k = {k} exceeds the maximum of {}",
            config::MAX_K
        )));
    }
    Ok(())
}

fn check_query(dimension: usize, query: &[f32]) -> Result<()> {
    check_dimension(dimension, query.len())?;
    if query.iter().any(|x| !x.is_finite()) {
        return Err(VectorDbError::InvalidArgument(
            "query contains NaN or infinite values".into(),
        ));
    }
    Ok(())
}

fn check_dimension_value(dimension: usize) -> Result<()> {
    if dimension == 0 || dimension > config::MAX_DIMENSION {
        return Err(VectorDbError::InvalidConfig(format!(
            "dimension must be in 1..={} (got {dimension})",
            config::MAX_DIMENSION
        )));
    }
    Ok(())
}

/// A vector database.
///
/// Cheap to share behind an `Arc`: readers proceed concurrently under the read
/// lock, writers are serialized by the write lock.
pub struct Database {
    dimension: usize,
    index_type: IndexType,
    path: Option<PathBuf>,
    read_only: bool,
    closed: AtomicBool,
    pub(crate) state: RwLock<State>,
    pub(crate) settings: RwLock<Settings>,
    pub(crate) wal: Option<WriteAheadLog>,
    telemetry: Telemetry,
    gate: ConcurrencyGate,
    pub(crate) compactor: Mutex<Option<CompactionWorker>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("dimension", &self.dimension)
            .field("index_type", &self.index_type)
            .field("path", &self.path)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

impl Database {
    // ── lifecycle ──────────────────────────────────────────────────────

    /// Opens a database with the default configuration for `index_type`.
    ///
    /// `None` gives a purely in-memory database without a WAL.
    pub fn open(path: Option<&Path>, dimension: usize, index_type: IndexType) -> Result<Self> {
        Self::open_with_config(path, dimension, IndexConfig::default_for(index_type))
    }

    /// Opens or creates a database.
    ///
    /// An existing snapshot at `path` is loaded (its stored index configuration
    /// wins over `config`), then the companion WAL is replayed.
    pub fn open_with_config(path: Option<&Path>, dimension: usize, config: IndexConfig) -> Result<Self> {
        check_dimension_value(dimension)?;
        config.validate(dimension)?;
        let index_type = config.index_type();

        let Some(path) = path else {
            return Ok(Self::assemble(
                dimension,
                index_type,
                None,
                false,
                State::new(dimension, &config),
                Settings::default(),
                None,
            ));
        };

        let (mut state, settings, last_seq) = if path.exists() {
            let (header, snapshot) = persistence::load_snapshot(path)?;
            check_header(&header, dimension, index_type)?;
            let (state, settings) = State::from_snapshot(snapshot);
            (state, settings, header.last_seq)
        } else {
            (State::new(dimension, &config), Settings::default(), 0)
        };

        let wal = WriteAheadLog::open(&wal_path_for(path), dimension, index_type)?;
        wal.advance_seq_to(last_seq + 1);
        let (records, mut stats) = wal.replay()?;
        for record in &records {
            if record.seq <= last_seq {
                stats.skipped += 1;
                continue;
            }
            state
                .check(&record.op, &ResourceLimits::unlimited())
                .and_then(|()| state.apply(&record.op))
                .map_err(|e| {
                    VectorDbError::corrupted(
                        "WAL",
                        format!("record {} ({}) does not apply: {e}", record.seq, record.op.name()),
                    )
                })?;
        }
        tracing::info!(
            path = %path.display(),
            dimension,
            index = %index_type,
            live = state.store.live_count(),
            wal_records = stats.records,
            wal_skipped = stats.skipped,
            wal_torn = stats.truncated,
            "database opened"
        );

        Ok(Self::assemble(
            dimension,
            index_type,
            Some(path.to_path_buf()),
            false,
            state,
            settings,
            Some(wal),
        ))
    }

    /// Opens a snapshot read-only through a memory map. The WAL is not replayed.
    pub fn open_mmap(path: &Path, dimension: usize, index_type: IndexType) -> Result<Self> {
        let (header, snapshot) = persistence::map_snapshot(path)?;
        check_header(&header, dimension, index_type)?;
        let (state, settings) = State::from_snapshot(snapshot);
        Ok(Self::assemble(
            dimension,
            index_type,
            Some(path.to_path_buf()),
            true,
            state,
            settings,
            None,
        ))
    }

    /// Loads a read-only database from a snapshot image held in memory.
    pub fn open_from_memory(bytes: &[u8]) -> Result<Self> {
        let (header, snapshot) = persistence::decode_snapshot(bytes)?;
        let (state, settings) = State::from_snapshot(snapshot);
        Ok(Self::assemble(
            header.dimension as usize,
            header.index_type,
            None,
            true,
            state,
            settings,
            None,
        ))
    }

    fn assemble(
        dimension: usize,
        index_type: IndexType,
        path: Option<PathBuf>,
        read_only: bool,
        state: State,
        settings: Settings,
        wal: Option<WriteAheadLog>,
    ) -> Self {
        Self {
            dimension,
            index_type,
            path,
            read_only,
            closed: AtomicBool::new(false),
            state: RwLock::new(state),
            settings: RwLock::new(settings),
            wal,
            telemetry: Telemetry::new(),
            gate: ConcurrencyGate::new(),
            compactor: Mutex::new(None),
        }
    }

    /// Stops background work and rejects further calls. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.stop_background_compaction()?;
        tracing::info!(path = ?self.path, "database closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(VectorDbError::Closed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        self.ensure_open()?;
        if self.read_only {
            Err(VectorDbError::ReadOnly)
        } else {
            Ok(())
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn index_type(&self) -> IndexType {
        self.index_type
    }

    pub fn index_config(&self) -> IndexConfig {
        self.state.read().index.config()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn wal_path(&self) -> Option<&Path> {
        self.wal.as_ref().map(WriteAheadLog::path)
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Slots, live and tombstoned.
    pub fn count(&self) -> usize {
        self.state.read().store.len()
    }

    pub fn live_count(&self) -> usize {
        self.state.read().store.live_count()
    }

    pub fn is_trained(&self) -> bool {
        self.state.read().index.is_trained()
    }

    // ── mutation ───────────────────────────────────────────────────────

    /// Builds an operation under the write lock, validates, logs, then applies it.
    pub(crate) fn mutate<F>(&self, build: F) -> Result<Outcome>
    where
        F: FnOnce(&State) -> Result<WalOp>,
    {
        self.ensure_writable()?;
        let limits = self.settings.read().limits;
        let _op = self.gate.enter(limits.max_concurrent_operations)?;
        let mut state = self.state.write();
        let op = build(&state)?;
        state.check(&op, &limits)?;
        let trained = match &op {
            WalOp::Train { data } => Some(state.trained_index(data)?),
            _ => None,
        };
        if let Some(wal) = &self.wal {
            wal.append(&op)?;
        }
        match trained {
            Some(index) => {
                state.index = index;
                Ok(Outcome::Done)
            }
            None => state.apply(&op),
        }
    }

    fn insert_op(&self, op: WalOp, count: u64) -> Result<Outcome> {
        let start = Instant::now();
        let outcome = self.mutate(|_| Ok(op))?;
        self.telemetry.record_insert(start.elapsed(), count);
        Ok(outcome)
    }

    /// Appends a vector. Returns its index.
    pub fn add_vector(&self, data: &[f32]) -> Result<usize> {
        self.add_vector_with_metadata(data, Metadata::new())
    }

    pub fn add_vector_with_metadata(&self, data: &[f32], metadata: Metadata) -> Result<usize> {
        let op = WalOp::Insert {
            data: VectorData::Dense(data.to_vec()),
            metadata,
            id: None,
        };
        Ok(self.insert_op(op, 1)?.first_slot())
    }

    /// Appends a vector addressed by a stable point ID (a fresh UUID when `id` is `None`).
    /// Returns the index and the ID.
    pub fn add_vector_with_id(
        &self,
        data: &[f32],
        metadata: Metadata,
        id: Option<&str>,
    ) -> Result<(usize, String)> {
        let id = id.map_or_else(PointIdMap::generate_uuid, str::to_string);
        let op = WalOp::Insert {
            data: VectorData::Dense(data.to_vec()),
            metadata,
            id: Some(id.clone()),
        };
        Ok((self.insert_op(op, 1)?.first_slot(), id))
    }

    /// Appends a batch atomically: either every vector is inserted or none is.
    pub fn add_vectors(&self, vectors: &[Vector]) -> Result<Vec<usize>> {
        let items = vectors
            .iter()
            .map(|v| BatchItem {
                data: VectorData::Dense(v.data.clone()),
                metadata: v.metadata.clone(),
                id: None,
            })
            .collect();
        self.add_batch(items)
    }

    pub(crate) fn add_batch(&self, items: Vec<BatchItem>) -> Result<Vec<usize>> {
        if items.is_empty() {
            self.ensure_writable()?;
            return Ok(Vec::new());
        }
        let n = items.len() as u64;
        match self.insert_op(WalOp::InsertBatch { items }, n)? {
            Outcome::Inserted(slots) => Ok(slots.into_iter().map(|s| s as usize).collect()),
            _ => Ok(Vec::new()),
        }
    }

    pub fn add_sparse_vector(&self, vector: &SparseVector) -> Result<usize> {
        check_dimension(self.dimension, vector.dimension())?;
        let op = WalOp::Insert {
            data: VectorData::Sparse(vector.entries().to_vec()),
            metadata: vector.metadata.clone(),
            id: None,
        };
        Ok(self.insert_op(op, 1)?.first_slot())
    }

    /// Replaces the live record at `index` (merging `metadata`), or appends a new
    /// record when `index` is past the end or deleted. Returns the index written.
    pub fn upsert(&self, index: usize, data: &[f32], metadata: Option<Metadata>) -> Result<usize> {
        let op = WalOp::Upsert {
            index: index as u64,
            data: VectorData::Dense(data.to_vec()),
            metadata,
        };
        Ok(self.insert_op(op, 1)?.first_slot())
    }

    /// Tombstones one live record.
    pub fn delete_vector(&self, index: usize) -> Result<()> {
        self.mutate(|state| {
            state.store.check_live(index)?;
            Ok(WalOp::Delete {
                indices: vec![index as u64],
            })
        })?;
        self.nudge_compactor();
        Ok(())
    }

    /// Tombstones every live record in `indices`. Returns how many were deleted;
    /// out-of-range and already-deleted indices are skipped.
    pub fn delete_vectors(&self, indices: &[usize]) -> Result<usize> {
        let outcome = self.mutate(|state| {
            let live: Vec<u64> = indices
                .iter()
                .filter(|&&i| state.store.check_live(i).is_ok())
                .map(|&i| i as u64)
                .collect();
            Ok(WalOp::Delete { indices: live })
        })?;
        self.nudge_compactor();
        Ok(match outcome {
            Outcome::Deleted(n) => n,
            _ => 0,
        })
    }

    /// Deletes the record named by a point ID. Returns false for unknown IDs.
    pub fn delete_by_id(&self, id: &str) -> Result<bool> {
        let outcome = self.mutate(|state| {
            let indices = state.point_ids.get(id).map(u64::from).into_iter().collect();
            Ok(WalOp::Delete { indices })
        })?;
        self.nudge_compactor();
        Ok(matches!(outcome, Outcome::Deleted(n) if n > 0))
    }

    pub fn update_vector(&self, index: usize, data: &[f32]) -> Result<()> {
        self.mutate(|_| {
            Ok(WalOp::Update {
                index: index as u64,
                data: VectorData::Dense(data.to_vec()),
            })
        })?;
        Ok(())
    }

    /// Merges `metadata` into the record: given keys overwrite in place, new keys append.
    pub fn update_metadata(&self, index: usize, metadata: Metadata) -> Result<()> {
        self.mutate(|_| {
            Ok(WalOp::UpdateMetadata {
                index: index as u64,
                metadata,
            })
        })?;
        Ok(())
    }

    /// Trains the active index on `vectors` (`count × dimension`, flat) and
    /// re-encodes every live record.
    pub fn train(&self, vectors: &[f32], dimension: usize) -> Result<()> {
        check_dimension(self.dimension, dimension)?;
        let start = Instant::now();
        self.mutate(|state| {
            if !matches!(
                state.index.index_type(),
                IndexType::IvfPq | IndexType::IvfFlat | IndexType::Pq | IndexType::Lsh
            ) {
                return Err(VectorDbError::Unsupported {
                    index: state.index.index_type(),
                    op: "train",
                });
            }
            Ok(WalOp::Train {
                data: vectors.to_vec(),
            })
        })?;
        tracing::info!(
            index = %self.index_type,
            vectors = vectors.len() / dimension,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "index trained"
        );
        Ok(())
    }

    /// Stores dense vectors at unit length so cosine distance reduces to a dot product.
    /// Only accepted while the database holds no records.
    pub fn set_cosine_normalized(&self, enabled: bool) -> Result<()> {
        self.mutate(|_| Ok(WalOp::SetCosineNormalized { enabled }))?;
        Ok(())
    }

    pub fn is_cosine_normalized(&self) -> bool {
        self.state.read().store.is_normalized()
    }

    // ── query ──────────────────────────────────────────────────────────

    pub fn get_vector(&self, index: usize) -> Result<Record> {
        self.ensure_open()?;
        let state = self.state.read();
        state.store.check_live(index)?;
        Ok(state.store.record(index as u32))
    }

    pub fn get_by_id(&self, id: &str) -> Result<(usize, Record)> {
        self.ensure_open()?;
        let state = self.state.read();
        let slot = state
            .point_ids
            .get(id)
            .ok_or_else(|| VectorDbError::InvalidArgument(format!("unknown point id '{id}'")))?;
        state.store.check_live(slot as usize)?;
        Ok((slot as usize, state.store.record(slot)))
    }

    /// The point ID naming `index`, if any.
    pub fn id_of(&self, index: usize) -> Option<String> {
        let state = self.state.read();
        state.point_ids.reverse_lookup(index as u32).map(str::to_string)
    }

    /// k nearest live records, closest first.
    pub fn search(&self, query: &[f32], k: usize, metric: DistanceMetric) -> Result<Vec<SearchResult>> {
        self.search_inner(query, k, metric, None, &SearchParams::default())
    }

    /// k nearest records whose metadata `key` equals `value`.
    pub fn search_filtered(
        &self,
        query: &[f32],
        k: usize,
        metric: DistanceMetric,
        key: &str,
        value: &str,
    ) -> Result<Vec<SearchResult>> {
        let filter = Filter::eq(key, value);
        self.search_inner(query, k, metric, Some(&filter), &SearchParams::default())
    }

    /// k nearest records matching a filter expression such as
    /// `category == "books" AND price < 20`.
    pub fn search_with_filter_expr(
        &self,
        query: &[f32],
        k: usize,
        metric: DistanceMetric,
        expr: &str,
    ) -> Result<Vec<SearchResult>> {
        let filter = Filter::parse(expr)?;
        self.search_inner(query, k, metric, Some(&filter), &SearchParams::default())
    }

    pub fn search_with_filter(
        &self,
        query: &[f32],
        k: usize,
        metric: DistanceMetric,
        filter: &Filter,
    ) -> Result<Vec<SearchResult>> {
        self.search_inner(query, k, metric, Some(filter), &SearchParams::default())
    }

    /// Search with per-query `ef_search` / `nprobe` / `rerank_top` overrides.
    pub fn search_with_params(
        &self,
        query: &[f32],
        k: usize,
        metric: DistanceMetric,
        params: &SearchParams,
    ) -> Result<Vec<SearchResult>> {
        self.search_inner(query, k, metric, None, params)
    }

    /// Runs one search per query under a single read lock.
    pub fn search_batch(
        &self,
        queries: &[Vec<f32>],
        k: usize,
        metric: DistanceMetric,
    ) -> Result<Vec<Vec<SearchResult>>> {
        self.ensure_open()?;
        let settings = *self.settings.read();
        let _op = self.gate.enter(settings.limits.max_concurrent_operations)?;
        let state = self.state.read();
        let params = SearchParams::default();
        queries
            .iter()
            .map(|q| {
                let start = Instant::now();
                let hits = self.knn(&state, &settings, q, k, metric, None, &params)?;
                let results = materialize(&state.store, hits);
                self.telemetry.record_search(start.elapsed());
                Ok(results)
            })
            .collect()
    }

    /// k nearest records to a sparse query.
    pub fn search_sparse(
        &self,
        query: &SparseVector,
        k: usize,
        metric: DistanceMetric,
    ) -> Result<Vec<SearchResult>> {
        check_dimension(self.dimension, query.dimension())?;
        self.search(&query.to_dense(), k, metric)
    }

    fn search_inner(
        &self,
        query: &[f32],
        k: usize,
        metric: DistanceMetric,
        filter: Option<&Filter>,
        params: &SearchParams,
    ) -> Result<Vec<SearchResult>> {
        self.ensure_open()?;
        let start = Instant::now();
        let settings = *self.settings.read();
        let _op = self.gate.enter(settings.limits.max_concurrent_operations)?;
        let state = self.state.read();
        let hits = self.knn(&state, &settings, query, k, metric, filter, params)?;
        let results = materialize(&state.store, hits);
        self.telemetry.record_search(start.elapsed());
        Ok(results)
    }

    #[allow(clippy::too_many_arguments)]
    fn knn(
        &self,
        state: &State,
        settings: &Settings,
        query: &[f32],
        k: usize,
        metric: DistanceMetric,
        filter: Option<&Filter>,
        params: &SearchParams,
    ) -> Result<Vec<(f32, u32)>> {
        check_query(self.dimension, query)?;
        check_k(k)?;
        let store = &state.store;
        if k == 0 || store.live_count() == 0 {
            return Ok(Vec::new());
        }
        let query = prepare_query(store, query, metric);
        let query = query.as_ref();
        let accept = |slot: u32| {
            store.is_live(slot) && filter.map_or(true, |f| f.matches(store.metadata(slot)))
        };

        if let Some(candidates) = filter.and_then(|f| state.metadata_index.candidates(f)) {
            if candidates.len() <= config::METADATA_INDEX_EXACT_LIMIT {
                return Ok(exact_knn_among(store, query, metric, k, candidates, &accept));
            }
        }
        if settings.use_exact(store.live_count()) || !state.index.is_trained() {
            return Ok(exact_knn(store, query, metric, k, &accept));
        }

        let hits = state
            .index
            .search(store, query, metric, k, params, &accept, filter.is_some());
        if filter.is_none() || hits.len() >= k {
            return Ok(hits);
        }
        // The filter starved the approximate search: widen it.
        let widened = SearchParams {
            ef_search: Some(
                params
                    .ef_search
                    .unwrap_or(config::HNSW_DEFAULT_EF_SEARCH)
                    .max(k)
                    * config::FILTER_OVERSAMPLE,
            ),
            nprobe: Some(params.nprobe.unwrap_or(config::IVF_DEFAULT_NPROBE) * config::FILTER_OVERSAMPLE),
            rerank_top: Some(k * config::FILTER_OVERSAMPLE),
        };
        Ok(state
            .index
            .search(store, query, metric, k, &widened, &accept, true))
    }

    /// Every live record within `radius` of `query`, closest first, at most `max_results`.
    pub fn range_search(
        &self,
        query: &[f32],
        radius: f32,
        max_results: usize,
        metric: DistanceMetric,
    ) -> Result<Vec<SearchResult>> {
        self.range_inner(query, radius, max_results, metric, None)
    }

    pub fn range_search_filtered(
        &self,
        query: &[f32],
        radius: f32,
        max_results: usize,
        metric: DistanceMetric,
        expr: &str,
    ) -> Result<Vec<SearchResult>> {
        let filter = Filter::parse(expr)?;
        self.range_inner(query, radius, max_results, metric, Some(&filter))
    }

    fn range_inner(
        &self,
        query: &[f32],
        radius: f32,
        max_results: usize,
        metric: DistanceMetric,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>> {
        self.ensure_open()?;
        check_query(self.dimension, query)?;
        check_k(max_results)?;
        if radius.is_nan() {
            return Err(VectorDbError::InvalidArgument("radius must not be NaN".into()));
        }
        let start = Instant::now();
        let settings = *self.settings.read();
        let _op = self.gate.enter(settings.limits.max_concurrent_operations)?;
        let state = self.state.read();
        let store = &state.store;
        if max_results == 0 || store.live_count() == 0 {
            return Ok(Vec::new());
        }
        let query = prepare_query(store, query, metric);
        let query = query.as_ref();
        let accept = |slot: u32| {
            store.is_live(slot) && filter.map_or(true, |f| f.matches(store.metadata(slot)))
        };

        let candidates = filter
            .and_then(|f| state.metadata_index.candidates(f))
            .filter(|c| c.len() <= config::METADATA_INDEX_EXACT_LIMIT);
        let hits = if let Some(candidates) = candidates {
            let mut hits: Vec<(f32, u32)> = candidates
                .into_iter()
                .filter(|&s| accept(s))
                .map(|s| (store.distance(metric, query, s), s))
                .filter(|&(d, _)| d <= radius)
                .collect();
            distance::sort_hits(&mut hits);
            hits.truncate(max_results);
            hits
        } else if settings.use_exact(store.live_count()) || !state.index.is_trained() {
            exact_range(store, query, metric, radius, max_results, &accept)
        } else {
            state.index.range_search(
                store,
                query,
                metric,
                radius,
                max_results,
                &SearchParams::default(),
                &accept,
            )
        };
        let results = materialize(store, hits);
        self.telemetry.record_search(start.elapsed());
        Ok(results)
    }

    /// Live records in index order, skipping `offset`, at most `limit`.
    pub fn scroll(&self, offset: usize, limit: usize) -> Result<Vec<(usize, Record)>> {
        self.ensure_open()?;
        let state = self.state.read();
        Ok(state
            .store
            .live_slots()
            .skip(offset)
            .take(limit)
            .map(|s| (s as usize, state.store.record(s)))
            .collect())
    }

    /// Number of live records matching a filter expression.
    pub fn count_by_filter(&self, expr: &str) -> Result<usize> {
        self.ensure_open()?;
        let filter = Filter::parse(expr)?;
        let state = self.state.read();
        let store = &state.store;
        let matches = |s: &u32| store.is_live(*s) && filter.matches(store.metadata(*s));
        Ok(match state.metadata_index.candidates(&filter) {
            Some(candidates) => candidates.iter().filter(|s| matches(s)).count(),
            None => store.live_slots().filter(|s| matches(s)).count(),
        })
    }

    // ── persistence ────────────────────────────────────────────────────

    /// Writes a snapshot to `path`, or to the database's own path when `None`.
    ///
    /// Saving to the database's own path truncates its WAL, since the snapshot
    /// now covers every logged record. Returns the snapshot size in bytes.
    pub fn save(&self, path: Option<&Path>) -> Result<u64> {
        self.ensure_open()?;
        let target = path.or(self.path.as_deref()).ok_or_else(|| {
            VectorDbError::InvalidArgument("an in-memory database needs an explicit save path".into())
        })?;
        let settings = *self.settings.read();
        // The read lock excludes writers, so the WAL cannot advance while we write.
        let state = self.state.read();
        let header = SnapshotHeader {
            version: config::SNAPSHOT_VERSION,
            dimension: self.dimension as u32,
            index_type: self.index_type,
            slot_count: state.store.len() as u64,
            live_count: state.store.live_count() as u64,
            last_seq: self.wal.as_ref().map_or(0, WriteAheadLog::last_seq),
        };
        let body = SnapshotRef {
            store: &state.store,
            metadata_index: &state.metadata_index,
            point_ids: &state.point_ids,
            index: &state.index,
            settings: &settings,
        };
        let bytes = persistence::write_snapshot(target, &header, &body)?;
        if self.path.as_deref() == Some(target) {
            if let Some(wal) = &self.wal {
                wal.truncate()?;
            }
        }
        Ok(bytes)
    }

    // ── settings ───────────────────────────────────────────────────────

    pub fn settings(&self) -> Settings {
        *self.settings.read()
    }

    /// Live counts at or below `n` are searched exactly. 0 disables the fallback.
    pub fn set_exact_search_threshold(&self, n: usize) {
        self.settings.write().exact_search_threshold = n;
    }

    pub fn set_force_exact_search(&self, force: bool) {
        self.settings.write().force_exact_search = force;
    }

    pub fn set_compaction_interval(&self, secs: u64) -> Result<()> {
        if secs == 0 {
            return Err(VectorDbError::InvalidArgument(
                "compaction interval must be at least one second".into(),
            ));
        }
        self.settings.write().compaction_interval_secs = secs;
        self.nudge_compactor();
        Ok(())
    }

    pub fn set_wal_compaction_threshold(&self, bytes: u64) {
        self.settings.write().wal_compaction_threshold = bytes;
    }

    pub fn set_deleted_ratio_threshold(&self, ratio: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&ratio) {
            return Err(VectorDbError::InvalidArgument(format!(
                "deleted ratio threshold must be in [0, 1] (got {ratio})"
            )));
        }
        self.settings.write().deleted_ratio_threshold = ratio;
        Ok(())
    }

    pub fn set_resource_limits(&self, limits: ResourceLimits) {
        self.settings.write().limits = limits;
    }

    pub fn resource_limits(&self) -> ResourceLimits {
        self.settings.read().limits
    }

    // ── observability ──────────────────────────────────────────────────

    /// In-memory footprint in bytes.
    pub fn memory_usage(&self) -> u64 {
        self.state.read().memory().total
    }

    pub fn memory_breakdown(&self) -> MemoryBreakdown {
        let mut memory = self.state.read().memory();
        memory.wal = self.wal.as_ref().map_or(0, WriteAheadLog::size);
        memory
    }

    pub fn concurrent_operations(&self) -> u64 {
        self.gate.active()
    }

    /// Records an externally measured latency into the insert or search histogram.
    pub fn record_latency(&self, micros: f64, is_insert: bool) {
        if is_insert {
            self.telemetry.insert_latency.record_us(micros);
        } else {
            self.telemetry.search_latency.record_us(micros);
        }
    }

    /// Records one recall measurement in `[0, 1]`.
    pub fn record_recall(&self, recall: f64) {
        self.telemetry.record_recall(recall);
    }

    pub fn stats(&self) -> DatabaseStats {
        let state = self.state.read();
        self.stats_locked(&state)
    }

    fn stats_locked(&self, state: &State) -> DatabaseStats {
        let store = &state.store;
        DatabaseStats {
            dimension: self.dimension,
            index_type: self.index_type,
            count: store.len(),
            live: store.live_count(),
            deleted: store.deleted_count(),
            deleted_ratio: store.deleted_ratio(),
            trained: state.index.is_trained(),
            cosine_normalized: store.is_normalized(),
            read_only: self.read_only,
            point_ids: state.point_ids.len(),
            memory_bytes: state.memory().total,
            wal_bytes: self.wal.as_ref().map_or(0, WriteAheadLog::size),
            total_inserts: self.telemetry.total_inserts(),
            total_queries: self.telemetry.total_queries(),
        }
    }

    pub fn detailed_stats(&self) -> DetailedStats {
        let settings = *self.settings.read();
        let state = self.state.read();
        let stats = self.stats_locked(&state);
        let mut memory = state.memory();
        memory.wal = stats.wal_bytes;
        let health = self.health_locked(&state, &settings);
        drop(state);
        let (queries_per_sec, inserts_per_sec) = self.telemetry.take_rates();
        DetailedStats {
            stats,
            insert_latency: self.telemetry.insert_latency.snapshot(),
            search_latency: self.telemetry.search_latency.snapshot(),
            queries_per_sec,
            inserts_per_sec,
            memory,
            recall: self.telemetry.recall(),
            health,
            wal_last_seq: self.wal.as_ref().map_or(0, WriteAheadLog::last_seq),
        }
    }

    pub fn health(&self) -> HealthStatus {
        let settings = *self.settings.read();
        let state = self.state.read();
        self.health_locked(&state, &settings)
    }

    fn health_locked(&self, state: &State, settings: &Settings) -> HealthStatus {
        HealthStatus::evaluate(
            state.memory().total,
            settings.limits.max_memory_bytes,
            self.wal.as_ref().is_some_and(WriteAheadLog::last_append_failed),
            state.store.deleted_ratio(),
            settings.deleted_ratio_threshold,
        )
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.shutdown_compactor();
    }
}

fn check_header(header: &SnapshotHeader, dimension: usize, index_type: IndexType) -> Result<()> {
    if header.dimension as usize != dimension || header.index_type != index_type {
        return Err(VectorDbError::InvalidConfig(format!(
            "snapshot holds a {}-dimensional {} index, requested {}-dimensional {}",
            header.dimension, header.index_type, dimension, index_type
        )));
    }
    Ok(())
}

/// Normalizes Cosine queries against a normalized store.
fn prepare_query<'q>(store: &VectorStore, query: &'q [f32], metric: DistanceMetric) -> Cow<'q, [f32]> {
    if metric == DistanceMetric::Cosine && store.is_normalized() {
        Cow::Owned(distance::normalized(query))
    } else {
        Cow::Borrowed(query)
    }
}

fn materialize(store: &VectorStore, hits: Vec<(f32, u32)>) -> Vec<SearchResult> {
    hits.into_iter()
        .map(|(distance, slot)| SearchResult {
            index: slot as usize,
            distance,
            record: store.record(slot),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IvfFlatConfig, IvfPqConfig};

    fn mem(index_type: IndexType, dim: usize) -> Database {
        Database::open(None, dim, index_type).unwrap()
    }

    fn meta(pairs: &[(&str, &str)]) -> Metadata {
        Metadata::from_pairs(pairs.iter().copied())
    }

    // ── insert / get ───────────────────────────────────────────────────

    #[test]
    fn test_add_and_get() {
        let db = mem(IndexType::KdTree, 3);
        let i = db
            .add_vector_with_metadata(&[1.0, 2.0, 3.0], meta(&[("k", "v")]))
            .unwrap();
        assert_eq!(i, 0);
        let rec = db.get_vector(0).unwrap();
        assert_eq!(rec.data(), Some(&[1.0, 2.0, 3.0][..]));
        assert_eq!(rec.metadata().get("k"), Some("v"));
        assert_eq!(db.count(), 1);
    }

    #[test]
    fn test_dimension_mismatch_leaves_state_alone() {
        let db = mem(IndexType::Hnsw, 4);
        let err = db.add_vector(&[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, VectorDbError::DimensionMismatch { expected: 4, got: 2 }));
        assert_eq!(db.count(), 0);
        assert!(db.add_vector(&[f32::NAN, 0.0, 0.0, 0.0]).is_err());
        assert_eq!(db.count(), 0);
    }

    #[test]
    fn test_invalid_dimension_rejected() {
        assert!(Database::open(None, 0, IndexType::Flat).is_err());
        assert!(Database::open(None, config::MAX_DIMENSION + 1, IndexType::Flat).is_err());
    }

    #[test]
    fn test_batch_is_atomic() {
        let db = mem(IndexType::Flat, 2);
        let batch = vec![
            Vector::new(vec![1.0, 0.0]),
            Vector::new(vec![0.0, 1.0]),
            Vector::new(vec![1.0]),
        ];
        assert!(db.add_vectors(&batch).is_err());
        assert_eq!(db.count(), 0);
        let ok = db.add_vectors(&batch[..2]).unwrap();
        assert_eq!(ok, vec![0, 1]);
        assert!(db.add_vectors(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_point_ids() {
        let db = mem(IndexType::Flat, 2);
        let (i, id) = db.add_vector_with_id(&[1.0, 0.0], Metadata::new(), Some("a")).unwrap();
        assert_eq!((i, id.as_str()), (0, "a"));
        let (_, generated) = db.add_vector_with_id(&[0.0, 1.0], Metadata::new(), None).unwrap();
        assert_eq!(generated.len(), 36);
        assert!(db.add_vector_with_id(&[0.0, 1.0], Metadata::new(), Some("a")).is_err());
        assert_eq!(db.get_by_id("a").unwrap().0, 0);
        assert_eq!(db.id_of(1).as_deref(), Some(generated.as_str()));
        assert!(db.delete_by_id("a").unwrap());
        assert!(!db.delete_by_id("a").unwrap());
        assert!(db.get_by_id("a").is_err());
    }

    // ── update / upsert / delete ───────────────────────────────────────

    #[test]
    fn test_update_metadata_merges() {
        let db = mem(IndexType::Flat, 2);
        db.add_vector_with_metadata(&[0.0, 0.0], meta(&[("a", "1"), ("b", "2")]))
            .unwrap();
        db.update_metadata(0, meta(&[("b", "3"), ("c", "4")])).unwrap();
        let rec = db.get_vector(0).unwrap();
        let pairs: Vec<(&str, &str)> = rec.metadata().iter().collect();
        assert_eq!(pairs, vec![("a", "1"), ("b", "3"), ("c", "4")]);
        assert_eq!(db.count_by_filter("b == \"3\"").unwrap(), 1);
        assert_eq!(db.count_by_filter("b == \"2\"").unwrap(), 0);
    }

    #[test]
    fn test_upsert_updates_or_appends() {
        let db = mem(IndexType::KdTree, 2);
        db.add_vector(&[0.0, 0.0]).unwrap();
        assert_eq!(db.upsert(0, &[5.0, 5.0], None).unwrap(), 0);
        assert_eq!(db.get_vector(0).unwrap().data(), Some(&[5.0, 5.0][..]));
        assert_eq!(db.upsert(10, &[1.0, 1.0], Some(meta(&[("n", "x")]))).unwrap(), 1);
        db.delete_vector(0).unwrap();
        assert_eq!(db.upsert(0, &[2.0, 2.0], None).unwrap(), 2);
        assert_eq!(db.count(), 3);
        assert_eq!(db.live_count(), 2);
    }

    #[test]
    fn test_delete_semantics() {
        let db = mem(IndexType::Hnsw, 2);
        for i in 0..5 {
            db.add_vector(&[i as f32, 0.0]).unwrap();
        }
        db.delete_vector(1).unwrap();
        assert!(matches!(db.delete_vector(1), Err(VectorDbError::Deleted(1))));
        assert!(matches!(db.delete_vector(9), Err(VectorDbError::IndexOutOfRange { .. })));
        assert_eq!(db.delete_vectors(&[0, 1, 2, 2, 42]).unwrap(), 2);
        assert_eq!(db.live_count(), 2);
        let hits = db.search(&[0.0, 0.0], 10, DistanceMetric::Euclidean).unwrap();
        let indices: Vec<usize> = hits.iter().map(|h| h.index).collect();
        assert_eq!(indices, vec![3, 4]);
        assert!(db.get_vector(0).is_err());
    }

    // ── training ───────────────────────────────────────────────────────

    #[test]
    fn test_train_before_insert() {
        let cfg = IndexConfig::IvfFlat(IvfFlatConfig {
            nlist: 4,
            ..Default::default()
        });
        let db = Database::open_with_config(None, 2, cfg).unwrap();
        assert!(matches!(db.add_vector(&[1.0, 1.0]), Err(VectorDbError::NotTrained(IndexType::IvfFlat))));
        assert!(matches!(db.train(&[], 2), Err(VectorDbError::InvalidTrainingData(_))));
        assert!(matches!(db.train(&[1.0; 8], 3), Err(VectorDbError::DimensionMismatch { .. })));
        assert!(db.train(&[1.0, 2.0, 3.0], 2).is_err());
        assert!(!db.is_trained());

        let data: Vec<f32> = (0..80).map(|i| (i % 17) as f32).collect();
        db.train(&data, 2).unwrap();
        assert!(db.is_trained());
        db.add_vector(&[1.0, 1.0]).unwrap();
    }

    #[test]
    fn test_train_unsupported_index() {
        let db = mem(IndexType::KdTree, 2);
        assert!(matches!(db.train(&[1.0, 2.0], 2), Err(VectorDbError::Unsupported { .. })));
    }

    #[test]
    fn test_failed_training_keeps_index() {
        let cfg = IndexConfig::IvfPq(IvfPqConfig {
            nlist: 64,
            m: 2,
            nbits: 4,
            ..Default::default()
        });
        let db = Database::open_with_config(None, 4, cfg).unwrap();
        // fewer vectors than lists
        assert!(db.train(&[0.5; 40], 4).is_err());
        assert!(!db.is_trained());
    }

    // ── search ─────────────────────────────────────────────────────────

    #[test]
    fn test_search_filtered_and_expr() {
        let db = mem(IndexType::Hnsw, 2);
        for i in 0..20 {
            let color = if i % 2 == 0 { "red" } else { "blue" };
            db.add_vector_with_metadata(&[i as f32, 0.0], meta(&[("color", color), ("n", &i.to_string())]))
                .unwrap();
        }
        let hits = db
            .search_filtered(&[0.0, 0.0], 3, DistanceMetric::Euclidean, "color", "blue")
            .unwrap();
        let idx: Vec<usize> = hits.iter().map(|h| h.index).collect();
        assert_eq!(idx, vec![1, 3, 5]);

        let hits = db
            .search_with_filter_expr(&[0.0, 0.0], 5, DistanceMetric::Euclidean, "n >= 10 AND NOT color == \"red\"")
            .unwrap();
        let idx: Vec<usize> = hits.iter().map(|h| h.index).collect();
        assert_eq!(idx, vec![11, 13, 15, 17, 19]);
        assert!(db
            .search_with_filter_expr(&[0.0, 0.0], 5, DistanceMetric::Euclidean, "n >=")
            .is_err());
    }

    #[test]
    fn test_k_larger_than_live_and_zero() {
        let db = mem(IndexType::KdTree, 2);
        assert!(db.search(&[0.0, 0.0], 5, DistanceMetric::Euclidean).unwrap().is_empty());
        db.add_vector(&[1.0, 0.0]).unwrap();
        db.add_vector(&[2.0, 0.0]).unwrap();
        assert_eq!(db.search(&[0.0, 0.0], 50, DistanceMetric::Euclidean).unwrap().len(), 2);
        assert!(db.search(&[0.0, 0.0], 0, DistanceMetric::Euclidean).unwrap().is_empty());
        assert!(db.search(&[0.0, 0.0], config::MAX_K + 1, DistanceMetric::Euclidean).is_err());
    }

    #[test]
    fn test_range_and_scroll() {
        let db = mem(IndexType::KdTree, 1);
        for i in 0..10 {
            db.add_vector_with_metadata(&[i as f32], meta(&[("even", if i % 2 == 0 { "y" } else { "n" })]))
                .unwrap();
        }
        let hits = db.range_search(&[0.0], 3.0, 100, DistanceMetric::Euclidean).unwrap();
        assert_eq!(hits.iter().map(|h| h.index).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        let hits = db
            .range_search_filtered(&[0.0], 5.0, 2, DistanceMetric::Euclidean, "even == \"y\"")
            .unwrap();
        assert_eq!(hits.iter().map(|h| h.index).collect::<Vec<_>>(), vec![0, 2]);

        db.delete_vector(1).unwrap();
        let page = db.scroll(1, 3).unwrap();
        assert_eq!(page.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    #[test]
    fn test_cosine_normalization() {
        let db = mem(IndexType::Flat, 2);
        db.set_cosine_normalized(true).unwrap();
        db.add_vector(&[3.0, 4.0]).unwrap();
        let rec = db.get_vector(0).unwrap();
        let data = rec.data().unwrap();
        assert!((data[0] - 0.6).abs() < 1e-6 && (data[1] - 0.8).abs() < 1e-6);
        let hits = db.search(&[6.0, 8.0], 1, DistanceMetric::Cosine).unwrap();
        assert!(hits[0].distance.abs() < 1e-5);
        assert!(db.set_cosine_normalized(false).is_err());
    }

    #[test]
    fn test_sparse_database() {
        let db = mem(IndexType::Sparse, 100);
        let mut sv = SparseVector::new(100, &[3, 50], &[1.0, 2.0]).unwrap();
        sv.metadata.set("doc", "a");
        db.add_sparse_vector(&sv).unwrap();
        let mut dense = vec![0.0; 100];
        dense[3] = 1.0;
        db.add_vector(&dense).unwrap();
        let q = SparseVector::new(100, &[50], &[1.0]).unwrap();
        let hits = db.search_sparse(&q, 2, DistanceMetric::DotProduct).unwrap();
        assert_eq!(hits[0].index, 0);
        assert!(hits[0].record.is_sparse());
        assert!(db.set_cosine_normalized(true).is_err());
    }

    // ── limits / lifecycle ─────────────────────────────────────────────

    #[test]
    fn test_vector_limit() {
        let db = mem(IndexType::Flat, 2);
        db.set_resource_limits(ResourceLimits {
            max_vectors: 2,
            ..Default::default()
        });
        db.add_vector(&[0.0, 0.0]).unwrap();
        db.add_vector(&[0.0, 1.0]).unwrap();
        let err = db.add_vector(&[1.0, 1.0]).unwrap_err();
        assert_eq!(err.code(), -2);
        assert_eq!(db.count(), 2);
        assert_eq!(db.concurrent_operations(), 0);
    }

    #[test]
    fn test_memory_limit_and_health() {
        let db = mem(IndexType::Flat, 64);
        db.add_vector(&[0.5; 64]).unwrap();
        let used = db.memory_usage();
        assert!(used > 0);
        db.set_resource_limits(ResourceLimits {
            max_memory_bytes: used,
            ..Default::default()
        });
        assert!(db.add_vector(&[0.5; 64]).is_err());
        assert_eq!(db.health(), HealthStatus::Degraded);
        db.set_resource_limits(ResourceLimits::unlimited());
        assert_eq!(db.health(), HealthStatus::Healthy);
    }

    #[test]
    fn test_closed_database_rejects_calls() {
        let db = mem(IndexType::Flat, 2);
        db.close().unwrap();
        db.close().unwrap();
        assert!(matches!(db.add_vector(&[0.0, 0.0]), Err(VectorDbError::Closed)));
        assert!(matches!(
            db.search(&[0.0, 0.0], 1, DistanceMetric::Euclidean),
            Err(VectorDbError::Closed)
        ));
    }

    #[test]
    fn test_detailed_stats() {
        let db = mem(IndexType::Hnsw, 2);
        db.add_vector(&[0.0, 1.0]).unwrap();
        db.search(&[0.0, 1.0], 1, DistanceMetric::Euclidean).unwrap();
        db.record_latency(20.0, false);
        db.record_recall(0.95);
        let stats = db.detailed_stats();
        assert_eq!(stats.stats.live, 1);
        assert_eq!(stats.search_latency.count, 2);
        assert_eq!(stats.insert_latency.count, 1);
        assert_eq!(stats.recall.samples, 1);
        assert_eq!(stats.health, HealthStatus::Healthy);
        assert_eq!(stats.memory.total, db.memory_usage());
    }

    #[test]
    fn test_sparse_entries_are_normalized() {
        let db = mem(IndexType::Sparse, 8);
        let sv = SparseVector::new(8, &[5, 1, 5, 3], &[1.0, 2.0, 0.5, 0.0]).unwrap();
        let slot = db.add_sparse_vector(&sv).unwrap();
        match db.get_vector(slot).unwrap() {
            Record::Sparse(stored) => {
                let indices: Vec<u32> = stored.entries().iter().map(|e| e.index).collect();
                assert_eq!(indices, vec![1, 5]);
                assert_eq!(stored.entries()[1].value, 1.5);
            }
            other => panic!("expected a sparse record, got {other:?}"),
        }

        let unsorted = WalOp::Insert {
            data: VectorData::Sparse(vec![
                SparseEntry { index: 4, value: 1.0 },
                SparseEntry { index: 2, value: 1.0 },
            ]),
            metadata: Metadata::new(),
            id: None,
        };
        assert!(db.mutate(|_| Ok(unsorted)).is_err());
        assert_eq!(db.count(), 1);
    }

    #[test]
    fn test_replay_refuses_records_that_do_not_apply() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.vdb");
        {
            let db = Database::open(Some(&path), 2, IndexType::Flat).unwrap();
            db.add_vector(&[1.0, 1.0]).unwrap();
        }
        {
            let wal = WriteAheadLog::open(&wal_path_for(&path), 2, IndexType::Flat).unwrap();
            wal.replay().unwrap();
            wal.append(&WalOp::Update {
                index: 7,
                data: VectorData::Dense(vec![0.0, 0.0]),
            })
            .unwrap();
        }
        let err = Database::open(Some(&path), 2, IndexType::Flat).err().unwrap();
        assert!(matches!(err, VectorDbError::Corrupted { what: "WAL", .. }));
        assert_eq!(err.code(), -5);
    }
}
