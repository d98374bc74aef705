//! Write-Ahead Log (WAL) for crash recovery.
//!
//! Every mutation is appended here before it touches the in-memory store. The
//! file starts with a 16-byte header `[b"VWAL"][u32 version][u32 dimension]
//! [u32 index type]` (little-endian), followed by frames of
//! `[u32 length BE][u32 CRC32 BE][bincode payload]`, each fsynced before
//! [`WriteAheadLog::append`] returns.
//!
//! Every record carries a sequence number. Snapshots remember the last sequence
//! they include, so records that survive a crash between save and truncate are
//! skipped on replay instead of applied twice.

use crate::config;
use crate::error::{Result, VectorDbError};
use crate::index::IndexType;
use crate::vector::{Metadata, SparseEntry};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub const WAL_HEADER_LEN: u64 = 16;

/// Vector payload of a logged mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VectorData {
    Dense(Vec<f32>),
    Sparse(Vec<SparseEntry>),
}

/// One record of an [`WalOp::InsertBatch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    pub data: VectorData,
    pub metadata: Metadata,
    pub id: Option<String>,
}

/// A single logged mutation. Replaying the same operations in order against the
/// same starting state reproduces the same slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalOp {
    Insert {
        data: VectorData,
        metadata: Metadata,
        id: Option<String>,
    },
    /// All-or-nothing batch insert.
    InsertBatch { items: Vec<BatchItem> },
    /// Replace the data of a live slot.
    Update { index: u64, data: VectorData },
    /// Merge metadata into a live slot.
    UpdateMetadata { index: u64, metadata: Metadata },
    /// Update a live slot (merging metadata) or append a new record.
    Upsert {
        index: u64,
        data: VectorData,
        metadata: Option<Metadata>,
    },
    Delete { indices: Vec<u64> },
    Train { data: Vec<f32> },
    SetCosineNormalized { enabled: bool },
    Compact,
}

impl WalOp {
    pub fn name(&self) -> &'static str {
        match self {
            WalOp::Insert { .. } => "insert",
            WalOp::InsertBatch { .. } => "insert_batch",
            WalOp::Update { .. } => "update",
            WalOp::UpdateMetadata { .. } => "update_metadata",
            WalOp::Upsert { .. } => "upsert",
            WalOp::Delete { .. } => "delete",
            WalOp::Train { .. } => "train",
            WalOp::SetCosineNormalized { .. } => "set_cosine_normalized",
            WalOp::Compact => "compact",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalRecord {
    pub seq: u64,
    pub op: WalOp,
}

/// Decoded WAL file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalHeader {
    pub version: u32,
    pub dimension: u32,
    pub index_type: IndexType,
}

impl WalHeader {
    fn encode(&self) -> [u8; WAL_HEADER_LEN as usize] {
        let mut buf = [0u8; WAL_HEADER_LEN as usize];
        buf[0..4].copy_from_slice(config::WAL_MAGIC);
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..12].copy_from_slice(&self.dimension.to_le_bytes());
        buf[12..16].copy_from_slice(&self.index_type.code().to_le_bytes());
        buf
    }

    fn decode(buf: &[u8; WAL_HEADER_LEN as usize]) -> Result<Self> {
        if &buf[0..4] != config::WAL_MAGIC {
            return Err(VectorDbError::corrupted("WAL", "bad magic"));
        }
        let word = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        let version = word(4);
        if version != config::WAL_VERSION {
            return Err(VectorDbError::corrupted("WAL", format!("unsupported version {version}")));
        }
        let index_type = IndexType::from_code(word(12))
            .map_err(|_| VectorDbError::corrupted("WAL", format!("unknown index type {}", word(12))))?;
        Ok(Self {
            version,
            dimension: word(8),
            index_type,
        })
    }
}

/// Diagnostic statistics from a WAL replay.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplayStats {
    /// Records decoded from the file.
    pub records: usize,
    /// Records at or below the snapshot's sequence, not re-applied.
    pub skipped: usize,
    /// Whether replay stopped at a torn final frame.
    pub truncated: bool,
    /// Byte offset just past the last intact frame.
    pub valid_bytes: u64,
}

/// WAL file location for a snapshot at `snapshot`: `<name>.wal` beside it, or in
/// `$VECTORDB_WAL_DIR` when that is set.
pub fn wal_path_for(snapshot: &Path) -> PathBuf {
    let mut name = snapshot
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "vectors".into());
    name.push(config::WAL_FILE_SUFFIX);
    match std::env::var_os(config::WAL_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir).join(name),
        _ => snapshot.with_file_name(name),
    }
}

/// Append-only write-ahead log with CRC32 integrity checks.
///
/// Appends are serialized by a `parking_lot::Mutex` independent of the database
/// lock. Each [`append`](WriteAheadLog::append) serializes, writes, flushes and
/// fsyncs before returning.
pub struct WriteAheadLog {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
    header: WalHeader,
    next_seq: AtomicU64,
    size: AtomicU64,
    last_append_failed: AtomicBool,
    /// Set when a failed append may have left bytes in the buffer or the file
    /// past `size`. Cleared once they are discarded.
    dirty: AtomicBool,
}

impl WriteAheadLog {
    /// Opens or creates the WAL at `path`. An existing file must carry a header
    /// matching `dimension` and `index_type`.
    pub fn open(path: &Path, dimension: usize, index_type: IndexType) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let header = WalHeader {
            version: config::WAL_VERSION,
            dimension: dimension as u32,
            index_type,
        };
        let mut opts = OpenOptions::new();
        opts.create(true).read(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o600);
        }
        let mut file = opts.open(path)?;
        let len = file.metadata()?.len();
        if len == 0 {
            file.write_all(&header.encode())?;
            file.sync_all()?;
        } else {
            let existing = read_header(&mut file)?;
            if existing.dimension as usize != dimension || existing.index_type != index_type {
                return Err(VectorDbError::corrupted(
                    "WAL",
                    format!(
                        "header says dimension {} / {}, database is {} / {}",
                        existing.dimension, existing.index_type, dimension, index_type
                    ),
                ));
            }
        }
        let size = file.metadata()?.len();
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path: path.to_path_buf(),
            header,
            next_seq: AtomicU64::new(1),
            size: AtomicU64::new(size),
            last_append_failed: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> WalHeader {
        self.header
    }

    /// Current file size in bytes.
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Relaxed)
    }

    /// Sequence number the next append will use.
    pub fn next_seq(&self) -> u64 {
        self.next_seq.load(Ordering::SeqCst)
    }

    /// Sequence number of the last append (0 if none).
    pub fn last_seq(&self) -> u64 {
        self.next_seq().saturating_sub(1)
    }

    /// Moves the sequence counter forward so the next append uses at least `seq`.
    pub fn advance_seq_to(&self, seq: u64) {
        self.next_seq.fetch_max(seq, Ordering::SeqCst);
    }

    pub fn last_append_failed(&self) -> bool {
        self.last_append_failed.load(Ordering::Relaxed)
    }

    /// Appends `op` durably. Returns the sequence number assigned to it.
    ///
    /// On failure nothing of the frame survives: the buffer is dropped and the
    /// file is cut back to its length before the call.
    pub fn append(&self, op: &WalOp) -> Result<u64> {
        let mut w = self.writer.lock();
        if self.dirty.load(Ordering::SeqCst) {
            self.discard_unsynced(&mut w)?;
        }
        let seq = self.next_seq.load(Ordering::SeqCst);
        let record = WalRecordRef { seq, op };
        let framed = serialize_and_frame(&record)?;
        let result = (|| -> io::Result<()> {
            w.write_all(&framed)?;
            w.flush()?;
            w.get_mut().sync_data()
        })();
        match result {
            Ok(()) => {
                self.next_seq.store(seq + 1, Ordering::SeqCst);
                self.size.fetch_add(framed.len() as u64, Ordering::Relaxed);
                self.last_append_failed.store(false, Ordering::Relaxed);
                Ok(seq)
            }
            Err(e) => {
                self.last_append_failed.store(true, Ordering::Relaxed);
                self.dirty.store(true, Ordering::SeqCst);
                tracing::warn!(path = %self.path.display(), error = %e, "WAL append failed");
                if let Err(reset) = self.discard_unsynced(&mut w) {
                    tracing::warn!(path = %self.path.display(), error = %reset, "WAL rollback failed, retrying on next append");
                }
                Err(e.into())
            }
        }
    }

    /// Replaces the writer without flushing it and cuts the file back to the
    /// last acknowledged frame.
    fn discard_unsynced(&self, w: &mut BufWriter<File>) -> Result<()> {
        let keep = self.size.load(Ordering::Relaxed);
        let file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        let (stale, _unwritten) = std::mem::replace(w, BufWriter::new(file)).into_parts();
        drop(stale);
        let file = w.get_ref();
        file.set_len(keep)?;
        file.sync_all()?;
        self.dirty.store(false, Ordering::SeqCst);
        tracing::debug!(path = %self.path.display(), bytes = keep, "WAL rolled back to last intact frame");
        Ok(())
    }

    /// Reads every record, verifying CRC32 checksums.
    ///
    /// A torn final frame is cut off the file so later appends start on a frame
    /// boundary. CRC mismatches and undecodable payloads are errors.
    pub fn replay(&self) -> Result<(Vec<WalRecord>, ReplayStats)> {
        let _w = self.writer.lock();
        let (_, records, stats) = read_records(&self.path)?;
        if stats.truncated {
            let file = OpenOptions::new().write(true).open(&self.path)?;
            file.set_len(stats.valid_bytes)?;
            file.sync_all()?;
            self.size.store(stats.valid_bytes, Ordering::Relaxed);
            tracing::warn!(
                path = %self.path.display(),
                valid_bytes = stats.valid_bytes,
                "WAL ended in a torn frame, truncated to last intact record"
            );
        }
        if let Some(last) = records.last() {
            self.advance_seq_to(last.seq + 1);
        }
        Ok((records, stats))
    }

    /// Drops every record, keeping the header. Calling it twice is harmless.
    pub fn truncate(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        if !self.dirty.load(Ordering::SeqCst) {
            writer.flush()?;
        }
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        file.write_all(&self.header.encode())?;
        file.sync_all()?;
        let fresh = BufWriter::new(OpenOptions::new().read(true).append(true).open(&self.path)?);
        let (_stale, _unwritten) = std::mem::replace(&mut *writer, fresh).into_parts();
        self.size.store(WAL_HEADER_LEN, Ordering::Relaxed);
        self.dirty.store(false, Ordering::SeqCst);
        tracing::debug!(path = %self.path.display(), "WAL truncated");
        Ok(())
    }
}

fn read_header(file: &mut File) -> Result<WalHeader> {
    file.seek(SeekFrom::Start(0))?;
    let mut buf = [0u8; WAL_HEADER_LEN as usize];
    file.read_exact(&mut buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => VectorDbError::corrupted("WAL", "file shorter than its header"),
        _ => VectorDbError::Io(e),
    })?;
    WalHeader::decode(&buf)
}

/// Reads a WAL file without opening it for writing.
///
/// Only the final frame may be torn. A frame whose length runs past the end of
/// the file while an intact later frame hides inside that span has a damaged
/// length field, and is reported as corruption like a CRC mismatch.
pub fn read_records(path: &Path) -> Result<(WalHeader, Vec<WalRecord>, ReplayStats)> {
    let mut file = File::open(path)?;
    let header = read_header(&mut file)?;
    let mut reader = BufReader::new(file);
    let mut records = Vec::new();
    let mut stats = ReplayStats {
        valid_bytes: WAL_HEADER_LEN,
        ..Default::default()
    };
    let mut frame_header = [0u8; 8];

    loop {
        match read_full(&mut reader, &mut frame_header)? {
            0 => break,
            8 => {}
            _ => {
                stats.truncated = true;
                break;
            }
        }
        let offset = stats.valid_bytes;
        let len = u32::from_be_bytes([frame_header[0], frame_header[1], frame_header[2], frame_header[3]]) as usize;
        let stored_crc = u32::from_be_bytes([frame_header[4], frame_header[5], frame_header[6], frame_header[7]]);
        if len > config::MAX_WAL_FRAME_BYTES {
            return Err(VectorDbError::corrupted(
                "WAL",
                format!("frame at byte {offset} claims {len} bytes"),
            ));
        }
        let mut data = Vec::new();
        (&mut reader).take(len as u64).read_to_end(&mut data)?;
        if data.len() < len {
            if let Some(at) = intact_frame_within(&data) {
                return Err(VectorDbError::corrupted(
                    "WAL",
                    format!(
                        "frame at byte {offset} claims {len} bytes but an intact frame starts at byte {}",
                        offset + 8 + at as u64
                    ),
                ));
            }
            stats.truncated = true;
            break;
        }
        if crc32fast::hash(&data) != stored_crc {
            return Err(VectorDbError::corrupted(
                "WAL",
                format!("CRC mismatch in frame at byte {offset}"),
            ));
        }
        let record: WalRecord = bincode::deserialize(&data).map_err(|e| {
            VectorDbError::corrupted("WAL", format!("undecodable frame at byte {offset}: {e}"))
        })?;
        records.push(record);
        stats.records += 1;
        stats.valid_bytes += 8 + len as u64;
    }
    Ok((header, records, stats))
}

/// Looks for a complete, checksummed frame inside the unread tail of a short
/// frame. `tail` starts with the short frame's payload, whose first eight bytes
/// are its sequence number; a following frame would carry the next one.
fn intact_frame_within(tail: &[u8]) -> Option<usize> {
    let seq = u64::from_le_bytes(tail.get(..8)?.try_into().ok()?);
    let next = seq.checked_add(1)?.to_le_bytes();
    (8..tail.len().saturating_sub(15)).find(|&at| {
        if tail[at + 8..at + 16] != next {
            return false;
        }
        let len = u32::from_be_bytes([tail[at], tail[at + 1], tail[at + 2], tail[at + 3]]) as usize;
        let crc = u32::from_be_bytes([tail[at + 4], tail[at + 5], tail[at + 6], tail[at + 7]]);
        tail.get(at + 8..at + 8 + len)
            .is_some_and(|payload| crc32fast::hash(payload) == crc)
    })
}

/// Fills `buf` as far as the reader allows. Returns the number of bytes read.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Serialize a record into its on-disk frame format:
/// `[u32 len BE][u32 crc32 BE][bincode payload]`.
/// Borrowed form of [`WalRecord`] with the same encoding.
#[derive(Serialize)]
struct WalRecordRef<'a> {
    seq: u64,
    op: &'a WalOp,
}

fn serialize_and_frame(record: &WalRecordRef<'_>) -> Result<Vec<u8>> {
    let bytes = bincode::serialize(record)?;
    if bytes.len() > config::MAX_WAL_FRAME_BYTES {
        return Err(VectorDbError::InvalidArgument(format!(
            "{} record encodes to {} bytes, above the WAL frame limit of {}",
            record.op.name(),
            bytes.len(),
            config::MAX_WAL_FRAME_BYTES
        )));
    }
    let len = bytes.len() as u32;
    let crc = crc32fast::hash(&bytes);

    let mut framed = Vec::with_capacity(8 + bytes.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(&crc.to_be_bytes());
    framed.extend_from_slice(&bytes);
    Ok(framed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_dir() -> PathBuf {
        let id = uuid::Uuid::new_v4();
        std::env::temp_dir().join(format!("vdb_wal_test_{id}"))
    }

    fn cleanup(dir: &Path) {
        let _ = std::fs::remove_dir_all(dir);
    }

    fn insert(x: f32) -> WalOp {
        WalOp::Insert {
            data: VectorData::Dense(vec![x, x]),
            metadata: Metadata::from_pairs([("x", x.to_string())]),
            id: None,
        }
    }

    #[test]
    fn test_append_and_replay() {
        let dir = tmp_dir();
        let path = dir.join("db.wal");
        {
            let wal = WriteAheadLog::open(&path, 2, IndexType::KdTree).unwrap();
            assert_eq!(wal.append(&insert(1.0)).unwrap(), 1);
            assert_eq!(wal.append(&WalOp::Delete { indices: vec![0] }).unwrap(), 2);
            assert!(wal.size() > WAL_HEADER_LEN);
        }
        {
            let wal = WriteAheadLog::open(&path, 2, IndexType::KdTree).unwrap();
            let (records, stats) = wal.replay().unwrap();
            assert_eq!(stats.records, 2);
            assert!(!stats.truncated);
            assert_eq!(records[0].op, insert(1.0));
            assert_eq!(records[1].seq, 2);
            assert_eq!(wal.next_seq(), 3);
        }
        cleanup(&dir);
    }

    #[test]
    fn test_header_mismatch_rejected() {
        let dir = tmp_dir();
        let path = dir.join("db.wal");
        drop(WriteAheadLog::open(&path, 4, IndexType::Hnsw).unwrap());
        let err = WriteAheadLog::open(&path, 8, IndexType::Hnsw).err().unwrap();
        assert!(matches!(err, VectorDbError::Corrupted { .. }));
        cleanup(&dir);
    }

    #[test]
    fn test_truncate_is_idempotent() {
        let dir = tmp_dir();
        let path = dir.join("db.wal");
        let wal = WriteAheadLog::open(&path, 2, IndexType::Flat).unwrap();
        wal.append(&insert(1.0)).unwrap();
        wal.truncate().unwrap();
        wal.truncate().unwrap();
        assert_eq!(wal.size(), WAL_HEADER_LEN);
        let (records, _) = wal.replay().unwrap();
        assert!(records.is_empty());
        // sequence numbers keep increasing across truncation
        assert_eq!(wal.append(&insert(2.0)).unwrap(), 2);
        cleanup(&dir);
    }

    #[test]
    fn test_torn_tail_is_tolerated_and_cut() {
        let dir = tmp_dir();
        let path = dir.join("db.wal");
        {
            let wal = WriteAheadLog::open(&path, 2, IndexType::Flat).unwrap();
            wal.append(&insert(1.0)).unwrap();
            wal.append(&insert(2.0)).unwrap();
        }
        let full = std::fs::read(&path).unwrap();
        std::fs::write(&path, &full[..full.len() - 3]).unwrap();
        {
            let wal = WriteAheadLog::open(&path, 2, IndexType::Flat).unwrap();
            let (records, stats) = wal.replay().unwrap();
            assert_eq!(records.len(), 1);
            assert!(stats.truncated);
            wal.append(&insert(3.0)).unwrap();
        }
        let (_, records, stats) = read_records(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert!(!stats.truncated);
        assert_eq!(records[1].op, insert(3.0));
        cleanup(&dir);
    }

    #[test]
    fn test_crc_corruption_fails_loudly() {
        let dir = tmp_dir();
        let path = dir.join("db.wal");
        {
            let wal = WriteAheadLog::open(&path, 2, IndexType::Flat).unwrap();
            wal.append(&insert(1.0)).unwrap();
        }
        let mut data = std::fs::read(&path).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        std::fs::write(&path, &data).unwrap();
        let err = read_records(&path).unwrap_err();
        assert!(matches!(err, VectorDbError::Corrupted { what: "WAL", .. }));
        cleanup(&dir);
    }

    fn three_records(path: &Path) -> Vec<u8> {
        let wal = WriteAheadLog::open(path, 2, IndexType::Flat).unwrap();
        for x in [1.0, 2.0, 3.0] {
            wal.append(&insert(x)).unwrap();
        }
        std::fs::read(path).unwrap()
    }

    fn frame_offsets(data: &[u8]) -> Vec<usize> {
        let mut offsets = Vec::new();
        let mut at = WAL_HEADER_LEN as usize;
        while at + 8 <= data.len() {
            offsets.push(at);
            let len = u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]) as usize;
            at += 8 + len;
        }
        offsets
    }

    #[test]
    fn test_damaged_length_mid_file_fails_loudly() {
        let dir = tmp_dir();
        let path = dir.join("db.wal");
        let mut data = three_records(&path);
        let second = frame_offsets(&data)[1];
        data[second] ^= 0x01;
        std::fs::write(&path, &data).unwrap();

        let err = read_records(&path).unwrap_err();
        assert!(matches!(err, VectorDbError::Corrupted { what: "WAL", .. }));
        let wal = WriteAheadLog::open(&path, 2, IndexType::Flat).unwrap();
        assert!(wal.replay().is_err());
        // nothing was cut off the file
        assert_eq!(std::fs::read(&path).unwrap(), data);
        cleanup(&dir);
    }

    #[test]
    fn test_oversized_length_is_corruption() {
        let dir = tmp_dir();
        let path = dir.join("db.wal");
        let mut data = three_records(&path);
        let last = *frame_offsets(&data).last().unwrap();
        data[last..last + 4].copy_from_slice(&u32::MAX.to_be_bytes());
        std::fs::write(&path, &data).unwrap();
        let err = read_records(&path).unwrap_err();
        assert!(matches!(err, VectorDbError::Corrupted { what: "WAL", .. }));
        cleanup(&dir);
    }

    #[test]
    fn test_failed_append_leaves_no_trace() {
        let dir = tmp_dir();
        let path = dir.join("db.wal");
        let wal = WriteAheadLog::open(&path, 2, IndexType::Flat).unwrap();
        wal.append(&insert(1.0)).unwrap();
        let acknowledged = wal.size();
        {
            // a write that reached the file only in part, plus bytes still buffered
            let mut w = wal.writer.lock();
            w.write_all(&[0, 0, 0, 40, 1, 2]).unwrap();
            w.flush().unwrap();
            w.write_all(b"never synced").unwrap();
        }
        wal.dirty.store(true, Ordering::SeqCst);

        assert_eq!(wal.append(&insert(2.0)).unwrap(), 2);
        let (_, records, stats) = read_records(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert!(!stats.truncated);
        assert_eq!(records[1].op, insert(2.0));
        assert!(wal.size() > acknowledged);
        assert_eq!(wal.size(), std::fs::metadata(&path).unwrap().len());
        cleanup(&dir);
    }

    #[test]
    fn test_wal_path_for_sits_beside_snapshot() {
        if std::env::var_os(config::WAL_DIR_ENV).is_none() {
            let p = wal_path_for(Path::new("/data/vectors.db"));
            assert_eq!(p, PathBuf::from("/data/vectors.db.wal"));
        }
    }

    #[test]
    fn test_serialize_and_frame_format() {
        let framed = serialize_and_frame(&WalRecordRef {
            seq: 9,
            op: &WalOp::Compact,
        })
        .unwrap();
        let len = u32::from_be_bytes([framed[0], framed[1], framed[2], framed[3]]) as usize;
        let stored_crc = u32::from_be_bytes([framed[4], framed[5], framed[6], framed[7]]);
        let payload = &framed[8..];
        assert_eq!(payload.len(), len);
        assert_eq!(crc32fast::hash(payload), stored_crc);
        let decoded: WalRecord = bincode::deserialize(payload).unwrap();
        assert_eq!(decoded.seq, 9);
        assert_eq!(decoded.op, WalOp::Compact);
    }
}
