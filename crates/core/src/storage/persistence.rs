//! Snapshot files.
//!
//! Layout: a 40-byte little-endian header
//! `[b"VSNP"][u32 version][u32 dimension][u32 index type][u64 slots][u64 live]
//! [u64 last WAL sequence]`, a bincode body (store, metadata index, point IDs,
//! active index, settings), then the footer `[b"VCR1"][u32 CRC32 BE]` over
//! header and body. Writes go to a temp file that is fsynced and renamed over
//! the target, so a crash never leaves a half-written snapshot in place.

use crate::config;
use crate::error::{Result, VectorDbError};
use crate::index::{IndexType, VectorIndex};
use crate::storage::database::Settings;
use crate::storage::{MetadataIndex, PointIdMap, VectorStore};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

pub const SNAPSHOT_HEADER_LEN: usize = 40;

/// Magic bytes preceding the CRC32 footer.
const SNAPSHOT_CRC_MAGIC: &[u8; 4] = b"VCR1";
const FOOTER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub version: u32,
    pub dimension: u32,
    pub index_type: IndexType,
    pub slot_count: u64,
    pub live_count: u64,
    /// Highest WAL sequence already reflected in the body.
    pub last_seq: u64,
}

impl SnapshotHeader {
    fn encode(&self) -> [u8; SNAPSHOT_HEADER_LEN] {
        let mut buf = [0u8; SNAPSHOT_HEADER_LEN];
        buf[0..4].copy_from_slice(config::SNAPSHOT_MAGIC);
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..12].copy_from_slice(&self.dimension.to_le_bytes());
        buf[12..16].copy_from_slice(&self.index_type.code().to_le_bytes());
        buf[16..24].copy_from_slice(&self.slot_count.to_le_bytes());
        buf[24..32].copy_from_slice(&self.live_count.to_le_bytes());
        buf[32..40].copy_from_slice(&self.last_seq.to_le_bytes());
        buf
    }

    /// Decodes the header at the start of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SNAPSHOT_HEADER_LEN {
            return Err(VectorDbError::corrupted("snapshot", "file shorter than its header"));
        }
        if &bytes[0..4] != config::SNAPSHOT_MAGIC {
            return Err(VectorDbError::corrupted("snapshot", "bad magic"));
        }
        let u32_at = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        let u64_at = |i: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&bytes[i..i + 8]);
            u64::from_le_bytes(b)
        };
        let version = u32_at(4);
        if version != config::SNAPSHOT_VERSION {
            return Err(VectorDbError::corrupted(
                "snapshot",
                format!("unsupported version {version}"),
            ));
        }
        let index_type = IndexType::from_code(u32_at(12))
            .map_err(|_| VectorDbError::corrupted("snapshot", format!("unknown index type {}", u32_at(12))))?;
        Ok(Self {
            version,
            dimension: u32_at(8),
            index_type,
            slot_count: u64_at(16),
            live_count: u64_at(24),
            last_seq: u64_at(32),
        })
    }
}

/// Borrowed snapshot body, serialized without cloning the database.
#[derive(Serialize)]
pub struct SnapshotRef<'a> {
    pub store: &'a VectorStore,
    pub metadata_index: &'a MetadataIndex,
    pub point_ids: &'a PointIdMap,
    pub index: &'a VectorIndex,
    pub settings: &'a Settings,
}

/// Owned snapshot body.
#[derive(Debug, Deserialize)]
pub struct Snapshot {
    pub store: VectorStore,
    pub metadata_index: MetadataIndex,
    pub point_ids: PointIdMap,
    pub index: VectorIndex,
    pub settings: Settings,
}

/// Serializes header, body and footer into one buffer.
pub fn encode_snapshot(header: &SnapshotHeader, body: &SnapshotRef<'_>) -> Result<Vec<u8>> {
    let body_bytes = bincode::serialize(body)?;
    let mut out = Vec::with_capacity(SNAPSHOT_HEADER_LEN + body_bytes.len() + FOOTER_LEN);
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(&body_bytes);
    let crc = crc32fast::hash(&out);
    out.extend_from_slice(SNAPSHOT_CRC_MAGIC);
    out.extend_from_slice(&crc.to_be_bytes());
    Ok(out)
}

/// Writes a snapshot atomically. Returns the number of bytes written.
pub fn write_snapshot(path: &Path, header: &SnapshotHeader, body: &SnapshotRef<'_>) -> Result<u64> {
    let output = encode_snapshot(header, body)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    {
        let mut file = File::create(&tmp_path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(&output)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;

    let crc = u32::from_be_bytes([
        output[output.len() - 4],
        output[output.len() - 3],
        output[output.len() - 2],
        output[output.len() - 1],
    ]);
    tracing::info!(
        path = %path.display(),
        bytes = output.len(),
        crc = format_args!("{crc:#010x}"),
        slots = header.slot_count,
        "snapshot saved"
    );
    Ok(output.len() as u64)
}

/// Verifies the footer CRC and returns `(header, body bytes)`.
pub fn verify_snapshot(bytes: &[u8]) -> Result<(SnapshotHeader, &[u8])> {
    if bytes.len() < SNAPSHOT_HEADER_LEN + FOOTER_LEN {
        return Err(VectorDbError::corrupted("snapshot", "file too short"));
    }
    let footer = &bytes[bytes.len() - FOOTER_LEN..];
    if &footer[0..4] != SNAPSHOT_CRC_MAGIC {
        return Err(VectorDbError::corrupted("snapshot", "missing CRC footer"));
    }
    let stored = u32::from_be_bytes([footer[4], footer[5], footer[6], footer[7]]);
    let covered = &bytes[..bytes.len() - FOOTER_LEN];
    let computed = crc32fast::hash(covered);
    if computed != stored {
        return Err(VectorDbError::corrupted(
            "snapshot",
            format!("CRC32 mismatch: stored {stored:#010x}, computed {computed:#010x}"),
        ));
    }
    let header = SnapshotHeader::decode(covered)?;
    Ok((header, &covered[SNAPSHOT_HEADER_LEN..]))
}

/// Decodes and structurally validates a snapshot image.
pub fn decode_snapshot(bytes: &[u8]) -> Result<(SnapshotHeader, Snapshot)> {
    let (header, body) = verify_snapshot(bytes)?;
    let snapshot: Snapshot = bincode::deserialize(body)
        .map_err(|e| VectorDbError::corrupted("snapshot", format!("undecodable body: {e}")))?;

    let store = &snapshot.store;
    if store.dimension() != header.dimension as usize
        || snapshot.index.index_type() != header.index_type
        || store.len() as u64 != header.slot_count
        || store.live_count() as u64 != header.live_count
    {
        return Err(VectorDbError::corrupted("snapshot", "header disagrees with body"));
    }
    store
        .validate()
        .map_err(|detail| VectorDbError::corrupted("snapshot", detail))?;
    snapshot
        .index
        .validate(store.len())
        .map_err(|detail| VectorDbError::corrupted("snapshot", detail))?;
    Ok((header, snapshot))
}

pub fn load_snapshot(path: &Path) -> Result<(SnapshotHeader, Snapshot)> {
    let raw = fs::read(path)?;
    let decoded = decode_snapshot(&raw)?;
    tracing::info!(path = %path.display(), bytes = raw.len(), "snapshot loaded");
    Ok(decoded)
}

/// Loads a snapshot through a read-only memory map.
pub fn map_snapshot(path: &Path) -> Result<(SnapshotHeader, Snapshot)> {
    let file = File::open(path)?;
    // SAFETY: the map is read-only and dropped before returning; the decoded
    // snapshot owns copies of everything it needs.
    let mmap = unsafe { Mmap::map(&file)? };
    let decoded = decode_snapshot(&mmap[..])?;
    tracing::info!(path = %path.display(), bytes = mmap.len(), "snapshot mapped");
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexConfig;
    use crate::vector::Metadata;

    fn sample() -> (VectorStore, MetadataIndex, PointIdMap, VectorIndex, Settings) {
        let mut store = VectorStore::new(2, false);
        let mut index = VectorIndex::new(2, &IndexConfig::KdTree);
        for i in 0..5 {
            let slot = store.push_dense(&[i as f32, 1.0], Metadata::from_pairs([("i", i.to_string())]));
            index.insert(&store, slot);
        }
        let meta = MetadataIndex::build(&store);
        let mut ids = PointIdMap::new();
        ids.set("first", 0).unwrap();
        (store, meta, ids, index, Settings::default())
    }

    fn header_for(store: &VectorStore) -> SnapshotHeader {
        SnapshotHeader {
            version: config::SNAPSHOT_VERSION,
            dimension: 2,
            index_type: IndexType::KdTree,
            slot_count: store.len() as u64,
            live_count: store.live_count() as u64,
            last_seq: 17,
        }
    }

    #[test]
    fn test_write_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.vdb");
        let (store, meta, ids, index, settings) = sample();
        let body = SnapshotRef {
            store: &store,
            metadata_index: &meta,
            point_ids: &ids,
            index: &index,
            settings: &settings,
        };
        write_snapshot(&path, &header_for(&store), &body).unwrap();
        assert!(!dir.path().join("db.vdb.tmp").exists());

        let (header, snap) = load_snapshot(&path).unwrap();
        assert_eq!(header.last_seq, 17);
        assert_eq!(snap.store.len(), 5);
        assert_eq!(snap.point_ids.get("first"), Some(0));
        assert_eq!(snap.metadata_index.query("i", "3"), vec![3]);

        let (mapped, _) = map_snapshot(&path).unwrap();
        assert_eq!(mapped, header);
    }

    #[test]
    fn test_corruption_detected() {
        let (store, meta, ids, index, settings) = sample();
        let body = SnapshotRef {
            store: &store,
            metadata_index: &meta,
            point_ids: &ids,
            index: &index,
            settings: &settings,
        };
        let mut bytes = encode_snapshot(&header_for(&store), &body).unwrap();
        bytes[SNAPSHOT_HEADER_LEN + 3] ^= 0x40;
        assert!(matches!(
            decode_snapshot(&bytes),
            Err(VectorDbError::Corrupted { what: "snapshot", .. })
        ));
        assert!(decode_snapshot(&bytes[..20]).is_err());
    }

    #[test]
    fn test_header_must_match_body() {
        let (store, meta, ids, index, settings) = sample();
        let body = SnapshotRef {
            store: &store,
            metadata_index: &meta,
            point_ids: &ids,
            index: &index,
            settings: &settings,
        };
        let mut header = header_for(&store);
        header.live_count = 99;
        let bytes = encode_snapshot(&header, &body).unwrap();
        assert!(decode_snapshot(&bytes).is_err());
    }
}
