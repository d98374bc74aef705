use serde_json::{json, Value};
use std::error::Error;
use std::path::Path;
use vectordb_core::storage::{
    decode_snapshot, metadata_to_json, read_records, verify_snapshot, wal_path_for, SnapshotHeader,
    VectorData, WalOp,
};
use vectordb_core::{Database, IndexType, VectorDbError};

type CmdResult = Result<(), Box<dyn Error>>;

fn header_json(h: &SnapshotHeader) -> Value {
    json!({
        "version": h.version,
        "dimension": h.dimension,
        "index_type": h.index_type.to_string(),
        "index_type_code": h.index_type.code(),
        "slot_count": h.slot_count,
        "live_count": h.live_count,
        "last_seq": h.last_seq,
    })
}

fn print_json(value: &Value) -> CmdResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Opens the database at `snapshot` with its own dimension and index type,
/// replaying the companion WAL.
fn open_existing(snapshot: &Path) -> Result<Database, Box<dyn Error>> {
    let bytes = std::fs::read(snapshot)?;
    let (header, _) = verify_snapshot(&bytes)?;
    Ok(Database::open(
        Some(snapshot),
        header.dimension as usize,
        header.index_type,
    )?)
}

pub fn info(snapshot: &Path) -> CmdResult {
    let bytes = std::fs::read(snapshot)?;
    let db = Database::open_from_memory(&bytes)?;
    let (header, _) = verify_snapshot(&bytes)?;
    print_json(&json!({
        "path": snapshot.display().to_string(),
        "file_bytes": bytes.len(),
        "header": header_json(&header),
        "index_config": serde_json::to_value(db.index_config())?,
        "settings": serde_json::to_value(db.settings())?,
        "stats": serde_json::to_value(db.stats())?,
        "memory": serde_json::to_value(db.memory_breakdown())?,
    }))
}

fn payload(data: &VectorData) -> Value {
    match data {
        VectorData::Dense(v) => json!({ "dense": v }),
        VectorData::Sparse(entries) => json!({
            "sparse": entries.iter().map(|e| json!([e.index, e.value])).collect::<Vec<_>>()
        }),
    }
}

fn describe(op: &WalOp, full: bool) -> Value {
    let mut out = json!({ "op": op.name() });
    let detail = match op {
        WalOp::Insert { data, metadata, id } => {
            let mut d = json!({ "id": id, "metadata_keys": metadata.len() });
            if full {
                d["data"] = payload(data);
                d["metadata"] = Value::Object(metadata_to_json(metadata));
            }
            d
        }
        WalOp::InsertBatch { items } => json!({ "items": items.len() }),
        WalOp::Update { index, data } => {
            let mut d = json!({ "index": index });
            if full {
                d["data"] = payload(data);
            }
            d
        }
        WalOp::UpdateMetadata { index, metadata } => json!({
            "index": index,
            "metadata": Value::Object(metadata_to_json(metadata)),
        }),
        WalOp::Upsert { index, data, metadata } => {
            let mut d = json!({ "index": index, "with_metadata": metadata.is_some() });
            if full {
                d["data"] = payload(data);
            }
            d
        }
        WalOp::Delete { indices } => json!({ "indices": indices }),
        WalOp::Train { data } => json!({ "floats": data.len() }),
        WalOp::SetCosineNormalized { enabled } => json!({ "enabled": enabled }),
        WalOp::Compact => Value::Null,
    };
    if !detail.is_null() {
        out["detail"] = detail;
    }
    out
}

pub fn wal(path: &Path, limit: usize, full: bool) -> CmdResult {
    let (header, records, stats) = read_records(path)?;
    println!(
        "{}",
        json!({
            "wal": path.display().to_string(),
            "version": header.version,
            "dimension": header.dimension,
            "index_type": header.index_type.to_string(),
            "records": stats.records,
            "torn_tail": stats.truncated,
            "valid_bytes": stats.valid_bytes,
        })
    );
    let shown = if limit == 0 { records.len() } else { limit.min(records.len()) };
    for record in &records[..shown] {
        let mut line = describe(&record.op, full);
        line["seq"] = json!(record.seq);
        println!("{line}");
    }
    if shown < records.len() {
        println!("... {} more", records.len() - shown);
    }
    Ok(())
}

pub fn verify(snapshot: &Path) -> CmdResult {
    let bytes = std::fs::read(snapshot)?;
    let (header, _) = decode_snapshot(&bytes)?;
    tracing::info!(path = %snapshot.display(), slots = header.slot_count, "snapshot OK");

    let wal_path = wal_path_for(snapshot);
    let wal = if wal_path.exists() {
        let (wal_header, records, stats) = read_records(&wal_path)?;
        if wal_header.dimension != header.dimension || wal_header.index_type != header.index_type {
            return Err(Box::new(VectorDbError::Corrupted {
                what: "WAL",
                detail: format!(
                    "header ({}d, {}) does not match snapshot ({}d, {})",
                    wal_header.dimension, wal_header.index_type, header.dimension, header.index_type
                ),
            }));
        }
        let pending = records.iter().filter(|r| r.seq > header.last_seq).count();
        json!({
            "path": wal_path.display().to_string(),
            "records": stats.records,
            "pending": pending,
            "torn_tail": stats.truncated,
        })
    } else {
        Value::Null
    };
    print_json(&json!({
        "ok": true,
        "header": header_json(&header),
        "wal": wal,
    }))
}

pub fn export(snapshot: &Path, output: &Path) -> CmdResult {
    let db = open_existing(snapshot)?;
    let written = db.export_json(output)?;
    println!("exported {written} records to {}", output.display());
    Ok(())
}

pub fn import(snapshot: &Path, input: &Path, dim: Option<usize>, index: IndexType) -> CmdResult {
    let db = if snapshot.exists() {
        open_existing(snapshot)?
    } else {
        let dim = dim.ok_or("--dim is required when creating a new database")?;
        Database::open(Some(snapshot), dim, index)?
    };
    let imported = db.import_json(input)?;
    db.save(None)?;
    println!("imported {imported} records into {}", snapshot.display());
    Ok(())
}

pub fn compact(snapshot: &Path) -> CmdResult {
    let db = open_existing(snapshot)?;
    let before = db.count();
    let remap = db.compact()?;
    let live = remap.iter().flatten().count();
    println!(
        "compacted {}: {before} slots -> {live} live ({} reclaimed)",
        snapshot.display(),
        before - live
    );
    Ok(())
}
