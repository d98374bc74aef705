//! NDJSON export and import.
//!
//! One JSON object per line:
//! `{"index":0,"id":"a","vector":[0.1,0.2],"metadata":{"k":"v"}}`. Sparse records
//! carry `"sparse":{"indices":[..],"values":[..]}` instead of `"vector"`. Metadata
//! key order is preserved. Imports are parsed completely before anything is
//! inserted, then applied as one atomic batch.

use crate::error::{Result, VectorDbError};
use crate::storage::database::Database;
use crate::storage::wal::{BatchItem, VectorData};
use crate::vector::{Metadata, SparseVector};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseJson {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

/// One exported record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sparse: Option<SparseJson>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

pub fn metadata_to_json(metadata: &Metadata) -> Map<String, Value> {
    metadata
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect()
}

/// Strings are kept verbatim; other scalars use their JSON text.
pub fn metadata_from_json(map: &Map<String, Value>) -> Metadata {
    map.iter()
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect()
}

/// Writes every live record of `db`. Returns the number written.
pub fn write_ndjson<W: Write>(db: &Database, mut writer: W) -> Result<usize> {
    let state = db.state.read();
    let store = &state.store;
    let mut written = 0;
    for slot in store.live_slots() {
        let (vector, sparse) = if store.is_sparse() {
            let entries = store.sparse_entries(slot);
            let sparse = SparseJson {
                indices: entries.iter().map(|e| e.index).collect(),
                values: entries.iter().map(|e| e.value).collect(),
            };
            (None, Some(sparse))
        } else {
            (Some(store.vector(slot).to_vec()), None)
        };
        let record = JsonRecord {
            index: Some(slot as usize),
            id: state.point_ids.reverse_lookup(slot).map(str::to_string),
            vector,
            sparse,
            metadata: metadata_to_json(store.metadata(slot)),
        };
        serde_json::to_writer(&mut writer, &record)?;
        writer.write_all(b"\n")?;
        written += 1;
    }
    writer.flush()?;
    Ok(written)
}

/// Parses NDJSON into batch items for a database of `dimension`. Blank lines are skipped.
pub fn read_ndjson<R: BufRead>(reader: R, dimension: usize) -> Result<Vec<BatchItem>> {
    let mut items = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let at_line = |msg: String| VectorDbError::InvalidArgument(format!("line {}: {msg}", n + 1));
        let record: JsonRecord = serde_json::from_str(&line).map_err(|e| at_line(e.to_string()))?;
        let data = match (record.vector, record.sparse) {
            (Some(v), None) => VectorData::Dense(v),
            (None, Some(s)) => {
                let sv = SparseVector::new(dimension, &s.indices, &s.values)
                    .map_err(|e| at_line(e.to_string()))?;
                VectorData::Sparse(sv.into_entries())
            }
            _ => return Err(at_line("expected exactly one of \"vector\" or \"sparse\"".into())),
        };
        items.push(BatchItem {
            data,
            metadata: metadata_from_json(&record.metadata),
            id: record.id,
        });
    }
    Ok(items)
}

impl Database {
    /// Exports live records as NDJSON. Returns the number written.
    pub fn export_json(&self, path: &Path) -> Result<usize> {
        self.ensure_open()?;
        let file = File::create(path)?;
        let written = write_ndjson(self, BufWriter::new(file))?;
        tracing::info!(path = %path.display(), records = written, "exported NDJSON");
        Ok(written)
    }

    /// Imports NDJSON records atomically. Exported indices are not preserved;
    /// records are appended. Returns the number imported.
    pub fn import_json(&self, path: &Path) -> Result<usize> {
        self.ensure_writable()?;
        let file = File::open(path)?;
        let items = read_ndjson(BufReader::new(file), self.dimension())?;
        let imported = self.add_batch(items)?.len();
        tracing::info!(path = %path.display(), records = imported, "imported NDJSON");
        Ok(imported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexType;

    #[test]
    fn test_export_import() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.ndjson");

        let src = Database::open(None, 2, IndexType::Flat).unwrap();
        src.add_vector_with_metadata(&[1.0, 2.0], Metadata::from_pairs([("z", "1"), ("a", "2")]))
            .unwrap();
        src.add_vector_with_id(&[3.0, 4.0], Metadata::new(), Some("p")).unwrap();
        src.add_vector(&[5.0, 6.0]).unwrap();
        src.delete_vector(2).unwrap();
        assert_eq!(src.export_json(&path).unwrap(), 2);

        let text = std::fs::read_to_string(&path).unwrap();
        let first = text.lines().next().unwrap();
        assert!(first.find("\"z\"").unwrap() < first.find("\"a\"").unwrap());

        let dst = Database::open(None, 2, IndexType::KdTree).unwrap();
        assert_eq!(dst.import_json(&path).unwrap(), 2);
        assert_eq!(dst.get_by_id("p").unwrap().0, 1);
        let rec = dst.get_vector(0).unwrap();
        assert_eq!(rec.metadata().get("a"), Some("2"));
    }

    #[test]
    fn test_import_is_atomic() {
        let input = "{\"vector\":[1.0,2.0]}\n\n{\"vector\":[1.0]}\n";
        let items = read_ndjson(input.as_bytes(), 2).unwrap();
        assert_eq!(items.len(), 2);
        let db = Database::open(None, 2, IndexType::Flat).unwrap();
        assert!(db.add_batch(items).is_err());
        assert_eq!(db.count(), 0);
    }

    #[test]
    fn test_read_errors_name_the_line() {
        let err = read_ndjson("{\"vector\":[1.0]}\nnot json\n".as_bytes(), 1).unwrap_err();
        assert!(err.to_string().contains("line 2"));
        let err = read_ndjson("{\"metadata\":{}}\n".as_bytes(), 1).unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_non_string_metadata_and_sparse() {
        let input = r#"{"sparse":{"indices":[4,1],"values":[2.0,1.0]},"metadata":{"n":5,"ok":true}}"#;
        let items = read_ndjson(input.as_bytes(), 8).unwrap();
        assert_eq!(items[0].metadata.get("n"), Some("5"));
        assert_eq!(items[0].metadata.get("ok"), Some("true"));
        match &items[0].data {
            VectorData::Sparse(e) => assert_eq!(e[0].index, 1),
            other => panic!("expected sparse, got {other:?}"),
        }
    }
}
