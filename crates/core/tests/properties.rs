use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;
use vectordb_core::{
    Database, DistanceMetric, ErrorKind, IndexType, Metadata, Record, VectorDbError,
};

fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect()
}

fn live_contents(db: &Database) -> Vec<(Vec<f32>, Metadata)> {
    db.scroll(0, usize::MAX)
        .unwrap()
        .into_iter()
        .map(|(_, rec)| (rec.data().unwrap().to_vec(), rec.metadata().clone()))
        .collect()
}

fn hit_indices(db: &Database, query: &[f32], k: usize) -> Vec<usize> {
    db.search(query, k, DistanceMetric::Euclidean)
        .unwrap()
        .into_iter()
        .map(|r| r.index)
        .collect()
}

fn snapshot_path(dir: &TempDir) -> std::path::PathBuf {
    dir.path().join("db.vdb")
}

// ── dimension invariant ──────────────────────────────────────────────

#[test]
fn test_mismatched_dimension_never_mutates() {
    for index_type in [IndexType::KdTree, IndexType::Hnsw, IndexType::Flat, IndexType::Lsh] {
        let db = Database::open(None, 4, index_type).unwrap();
        db.add_vector(&[1.0, 2.0, 3.0, 4.0]).unwrap();

        let err = db.add_vector(&[1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(err, VectorDbError::DimensionMismatch { expected: 4, got: 3 }));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(db.update_vector(0, &[0.0; 5]).is_err());
        assert!(db.search(&[0.0; 2], 1, DistanceMetric::Euclidean).is_err());

        assert_eq!(db.count(), 1);
        assert_eq!(db.get_vector(0).unwrap().data(), Some(&[1.0, 2.0, 3.0, 4.0][..]));
    }
}

// ── WAL replay ───────────────────────────────────────────────────────

fn apply_workload(db: &Database) {
    for (i, v) in random_vectors(30, 4, 7).iter().enumerate() {
        db.add_vector_with_metadata(v, Metadata::from_pairs([("i", i.to_string())]))
            .unwrap();
    }
    db.delete_vectors(&[2, 4, 6]).unwrap();
    db.update_vector(0, &[9.0, 9.0, 9.0, 9.0]).unwrap();
    db.update_metadata(1, Metadata::from_pairs([("tag", "x")])).unwrap();
    db.upsert(3, &[0.5, 0.5, 0.5, 0.5], None).unwrap();
    db.add_vector_with_id(&[0.1, 0.2, 0.3, 0.4], Metadata::new(), Some("named"))
        .unwrap();
}

#[test]
fn test_wal_replay_restores_live_set() {
    let dir = TempDir::new().unwrap();
    let path = snapshot_path(&dir);

    let before = {
        let db = Database::open(Some(&path), 4, IndexType::Hnsw).unwrap();
        apply_workload(&db);
        live_contents(&db)
    };
    assert!(!path.exists(), "nothing was saved");

    let db = Database::open(Some(&path), 4, IndexType::Hnsw).unwrap();
    assert_eq!(live_contents(&db), before);
    assert_eq!(db.get_by_id("named").unwrap().0, 30);
}

#[test]
fn test_replay_after_snapshot_applies_only_newer_records() {
    let dir = TempDir::new().unwrap();
    let path = snapshot_path(&dir);

    let before = {
        let db = Database::open(Some(&path), 4, IndexType::KdTree).unwrap();
        apply_workload(&db);
        db.save(None).unwrap();
        db.add_vector(&[7.0, 7.0, 7.0, 7.0]).unwrap();
        db.delete_vector(5).unwrap();
        live_contents(&db)
    };

    let db = Database::open(Some(&path), 4, IndexType::KdTree).unwrap();
    assert_eq!(live_contents(&db), before);
    assert_eq!(hit_indices(&db, &[7.0, 7.0, 7.0, 7.0], 1), vec![31]);
}

#[test]
fn test_replay_rebuilds_trained_index() {
    let dir = TempDir::new().unwrap();
    let path = snapshot_path(&dir);
    let training: Vec<f32> = random_vectors(200, 8, 1).concat();

    {
        let db = Database::open(Some(&path), 8, IndexType::IvfFlat).unwrap();
        db.train(&training, 8).unwrap();
        for v in random_vectors(20, 8, 2) {
            db.add_vector(&v).unwrap();
        }
    }

    let db = Database::open(Some(&path), 8, IndexType::IvfFlat).unwrap();
    assert!(db.is_trained());
    assert_eq!(db.count(), 20);
    db.add_vector(&[0.0; 8]).unwrap();
}

// ── save / reopen ────────────────────────────────────────────────────

fn assert_round_trip(index_type: IndexType, dir: &Path) {
    let path = dir.join(format!("{index_type}.vdb"));
    let probes = random_vectors(10, 8, 99);
    let data = random_vectors(300, 8, 3);

    let expected = {
        let db = Database::open(Some(&path), 8, index_type).unwrap();
        if index_type.requires_training() {
            db.train(&data.concat(), 8).unwrap();
        }
        for v in &data {
            db.add_vector(v).unwrap();
        }
        db.set_exact_search_threshold(0);
        db.save(None).unwrap();
        probes.iter().map(|q| hit_indices(&db, q, 5)).collect::<Vec<_>>()
    };

    let db = Database::open(Some(&path), 8, index_type).unwrap();
    assert_eq!(db.count(), 300);
    assert_eq!(db.dimension(), 8);
    assert_eq!(db.settings().exact_search_threshold, 0);
    let got: Vec<_> = probes.iter().map(|q| hit_indices(&db, q, 5)).collect();
    assert_eq!(got, expected, "{index_type} results changed across save/reopen");
}

#[test]
fn test_save_reopen_round_trip() {
    let dir = TempDir::new().unwrap();
    for index_type in [
        IndexType::KdTree,
        IndexType::Hnsw,
        IndexType::Flat,
        IndexType::IvfFlat,
        IndexType::Lsh,
    ] {
        assert_round_trip(index_type, dir.path());
    }
}

#[test]
fn test_save_truncates_wal_and_mmap_reads_snapshot() {
    let dir = TempDir::new().unwrap();
    let path = snapshot_path(&dir);
    let db = Database::open(Some(&path), 4, IndexType::Flat).unwrap();
    apply_workload(&db);
    let wal_path = db.wal_path().unwrap().to_path_buf();
    let wal_before = std::fs::metadata(&wal_path).unwrap().len();

    db.save(None).unwrap();
    db.save(None).unwrap();
    assert!(std::fs::metadata(&wal_path).unwrap().len() < wal_before);

    let mapped = Database::open_mmap(&path, 4, IndexType::Flat).unwrap();
    assert!(mapped.is_read_only());
    assert_eq!(live_contents(&mapped), live_contents(&db));
    assert!(matches!(mapped.add_vector(&[0.0; 4]), Err(VectorDbError::ReadOnly)));

    let bytes = std::fs::read(&path).unwrap();
    let in_memory = Database::open_from_memory(&bytes).unwrap();
    assert_eq!(in_memory.count(), db.count());
}

#[test]
fn test_corrupted_snapshot_fails_loudly() {
    let dir = TempDir::new().unwrap();
    let path = snapshot_path(&dir);
    {
        let db = Database::open(Some(&path), 4, IndexType::KdTree).unwrap();
        apply_workload(&db);
        db.save(None).unwrap();
    }
    let mut bytes = std::fs::read(&path).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    let err = Database::open(Some(&path), 4, IndexType::KdTree).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Corrupted);
}

#[test]
fn test_damaged_wal_frame_mid_file_fails_loudly() {
    let dir = TempDir::new().unwrap();
    let path = snapshot_path(&dir);
    let wal_path = {
        let db = Database::open(Some(&path), 4, IndexType::Flat).unwrap();
        for v in random_vectors(3, 4, 21) {
            db.add_vector(&v).unwrap();
        }
        db.wal_path().unwrap().to_path_buf()
    };
    let mut bytes = std::fs::read(&wal_path).unwrap();
    let first_len = u32::from_be_bytes(bytes[16..20].try_into().unwrap()) as usize;
    let second = 16 + 8 + first_len;
    bytes[second] ^= 0x01;
    std::fs::write(&wal_path, &bytes).unwrap();

    let err = Database::open(Some(&path), 4, IndexType::Flat).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Corrupted);
    assert_eq!(std::fs::read(&wal_path).unwrap(), bytes);
}

// ── compaction ───────────────────────────────────────────────────────

#[test]
fn test_compaction_preserves_live_content() {
    let dir = TempDir::new().unwrap();
    let path = snapshot_path(&dir);
    let db = Database::open(Some(&path), 4, IndexType::Hnsw).unwrap();
    apply_workload(&db);
    db.delete_vectors(&[10, 11, 12]).unwrap();

    let before = live_contents(&db);
    assert!(db.stats().deleted > 0);
    let remap = db.compact().unwrap();
    assert_eq!(db.stats().deleted, 0);
    assert_eq!(live_contents(&db), before);
    assert_eq!(remap.iter().flatten().count(), before.len());

    let id_slot = db.get_by_id("named").unwrap().0;
    assert_eq!(Some(id_slot), remap[30]);
    drop(db);

    // The compaction is checkpointed, so reopening sees the renumbered slots.
    let db = Database::open(Some(&path), 4, IndexType::Hnsw).unwrap();
    assert_eq!(live_contents(&db), before);
    assert_eq!(db.get_by_id("named").unwrap().0, id_slot);
}

#[test]
fn test_failed_compaction_leaves_pre_compaction_state() {
    let dir = TempDir::new().unwrap();
    let path = snapshot_path(&dir);
    {
        let db = Database::open(Some(&path), 4, IndexType::KdTree).unwrap();
        apply_workload(&db);
        db.delete_vectors(&[1, 2]).unwrap();
        db.save(None).unwrap();
    }
    let ro = Database::open_mmap(&path, 4, IndexType::KdTree).unwrap();
    let before = live_contents(&ro);
    let (count, deleted) = (ro.count(), ro.stats().deleted);
    assert!(ro.compact().is_err());
    assert_eq!(live_contents(&ro), before);
    assert_eq!(ro.count(), count);
    assert_eq!(ro.stats().deleted, deleted);
}

#[test]
fn test_compaction_survives_failed_checkpoint() {
    let dir = TempDir::new().unwrap();
    let path = snapshot_path(&dir);
    let db = Database::open(Some(&path), 4, IndexType::Hnsw).unwrap();
    apply_workload(&db);
    db.delete_vectors(&[0, 5]).unwrap();
    let before = live_contents(&db);
    std::fs::create_dir(dir.path().join("db.vdb.tmp")).unwrap();

    let remap = db.compact().unwrap();
    assert_eq!(remap[0], None);
    assert_eq!(remap[1], Some(0));
    assert_eq!(live_contents(&db), before);
    drop(db);

    std::fs::remove_dir(dir.path().join("db.vdb.tmp")).unwrap();
    let db = Database::open(Some(&path), 4, IndexType::Hnsw).unwrap();
    assert_eq!(live_contents(&db), before);
    assert_eq!(db.stats().deleted, 0);
}

// ── training ─────────────────────────────────────────────────────────

#[test]
fn test_train_before_insert() {
    for index_type in [IndexType::IvfPq, IndexType::IvfFlat, IndexType::Pq] {
        let db = Database::open(None, 8, index_type).unwrap();
        let err = db.add_vector(&[0.0; 8]).unwrap_err();
        assert!(matches!(err, VectorDbError::NotTrained(t) if t == index_type));
        assert_eq!(err.kind(), ErrorKind::IndexState);
        assert_eq!(db.count(), 0);

        assert!(db.train(&random_vectors(300, 4, 5).concat(), 4).is_err());
        db.train(&random_vectors(300, 8, 5).concat(), 8).unwrap();
        db.add_vector(&[0.0; 8]).unwrap();
        assert_eq!(db.count(), 1);
    }
}

// ── k-NN monotonicity ────────────────────────────────────────────────

#[test]
fn test_exact_knn_is_prefix_monotone() {
    for index_type in [IndexType::KdTree, IndexType::Flat] {
        let db = Database::open(None, 6, index_type).unwrap();
        for v in random_vectors(250, 6, 11) {
            db.add_vector(&v).unwrap();
        }
        db.set_exact_search_threshold(0);
        for q in random_vectors(5, 6, 12) {
            let mut previous: Vec<usize> = Vec::new();
            for k in 1..=25 {
                let hits = hit_indices(&db, &q, k);
                assert_eq!(hits.len(), k);
                assert_eq!(&hits[..previous.len()], &previous[..], "{index_type} k={k}");
                previous = hits;
            }
        }
    }
}

// ── filter nesting ───────────────────────────────────────────────────

#[test]
fn test_filter_nesting_limit() {
    let db = Database::open(None, 2, IndexType::Flat).unwrap();
    db.add_vector_with_metadata(&[0.0, 0.0], Metadata::from_pairs([("a", "1")]))
        .unwrap();
    let depth = vectordb_core::config::MAX_FILTER_DEPTH;
    let nested = |n: usize| format!("{}a == \"1\"", "NOT ".repeat(n));

    // an even number of negations leaves the predicate as it was
    assert_eq!(db.count_by_filter(&nested(depth)).unwrap(), 1);
    let hits = db
        .search_with_filter_expr(&[0.0, 0.0], 1, DistanceMetric::Euclidean, &nested(depth))
        .unwrap();
    assert_eq!(hits.len(), 1);

    for n in [depth + 1, 100_000] {
        let err = db.count_by_filter(&nested(n)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(db
            .search_with_filter_expr(&[0.0, 0.0], 1, DistanceMetric::Euclidean, &nested(n))
            .is_err());
    }
}

// ── concurrency ──────────────────────────────────────────────────────

#[test]
fn test_readers_never_observe_torn_records() {
    let db = Arc::new(Database::open(None, 4, IndexType::Flat).unwrap());
    for i in 0..16 {
        let x = i as f32;
        db.add_vector_with_metadata(&[x; 4], Metadata::from_pairs([("x", x.to_string())]))
            .unwrap();
    }

    let writer = {
        let db = Arc::clone(&db);
        thread::spawn(move || {
            for round in 0..400 {
                let slot = round % 16;
                let x = (round + 100) as f32;
                db.upsert(slot, &[x; 4], Some(Metadata::from_pairs([("x", x.to_string())])))
                    .unwrap();
            }
        })
    };

    let check = |rec: &Record| {
        let data = rec.data().unwrap();
        assert!(data.iter().all(|&v| v == data[0]), "torn vector {data:?}");
        assert_eq!(rec.metadata().get("x"), Some(data[0].to_string().as_str()));
    };
    let readers: Vec<_> = (0..4)
        .map(|r| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                for i in 0..300 {
                    let rec = db.get_vector((i + r) % 16).unwrap();
                    check(&rec);
                    for hit in db.search(&[50.0; 4], 3, DistanceMetric::Euclidean).unwrap() {
                        check(&hit.record);
                    }
                    let _ = db.stats();
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for r in readers {
        r.join().unwrap();
    }
    assert_eq!(db.count(), 16);
}
