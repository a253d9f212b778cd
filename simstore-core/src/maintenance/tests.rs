use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use super::*;
use crate::core::config::StoreConfig;
use crate::core::errors::{ErrorCode, SimStoreError};
use crate::core::types::{CutoffTable, SimilarityTriple};
use crate::storage::BucketPair;

const PAIRS: [(u32, u32, f32); 9] = [
    (1, 2, 1.0),
    (1, 3, 0.95),
    (3, 9, 0.93),
    (1, 4, 0.9),
    (2, 5, 0.8),
    (2, 6, 0.72),
    (2, 9, 0.7),
    (3, 8, 0.5),
    (3, 9, 0.4),
];

fn open_store(root: &Path, backend: Backend) -> SimilarityStore {
    let mut config = StoreConfig::with_root(root);
    config.backend = backend;
    config.stream_buffer_bytes = 32;
    config.pair_buffer_len = 3;
    config.maintenance_workers = 2;
    SimilarityStore::open(config).unwrap()
}

fn populate(store: &SimilarityStore, corpus_id: u64) {
    let mut writer = store.writer(corpus_id).unwrap();
    for (low, high, sim) in PAIRS {
        writer.write(low, high, sim).unwrap();
    }
    writer.close().unwrap();
}

fn triples(store: &SimilarityStore, corpus_id: u64) -> Vec<SimilarityTriple> {
    store
        .reader(corpus_id)
        .unwrap()
        .collect::<crate::core::errors::Result<Vec<_>>>()
        .unwrap()
}

fn bucket_pairs(store: &SimilarityStore, corpus_id: u64) -> Vec<BucketPair> {
    store
        .reader(corpus_id)
        .unwrap()
        .pairs()
        .collect::<crate::core::errors::Result<Vec<_>>>()
        .unwrap()
}

#[test]
fn test_remove_document_drops_every_reference() {
    for backend in [Backend::Continuous, Backend::Chunked] {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path(), backend);
        populate(&store, 1);
        let before = triples(&store, 1);

        let stats = remove_documents(&store, 1, &[9]).unwrap();
        assert_eq!(stats.pairs_read, 8);
        assert_eq!(stats.pairs_dropped, 2);
        assert_eq!(stats.pairs_written, 6);

        let after = triples(&store, 1);
        assert!(after.iter().all(|t| t.low != 9 && t.high != 9));
        let expected: Vec<_> = before
            .into_iter()
            .filter(|t| t.low != 9 && t.high != 9)
            .collect();
        assert_eq!(after, expected);
        assert_eq!(store.detect_backend(1).unwrap(), Some(backend));
        assert!(!rewrite::rewrite_dir(&store, 1).exists());
        assert!(!rewrite::backup_dir(&store, 1).exists());
    }
}

#[test]
fn test_remove_from_missing_corpus_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), Backend::Chunked);
    assert_eq!(remove_documents(&store, 77, &[1]).unwrap(), RewriteStats::default());
    assert!(!store.exists(77));
}

#[test]
fn test_convert_round_trip_preserves_buckets() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), Backend::Continuous);
    populate(&store, 2);
    let original = bucket_pairs(&store, 2);

    convert(&store, 2, Backend::Continuous, Backend::Chunked).unwrap();
    assert_eq!(store.detect_backend(2).unwrap(), Some(Backend::Chunked));
    assert_eq!(bucket_pairs(&store, 2), original);

    convert(&store, 2, Backend::Chunked, Backend::Continuous).unwrap();
    assert_eq!(store.detect_backend(2).unwrap(), Some(Backend::Continuous));
    assert_eq!(bucket_pairs(&store, 2), original);
}

#[test]
fn test_convert_keeps_membership_with_tight_cutoffs() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = StoreConfig::with_root(dir.path());
    config.cutoffs = CutoffTable::new(vec![0.92, 0.9]).unwrap();
    config.backend = Backend::Chunked;
    let store = SimilarityStore::open(config).unwrap();

    let mut writer = store.writer(3).unwrap();
    writer.write(1, 2, 0.91).unwrap();
    writer.write(3, 4, 0.99).unwrap();
    writer.close().unwrap();
    let original = bucket_pairs(&store, 3);

    convert(&store, 3, Backend::Chunked, Backend::Continuous).unwrap();
    assert_eq!(bucket_pairs(&store, 3), original);
}

#[test]
fn test_convert_rejects_wrong_source_backend() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), Backend::Chunked);
    populate(&store, 4);

    let err = convert(&store, 4, Backend::Continuous, Backend::Chunked).unwrap_err();
    assert_eq!(err.code(), ErrorCode::BackendMismatch);
    let err = convert(&store, 5, Backend::Chunked, Backend::Continuous).unwrap_err();
    assert_eq!(err.code(), ErrorCode::DatasetNotFound);
}

#[test]
fn test_failed_rewrite_leaves_original_intact() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), Backend::Continuous);
    populate(&store, 6);

    // a 7 byte record in the 0.5 bucket fails the copy late
    let path = store.corpus_dir(6).join("bucket_050.zlib");
    let mut stream =
        crate::compression::open_writer(Backend::Continuous, &path, 64, crate::compression::OpenMode::Create)
            .unwrap();
    stream.write(&[0; 7]).unwrap();
    stream.close().unwrap();
    let bytes_before = fs::read(&path).unwrap();

    let err = remove_documents(&store, 6, &[9]).unwrap_err();
    assert_eq!(err.code(), ErrorCode::CorruptedData);
    assert_eq!(fs::read(&path).unwrap(), bytes_before);
    assert!(!rewrite::rewrite_dir(&store, 6).exists());
    assert!(!store.corpus_dir(6).join(crate::storage::LOCK_FILE).exists());
}

#[test]
fn test_rewrite_waits_for_no_writer() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), Backend::Chunked);
    populate(&store, 7);
    let mut writer = store.append_writer(7).unwrap();

    let err = remove_documents(&store, 7, &[1]).unwrap_err();
    assert_eq!(err.code(), ErrorCode::WriterBusy);
    writer.close().unwrap();
    assert_eq!(triples(&store, 7).len(), 8);
}

#[test]
fn test_recover_restores_interrupted_swap() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), Backend::Chunked);
    populate(&store, 8);
    let expected = triples(&store, 8);

    // crash after moving live aside, before the rewrite moved in
    fs::rename(store.corpus_dir(8), rewrite::backup_dir(&store, 8)).unwrap();
    fs::create_dir_all(rewrite::rewrite_dir(&store, 8)).unwrap();

    let report = recover(&store, 8).unwrap();
    assert!(report.restored_backup);
    assert!(report.discarded_partial);
    assert_eq!(triples(&store, 8), expected);

    // crash after the swap, before the backup was deleted
    fs::create_dir_all(rewrite::backup_dir(&store, 8)).unwrap();
    let report = recover(&store, 8).unwrap();
    assert!(report.discarded_backup);
    assert!(!report.restored_backup);
    assert!(recover(&store, 8).unwrap().is_clean());
}

#[test]
fn test_batch_convert_isolates_failures() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), Backend::Continuous);
    populate(&store, 1);
    populate(&store, 3);

    let outcomes = batch_convert(&store, &[1, 2, 3], Backend::Continuous, Backend::Chunked).unwrap();
    let ids: Vec<u64> = outcomes.iter().map(|o| o.corpus_id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert!(outcomes[0].is_ok());
    assert_eq!(
        outcomes[1].result.as_ref().unwrap_err().code(),
        ErrorCode::DatasetNotFound
    );
    assert!(outcomes[2].is_ok());
    assert_eq!(store.detect_backend(3).unwrap(), Some(Backend::Chunked));
}

#[test]
fn test_batch_catches_worker_panics() {
    let outcomes = run_batch(2, &[10, 11, 12], |id| {
        if id == 11 {
            panic!("boom in corpus {}", id);
        }
        Ok(RewriteStats::default())
    })
    .unwrap();

    assert!(outcomes[0].is_ok());
    assert!(outcomes[2].is_ok());
    match &outcomes[1].result {
        Err(SimStoreError::WorkerPanicked { corpus_id, message }) => {
            assert_eq!(*corpus_id, 11);
            assert!(message.contains("boom"));
        }
        other => panic!("expected a panic outcome, got {:?}", other),
    }
}

#[test]
fn test_batch_remove() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), Backend::Chunked);
    populate(&store, 1);
    populate(&store, 2);
    let outcomes = batch_remove(&store, &[1, 2], &[2]).unwrap();
    assert!(outcomes.iter().all(|o| o.is_ok()));
    for id in [1, 2] {
        assert!(triples(&store, id).iter().all(|t| t.low != 2 && t.high != 2));
    }
}

#[test]
fn test_archive_round_trip() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    let source = open_store(src.path(), Backend::Continuous);
    populate(&source, 1);
    let chunked = open_store(src.path(), Backend::Chunked);
    populate(&chunked, 2);

    let mut blobs = BTreeMap::new();
    blobs.insert("documents.sql".to_string(), b"INSERT INTO documents VALUES (1);".to_vec());
    blobs.insert("empty".to_string(), vec![]);

    let archive = src.path().join("corpora.simarc");
    let manifest = StoreMaintenance::new(source.clone())
        .archive(&[1, 2], &blobs, &archive)
        .unwrap();
    assert_eq!(manifest.corpora.len(), 2);
    assert_eq!(manifest.backend, Backend::Chunked);
    // live dataset keeps its backend, staging is gone
    assert_eq!(source.detect_backend(1).unwrap(), Some(Backend::Continuous));
    assert!(!src.path().join("1.archive").exists());

    let target = open_store(dst.path(), Backend::Continuous);
    let restored = StoreMaintenance::new(target.clone()).restore(&archive).unwrap();
    assert_eq!(restored.blobs, blobs);
    for id in [1, 2] {
        assert_eq!(target.detect_backend(id).unwrap(), Some(Backend::Chunked));
        assert_eq!(bucket_pairs(&target, id), bucket_pairs(&source, id));
    }

    // restoring again replaces the datasets in place
    StoreMaintenance::new(target.clone()).restore(&archive).unwrap();
    assert_eq!(bucket_pairs(&target, 1), bucket_pairs(&source, 1));
}

#[test]
fn test_restore_rejects_foreign_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), Backend::Chunked);
    let path = dir.path().join("bogus.simarc");
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    std::io::Write::write_all(&mut encoder, b"NOTANARCHIVE").unwrap();
    fs::write(&path, encoder.finish().unwrap()).unwrap();

    let err = restore_archive(&path, &store).unwrap_err();
    assert_eq!(err.code(), ErrorCode::CorruptedData);
}

#[test]
fn test_maintenance_remove_all() {
    let dir = tempfile::tempdir().unwrap();
    let maintenance = StoreMaintenance::new(open_store(dir.path(), Backend::Chunked));
    populate(maintenance.store(), 9);
    assert!(maintenance.exists(9));
    maintenance.remove_all(9).unwrap();
    assert!(!maintenance.exists(9));
    assert!(maintenance.store().reader(9).unwrap().next().is_none());
}

// pid above the kernel's pid_max ceiling, so never a live process
#[cfg(target_os = "linux")]
const EXITED_PID: u32 = 99_999_999;

#[cfg(target_os = "linux")]
#[test]
fn test_recover_clears_lock_of_exited_writer() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), Backend::Chunked);
    populate(&store, 10);
    let lock = store.corpus_dir(10).join(crate::storage::LOCK_FILE);
    fs::write(&lock, format!("{}\n", EXITED_PID)).unwrap();

    let err = store.append_writer(10).err().unwrap();
    assert_eq!(err.code(), ErrorCode::WriterBusy);

    let report = recover(&store, 10).unwrap();
    assert!(report.removed_stale_lock);
    assert!(!report.is_clean());
    assert!(!lock.exists());

    store.append_writer(10).unwrap().close().unwrap();
    assert_eq!(remove_documents(&store, 10, &[9]).unwrap().pairs_dropped, 2);
}

#[cfg(target_os = "linux")]
#[test]
fn test_rewrite_recovers_from_exited_writer() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), Backend::Continuous);
    populate(&store, 11);
    fs::write(store.corpus_dir(11).join(crate::storage::LOCK_FILE), EXITED_PID.to_string()).unwrap();

    let stats = convert(&store, 11, Backend::Continuous, Backend::Chunked).unwrap();
    assert_eq!(stats.pairs_written, 8);
    assert_eq!(store.detect_backend(11).unwrap(), Some(Backend::Chunked));
}

#[test]
fn test_live_lock_survives_recover_until_broken() {
    let dir = tempfile::tempdir().unwrap();
    let maintenance = StoreMaintenance::new(open_store(dir.path(), Backend::Chunked));
    populate(maintenance.store(), 12);
    let lock = maintenance.store().corpus_dir(12).join(crate::storage::LOCK_FILE);

    // held by this process
    fs::write(&lock, std::process::id().to_string()).unwrap();
    assert!(maintenance.recover(12).unwrap().is_clean());
    assert!(lock.exists());
    // no pid to check
    fs::write(&lock, "").unwrap();
    assert!(maintenance.recover(12).unwrap().is_clean());
    assert_eq!(maintenance.remove(12, &[1]).unwrap_err().code(), ErrorCode::WriterBusy);

    assert!(maintenance.break_lock(12).unwrap());
    assert!(!maintenance.break_lock(12).unwrap());
    assert_eq!(maintenance.remove(12, &[1]).unwrap().pairs_dropped, 3);
}

#[test]
fn test_blob_names_must_be_plain_file_names() {
    for name in ["notes.txt", "documents.sql", ".hidden"] {
        assert!(is_safe_blob_name(name), "{}", name);
    }
    for name in ["", ".", "..", "../escaped.txt", "../../etc/passwd", "/tmp/abs", "a/b", "a\\b"] {
        assert!(!is_safe_blob_name(name), "{}", name);
    }

    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), Backend::Chunked);
    populate(&store, 1);
    let mut blobs = BTreeMap::new();
    blobs.insert("../../escaped.txt".to_string(), b"x".to_vec());
    let path = dir.path().join("bad.simarc");
    let err = create_archive(&store, &[1], &blobs, &path).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidConfiguration);
    assert!(!path.exists());
}

fn handmade_archive(path: &Path, manifest_len: u32, manifest: &[u8]) {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    std::io::Write::write_all(&mut encoder, b"SIMARC01").unwrap();
    std::io::Write::write_all(&mut encoder, &manifest_len.to_le_bytes()).unwrap();
    std::io::Write::write_all(&mut encoder, manifest).unwrap();
    fs::write(path, encoder.finish().unwrap()).unwrap();
}

#[test]
fn test_restore_rejects_escaping_blob_name() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir.path().join("store"), Backend::Chunked);
    let manifest = ArchiveManifest {
        format_version: archive::ARCHIVE_FORMAT_VERSION,
        created_secs: 0,
        backend: Backend::Chunked,
        corpora: vec![],
        blobs: vec!["../escaped.txt".to_string()],
    };
    let json = serde_json::to_vec(&manifest).unwrap();
    let path = dir.path().join("hostile.simarc");
    handmade_archive(&path, json.len() as u32, &json);

    let err = restore_archive(&path, &store).unwrap_err();
    assert_eq!(err.code(), ErrorCode::CorruptedData);
    assert!(!dir.path().join("escaped.txt").exists());
}

#[test]
fn test_restore_rejects_oversized_manifest_length() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), Backend::Chunked);
    let path = dir.path().join("huge.simarc");
    handmade_archive(&path, u32::MAX, b"{}");

    let err = restore_archive(&path, &store).unwrap_err();
    assert_eq!(err.code(), ErrorCode::CorruptedData);
}
