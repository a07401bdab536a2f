#![allow(missing_docs)]

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use phrase_index::admin::{verify, AdminOpenOptions, VerifyLevel};
use phrase_index::{CorpusEntry, IndexOptions, PhraseIndex, Result, Side, UpdateBatch};
use tempfile::tempdir;

fn options() -> IndexOptions {
    IndexOptions::new(3).gc_enabled(false)
}

fn ingest_two(index: &PhraseIndex) -> Result<()> {
    let mut batch = UpdateBatch::new(&index.streams());
    batch.add(0, 0, CorpusEntry::new(1, vec![4, 5, 6], vec![7, 8], vec![(0, 0), (1, 1)]));
    batch.add(1, 10, CorpusEntry::new(2, vec![4, 5], vec![8], vec![(1, 0)]));
    index.put_batch(&batch)?;
    Ok(())
}

fn append_garbage(path: &Path, bytes: &[u8]) {
    let mut file = OpenOptions::new().append(true).open(path).expect("open for append");
    file.write_all(bytes).expect("append garbage");
}

#[test]
fn committed_batches_survive_drop_without_close() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    {
        let index = PhraseIndex::open(dir.path(), options())?;
        ingest_two(&index)?;
        // Dropped without close: nothing beyond the committed log is relied on.
    }
    let index = PhraseIndex::open(dir.path(), options())?;
    assert_eq!(index.count_occurrences(Side::Source, &[4, 5])?, 2);
    assert_eq!(index.count_occurrences(Side::Target, &[8])?, 2);
    assert_eq!(index.streams().get(0), Some(0));
    assert_eq!(index.streams().get(1), Some(10));
    let samples = index.get_random_samples(&[4, 5, 6], 0, None, false)?;
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].target, vec![7, 8]);
    index.close()
}

#[test]
fn torn_log_tail_is_discarded() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    {
        let index = PhraseIndex::open(dir.path(), options())?;
        ingest_two(&index)?;
        index.close()?;
    }
    append_garbage(&dir.path().join("index").join("index.log"), &[0xAB; 23]);

    let index = PhraseIndex::open(dir.path(), options())?;
    assert_eq!(index.count_occurrences(Side::Source, &[4])?, 2);
    let mut batch = UpdateBatch::new(&index.streams());
    batch.add(0, 1, CorpusEntry::new(1, vec![4], vec![], vec![]));
    index.put_batch(&batch)?;
    index.close()?;

    let index = PhraseIndex::open(dir.path(), options())?;
    assert_eq!(index.count_occurrences(Side::Source, &[4])?, 3);
    index.close()
}

#[test]
fn storage_bytes_past_manifest_are_cut_and_orphans_removed() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    {
        let index = PhraseIndex::open(dir.path(), options())?;
        ingest_two(&index)?;
        index.close()?;
    }
    let storage = dir.path().join("storage");
    let first_segment = fs::read_dir(&storage)
        .expect("storage dir")
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| p.extension().is_some_and(|ext| ext == "dat"))
        .expect("a segment file");
    append_garbage(&first_segment, b"uncommitted tail");
    fs::write(storage.join("segment-77.dat"), b"orphan").expect("write orphan");

    let admin = AdminOpenOptions {
        prefix_length: 3,
        ..AdminOpenOptions::default()
    };
    let report = verify(dir.path(), &admin, VerifyLevel::Full).expect("verify");
    assert!(report.success, "findings: {:?}", report.findings);
    assert_eq!(report.counts.records, 2);
    assert!(!storage.join("segment-77.dat").exists());
    Ok(())
}

#[test]
fn snapshot_after_compaction_reloads() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    {
        let index = PhraseIndex::open(dir.path(), options())?;
        ingest_two(&index)?;
        index.force_compaction()?;
        let stats = index.stats();
        assert!(stats.log_bytes <= 16);
        index.close()?;
    }
    let index = PhraseIndex::open(dir.path(), options())?;
    assert_eq!(index.count_occurrences(Side::Source, &[4, 5])?, 2);
    assert_eq!(index.count_occurrences(Side::Source, &[4, 5, 6])?, 1);
    assert_eq!(index.streams().get(1), Some(10));
    index.close()
}

#[test]
fn prefix_length_mismatch_fails_open() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    {
        let index = PhraseIndex::open(dir.path(), options())?;
        ingest_two(&index)?;
        index.close()?;
    }
    let err = PhraseIndex::open(dir.path(), IndexOptions::new(4).gc_enabled(false)).unwrap_err();
    assert!(matches!(err, phrase_index::PhraseError::InvalidArgument(_)));
    Ok(())
}

#[test]
fn log_threshold_compacts_after_commit() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let small_log = || options().log_compaction_bytes(256);
    {
        let index = PhraseIndex::open(dir.path(), small_log())?;
        for position in 0..12 {
            let mut batch = UpdateBatch::new(&index.streams());
            batch.add(0, position, CorpusEntry::new(1, vec![4, 5, 6], vec![7], vec![(0, 0)]));
            index.put_batch(&batch)?;
            // The snapshot is taken after the committing batch, so the log
            // never holds more than one batch past the threshold.
            assert!(index.stats().log_bytes < 256 + 512);
        }
        index.close()?;
    }
    let index = PhraseIndex::open(dir.path(), small_log())?;
    assert_eq!(index.count_occurrences(Side::Source, &[4, 5, 6])?, 12);
    assert_eq!(index.count_occurrences(Side::Target, &[7])?, 12);
    assert_eq!(index.streams().get(0), Some(11));
    index.close()
}
