#![allow(missing_docs)]

use std::fs;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use phrase_index::index::CounterMetrics;
use phrase_index::{
    CorpusEntry, DomainId, IndexOptions, PhraseIndex, Result, Side, UpdateBatch,
};
use tempfile::tempdir;

fn segment_files(dir: &Path) -> usize {
    fs::read_dir(dir.join("storage"))
        .expect("storage dir")
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("segment-"))
        .count()
}

fn load(index: &PhraseIndex, domains: &[u32], sentences_per_domain: u32) -> Result<()> {
    let mut batch = UpdateBatch::new(&index.streams());
    let mut position = index.streams().get(0).map_or(0, |p| p + 1);
    for &domain in domains {
        for i in 0..sentences_per_domain {
            let source = vec![1, 2, 100 + i];
            let target = vec![7, 8, 200 + (i % 5)];
            batch.add(0, position, CorpusEntry::new(domain, source, target, vec![(0, 0)]));
            position += 1;
        }
    }
    index.put_batch(&batch)?;
    Ok(())
}

fn delete(index: &PhraseIndex, domain: u32) -> Result<()> {
    let mut batch = UpdateBatch::new(&index.streams());
    let position = index.streams().get(0).map_or(0, |p| p + 1);
    assert!(batch.delete(0, position, domain));
    index.put_batch(&batch)?;
    Ok(())
}

#[test]
fn synchronous_collection_reclaims_domain() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let metrics = Arc::new(CounterMetrics::default());
    let options = IndexOptions::new(2)
        .gc_enabled(false)
        .gc_batch_size(3)
        .metrics(metrics.clone());
    let index = PhraseIndex::open(dir.path(), options)?;
    load(&index, &[1, 2], 20)?;
    assert_eq!(segment_files(dir.path()), 2);
    assert_eq!(index.count_occurrences(Side::Target, &[7, 8])?, 40);

    delete(&index, 1)?;
    assert_eq!(index.pending_deletions(), vec![DomainId(1)]);
    assert_eq!(index.collect_garbage()?, 1);
    assert!(index.pending_deletions().is_empty());
    assert_eq!(segment_files(dir.path()), 1);

    // Counter reclamation ran over several bounded cycles without
    // subtracting any record twice.
    assert_eq!(index.count_occurrences(Side::Target, &[7, 8])?, 20);
    assert_eq!(index.count_occurrences(Side::Target, &[200])?, 4);
    assert_eq!(index.count_occurrences(Side::Source, &[1, 2])?, 20);
    assert!(metrics.gc_cycles.load(Ordering::Relaxed) > 2);
    assert_eq!(metrics.domains_reclaimed.load(Ordering::Relaxed), 1);

    assert_eq!(index.collect_garbage()?, 0);
    index.close()?;

    let index = PhraseIndex::open(dir.path(), IndexOptions::new(2).gc_enabled(false))?;
    assert!(index.pending_deletions().is_empty());
    assert_eq!(index.count_occurrences(Side::Target, &[7, 8])?, 20);
    index.close()
}

#[test]
fn pending_deletion_survives_restart() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    {
        let index = PhraseIndex::open(dir.path(), IndexOptions::new(2).gc_enabled(false))?;
        load(&index, &[3, 4], 5)?;
        delete(&index, 3)?;
        index.close()?;
    }
    let index = PhraseIndex::open(dir.path(), IndexOptions::new(2).gc_enabled(false))?;
    assert_eq!(index.pending_deletions(), vec![DomainId(3)]);
    assert_eq!(index.count_occurrences(Side::Source, &[1, 2])?, 5);
    assert_eq!(index.collect_garbage()?, 1);
    assert_eq!(index.count_occurrences(Side::Target, &[7])?, 5);
    index.close()
}

#[test]
fn background_worker_reclaims_after_notify() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let options = IndexOptions::new(2)
        .gc_timeout(Duration::from_millis(20))
        .gc_batch_size(8);
    let index = PhraseIndex::open(dir.path(), options)?;
    load(&index, &[5, 6], 10)?;
    delete(&index, 5)?;

    let deadline = Instant::now() + Duration::from_secs(10);
    while !index.pending_deletions().is_empty() {
        assert!(Instant::now() < deadline, "background collector did not finish");
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(index.count_occurrences(Side::Target, &[7, 8])?, 10);
    assert_eq!(segment_files(dir.path()), 1);
    index.close()
}

#[test]
fn domain_id_is_reusable_after_reclamation() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let index = PhraseIndex::open(dir.path(), IndexOptions::new(2).gc_enabled(false))?;
    load(&index, &[9], 4)?;
    delete(&index, 9)?;

    // Entries for a domain pending deletion are dropped.
    load(&index, &[9], 4)?;
    assert_eq!(index.count_occurrences(Side::Source, &[1, 2])?, 0);

    index.collect_garbage()?;
    load(&index, &[9], 2)?;
    assert_eq!(index.count_occurrences(Side::Source, &[1, 2])?, 2);
    assert_eq!(index.count_occurrences(Side::Target, &[7, 8])?, 2);
    index.close()
}

#[test]
fn compaction_drops_reclaimed_keys() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let index = PhraseIndex::open(dir.path(), IndexOptions::new(2).gc_enabled(false))?;
    load(&index, &[1], 6)?;
    let before = index.stats().keys;
    delete(&index, 1)?;
    index.collect_garbage()?;
    index.force_compaction()?;
    let after = index.stats();
    assert!(after.keys < before);
    assert_eq!(after.keys, 2, "only streams and manifest remain");
    assert_eq!(after.segments, 0);
    index.close()
}
