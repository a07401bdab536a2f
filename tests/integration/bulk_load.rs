#![allow(missing_docs)]

use phrase_index::{CorpusEntry, IndexOptions, PhraseError, PhraseIndex, Result, Side, UpdateBatch};
use tempfile::tempdir;

fn bulk_options() -> IndexOptions {
    IndexOptions::new(2).gc_enabled(false).bulk_load(true)
}

fn fill(index: &PhraseIndex, first: i64, count: i64) -> Result<()> {
    let mut batch = UpdateBatch::new(&index.streams());
    for position in first..first + count {
        let word = position as u32 % 4;
        batch.add(
            0,
            position,
            CorpusEntry::new(1 + word, vec![10, 11, word], vec![20, word], vec![(0, 0)]),
        );
    }
    index.put_batch(&batch)?;
    Ok(())
}

#[test]
fn queries_wait_for_force_compaction() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let index = PhraseIndex::open(dir.path(), bulk_options())?;
    fill(&index, 0, 40)?;
    fill(&index, 40, 40)?;
    assert!(index.stats().bulk_pending);

    assert!(matches!(
        index.count_occurrences(Side::Source, &[10, 11]),
        Err(PhraseError::BulkLoadPending)
    ));
    assert!(matches!(
        index.get_random_samples(&[10], 1, None, false),
        Err(PhraseError::BulkLoadPending)
    ));
    assert!(matches!(index.collect_garbage(), Err(PhraseError::BulkLoadPending)));
    assert!(matches!(index.new_iterator(), Err(PhraseError::BulkLoadPending)));

    index.force_compaction()?;
    assert!(!index.stats().bulk_pending);
    assert_eq!(index.count_occurrences(Side::Source, &[10, 11])?, 80);
    assert_eq!(index.count_occurrences(Side::Target, &[20])?, 80);
    assert_eq!(index.get_random_samples(&[11, 3], 0, None, false)?.len(), 20);

    // Another bulk batch requires another finalization.
    fill(&index, 80, 4)?;
    assert!(index.count_occurrences(Side::Source, &[10]).is_err());
    index.force_compaction()?;
    assert_eq!(index.count_occurrences(Side::Source, &[10])?, 84);
    index.close()
}

#[test]
fn finalized_bulk_index_reopens_in_normal_mode() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    {
        let index = PhraseIndex::open(dir.path(), bulk_options())?;
        fill(&index, 0, 12)?;
        let mut batch = UpdateBatch::new(&index.streams());
        batch.delete(0, 12, 2u32);
        index.put_batch(&batch)?;
        index.force_compaction()?;
        index.close()?;
    }
    let index = PhraseIndex::open(dir.path(), IndexOptions::new(2).gc_enabled(false))?;
    assert_eq!(index.streams().get(0), Some(12));
    assert_eq!(index.pending_deletions().len(), 1);
    assert_eq!(index.count_occurrences(Side::Source, &[10, 11])?, 9);
    assert_eq!(index.collect_garbage()?, 1);
    assert_eq!(index.count_occurrences(Side::Target, &[20, 1])?, 0);
    assert_eq!(index.count_occurrences(Side::Target, &[20, 0])?, 3);

    fill(&index, 13, 1)?;
    assert_eq!(index.count_occurrences(Side::Source, &[10, 11])?, 10);
    index.close()
}

#[test]
fn bulk_open_of_finalized_index_stays_queryable_until_ingest() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    {
        let index = PhraseIndex::open(dir.path(), IndexOptions::new(2).gc_enabled(false))?;
        fill(&index, 0, 8)?;
        index.close()?;
    }
    let index = PhraseIndex::open(dir.path(), bulk_options())?;
    assert!(!index.stats().bulk_pending);
    assert_eq!(index.count_occurrences(Side::Source, &[10, 11])?, 8);
    assert!(index.new_iterator()?.count() > 0);

    fill(&index, 8, 8)?;
    assert!(index.stats().bulk_pending);
    assert!(matches!(
        index.count_occurrences(Side::Source, &[10, 11]),
        Err(PhraseError::BulkLoadPending)
    ));
    index.force_compaction()?;
    assert_eq!(index.count_occurrences(Side::Source, &[10, 11])?, 16);
    index.close()
}
