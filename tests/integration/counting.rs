#![allow(missing_docs)]

use phrase_index::{
    CorpusEntry, CountFloor, IndexOptions, PhraseError, PhraseIndex, Result, Side, UpdateBatch,
};
use tempfile::tempdir;

fn options(prefix_length: u8) -> IndexOptions {
    IndexOptions::new(prefix_length).gc_enabled(false)
}

fn scenario_entries() -> Vec<CorpusEntry> {
    vec![
        CorpusEntry::new(1, vec![5, 6, 7], vec![9, 10], vec![(0, 0), (2, 1)]),
        CorpusEntry::new(1, vec![5, 6, 8], vec![], vec![]),
    ]
}

fn ingest(index: &PhraseIndex, channel: u16, start: i64, entries: Vec<CorpusEntry>) -> Result<()> {
    let mut batch = UpdateBatch::new(&index.streams());
    for (i, entry) in entries.into_iter().enumerate() {
        batch.add(channel, start + i as i64, entry);
    }
    index.put_batch(&batch)?;
    Ok(())
}

#[test]
fn phrases_beyond_prefix_length_are_approximated() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let index = PhraseIndex::open(dir.path(), options(2))?;
    ingest(&index, 0, 0, scenario_entries())?;

    assert_eq!(index.count_occurrences(Side::Source, &[5, 6])?, 2);
    assert_eq!(index.count_occurrences(Side::Source, &[5])?, 2);
    assert_eq!(index.count_occurrences(Side::Source, &[6, 7])?, 1);
    assert_eq!(index.count_occurrences(Side::Source, &[5, 6, 7])?, 1);
    assert_eq!(index.count_occurrences(Side::Source, &[1, 2, 3])?, 1);
    assert_eq!(index.count_occurrences(Side::Target, &[9, 10])?, 1);
    index.close()
}

#[test]
fn phrases_within_prefix_length_are_exact() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let index = PhraseIndex::open(dir.path(), options(3))?;
    ingest(&index, 0, 0, scenario_entries())?;

    assert_eq!(index.count_occurrences(Side::Source, &[5, 6, 7])?, 1);
    assert_eq!(index.count_occurrences(Side::Source, &[5, 6, 8])?, 1);
    assert_eq!(index.count_occurrences(Side::Source, &[5, 6, 9])?, 0);
    assert_eq!(index.count_occurrences(Side::Source, &[5, 6])?, 2);
    index.close()
}

#[test]
fn target_counts_span_domains() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let index = PhraseIndex::open(dir.path(), options(2))?;
    ingest(
        &index,
        0,
        0,
        vec![
            CorpusEntry::new(1, vec![1], vec![9, 9, 10], vec![]),
            CorpusEntry::new(2, vec![2], vec![9, 10], vec![]),
        ],
    )?;
    assert_eq!(index.count_occurrences(Side::Target, &[9])?, 3);
    assert_eq!(index.count_occurrences(Side::Target, &[9, 10])?, 2);
    assert_eq!(index.count_occurrences(Side::Target, &[9, 9])?, 1);
    assert_eq!(index.count_occurrences(Side::Target, &[10, 9])?, 0);
    index.close()
}

#[test]
fn deleted_domain_counts_drop_to_zero() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let index = PhraseIndex::open(dir.path(), options(2))?;
    ingest(&index, 0, 0, scenario_entries())?;
    ingest(&index, 0, 2, vec![CorpusEntry::new(2, vec![5], vec![10], vec![])])?;

    let mut batch = UpdateBatch::new(&index.streams());
    assert!(batch.delete(0, 3, 1u32));
    index.put_batch(&batch)?;

    // Source postings of a pending domain are hidden right away.
    assert_eq!(index.count_occurrences(Side::Source, &[5, 6])?, 0);
    assert_eq!(index.count_occurrences(Side::Source, &[5])?, 1);

    assert_eq!(index.collect_garbage()?, 1);
    assert_eq!(index.count_occurrences(Side::Source, &[5, 6])?, 0);
    assert_eq!(index.count_occurrences(Side::Target, &[9])?, 0);
    assert_eq!(index.count_occurrences(Side::Target, &[10])?, 1);
    index.close()
}

#[test]
fn always_floor_reports_one_for_absent_and_reclaimed_phrases() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let index = PhraseIndex::open(dir.path(), options(2).count_floor(CountFloor::Always))?;
    assert_eq!(index.count_occurrences(Side::Source, &[42])?, 1);
    ingest(&index, 0, 0, scenario_entries())?;
    assert_eq!(index.count_occurrences(Side::Source, &[5, 6])?, 2);

    let mut batch = UpdateBatch::new(&index.streams());
    batch.delete(0, 2, 1u32);
    index.put_batch(&batch)?;
    index.collect_garbage()?;
    assert_eq!(index.count_occurrences(Side::Target, &[9])?, 1);
    index.close()
}

#[test]
fn replayed_stream_positions_are_ignored() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let index = PhraseIndex::open(dir.path(), options(2))?;
    ingest(&index, 7, 0, scenario_entries())?;
    assert_eq!(index.streams().get(7), Some(1));

    let mut replay = UpdateBatch::new(&index.streams());
    for (i, entry) in scenario_entries().into_iter().enumerate() {
        assert!(!replay.add(7, i as i64, entry));
    }
    assert!(replay.is_empty());
    index.put_batch(&replay)?;
    assert_eq!(index.count_occurrences(Side::Source, &[5, 6])?, 2);
    index.close()
}

#[test]
fn empty_phrase_and_oversized_sentence_are_rejected() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let index = PhraseIndex::open(dir.path(), options(2))?;
    assert!(matches!(
        index.count_occurrences(Side::Target, &[]),
        Err(PhraseError::InvalidArgument(_))
    ));

    let mut batch = UpdateBatch::new(&index.streams());
    batch.add(0, 0, CorpusEntry::new(1, vec![1; 70_000], vec![2], vec![]));
    assert!(matches!(
        index.put_batch(&batch),
        Err(PhraseError::InvalidArgument(_))
    ));
    assert_eq!(index.streams().get(0), None);
    index.close()
}
