#![allow(missing_docs)]

use phrase_index::index::IndexEntry;
use phrase_index::{
    CorpusEntry, DomainId, IndexOptions, PhraseError, PhraseIndex, Result, Side, UpdateBatch,
};
use tempfile::tempdir;

fn entries(index: &PhraseIndex) -> Result<Vec<IndexEntry>> {
    index.new_iterator()?.collect()
}

#[test]
fn iterator_reports_source_lists_then_target_counters() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let index = PhraseIndex::open(dir.path(), IndexOptions::new(2).gc_enabled(false))?;
    let mut batch = UpdateBatch::new(&index.streams());
    batch.add(0, 0, CorpusEntry::new(4, vec![5, 6, 7], vec![9, 9], vec![(0, 0)]));
    batch.add(0, 1, CorpusEntry::new(4, vec![5], vec![9], vec![(0, 0)]));
    batch.delete(0, 2, 30u32);
    index.put_batch(&batch)?;

    let all = entries(&index)?;
    let split = all.iter().position(|e| e.side == Side::Target).expect("target entries");
    assert!(all[split..].iter().all(|e| e.side == Side::Target));

    let source = &all[..split];
    assert_eq!(source.len(), 5);
    assert!(source.iter().all(|e| e.domain == Some(DomainId(4))));
    let five = source.iter().find(|e| e.words == [5]).expect("phrase [5]");
    assert_eq!(five.count, 2);
    assert_eq!(five.positions.len(), 2);
    let six_seven = source.iter().find(|e| e.words == [6, 7]).expect("phrase [6, 7]");
    assert_eq!(six_seven.positions[0].offset, 1);

    let target = &all[split..];
    assert_eq!(target.len(), 2);
    let nine = target.iter().find(|e| e.words == [9]).expect("ngram [9]");
    assert_eq!(nine.count, 3);
    assert_eq!(nine.domain, None);
    assert!(nine.positions.is_empty());
    index.close()
}

#[test]
fn iterator_is_refused_while_bulk_load_pending() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let index = PhraseIndex::open(dir.path(), IndexOptions::new(2).gc_enabled(false).bulk_load(true))?;
    let mut batch = UpdateBatch::new(&index.streams());
    batch.add(0, 0, CorpusEntry::new(1, vec![1, 2], vec![3], vec![]));
    index.put_batch(&batch)?;
    assert!(matches!(index.new_iterator(), Err(PhraseError::BulkLoadPending)));
    index.force_compaction()?;
    assert_eq!(entries(&index)?.len(), 4);
    index.close()
}
