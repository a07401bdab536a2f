#![allow(missing_docs)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use phrase_index::admin::{verify, AdminOpenOptions, VerifyLevel};
use phrase_index::{
    Context, CorpusEntry, DomainId, IndexOptions, PhraseIndex, Result, Side, UpdateBatch,
};
use tempfile::tempdir;

const BATCHES: u32 = 60;
const ENTRIES_PER_BATCH: u32 = 10;

fn domain_of(batch: u32) -> u32 {
    batch % 4 + 1
}

fn write_all(index: &PhraseIndex) -> Result<()> {
    let mut position = 0i64;
    for i in 0..BATCHES {
        let mut batch = UpdateBatch::new(&index.streams());
        for k in 0..ENTRIES_PER_BATCH {
            let source = vec![1, 2, 100 + i, k];
            let target = vec![3, k];
            batch.add(0, position, CorpusEntry::new(domain_of(i), source, target, vec![(0, 0)]));
            position += 1;
        }
        index.put_batch(&batch)?;
        if i % 7 == 6 {
            let mut batch = UpdateBatch::new(&index.streams());
            batch.delete(0, position, domain_of(i / 7));
            position += 1;
            index.put_batch(&batch)?;
        }
    }
    Ok(())
}

#[test]
fn readers_see_whole_batches_while_writer_and_collector_run() -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let options = IndexOptions::new(2)
        .gc_timeout(Duration::from_millis(1))
        .gc_batch_size(4)
        .sync_writes(false)
        .log_compaction_bytes(16 * 1024);
    let index = PhraseIndex::open(dir.path(), options)?;
    let done = AtomicBool::new(false);
    let context = Context::new([(DomainId(2), 1.0), (DomainId(3), 0.5)]);

    let reads = std::thread::scope(|scope| -> Result<u64> {
        let reader = scope.spawn(|| -> Result<u64> {
            let mut reads = 0u64;
            let mut last_position = -1i64;
            while !done.load(Ordering::Acquire) || reads < 50 {
                // Every batch adds a whole multiple of ten occurrences to one
                // domain and deletions hide a whole domain.
                let count = index.count_occurrences(Side::Source, &[1, 2])?;
                assert_eq!(count % u64::from(ENTRIES_PER_BATCH), 0, "torn count {count}");

                for sample in index.get_random_samples(&[1, 2], 5, Some(&context), true)? {
                    assert_eq!(&sample.source[..2], &[1, 2]);
                    assert_eq!(sample.offsets, vec![0]);
                    assert_eq!(sample.target[0], 3);
                }

                let position = index.streams().get(0).unwrap_or(-1);
                assert!(position >= last_position);
                last_position = position;
                reads += 1;
            }
            Ok(reads)
        });
        let written = write_all(&index);
        done.store(true, Ordering::Release);
        let reads = reader.join().expect("reader thread")?;
        written?;
        Ok(reads)
    })?;
    assert!(reads >= 50);

    let deadline = Instant::now() + Duration::from_secs(20);
    while !index.pending_deletions().is_empty() {
        assert!(Instant::now() < deadline, "background collector did not finish");
        std::thread::sleep(Duration::from_millis(5));
    }
    let count = index.count_occurrences(Side::Source, &[1, 2])?;
    assert_eq!(count % u64::from(ENTRIES_PER_BATCH), 0);
    index.close()?;

    let admin = AdminOpenOptions {
        prefix_length: 2,
        ..AdminOpenOptions::default()
    };
    let report = verify(dir.path(), &admin, VerifyLevel::Full).expect("verify");
    assert!(report.success, "findings: {:?}", report.findings);
    Ok(())
}
