#![allow(missing_docs)]

use std::collections::HashSet;

use phrase_index::{
    Context, CorpusEntry, DomainId, IndexOptions, PhraseIndex, Result, UpdateBatch, WordId,
};
use tempfile::{tempdir, TempDir};

fn open(prefix_length: u8) -> Result<(TempDir, PhraseIndex)> {
    let dir = tempdir().expect("tempdir");
    let index = PhraseIndex::open(dir.path(), IndexOptions::new(prefix_length).gc_enabled(false))?;
    Ok((dir, index))
}

fn ingest(index: &PhraseIndex, entries: Vec<(u32, Vec<WordId>)>) -> Result<()> {
    let mut batch = UpdateBatch::new(&index.streams());
    let mut position = index.streams().get(0).map_or(0, |p| p + 1);
    for (domain, source) in entries {
        let target: Vec<WordId> = source.iter().map(|w| w + 1000).collect();
        batch.add(0, position, CorpusEntry::new(domain, source, target, vec![(0, 0)]));
        position += 1;
    }
    index.put_batch(&batch)?;
    Ok(())
}

#[test]
fn limit_one_draws_from_known_occurrences() -> Result<()> {
    let (_dir, index) = open(3)?;
    let corpus = vec![
        (1, vec![1, 2, 3]),
        (1, vec![4, 2, 3, 9]),
        (2, vec![2, 3]),
        (2, vec![3, 2]),
    ];
    ingest(&index, corpus)?;
    let known: HashSet<Vec<WordId>> = [vec![1, 2, 3], vec![4, 2, 3, 9], vec![2, 3]]
        .into_iter()
        .collect();
    for _ in 0..20 {
        let samples = index.get_random_samples(&[2, 3], 1, None, false)?;
        assert_eq!(samples.len(), 1);
        assert!(known.contains(&samples[0].source));
        let start = usize::from(samples[0].offsets[0]);
        assert_eq!(&samples[0].source[start..start + 2], &[2, 3]);
    }
    let all = index.get_random_samples(&[2, 3], 0, None, false)?;
    assert_eq!(all.len(), 3);
    let sources: HashSet<Vec<WordId>> = all.into_iter().map(|s| s.source).collect();
    assert_eq!(sources, known);
    index.close()
}

#[test]
fn repeated_phrase_in_one_sentence_is_one_sample() -> Result<()> {
    let (_dir, index) = open(2)?;
    ingest(&index, vec![(1, vec![7, 8, 7, 8, 5])])?;
    let samples = index.get_random_samples(&[7, 8], 0, None, false)?;
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].offsets, vec![0, 2]);
    assert_eq!(samples[0].target, vec![1007, 1008, 1007, 1008, 1005]);
    index.close()
}

#[test]
fn context_domains_are_sampled_first() -> Result<()> {
    let (_dir, index) = open(2)?;
    ingest(
        &index,
        vec![
            (1, vec![5, 6, 1]),
            (1, vec![5, 6, 2]),
            (1, vec![5, 6, 3]),
            (2, vec![5, 6, 4]),
            (2, vec![5, 6, 5]),
            (3, vec![5, 6, 6]),
        ],
    )?;
    let context = Context::new([(DomainId(3), 0.9), (DomainId(2), 0.5)]);
    for background in [false, true] {
        let samples = index.get_random_samples(&[5, 6], 3, Some(&context), background)?;
        let domains: Vec<DomainId> = samples.iter().map(|s| s.domain).collect();
        assert_eq!(domains, vec![DomainId(3), DomainId(2), DomainId(2)]);

        let samples = index.get_random_samples(&[5, 6], 4, Some(&context), background)?;
        assert_eq!(samples.len(), 4);
        assert_eq!(samples[3].domain, DomainId(1));

        let samples = index.get_random_samples(&[5, 6], 0, Some(&context), background)?;
        assert_eq!(samples.len(), 6);
    }
    index.close()
}

#[test]
fn collector_extends_past_prefix_length() -> Result<()> {
    let (_dir, index) = open(2)?;
    ingest(
        &index,
        vec![
            (1, vec![1, 2, 3, 4]),
            (1, vec![1, 2, 5]),
            (2, vec![9, 1, 2, 3]),
        ],
    )?;
    let mut collector = index.new_collector(None, false)?;
    assert_eq!(collector.extend(&[1, 2], 0)?.len(), 3);
    let samples = collector.extend(&[3], 0)?;
    assert_eq!(samples.len(), 2);
    assert!(samples.iter().all(|s| s.source.windows(3).any(|w| w == [1, 2, 3])));
    let samples = collector.extend(&[4], 0)?;
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].offsets, vec![0]);
    assert!(collector.extend(&[9], 0)?.is_empty());
    assert_eq!(collector.phrase(), &[1, 2, 3, 4, 9]);

    collector.reset();
    let samples = collector.extend(&[9, 1, 2], 0)?;
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].domain, DomainId(2));
    drop(collector);

    // A one-shot lookup of a long phrase verifies against stored sentences.
    assert_eq!(index.get_random_samples(&[2, 3, 4], 0, None, false)?.len(), 1);
    index.close()
}

#[test]
fn seeded_collectors_draw_the_same_samples() -> Result<()> {
    let (_dir, index) = open(2)?;
    let corpus: Vec<(u32, Vec<WordId>)> = (0..50).map(|i| (1 + i % 3, vec![4, 4, 100 + i])).collect();
    ingest(&index, corpus)?;
    let draw = |seed| -> Result<Vec<Vec<WordId>>> {
        let mut collector = index.new_collector(None, false)?.with_seed(seed);
        Ok(collector
            .extend(&[4, 4], 5)?
            .into_iter()
            .map(|s| s.source)
            .collect())
    };
    assert_eq!(draw(11)?, draw(11)?);
    assert_eq!(draw(11)?.len(), 5);
    index.close()
}

#[test]
fn deleted_domains_are_never_sampled() -> Result<()> {
    let (_dir, index) = open(2)?;
    ingest(&index, vec![(1, vec![3, 3]), (2, vec![3, 3, 1])])?;
    let mut batch = UpdateBatch::new(&index.streams());
    batch.delete(0, 2, 1u32);
    index.put_batch(&batch)?;

    let context = Context::new([(DomainId(1), 1.0)]);
    let samples = index.get_random_samples(&[3, 3], 0, Some(&context), true)?;
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].domain, DomainId(2));

    index.collect_garbage()?;
    let samples = index.get_random_samples(&[3], 0, None, false)?;
    assert_eq!(samples.len(), 1);
    index.close()
}
