#![allow(missing_docs)]

use std::collections::HashSet;

use phrase_index::{CorpusEntry, IndexOptions, PhraseIndex, Side, UpdateBatch, WordId};
use proptest::prelude::*;
use tempfile::tempdir;

const PREFIX: usize = 3;

#[derive(Clone, Debug)]
struct Pair {
    domain: u32,
    source: Vec<WordId>,
    target: Vec<WordId>,
}

fn pair() -> impl Strategy<Value = Pair> {
    (
        1u32..4,
        prop::collection::vec(0u32..5, 1..7),
        prop::collection::vec(0u32..5, 0..6),
    )
        .prop_map(|(domain, source, target)| Pair { domain, source, target })
}

/// Number of places `phrase` starts in `sentence`.
fn occurrences(sentence: &[WordId], phrase: &[WordId]) -> u64 {
    sentence.windows(phrase.len()).filter(|w| *w == phrase).count() as u64
}

fn every_ngram(pairs: &[Pair]) -> Vec<Vec<WordId>> {
    let mut seen: HashSet<Vec<WordId>> = HashSet::new();
    for pair in pairs {
        for sentence in [&pair.source, &pair.target] {
            for len in 1..=PREFIX.min(sentence.len()) {
                for window in sentence.windows(len) {
                    seen.insert(window.to_vec());
                }
            }
        }
    }
    seen.into_iter().collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn counts_match_brute_force(
        batches in prop::collection::vec(prop::collection::vec(pair(), 1..6), 1..4),
        deleted in prop::option::of(1u32..4),
    ) {
        let dir = tempdir().expect("tempdir");
        let index = PhraseIndex::open(dir.path(), IndexOptions::new(PREFIX as u8).gc_enabled(false))
            .expect("open");
        let mut position = 0i64;
        for pairs in &batches {
            let mut batch = UpdateBatch::new(&index.streams());
            for p in pairs {
                batch.add(
                    0,
                    position,
                    CorpusEntry::new(p.domain, p.source.clone(), p.target.clone(), vec![]),
                );
                position += 1;
            }
            index.put_batch(&batch).expect("put batch");
        }
        if let Some(domain) = deleted {
            let mut batch = UpdateBatch::new(&index.streams());
            batch.delete(0, position, domain);
            index.put_batch(&batch).expect("delete");
            index.collect_garbage().expect("collect");
        }

        let live: Vec<Pair> = batches
            .iter()
            .flatten()
            .filter(|p| Some(p.domain) != deleted)
            .cloned()
            .collect();
        for phrase in every_ngram(&live) {
            let source: u64 = live.iter().map(|p| occurrences(&p.source, &phrase)).sum();
            let target: u64 = live.iter().map(|p| occurrences(&p.target, &phrase)).sum();
            prop_assert_eq!(index.count_occurrences(Side::Source, &phrase).expect("count"), source);
            prop_assert_eq!(index.count_occurrences(Side::Target, &phrase).expect("count"), target);
        }
        index.close().expect("close");
    }
}
