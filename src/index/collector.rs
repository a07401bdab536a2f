//! Phrase sampling.
//!
//! A [`Collector`] keeps the phrase it has matched so far together with the
//! verified occurrences of that phrase. Extending the phrase past the
//! prefix length filters those occurrences against the stored sentences
//! instead of going back to the index.

use std::num::NonZeroUsize;

use lru::LruCache;
use rand::seq::index;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use tracing::debug;

use crate::index::cursor::PrefixCursor;
use crate::index::phrase_index::IndexCore;
use crate::index::postings::{Posting, PostingList};
use crate::storage::CorpusRecord;
use crate::types::{Alignment, DomainId, Length, Location, PhraseError, Result, StorageError, WordId};

/// Domain weighting that biases sampling toward preferred domains.
///
/// Weights only rank the domains: samples are drawn from the heaviest
/// domain first, then the next, and the magnitude of a weight has no
/// further effect.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Context {
    domains: Vec<(DomainId, f32)>,
}

impl Context {
    /// Builds a context from `(domain, weight)` pairs. A domain listed more
    /// than once keeps its highest weight.
    pub fn new(weights: impl IntoIterator<Item = (DomainId, f32)>) -> Self {
        let mut domains: Vec<(DomainId, f32)> = weights.into_iter().collect();
        domains.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        let mut seen = FxHashSet::default();
        domains.retain(|(domain, _)| seen.insert(*domain));
        Self { domains }
    }

    /// Domains in descending weight order.
    pub fn domains(&self) -> impl Iterator<Item = DomainId> + '_ {
        self.domains.iter().map(|(domain, _)| *domain)
    }

    /// Returns true when no domain is weighted.
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

impl FromIterator<(DomainId, f32)> for Context {
    fn from_iter<I: IntoIterator<Item = (DomainId, f32)>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// A sampled sentence pair containing the collector's phrase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sample {
    /// Domain of the pair.
    pub domain: DomainId,
    /// Source sentence.
    pub source: Vec<WordId>,
    /// Target sentence.
    pub target: Vec<WordId>,
    /// Word alignment.
    pub alignment: Alignment,
    /// Source word indices at which the phrase starts, ascending.
    pub offsets: Vec<Length>,
}

struct Group {
    domain: DomainId,
    location: Location,
    offsets: SmallVec<[Length; 2]>,
}

/// Reusable sampler bound to an open [`crate::index::PhraseIndex`].
pub struct Collector<'a> {
    core: &'a IndexCore,
    context: Option<Context>,
    background: bool,
    phrase: Vec<WordId>,
    /// Verified occurrences of `phrase`; `None` before the first lookup.
    candidates: Option<Vec<Posting>>,
    cache: LruCache<Location, CorpusRecord>,
    rng: ChaCha8Rng,
}

impl std::fmt::Debug for Collector<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("phrase", &self.phrase)
            .field("context", &self.context)
            .field("background", &self.background)
            .finish_non_exhaustive()
    }
}

impl<'a> Collector<'a> {
    pub(crate) fn new(
        core: &'a IndexCore,
        context: Option<Context>,
        background: bool,
        cache_capacity: usize,
    ) -> Self {
        Self {
            core,
            context: context.filter(|ctx| !ctx.is_empty()),
            background,
            phrase: Vec::new(),
            candidates: None,
            cache: LruCache::new(NonZeroUsize::new(cache_capacity).unwrap_or(NonZeroUsize::MIN)),
            rng: ChaCha8Rng::from_entropy(),
        }
    }

    /// Replaces the random source with a seeded one for reproducible draws.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    /// Phrase matched so far.
    pub fn phrase(&self) -> &[WordId] {
        &self.phrase
    }

    /// Forgets the current phrase and its occurrences. The sentence cache
    /// is kept.
    pub fn reset(&mut self) {
        self.phrase.clear();
        self.candidates = None;
    }

    /// Appends `words` to the phrase and samples up to `limit` sentence
    /// pairs containing it; `limit == 0` returns every match.
    ///
    /// Context domains are drawn first in descending weight order, then the
    /// remaining domains. Each returned pair is distinct.
    pub fn extend(&mut self, words: &[WordId], limit: usize) -> Result<Vec<Sample>> {
        if words.is_empty() && self.phrase.is_empty() {
            return Err(PhraseError::invalid("phrase must not be empty"));
        }
        let previous = self.phrase.len();
        self.phrase.extend_from_slice(words);
        let prefix_len = usize::from(self.core.codec.prefix_len());
        let deleted = self.core.deleted_snapshot();

        let candidates = match self.candidates.take() {
            Some(prev) if words.is_empty() => prev,
            Some(prev) if self.phrase.len() > prefix_len && previous > 0 => {
                let filtered = self.verify(prev, &deleted)?;
                debug!(phrase_len = self.phrase.len(), candidates = filtered.len(), "collector.filter");
                filtered
            }
            _ => {
                let key_len = self.phrase.len().min(prefix_len);
                let found = self.lookup(key_len, &deleted)?;
                if self.phrase.len() > prefix_len {
                    self.verify(found, &deleted)?
                } else {
                    found
                }
            }
        };
        let candidates: Vec<Posting> = candidates
            .into_iter()
            .filter(|p| !deleted.contains(&p.domain))
            .collect();

        let groups = group_by_location(&candidates);
        self.candidates = Some(candidates);
        let chosen = self.choose(groups, limit);
        let mut samples = Vec::with_capacity(chosen.len());
        for group in chosen {
            if let Some(record) = self.record(group.location)? {
                samples.push(Sample {
                    domain: group.domain,
                    source: record.source,
                    target: record.target,
                    alignment: record.alignment,
                    offsets: group.offsets.into_vec(),
                });
            }
        }
        self.core.metrics.samples_returned(samples.len() as u64);
        Ok(samples)
    }

    /// Occurrences of the first `key_len` words of the phrase.
    fn lookup(&self, key_len: usize, deleted: &FxHashSet<DomainId>) -> Result<Vec<Posting>> {
        let core = self.core;
        let key = &self.phrase[..key_len];
        let Some(context) = &self.context else {
            return global_lookup(core, key, &FxHashSet::default());
        };
        let preferred: FxHashSet<DomainId> = context.domains().collect();
        let local = || -> Result<Vec<Posting>> {
            let mut found = Vec::new();
            for domain in context.domains() {
                if deleted.contains(&domain) {
                    continue;
                }
                if let Some(bytes) = core.store.get(&core.codec.source_prefix(domain, key)) {
                    found.extend(PostingList::from_bytes(bytes)?.iter());
                }
            }
            Ok(found)
        };
        let (local, rest) = if self.background {
            std::thread::scope(|scope| {
                let worker = scope.spawn(|| global_lookup(core, key, &preferred));
                let local = local();
                match worker.join() {
                    Ok(rest) => (local, rest),
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            })
        } else {
            (local(), global_lookup(core, key, &preferred))
        };
        let mut found = local?;
        found.extend(rest?);
        Ok(found)
    }

    /// Keeps the candidates whose stored source sentence contains the full
    /// phrase at the recorded offset.
    fn verify(&mut self, candidates: Vec<Posting>, deleted: &FxHashSet<DomainId>) -> Result<Vec<Posting>> {
        let phrase = self.phrase.clone();
        let mut kept = Vec::with_capacity(candidates.len());
        for posting in candidates {
            if deleted.contains(&posting.domain) {
                continue;
            }
            let Some(record) = self.cached(posting.location)? else {
                continue;
            };
            let start = usize::from(posting.offset);
            if record.source.get(start..start + phrase.len()) == Some(phrase.as_slice()) {
                kept.push(posting);
            }
        }
        Ok(kept)
    }

    /// Picks up to `limit` groups, context domains first.
    fn choose(&mut self, groups: Vec<Group>, limit: usize) -> Vec<Group> {
        let limit = if limit == 0 { usize::MAX } else { limit };
        let mut by_domain: FxHashMap<DomainId, Vec<Group>> = FxHashMap::default();
        let mut order: Vec<DomainId> = Vec::new();
        for group in groups {
            let bucket = by_domain.entry(group.domain).or_insert_with(|| {
                order.push(group.domain);
                Vec::new()
            });
            bucket.push(group);
        }
        let mut tiers: Vec<Vec<Group>> = Vec::new();
        if let Some(context) = &self.context {
            for domain in context.domains() {
                if let Some(bucket) = by_domain.remove(&domain) {
                    tiers.push(bucket);
                }
            }
        }
        let rest: Vec<Group> = order
            .into_iter()
            .filter_map(|domain| by_domain.remove(&domain))
            .flatten()
            .collect();
        tiers.push(rest);

        let mut chosen = Vec::new();
        for tier in tiers {
            let remaining = limit - chosen.len();
            if remaining == 0 {
                break;
            }
            if tier.len() <= remaining {
                chosen.extend(tier);
                continue;
            }
            let mut picks = index::sample(&mut self.rng, tier.len(), remaining).into_vec();
            picks.sort_unstable();
            let mut slots: Vec<Option<Group>> = tier.into_iter().map(Some).collect();
            chosen.extend(picks.into_iter().filter_map(|i| slots[i].take()));
        }
        chosen
    }

    fn cached(&mut self, location: Location) -> Result<Option<&CorpusRecord>> {
        if self.cache.contains(&location) {
            self.core.metrics.sample_cache(true);
            return Ok(self.cache.get(&location));
        }
        self.core.metrics.sample_cache(false);
        match self.core.storage.read(location) {
            Ok(record) => {
                self.cache.put(location, record);
                Ok(self.cache.get(&location))
            }
            Err(StorageError::UnknownLocation(_)) => {
                debug!(location = %location, "collector.location_vanished");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn record(&mut self, location: Location) -> Result<Option<CorpusRecord>> {
        Ok(self.cached(location)?.cloned())
    }
}

/// Occurrences of `key` in every live domain outside `exclude`.
fn global_lookup(
    core: &IndexCore,
    key: &[WordId],
    exclude: &FxHashSet<DomainId>,
) -> Result<Vec<Posting>> {
    let mut cursor = PrefixCursor::new(core);
    cursor.seek(key)?;
    let mut found = Vec::new();
    while cursor.has_next() {
        if !cursor.domain().is_some_and(|d| exclude.contains(&d)) {
            found.extend(cursor.postings()?.iter());
        }
        cursor.next()?;
    }
    Ok(found)
}

fn group_by_location(candidates: &[Posting]) -> Vec<Group> {
    let mut slots: FxHashMap<Location, usize> = FxHashMap::default();
    let mut groups: Vec<Group> = Vec::new();
    for posting in candidates {
        let slot = *slots.entry(posting.location).or_insert_with(|| {
            groups.push(Group {
                domain: posting.domain,
                location: posting.location,
                offsets: SmallVec::new(),
            });
            groups.len() - 1
        });
        groups[slot].offsets.push(posting.offset);
    }
    for group in &mut groups {
        group.offsets.sort_unstable();
        group.offsets.dedup();
    }
    groups
}
