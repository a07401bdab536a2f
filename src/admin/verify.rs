use std::path::Path;

use rustc_hash::FxHashSet;
use serde::Serialize;

use crate::index::{IndexEntry, PhraseIndex};
use crate::types::{DomainId, Side, StorageError};

use crate::admin::options::AdminOpenOptions;
use crate::admin::util::open_index;
use crate::admin::Result;

const MAX_FINDINGS: usize = 32;

/// Specifies the depth of verification checks to perform.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyLevel {
    /// Corpus segments and bookkeeping keys only.
    Fast,
    /// Additionally resolves every posting against corpus storage.
    Full,
}

/// Indicates the severity level of a verification finding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifySeverity {
    /// Informational message about the verification process.
    Info,
    /// Non-critical issue that may indicate a problem.
    Warning,
    /// Critical issue indicating data corruption or integrity failure.
    Error,
}

/// Represents a single issue discovered during verification.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyFinding {
    /// The severity level of this finding.
    pub severity: VerifySeverity,
    /// Human-readable description of the issue.
    pub message: String,
}

/// Statistics collected during the verification process.
#[derive(Clone, Debug, Default, Serialize)]
pub struct VerifyCounts {
    /// Durable sentence pairs in corpus storage.
    pub records: u64,
    /// Live corpus segments.
    pub segments: u64,
    /// Source posting-list keys.
    pub source_keys: u64,
    /// Postings across all source keys.
    pub postings: u64,
    /// Target counter keys.
    pub target_keys: u64,
    /// Domains awaiting reclamation.
    pub pending_deletions: u64,
}

/// Complete report of a verification operation.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyReport {
    /// The verification level that was performed.
    pub level: VerifyLevel,
    /// Whether verification found no errors.
    pub success: bool,
    /// Error findings seen, including any beyond the retained list.
    pub errors: u64,
    /// List of issues discovered during verification, at most 32.
    pub findings: Vec<VerifyFinding>,
    /// Statistics about the data examined.
    pub counts: VerifyCounts,
}

/// Verifies the integrity of a phrase index.
///
/// - `VerifyLevel::Fast`: corpus segment framing and the persisted manifest
/// - `VerifyLevel::Full`: every posting resolves to a stored sentence whose
///   source contains the indexed phrase at the recorded offset
///
/// # Errors
///
/// Returns an error if the index cannot be opened or a scan fails outright.
pub fn verify(
    path: impl AsRef<Path>,
    opts: &AdminOpenOptions,
    level: VerifyLevel,
) -> Result<VerifyReport> {
    let index = open_index(path.as_ref(), opts)?;
    let report = verify_open(&index, level);
    index.close()?;
    report
}

fn verify_open(index: &PhraseIndex, level: VerifyLevel) -> Result<VerifyReport> {
    let core = index.core();
    let mut findings = Findings::default();
    let mut counts = VerifyCounts::default();
    let pending: FxHashSet<DomainId> = index.pending_deletions().into_iter().collect();
    counts.pending_deletions = pending.len() as u64;
    counts.segments = core.storage.segment_count() as u64;

    match core.storage.verify() {
        Ok(records) => counts.records = records,
        Err(err) => findings.push(VerifySeverity::Error, format!("corpus storage: {err}")),
    }
    check_manifest(index, &mut findings);

    if matches!(level, VerifyLevel::Full) {
        for entry in index.new_iterator()? {
            match entry {
                Ok(entry) => check_entry(index, &entry, &pending, &mut findings, &mut counts),
                Err(err) => {
                    findings.push(VerifySeverity::Error, format!("index scan: {err}"));
                    break;
                }
            }
        }
    }

    Ok(VerifyReport {
        level,
        success: findings.errors == 0,
        errors: findings.errors,
        findings: findings.list,
        counts,
    })
}

fn check_manifest(index: &PhraseIndex, findings: &mut Findings) {
    let core = index.core();
    let live = core.storage.manifest();
    let stored = match index.stored_manifest() {
        Ok(Some(manifest)) => manifest,
        Err(err) => {
            findings.push(VerifySeverity::Error, format!("stored manifest: {err}"));
            return;
        }
        Ok(None) if live.segments.is_empty() => return,
        Ok(None) => {
            findings.push(
                VerifySeverity::Error,
                "corpus segments exist but no manifest is stored",
            );
            return;
        }
    };
    if stored.segments != live.segments {
        findings.push(
            VerifySeverity::Warning,
            format!(
                "stored manifest lists {} segments, storage holds {}",
                stored.segments.len(),
                live.segments.len()
            ),
        );
    }
}

fn check_entry(
    index: &PhraseIndex,
    entry: &IndexEntry,
    pending: &FxHashSet<DomainId>,
    findings: &mut Findings,
    counts: &mut VerifyCounts,
) {
    match entry.side {
        Side::Target => {
            counts.target_keys += 1;
            if entry.count <= 0 {
                findings.push(
                    VerifySeverity::Info,
                    format!("target counter {:?} is {}", entry.words, entry.count),
                );
            }
        }
        Side::Source => {
            counts.source_keys += 1;
            counts.postings += entry.positions.len() as u64;
            let Some(domain) = entry.domain else {
                return;
            };
            if pending.contains(&domain) {
                return;
            }
            for posting in &entry.positions {
                if posting.domain != domain {
                    findings.push(
                        VerifySeverity::Error,
                        format!("posting of domain {} filed under domain {domain}", posting.domain),
                    );
                    continue;
                }
                match index.core().storage.read(posting.location) {
                    Ok(record) => {
                        let start = usize::from(posting.offset);
                        let found = record.source.get(start..start + entry.words.len());
                        if record.domain != domain || found != Some(entry.words.as_slice()) {
                            findings.push(
                                VerifySeverity::Error,
                                format!(
                                    "posting {}+{} does not contain {:?}",
                                    posting.location, posting.offset, entry.words
                                ),
                            );
                        }
                    }
                    Err(StorageError::UnknownLocation(location)) => findings.push(
                        VerifySeverity::Error,
                        format!("posting points at missing location {location}"),
                    ),
                    Err(err) => findings.push(VerifySeverity::Error, format!("corpus read: {err}")),
                }
            }
        }
    }
}

/// Findings collected so far. Past [`MAX_FINDINGS`] entries an error
/// replaces the newest non-error finding, and every error is counted.
#[derive(Default)]
struct Findings {
    list: Vec<VerifyFinding>,
    errors: u64,
}

impl Findings {
    fn push(&mut self, severity: VerifySeverity, message: impl Into<String>) {
        let is_error = severity == VerifySeverity::Error;
        if is_error {
            self.errors += 1;
        }
        let finding = VerifyFinding {
            severity,
            message: message.into(),
        };
        if self.list.len() < MAX_FINDINGS {
            self.list.push(finding);
        } else if is_error {
            if let Some(slot) = self
                .list
                .iter()
                .rposition(|f| f.severity != VerifySeverity::Error)
            {
                self.list[slot] = finding;
            }
        }
    }
}
