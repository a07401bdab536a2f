use crate::index::keys::{TAG_SOURCE_PREFIX, TAG_TARGET_COUNT};
use crate::index::postings::{decode_counter, encode_counter, POSTING_LEN};
use crate::primitives::kv::MergeOperator;

/// Merge operator for phrase keys.
///
/// Posting lists concatenate and counters add; both are associative, so the
/// stored value does not depend on how operands were grouped. Any other key
/// type declines.
#[derive(Debug, Default, Clone, Copy)]
pub struct PositionMergeOperator;

impl MergeOperator for PositionMergeOperator {
    fn name(&self) -> &'static str {
        "phrase-index.position-merge"
    }

    fn merge(&self, key: &[u8], existing: Option<&[u8]>, operand: &[u8]) -> Option<Vec<u8>> {
        match key.first().copied()? {
            TAG_SOURCE_PREFIX => {
                let existing = existing.unwrap_or_default();
                if operand.len() % POSTING_LEN != 0 || existing.len() % POSTING_LEN != 0 {
                    return None;
                }
                let mut out = Vec::with_capacity(existing.len() + operand.len());
                out.extend_from_slice(existing);
                out.extend_from_slice(operand);
                Some(out)
            }
            TAG_TARGET_COUNT => {
                let current = decode_counter(existing).ok()?;
                let delta = decode_counter(Some(operand)).ok()?;
                Some(encode_counter(current.saturating_add(delta)).to_vec())
            }
            _ => None,
        }
    }

    fn retain(&self, key: &[u8], value: &[u8]) -> bool {
        match key.first().copied() {
            Some(TAG_SOURCE_PREFIX) => !value.is_empty(),
            Some(TAG_TARGET_COUNT) => decode_counter(Some(value)).map_or(true, |v| v > 0),
            _ => true,
        }
    }
}
