use crate::primitives::bytes::{buf::Cursor, ord};
use crate::types::IndexError;

const OP_PUT: u8 = 1;
const OP_MERGE: u8 = 2;
const OP_DELETE: u8 = 3;

/// A single mutation inside a [`WriteBatch`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BatchOp {
    /// Replace the value of `key`.
    Put {
        /// Target key.
        key: Vec<u8>,
        /// New value.
        value: Vec<u8>,
    },
    /// Combine `operand` into the current value through the merge operator.
    Merge {
        /// Target key.
        key: Vec<u8>,
        /// Partial value handed to the merge operator.
        operand: Vec<u8>,
    },
    /// Remove `key`.
    Delete {
        /// Target key.
        key: Vec<u8>,
    },
}

impl BatchOp {
    /// Key touched by this operation.
    pub fn key(&self) -> &[u8] {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Merge { key, .. } | BatchOp::Delete { key } => key,
        }
    }
}

/// Ordered list of mutations applied atomically by [`super::OrderedStore::write`].
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
    bytes: usize,
}

impl WriteBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a put.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        let (key, value) = (key.into(), value.into());
        self.bytes += key.len() + value.len();
        self.ops.push(BatchOp::Put { key, value });
    }

    /// Queues a merge operand.
    pub fn merge(&mut self, key: impl Into<Vec<u8>>, operand: impl Into<Vec<u8>>) {
        let (key, operand) = (key.into(), operand.into());
        self.bytes += key.len() + operand.len();
        self.ops.push(BatchOp::Merge { key, operand });
    }

    /// Queues a delete.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        let key = key.into();
        self.bytes += key.len();
        self.ops.push(BatchOp::Delete { key });
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Key and value bytes carried by the batch.
    pub fn approximate_bytes(&self) -> usize {
        self.bytes
    }

    /// Queued operations in submission order.
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub(crate) fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.bytes + self.ops.len() * 9);
        ord::put_u32(&mut out, self.ops.len() as u32);
        for op in &self.ops {
            match op {
                BatchOp::Put { key, value } => {
                    out.push(OP_PUT);
                    put_bytes(&mut out, key);
                    put_bytes(&mut out, value);
                }
                BatchOp::Merge { key, operand } => {
                    out.push(OP_MERGE);
                    put_bytes(&mut out, key);
                    put_bytes(&mut out, operand);
                }
                BatchOp::Delete { key } => {
                    out.push(OP_DELETE);
                    put_bytes(&mut out, key);
                }
            }
        }
        out
    }

    pub(crate) fn decode(src: &[u8]) -> Result<Self, IndexError> {
        const TRUNCATED: IndexError = IndexError::Corruption("write batch truncated");
        let mut cur = Cursor::new(src);
        let count = cur.u32().ok_or(TRUNCATED)?;
        let mut batch = WriteBatch::new();
        for _ in 0..count {
            let tag = cur.u8().ok_or(TRUNCATED)?;
            let key = cur.len_prefixed().ok_or(TRUNCATED)?;
            match tag {
                OP_PUT => batch.put(key, cur.len_prefixed().ok_or(TRUNCATED)?),
                OP_MERGE => batch.merge(key, cur.len_prefixed().ok_or(TRUNCATED)?),
                OP_DELETE => batch.delete(key),
                _ => return Err(IndexError::Corruption("unknown write batch op")),
            }
        }
        if !cur.is_empty() {
            return Err(IndexError::Corruption("trailing bytes after write batch"));
        }
        Ok(batch)
    }
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    ord::put_u32(out, bytes.len() as u32);
    out.extend_from_slice(bytes);
}
