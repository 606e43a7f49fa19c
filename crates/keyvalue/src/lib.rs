//! The ordered key/value substrate the engine is built on: a sorted byte
//! keyspace with bounded range scans and atomic write batches.
//!
//! Two implementations: [`SqliteKeyValue`] for real deployments and
//! [`MemoryKeyValue`] for tests. Both serialize concurrent access internally,
//! which makes every individual call atomic with respect to writes.

mod memory;
mod sqlite;

use async_trait::async_trait;
pub use memory::MemoryKeyValue;
pub use sqlite::SqliteKeyValue;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Order {
    Asc,
    Desc,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// An ordered set of writes applied all-or-nothing.
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(WriteOp::Put {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(WriteOp::Delete { key: key.into() });
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

#[async_trait]
pub trait KeyValue: Send + Sync + 'static {
    /// Whether the store was created by this process (no prior state).
    fn is_fresh(&self) -> bool;

    async fn get(&self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>>;

    /// Scans `[start, end)` (or to the end of the keyspace when `end` is
    /// `None`) in the given order, returning at most `limit` pairs.
    async fn range(
        &self,
        start: &[u8],
        end: Option<&[u8]>,
        order: Order,
        limit: usize,
    ) -> anyhow::Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Applies the batch atomically. Later ops win over earlier ops on the
    /// same key.
    async fn write(&self, batch: WriteBatch) -> anyhow::Result<()>;
}

/// The exclusive upper bound covering exactly the keys starting with
/// `prefix`, or `None` when the prefix is all `0xff` bytes.
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last() {
        if *last < 0xff {
            *end.last_mut().expect("nonempty") += 1;
            return Some(end);
        }
        end.pop();
    }
    None
}
