use std::{
    collections::BTreeMap,
    ops::Bound,
    sync::Arc,
};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{
    KeyValue,
    Order,
    WriteBatch,
    WriteOp,
};

/// In-memory store for tests. Range scans copy the matching window out under
/// the read lock, so each call observes a consistent snapshot.
#[derive(Clone, Default)]
pub struct MemoryKeyValue {
    inner: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryKeyValue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValue for MemoryKeyValue {
    fn is_fresh(&self) -> bool {
        true
    }

    async fn get(&self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.inner.read().get(key).cloned())
    }

    async fn range(
        &self,
        start: &[u8],
        end: Option<&[u8]>,
        order: Order,
        limit: usize,
    ) -> anyhow::Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let map = self.inner.read();
        let upper = match end {
            Some(end) => Bound::Excluded(end.to_vec()),
            None => Bound::Unbounded,
        };
        let window = map.range((Bound::Included(start.to_vec()), upper));
        let rows = match order {
            Order::Asc => window
                .take(limit)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            Order::Desc => window
                .rev()
                .take(limit)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        Ok(rows)
    }

    async fn write(&self, batch: WriteBatch) -> anyhow::Result<()> {
        let mut map = self.inner.write();
        for op in batch.into_ops() {
            match op {
                WriteOp::Put { key, value } => {
                    map.insert(key, value);
                },
                WriteOp::Delete { key } => {
                    map.remove(&key);
                },
            }
        }
        Ok(())
    }
}
