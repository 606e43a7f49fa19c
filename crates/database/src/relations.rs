//! The relation index: outgoing and inverse reference entries derived from
//! each committed change.
//!
//! Keys are `(dataset, subject, predicate, object)` for the outgoing index
//! and `(dataset, object, predicate, subject)` for the inverse one, so both
//! are prefix-scannable by their first id. When a new version of a subject
//! commits, the previous version's triples are diffed against the new set:
//! entries that disappeared are retracted, new ones inserted, unchanged ones
//! left alone. A deleted version retracts everything.

use std::collections::BTreeSet;

use common::{
    document::Entity,
    InternalId,
    SequenceNumber,
};
use keyvalue::{
    prefix_end,
    KeyValue,
    Order,
    WriteBatch,
};

use crate::keys;

/// One outgoing reference in hub-prefixed form.
pub type Triple = (String, String);

/// The `(predicate, target)` pairs a version contributes to the index.
/// A deleted version contributes nothing.
pub fn triples_of(entity: &Entity) -> BTreeSet<Triple> {
    let mut triples = BTreeSet::new();
    if entity.deleted {
        return triples;
    }
    for (predicate, targets) in entity.ref_targets() {
        for target in targets {
            triples.insert((predicate.to_string(), target.to_string()));
        }
    }
    triples
}

/// A resolved index mutation: the same `(s, p, o)` mirrored into both
/// indexes, inserted or retracted.
pub struct ResolvedDelta {
    pub subject: InternalId,
    pub predicate: InternalId,
    pub object: InternalId,
    pub insert: bool,
}

impl ResolvedDelta {
    pub fn apply(&self, dataset: u32, seq: SequenceNumber, batch: &mut WriteBatch) {
        let out = keys::rel_out(dataset, self.subject, self.predicate, self.object);
        let inv = keys::rel_in(dataset, self.object, self.predicate, self.subject);
        if self.insert {
            let value = seq.to_be_bytes().to_vec();
            batch.put(out, value.clone());
            batch.put(inv, value);
        } else {
            batch.delete(out);
            batch.delete(inv);
        }
    }
}

/// A raw relation index entry read back from a scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub predicate: InternalId,
    pub neighbor: InternalId,
}

/// All outgoing entries for a subject, in key (predicate, object) order.
pub async fn scan_outgoing(
    kv: &dyn KeyValue,
    dataset: u32,
    subject: InternalId,
) -> anyhow::Result<Vec<IndexEntry>> {
    scan(kv, keys::rel_out_prefix(dataset, subject)).await
}

/// All inverse entries for an object, in key (predicate, subject) order.
pub async fn scan_inverse(
    kv: &dyn KeyValue,
    dataset: u32,
    object: InternalId,
) -> anyhow::Result<Vec<IndexEntry>> {
    scan(kv, keys::rel_in_prefix(dataset, object)).await
}

async fn scan(kv: &dyn KeyValue, prefix: Vec<u8>) -> anyhow::Result<Vec<IndexEntry>> {
    let end = prefix_end(&prefix);
    let rows = kv
        .range(&prefix, end.as_deref(), Order::Asc, usize::MAX)
        .await?;
    let mut entries = Vec::with_capacity(rows.len());
    for (key, _) in rows {
        let (predicate, neighbor) = keys::trailing_u64_pair(&key)?;
        entries.push(IndexEntry {
            predicate,
            neighbor,
        });
    }
    Ok(entries)
}
