//! Physical key layout of the hub's keyspace.
//!
//! All integers are big-endian so byte order equals numeric order, which is
//! what makes the change log, the materialized view and the relation indexes
//! range-scannable in their natural orders.
//!
//! ```text
//! global/namespaces                  registry JSON {uri -> prefix}
//! global/next_internal_id            u64 allocator state
//! global/next_dataset_id             u32 allocator state
//! meta/dataset/<name>                DatasetMeta JSON
//! ids/entity/<entity id>             u64 internal id
//! ids/internal/<u64>                 entity id string
//! ids/predicate/<predicate>          u64 predicate id
//! ids/predicate_rev/<u64>            predicate string
//! changes/<ds u32>/<seq u64>         Entity JSON (one change)
//! latest/<ds u32>/<internal u64>     Entity JSON (highest-seq version)
//! rel/out/<ds>/<subj>/<pred>/<obj>   u64 seq
//! rel/in/<ds>/<obj>/<pred>/<subj>    u64 seq
//! logins/<provider name>             provider config JSON
//! ```

use common::InternalId;

pub const GLOBAL_NAMESPACES: &[u8] = b"global/namespaces";
pub const GLOBAL_NEXT_INTERNAL_ID: &[u8] = b"global/next_internal_id";
pub const GLOBAL_NEXT_DATASET_ID: &[u8] = b"global/next_dataset_id";

pub const DATASET_META_PREFIX: &[u8] = b"meta/dataset/";

pub fn dataset_meta(name: &str) -> Vec<u8> {
    [DATASET_META_PREFIX, name.as_bytes()].concat()
}

pub fn entity_id(id: &str) -> Vec<u8> {
    [b"ids/entity/", id.as_bytes()].concat()
}

pub fn internal_id(id: InternalId) -> Vec<u8> {
    [b"ids/internal/" as &[u8], &id.to_be_bytes()].concat()
}

pub fn predicate_id(predicate: &str) -> Vec<u8> {
    [b"ids/predicate/", predicate.as_bytes()].concat()
}

pub fn predicate_rev(id: InternalId) -> Vec<u8> {
    [b"ids/predicate_rev/" as &[u8], &id.to_be_bytes()].concat()
}

pub fn change(dataset: u32, seq: u64) -> Vec<u8> {
    [&changes_prefix(dataset)[..], &seq.to_be_bytes()].concat()
}

pub fn changes_prefix(dataset: u32) -> Vec<u8> {
    [b"changes/" as &[u8], &dataset.to_be_bytes(), b"/"].concat()
}

pub fn latest(dataset: u32, internal: InternalId) -> Vec<u8> {
    [&latest_prefix(dataset)[..], &internal.to_be_bytes()].concat()
}

pub fn latest_prefix(dataset: u32) -> Vec<u8> {
    [b"latest/" as &[u8], &dataset.to_be_bytes(), b"/"].concat()
}

pub fn rel_out(dataset: u32, subject: InternalId, predicate: InternalId, object: InternalId) -> Vec<u8> {
    [
        &rel_out_prefix(dataset, subject)[..],
        &predicate.to_be_bytes(),
        &object.to_be_bytes(),
    ]
    .concat()
}

pub fn rel_out_prefix(dataset: u32, subject: InternalId) -> Vec<u8> {
    [
        b"rel/out/" as &[u8],
        &dataset.to_be_bytes(),
        b"/",
        &subject.to_be_bytes(),
    ]
    .concat()
}

pub fn rel_in(dataset: u32, object: InternalId, predicate: InternalId, subject: InternalId) -> Vec<u8> {
    [
        &rel_in_prefix(dataset, object)[..],
        &predicate.to_be_bytes(),
        &subject.to_be_bytes(),
    ]
    .concat()
}

pub fn rel_in_prefix(dataset: u32, object: InternalId) -> Vec<u8> {
    [
        b"rel/in/" as &[u8],
        &dataset.to_be_bytes(),
        b"/",
        &object.to_be_bytes(),
    ]
    .concat()
}

/// Prefix covering a dataset's entire outgoing index.
pub fn rel_out_prefix_root(dataset: u32) -> Vec<u8> {
    [b"rel/out/" as &[u8], &dataset.to_be_bytes(), b"/"].concat()
}

/// Prefix covering a dataset's entire inverse index.
pub fn rel_in_prefix_root(dataset: u32) -> Vec<u8> {
    [b"rel/in/" as &[u8], &dataset.to_be_bytes(), b"/"].concat()
}

/// Decodes the trailing u64 of a key (sequence numbers, internal ids).
pub fn trailing_u64(key: &[u8]) -> anyhow::Result<u64> {
    let len = key.len();
    anyhow::ensure!(len >= 8, "key too short for a trailing u64");
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&key[len - 8..]);
    Ok(u64::from_be_bytes(buf))
}

/// Decodes the trailing `(predicate, neighbor)` pair of a relation index key.
pub fn trailing_u64_pair(key: &[u8]) -> anyhow::Result<(u64, u64)> {
    let len = key.len();
    anyhow::ensure!(len >= 16, "key too short for a relation entry");
    let mut pred = [0u8; 8];
    let mut neighbor = [0u8; 8];
    pred.copy_from_slice(&key[len - 16..len - 8]);
    neighbor.copy_from_slice(&key[len - 8..]);
    Ok((u64::from_be_bytes(pred), u64::from_be_bytes(neighbor)))
}
