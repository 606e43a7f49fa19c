//! Internal id allocation.
//!
//! Entity ids and predicates are interned to monotonically increasing `u64`s
//! on first sighting. The mapping is global to the store (relation index
//! keys reference ids across datasets) so assignment is serialized through
//! one allocator. Assignments are written through immediately: if the commit
//! that triggered an assignment later fails, the burned id is harmless.

use std::{
    collections::HashMap,
    sync::Arc,
};

use anyhow::Context;
use common::InternalId;
use keyvalue::{
    KeyValue,
    WriteBatch,
};
use tokio::sync::Mutex;

use crate::keys;

pub struct IdAllocator {
    kv: Arc<dyn KeyValue>,
    inner: Mutex<Inner>,
}

struct Inner {
    next: InternalId,
    entities: HashMap<String, InternalId>,
    predicates: HashMap<String, InternalId>,
    predicates_rev: HashMap<InternalId, String>,
}

impl IdAllocator {
    pub async fn load(kv: Arc<dyn KeyValue>) -> anyhow::Result<Self> {
        let next = match kv.get(keys::GLOBAL_NEXT_INTERNAL_ID).await? {
            Some(bytes) => u64::from_be_bytes(
                bytes
                    .as_slice()
                    .try_into()
                    .context("corrupt internal id allocator state")?,
            ),
            None => 1,
        };
        Ok(Self {
            kv,
            inner: Mutex::new(Inner {
                next,
                entities: HashMap::new(),
                predicates: HashMap::new(),
                predicates_rev: HashMap::new(),
            }),
        })
    }

    /// The internal id for an entity id, assigned on first sighting.
    pub async fn entity(&self, id: &str) -> anyhow::Result<InternalId> {
        let mut inner = self.inner.lock().await;
        if let Some(internal) = inner.entities.get(id) {
            return Ok(*internal);
        }
        if let Some(bytes) = self.kv.get(&keys::entity_id(id)).await? {
            let internal = u64::from_be_bytes(
                bytes
                    .as_slice()
                    .try_into()
                    .context("corrupt entity id mapping")?,
            );
            inner.entities.insert(id.to_string(), internal);
            return Ok(internal);
        }
        let internal = inner.next;
        inner.next += 1;
        let mut batch = WriteBatch::new();
        batch.put(keys::entity_id(id), internal.to_be_bytes().to_vec());
        batch.put(keys::internal_id(internal), id.as_bytes().to_vec());
        batch.put(
            keys::GLOBAL_NEXT_INTERNAL_ID.to_vec(),
            inner.next.to_be_bytes().to_vec(),
        );
        self.kv.write(batch).await?;
        inner.entities.insert(id.to_string(), internal);
        Ok(internal)
    }

    /// Looks up an entity id without assigning. Used by queries, where an
    /// unknown starting id simply has no neighbors.
    pub async fn lookup_entity(&self, id: &str) -> anyhow::Result<Option<InternalId>> {
        {
            let inner = self.inner.lock().await;
            if let Some(internal) = inner.entities.get(id) {
                return Ok(Some(*internal));
            }
        }
        match self.kv.get(&keys::entity_id(id)).await? {
            Some(bytes) => {
                let internal = u64::from_be_bytes(
                    bytes
                        .as_slice()
                        .try_into()
                        .context("corrupt entity id mapping")?,
                );
                self.inner
                    .lock()
                    .await
                    .entities
                    .insert(id.to_string(), internal);
                Ok(Some(internal))
            },
            None => Ok(None),
        }
    }

    /// The entity id string for an internal id, when one was ever assigned.
    pub async fn entity_for(&self, internal: InternalId) -> anyhow::Result<Option<String>> {
        match self.kv.get(&keys::internal_id(internal)).await? {
            Some(bytes) => Ok(Some(
                String::from_utf8(bytes).context("corrupt entity reverse mapping")?,
            )),
            None => Ok(None),
        }
    }

    /// The internal id for a (hub-prefixed) predicate, assigned on first
    /// sighting. Predicates share the entity counter; uniqueness is all the
    /// relation index needs.
    pub async fn predicate(&self, predicate: &str) -> anyhow::Result<InternalId> {
        let mut inner = self.inner.lock().await;
        if let Some(internal) = inner.predicates.get(predicate) {
            return Ok(*internal);
        }
        if let Some(bytes) = self.kv.get(&keys::predicate_id(predicate)).await? {
            let internal = u64::from_be_bytes(
                bytes
                    .as_slice()
                    .try_into()
                    .context("corrupt predicate mapping")?,
            );
            inner.predicates.insert(predicate.to_string(), internal);
            inner.predicates_rev.insert(internal, predicate.to_string());
            return Ok(internal);
        }
        let internal = inner.next;
        inner.next += 1;
        let mut batch = WriteBatch::new();
        batch.put(keys::predicate_id(predicate), internal.to_be_bytes().to_vec());
        batch.put(keys::predicate_rev(internal), predicate.as_bytes().to_vec());
        batch.put(
            keys::GLOBAL_NEXT_INTERNAL_ID.to_vec(),
            inner.next.to_be_bytes().to_vec(),
        );
        self.kv.write(batch).await?;
        inner.predicates.insert(predicate.to_string(), internal);
        inner.predicates_rev.insert(internal, predicate.to_string());
        Ok(internal)
    }

    pub async fn lookup_predicate(&self, predicate: &str) -> anyhow::Result<Option<InternalId>> {
        {
            let inner = self.inner.lock().await;
            if let Some(internal) = inner.predicates.get(predicate) {
                return Ok(Some(*internal));
            }
        }
        match self.kv.get(&keys::predicate_id(predicate)).await? {
            Some(bytes) => {
                let internal = u64::from_be_bytes(
                    bytes
                        .as_slice()
                        .try_into()
                        .context("corrupt predicate mapping")?,
                );
                let mut inner = self.inner.lock().await;
                inner.predicates.insert(predicate.to_string(), internal);
                inner.predicates_rev.insert(internal, predicate.to_string());
                Ok(Some(internal))
            },
            None => Ok(None),
        }
    }

    /// The predicate string for an interned predicate id.
    pub async fn predicate_for(&self, internal: InternalId) -> anyhow::Result<Option<String>> {
        {
            let inner = self.inner.lock().await;
            if let Some(predicate) = inner.predicates_rev.get(&internal) {
                return Ok(Some(predicate.clone()));
            }
        }
        match self.kv.get(&keys::predicate_rev(internal)).await? {
            Some(bytes) => {
                let predicate =
                    String::from_utf8(bytes).context("corrupt predicate reverse mapping")?;
                let mut inner = self.inner.lock().await;
                inner.predicates.insert(predicate.clone(), internal);
                inner.predicates_rev.insert(internal, predicate.clone());
                Ok(Some(predicate))
            },
            None => Ok(None),
        }
    }
}
