//! The dataset engine: versioned append-only change storage with a
//! deletion-aware materialized view, eager relation index maintenance,
//! fullsync admission and the dataset catalog.
//!
//! Writers within one dataset are serialized through a per-dataset lock held
//! across sequence assignment and the atomic batch commit. Readers never
//! take that lock; every read is one consistent scan against the store.

use std::{
    collections::{
        BTreeMap,
        HashMap,
        HashSet,
    },
    sync::Arc,
    time::{
        Duration,
        SystemTime,
        UNIX_EPOCH,
    },
};

use anyhow::Context;
use common::{
    document::{
        BatchContext,
        Continuation,
        Entity,
        EntityBody,
        PageContext,
        PageItem,
    },
    knobs::{
        DEFAULT_PAGE_LIMIT,
        FULLSYNC_LEASE_TIMEOUT,
        MAX_INGEST_BATCH_SIZE,
    },
    pagination::{
        Cursor,
        ScanKind,
    },
    InternalId,
    SequenceNumber,
};
use errors::ErrorMetadata;
use keyvalue::{
    prefix_end,
    KeyValue,
    Order,
    WriteBatch,
};
use parking_lot::Mutex;
use serde_json::Value as JsonValue;

use crate::{
    catalog::{
        dataset_not_found,
        invalid_proxy_configuration,
        CreateDatasetRequest,
        DatasetKind,
        DatasetMeta,
        CORE_DATASET,
    },
    fullsync::{
        Admission,
        FullSyncDirectives,
        FullSyncTracker,
    },
    ids::IdAllocator,
    keys,
    namespaces::{
        NamespaceRegistry,
        CORE_DATASET_NAMESPACE,
        CORE_VOCABULARY_NAMESPACE,
        RDF_NAMESPACE,
    },
    relations::{
        triples_of,
        ResolvedDelta,
    },
};

const DELETION_SCAN_CHUNK: usize = 4096;

#[derive(Clone, Debug)]
pub struct DatabaseOptions {
    pub fullsync_lease_timeout: Duration,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            fullsync_lease_timeout: *FULLSYNC_LEASE_TIMEOUT,
        }
    }
}

pub struct Database {
    kv: Arc<dyn KeyValue>,
    namespaces: NamespaceRegistry,
    ids: IdAllocator,
    fullsync: FullSyncTracker,
    datasets: Mutex<HashMap<String, Arc<DatasetHandle>>>,
    /// Serializes catalog mutations (create/delete dataset).
    meta_lock: tokio::sync::Mutex<()>,
}

struct DatasetHandle {
    write_lock: tokio::sync::Mutex<WriteState>,
}

#[derive(Default)]
struct WriteState {
    next_seq: Option<SequenceNumber>,
}

/// One entity version after batch-context translation: everything is in hub
/// prefixes, ready to commit.
#[derive(Clone, Debug)]
pub struct NewVersion {
    pub id: String,
    pub deleted: bool,
    pub props: BTreeMap<String, JsonValue>,
    pub refs: BTreeMap<String, JsonValue>,
}

impl Database {
    pub async fn load(kv: Arc<dyn KeyValue>, options: DatabaseOptions) -> anyhow::Result<Arc<Self>> {
        let namespaces = NamespaceRegistry::load(kv.clone()).await?;
        let ids = IdAllocator::load(kv.clone()).await?;
        let db = Arc::new(Self {
            kv,
            namespaces,
            ids,
            fullsync: FullSyncTracker::new(options.fullsync_lease_timeout),
            datasets: Mutex::new(HashMap::new()),
            meta_lock: tokio::sync::Mutex::new(()),
        });
        // The catalog dataset describes every dataset, itself included.
        if db.meta(CORE_DATASET).await?.is_none() {
            db.create_dataset(CORE_DATASET, CreateDatasetRequest::default(), false)
                .await?;
        }
        Ok(db)
    }

    pub fn namespaces(&self) -> &NamespaceRegistry {
        &self.namespaces
    }

    pub(crate) fn kv(&self) -> &dyn KeyValue {
        self.kv.as_ref()
    }

    pub(crate) fn ids(&self) -> &IdAllocator {
        &self.ids
    }

    // Catalog ------------------------------------------------------------

    pub async fn meta(&self, name: &str) -> anyhow::Result<Option<DatasetMeta>> {
        match self.kv.get(&keys::dataset_meta(name)).await? {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).context("corrupt dataset meta")?,
            )),
            None => Ok(None),
        }
    }

    pub async fn require_meta(&self, name: &str) -> anyhow::Result<DatasetMeta> {
        self.meta(name)
            .await?
            .ok_or_else(|| dataset_not_found(name).into())
    }

    pub async fn list_metas(&self) -> anyhow::Result<Vec<DatasetMeta>> {
        let end = prefix_end(keys::DATASET_META_PREFIX);
        let rows = self
            .kv
            .range(keys::DATASET_META_PREFIX, end.as_deref(), Order::Asc, usize::MAX)
            .await?;
        let mut metas = Vec::with_capacity(rows.len());
        for (_, value) in rows {
            metas.push(serde_json::from_slice(&value).context("corrupt dataset meta")?);
        }
        Ok(metas)
    }

    pub async fn create_dataset(
        &self,
        name: &str,
        request: CreateDatasetRequest,
        proxy: bool,
    ) -> anyhow::Result<()> {
        if name.is_empty() || name.contains('/') {
            anyhow::bail!(ErrorMetadata::bad_request(
                "InvalidDatasetName",
                format!("{name:?} is not a valid dataset name"),
            ));
        }
        let proxy_config = if proxy {
            let config = request
                .proxy_dataset_config
                .ok_or_else(invalid_proxy_configuration)?;
            config.validate()?;
            Some(config)
        } else {
            None
        };

        let _guard = self.meta_lock.lock().await;
        let kind = if proxy {
            DatasetKind::Proxy
        } else {
            DatasetKind::Regular
        };
        match self.meta(name).await? {
            Some(existing) if existing.kind != kind => {
                anyhow::bail!(ErrorMetadata::bad_request(
                    "DatasetKindMismatch",
                    format!("dataset {name} already exists with a different kind"),
                ));
            },
            Some(_) => {},
            None => {
                let id = self.allocate_dataset_id().await?;
                let meta = DatasetMeta {
                    id,
                    name: name.to_string(),
                    kind,
                    proxy: proxy_config,
                    public_namespaces: request.public_namespaces.unwrap_or_default(),
                };
                let mut batch = WriteBatch::new();
                batch.put(keys::dataset_meta(name), serde_json::to_vec(&meta)?);
                self.kv.write(batch).await?;
                tracing::info!("Created {kind:?} dataset {name} (id {id})");
            },
        }
        self.write_catalog_entity(name, kind, false).await
    }

    pub async fn delete_dataset(&self, name: &str) -> anyhow::Result<()> {
        if name == CORE_DATASET {
            anyhow::bail!(ErrorMetadata::bad_request(
                "CannotDeleteCoreDataset",
                "the catalog dataset cannot be deleted",
            ));
        }
        let _guard = self.meta_lock.lock().await;
        let meta = self.require_meta(name).await?;
        self.write_catalog_entity(name, meta.kind, true).await?;
        let mut batch = WriteBatch::new();
        batch.delete(keys::dataset_meta(name));
        self.kv.write(batch).await?;
        self.fullsync.forget(name);
        {
            let mut datasets = self.datasets.lock();
            datasets.remove(name);
        }
        // Reclaim the dataset's keyspace right away; the dataset id is never
        // reused so a crash mid-reclaim only leaves unreachable keys.
        for prefix in [
            keys::changes_prefix(meta.id),
            keys::latest_prefix(meta.id),
            keys::rel_out_prefix_root(meta.id),
            keys::rel_in_prefix_root(meta.id),
        ] {
            self.purge_prefix(&prefix).await?;
        }
        tracing::info!("Deleted dataset {name} (id {})", meta.id);
        Ok(())
    }

    async fn purge_prefix(&self, prefix: &[u8]) -> anyhow::Result<()> {
        let end = prefix_end(prefix);
        loop {
            let rows = self
                .kv
                .range(prefix, end.as_deref(), Order::Asc, DELETION_SCAN_CHUNK)
                .await?;
            if rows.is_empty() {
                return Ok(());
            }
            let mut batch = WriteBatch::new();
            for (key, _) in rows {
                batch.delete(key);
            }
            self.kv.write(batch).await?;
        }
    }

    /// The catalog entity for one dataset, from the core dataset's view.
    pub async fn dataset_entity(&self, name: &str) -> anyhow::Result<Entity> {
        let core = self.require_meta(CORE_DATASET).await?;
        let ns0 = self.core_prefix(CORE_DATASET_NAMESPACE)?;
        let id = format!("{ns0}:{name}");
        let internal = self
            .ids
            .lookup_entity(&id)
            .await?
            .ok_or_else(|| dataset_not_found(name))?;
        match self.latest_version(core.id, internal).await? {
            Some(entity) if !entity.deleted => Ok(entity),
            _ => Err(dataset_not_found(name).into()),
        }
    }

    /// All live catalog entities, the core dataset's own included.
    pub async fn list_datasets(&self) -> anyhow::Result<Vec<Entity>> {
        let core = self.require_meta(CORE_DATASET).await?;
        let prefix = keys::latest_prefix(core.id);
        let end = prefix_end(&prefix);
        let rows = self
            .kv
            .range(&prefix, end.as_deref(), Order::Asc, usize::MAX)
            .await?;
        let mut entities = Vec::new();
        for (_, value) in rows {
            let entity: Entity = serde_json::from_slice(&value).context("corrupt catalog entity")?;
            if !entity.deleted {
                entities.push(entity);
            }
        }
        Ok(entities)
    }

    async fn allocate_dataset_id(&self) -> anyhow::Result<u32> {
        let next = match self.kv.get(keys::GLOBAL_NEXT_DATASET_ID).await? {
            Some(bytes) => u32::from_be_bytes(
                bytes
                    .as_slice()
                    .try_into()
                    .context("corrupt dataset id allocator state")?,
            ),
            None => 1,
        };
        let mut batch = WriteBatch::new();
        batch.put(
            keys::GLOBAL_NEXT_DATASET_ID.to_vec(),
            (next + 1).to_be_bytes().to_vec(),
        );
        self.kv.write(batch).await?;
        Ok(next)
    }

    fn core_prefix(&self, uri: &str) -> anyhow::Result<String> {
        self.namespaces
            .prefix_for(uri)
            .context("core namespaces are interned at startup")
    }

    async fn write_catalog_entity(
        &self,
        name: &str,
        kind: DatasetKind,
        deleted: bool,
    ) -> anyhow::Result<()> {
        let ns0 = self.core_prefix(CORE_DATASET_NAMESPACE)?;
        let ns1 = self.core_prefix(CORE_VOCABULARY_NAMESPACE)?;
        let ns2 = self.core_prefix(RDF_NAMESPACE)?;
        let type_value = match kind {
            DatasetKind::Regular => format!("{ns1}:dataset"),
            DatasetKind::Proxy => format!("{ns1}:proxy-dataset"),
        };
        let mut props = BTreeMap::new();
        props.insert(format!("{ns1}:name"), JsonValue::String(name.to_string()));
        let mut refs = BTreeMap::new();
        refs.insert(format!("{ns2}:type"), JsonValue::String(type_value));
        let version = NewVersion {
            id: format!("{ns0}:{name}"),
            deleted,
            props,
            refs,
        };
        let core = self.require_meta(CORE_DATASET).await?;
        self.commit(&core, vec![version], Admission::Plain).await?;
        Ok(())
    }

    // Ingest -------------------------------------------------------------

    /// Appends one ingest batch to a regular dataset, honoring fullsync
    /// directives. The whole batch (and, on an end signal, the deletion
    /// sweep) commits atomically.
    pub async fn append(
        &self,
        name: &str,
        context: BatchContext,
        bodies: Vec<EntityBody>,
        directives: FullSyncDirectives,
    ) -> anyhow::Result<()> {
        let meta = self.require_meta(name).await?;
        if meta.kind != DatasetKind::Regular {
            anyhow::bail!(ErrorMetadata::bad_request(
                "NotALocalDataset",
                format!("dataset {name} does not store entities locally"),
            ));
        }
        let versions = self.translate(&context, bodies).await?;
        let admission = self.fullsync.admit(name, &directives)?;
        self.commit(&meta, versions, admission.clone()).await?;
        if let Admission::Sync {
            sync_id,
            deletion_detection: true,
        } = admission
        {
            self.fullsync.finish(name, &sync_id);
        }
        Ok(())
    }

    /// Rewrites a batch from its local context into hub prefixes, interning
    /// namespaces on first sighting.
    async fn translate(
        &self,
        context: &BatchContext,
        bodies: Vec<EntityBody>,
    ) -> anyhow::Result<Vec<NewVersion>> {
        if bodies.len() > *MAX_INGEST_BATCH_SIZE {
            anyhow::bail!(ErrorMetadata::bad_request(
                "BatchTooLarge",
                format!("batches are limited to {} entities", *MAX_INGEST_BATCH_SIZE),
            ));
        }
        let mut versions = Vec::with_capacity(bodies.len());
        for body in bodies {
            let id = body.id.as_deref().unwrap_or_default();
            let id = self.to_hub_curie(context, id).await?;
            let mut props = BTreeMap::new();
            for (predicate, value) in body.props {
                props.insert(self.to_hub_curie(context, &predicate).await?, value);
            }
            let mut refs = BTreeMap::new();
            for (predicate, value) in body.refs {
                let predicate = self.to_hub_curie(context, &predicate).await?;
                let value = match value {
                    JsonValue::String(target) => {
                        JsonValue::String(self.to_hub_curie(context, &target).await?)
                    },
                    JsonValue::Array(targets) => {
                        let mut rewritten = Vec::with_capacity(targets.len());
                        for target in targets {
                            let target = target.as_str().ok_or_else(bad_ref_target)?;
                            rewritten.push(JsonValue::String(
                                self.to_hub_curie(context, target).await?,
                            ));
                        }
                        JsonValue::Array(rewritten)
                    },
                    _ => return Err(bad_ref_target().into()),
                };
                refs.insert(predicate, value);
            }
            versions.push(NewVersion {
                id,
                deleted: body.deleted,
                props,
                refs,
            });
        }
        Ok(versions)
    }

    async fn to_hub_curie(&self, context: &BatchContext, curie: &str) -> anyhow::Result<String> {
        let (uri, suffix) = context.expand(curie)?;
        let prefix = self.namespaces.intern(uri).await?;
        Ok(format!("{prefix}:{suffix}"))
    }

    /// The serialized write path: assigns sequences, maintains the
    /// materialized view and the relation indexes, dedupes unchanged
    /// versions, and (for a fullsync end) folds the deletion sweep into the
    /// same atomic batch. Returns the internal ids the batch touched.
    async fn commit(
        &self,
        meta: &DatasetMeta,
        versions: Vec<NewVersion>,
        admission: Admission,
    ) -> anyhow::Result<Vec<InternalId>> {
        let handle = self.handle(&meta.name);
        let mut state = handle.write_lock.lock().await;
        let first_seq = match state.next_seq {
            Some(seq) => seq,
            None => self.recover_next_seq(meta.id).await?,
        };
        let mut seq = first_seq;
        let mut batch = WriteBatch::new();
        let recorded = now_nanos();
        let mut touched = Vec::with_capacity(versions.len());
        let mut pending: HashMap<InternalId, Entity> = HashMap::new();

        for version in versions {
            let internal = self.ids.entity(&version.id).await?;
            touched.push(internal);
            let prior = match pending.get(&internal) {
                Some(entity) => Some(entity.clone()),
                None => self.latest_version(meta.id, internal).await?,
            };
            let entity = Entity {
                id: version.id,
                internal_id: internal,
                recorded,
                deleted: version.deleted,
                props: version.props,
                refs: version.refs,
            };
            if let Some(prior) = &prior {
                if prior.same_content(&entity) {
                    continue;
                }
            }
            self.index_version(meta.id, seq, prior.as_ref(), &entity, &mut batch)
                .await?;
            let encoded = serde_json::to_vec(&entity)?;
            batch.put(keys::change(meta.id, seq), encoded.clone());
            batch.put(keys::latest(meta.id, internal), encoded);
            pending.insert(internal, entity);
            seq += 1;
        }

        if let Admission::Sync {
            sync_id,
            deletion_detection,
        } = &admission
        {
            // Recorded under the dataset lock: any same-sync append that
            // committed before an end request took the lock is in the seen
            // set the sweep reads.
            self.fullsync
                .record_seen(&meta.name, sync_id, touched.iter().copied());
            if *deletion_detection {
                let seen = self.fullsync.seen(&meta.name, sync_id);
                seq = self
                    .sweep_unseen(meta, &seen, seq, recorded, &mut batch)
                    .await?;
            }
        }

        if !batch.is_empty() {
            self.kv.write(batch).await?;
        }
        state.next_seq = Some(seq);
        Ok(touched)
    }

    /// Emits a `deleted=true` change for every live entity the fullsync did
    /// not see. Appended to the in-flight batch so the final batch and the
    /// sweep commit together.
    async fn sweep_unseen(
        &self,
        meta: &DatasetMeta,
        seen: &HashSet<InternalId>,
        mut seq: SequenceNumber,
        recorded: u64,
        batch: &mut WriteBatch,
    ) -> anyhow::Result<SequenceNumber> {
        let prefix = keys::latest_prefix(meta.id);
        let end = prefix_end(&prefix);
        let mut floor = 0u64;
        let mut swept = 0usize;
        loop {
            let rows = self
                .kv
                .range(
                    &keys::latest(meta.id, floor),
                    end.as_deref(),
                    Order::Asc,
                    DELETION_SCAN_CHUNK,
                )
                .await?;
            let Some((last_key, _)) = rows.last() else {
                break;
            };
            floor = keys::trailing_u64(last_key)? + 1;
            let full_chunk = rows.len() == DELETION_SCAN_CHUNK;
            for (key, value) in rows {
                let internal = keys::trailing_u64(&key)?;
                if seen.contains(&internal) {
                    continue;
                }
                let prior: Entity =
                    serde_json::from_slice(&value).context("corrupt materialized entity")?;
                if prior.deleted {
                    continue;
                }
                let mut tombstone = prior.clone();
                tombstone.deleted = true;
                tombstone.recorded = recorded;
                self.index_version(meta.id, seq, Some(&prior), &tombstone, batch)
                    .await?;
                let encoded = serde_json::to_vec(&tombstone)?;
                batch.put(keys::change(meta.id, seq), encoded.clone());
                batch.put(keys::latest(meta.id, internal), encoded);
                seq += 1;
                swept += 1;
            }
            if !full_chunk {
                break;
            }
        }
        if swept > 0 {
            tracing::info!(
                "Fullsync deletion sweep on {} removed {swept} entities",
                meta.name
            );
        }
        Ok(seq)
    }

    /// Diffs the prior version's triples against the new version's and
    /// mirrors the difference into both relation indexes.
    async fn index_version(
        &self,
        dataset: u32,
        seq: SequenceNumber,
        prior: Option<&Entity>,
        next: &Entity,
        batch: &mut WriteBatch,
    ) -> anyhow::Result<()> {
        let prior_triples = prior.map(triples_of).unwrap_or_default();
        let next_triples = triples_of(next);
        let subject = next.internal_id;
        for (predicate, target) in prior_triples.difference(&next_triples) {
            let delta = ResolvedDelta {
                subject,
                predicate: self.ids.predicate(predicate).await?,
                object: self.ids.entity(target).await?,
                insert: false,
            };
            delta.apply(dataset, seq, batch);
        }
        for (predicate, target) in next_triples.difference(&prior_triples) {
            let delta = ResolvedDelta {
                subject,
                predicate: self.ids.predicate(predicate).await?,
                object: self.ids.entity(target).await?,
                insert: true,
            };
            delta.apply(dataset, seq, batch);
        }
        Ok(())
    }

    async fn recover_next_seq(&self, dataset: u32) -> anyhow::Result<SequenceNumber> {
        let prefix = keys::changes_prefix(dataset);
        let end = prefix_end(&prefix);
        let rows = self
            .kv
            .range(&prefix, end.as_deref(), Order::Desc, 1)
            .await?;
        match rows.first() {
            Some((key, _)) => Ok(keys::trailing_u64(key)? + 1),
            None => Ok(1),
        }
    }

    fn handle(&self, name: &str) -> Arc<DatasetHandle> {
        let mut datasets = self.datasets.lock();
        datasets
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(DatasetHandle {
                    write_lock: tokio::sync::Mutex::new(WriteState::default()),
                })
            })
            .clone()
    }

    // Reads --------------------------------------------------------------

    pub(crate) async fn latest_version(
        &self,
        dataset: u32,
        internal: InternalId,
    ) -> anyhow::Result<Option<Entity>> {
        match self.kv.get(&keys::latest(dataset, internal)).await? {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).context("corrupt materialized entity")?,
            )),
            None => Ok(None),
        }
    }

    /// One page of the change log, in ascending sequence order.
    pub async fn changes_page(
        &self,
        name: &str,
        since: Option<&str>,
        limit: Option<usize>,
    ) -> anyhow::Result<Vec<PageItem>> {
        let meta = self.require_local(name).await?;
        let floor = match since {
            Some(token) => Cursor::decode(token, ScanKind::Changes, meta.id)?.floor,
            None => 1,
        };
        let limit = page_limit(limit);
        let prefix = keys::changes_prefix(meta.id);
        let end = prefix_end(&prefix);
        let rows = self
            .kv
            .range(&keys::change(meta.id, floor), end.as_deref(), Order::Asc, limit)
            .await?;
        let mut next_floor = floor;
        let mut page = self.page_header();
        for (key, value) in rows {
            next_floor = keys::trailing_u64(&key)? + 1;
            let entity: Entity = serde_json::from_slice(&value).context("corrupt change record")?;
            page.push(PageItem::Entity(entity));
        }
        page.push(PageItem::Continuation(Continuation::new(
            Cursor::new(ScanKind::Changes, meta.id, next_floor).encode(),
        )));
        Ok(page)
    }

    /// One page of the materialized view, in ascending internal id order.
    /// Deleted entities are included with `deleted: true`.
    pub async fn entities_page(
        &self,
        name: &str,
        from: Option<&str>,
        limit: Option<usize>,
    ) -> anyhow::Result<Vec<PageItem>> {
        let meta = self.require_local(name).await?;
        let floor = match from {
            Some(token) => Cursor::decode(token, ScanKind::Entities, meta.id)?.floor,
            None => 0,
        };
        let limit = page_limit(limit);
        let prefix = keys::latest_prefix(meta.id);
        let end = prefix_end(&prefix);
        let rows = self
            .kv
            .range(&keys::latest(meta.id, floor), end.as_deref(), Order::Asc, limit)
            .await?;
        let mut next_floor = floor;
        let mut page = self.page_header();
        for (key, value) in rows {
            next_floor = keys::trailing_u64(&key)? + 1;
            let entity: Entity =
                serde_json::from_slice(&value).context("corrupt materialized entity")?;
            page.push(PageItem::Entity(entity));
        }
        page.push(PageItem::Continuation(Continuation::new(
            Cursor::new(ScanKind::Entities, meta.id, next_floor).encode(),
        )));
        Ok(page)
    }

    async fn require_local(&self, name: &str) -> anyhow::Result<DatasetMeta> {
        let meta = self.require_meta(name).await?;
        anyhow::ensure!(
            meta.kind == DatasetKind::Regular,
            ErrorMetadata::bad_request(
                "NotALocalDataset",
                format!("dataset {name} does not store entities locally"),
            )
        );
        Ok(meta)
    }

    fn page_header(&self) -> Vec<PageItem> {
        vec![PageItem::Context(PageContext::new(self.namespaces.all()))]
    }
}

fn page_limit(limit: Option<usize>) -> usize {
    limit
        .unwrap_or(*DEFAULT_PAGE_LIMIT)
        .min(*DEFAULT_PAGE_LIMIT)
}

fn bad_ref_target() -> ErrorMetadata {
    ErrorMetadata::bad_request(
        "InvalidReference",
        "refs values must be a target id or a list of target ids",
    )
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
