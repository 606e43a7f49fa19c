//! The graph query engine: single-id lookup, relation hops over the index
//! with per-start continuations, and the boundary to an external script
//! host.
//!
//! A relation hop walks the outgoing index (descending neighbor order) or
//! the inverse index (ascending). Starting entities are processed in input
//! order; `limit` bounds the total triples per call and the residual scan
//! positions come back as one opaque token per unfinished start.

use std::{
    collections::BTreeMap,
    sync::Arc,
};

use anyhow::Context as _;
use async_trait::async_trait;
use common::{
    document::{
        Entity,
        PageContext,
        PageItem,
    },
    knobs::{
        DEFAULT_PAGE_LIMIT,
        DEFAULT_QUERY_LIMIT,
    },
    InternalId,
};
use errors::ErrorMetadata;
use keyvalue::{
    prefix_end,
    Order,
};
use serde::{
    ser::SerializeSeq,
    Deserialize,
    Serialize,
    Serializer,
};
use serde_json::Value as JsonValue;

use crate::{
    catalog::{
        DatasetKind,
        DatasetMeta,
    },
    database::Database,
    keys,
    relations::{
        scan_inverse,
        scan_outgoing,
    },
};

pub const WILDCARD_PREDICATE: &str = "*";

const RELATION_CURSOR_VERSION: u8 = 1;

/// The JSON body accepted by `POST /query`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    #[serde(default)]
    pub entity_id: Option<String>,

    #[serde(default)]
    pub starting_entities: Option<Vec<String>>,

    #[serde(default)]
    pub predicate: Option<String>,

    #[serde(default)]
    pub inverse: bool,

    #[serde(default)]
    pub limit: Option<usize>,

    #[serde(default)]
    pub continuations: Option<Vec<String>>,

    /// base64 of a script for the external script host.
    #[serde(default)]
    pub query: Option<String>,

    /// Restricts traversal to the named datasets; all regular datasets
    /// otherwise.
    #[serde(default)]
    pub datasets: Option<Vec<String>>,
}

/// A single hop result: `[predicate, startingId, neighborEntity]`.
#[derive(Clone, Debug)]
pub struct Triple {
    pub predicate: String,
    pub start: String,
    pub entity: Entity,
}

impl Serialize for Triple {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(3))?;
        seq.serialize_element(&self.predicate)?;
        seq.serialize_element(&self.start)?;
        seq.serialize_element(&self.entity)?;
        seq.end()
    }
}

/// The relation-hop response envelope `[@context, [triple, ...],
/// continuations]`. The JSON representation is a heterogeneous array for
/// wire compatibility, hence the hand-written serializer.
#[derive(Clone, Debug)]
pub struct HopPage {
    pub context: PageContext,
    pub triples: Vec<Triple>,
    pub continuations: Vec<String>,
}

impl Serialize for HopPage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(3))?;
        seq.serialize_element(&self.context)?;
        seq.serialize_element(&self.triples)?;
        seq.serialize_element(&self.continuations)?;
        seq.end()
    }
}

/// What one query call produced.
pub enum QueryOutcome {
    /// `[@context, entity?]` for single-id lookups.
    Items(Vec<PageItem>),
    Hop(HopPage),
    /// The results a script wrote, verbatim.
    Raw(Vec<JsonValue>),
}

/// Residual scan state for one starting entity, carried between calls as an
/// opaque base64 token.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct RelationCursor {
    v: u8,
    #[serde(rename = "s")]
    start: String,
    #[serde(rename = "p")]
    predicate: String,
    #[serde(rename = "i")]
    inverse: bool,
    #[serde(rename = "d", default, skip_serializing_if = "Vec::is_empty")]
    datasets: Vec<String>,
    /// `(neighbor, predicate)` of the last emitted triple.
    #[serde(rename = "a", default, skip_serializing_if = "Option::is_none")]
    after: Option<(InternalId, InternalId)>,
}

impl RelationCursor {
    fn encode(&self) -> String {
        base64::encode(serde_json::to_vec(self).expect("cursor serialization is infallible"))
    }

    fn decode(token: &str) -> anyhow::Result<Self> {
        let invalid = || {
            ErrorMetadata::bad_request(
                "InvalidQueryContinuation",
                "a query continuation token could not be decoded",
            )
        };
        let bytes = base64::decode(token.trim()).context(invalid())?;
        let cursor: RelationCursor = serde_json::from_slice(&bytes).context(invalid())?;
        anyhow::ensure!(cursor.v == RELATION_CURSOR_VERSION, invalid());
        Ok(cursor)
    }
}

/// The boundary to the embedded scripting runtime. The host runs the script
/// and returns whatever the script wrote as its results; the hub stays
/// agnostic of the scripting language.
#[async_trait]
pub trait ScriptHost: Send + Sync + 'static {
    async fn run(
        &self,
        script: Vec<u8>,
        env: Arc<dyn QueryEnv>,
    ) -> anyhow::Result<Vec<JsonValue>>;
}

/// The reads a script host may perform against the hub.
#[async_trait]
pub trait QueryEnv: Send + Sync + 'static {
    async fn dataset_changes(&self, dataset: &str) -> anyhow::Result<Vec<Entity>>;
    async fn dataset_entities(&self, dataset: &str) -> anyhow::Result<Vec<Entity>>;
}

struct DatabaseQueryEnv {
    db: Arc<Database>,
}

#[async_trait]
impl QueryEnv for DatabaseQueryEnv {
    async fn dataset_changes(&self, dataset: &str) -> anyhow::Result<Vec<Entity>> {
        self.db.dataset_changes(dataset).await
    }

    async fn dataset_entities(&self, dataset: &str) -> anyhow::Result<Vec<Entity>> {
        self.db.dataset_entities(dataset).await
    }
}

/// Dispatches one `POST /query` body to the matching query shape.
pub async fn execute(
    db: &Arc<Database>,
    script_host: Option<&Arc<dyn ScriptHost>>,
    request: QueryRequest,
) -> anyhow::Result<QueryOutcome> {
    if let Some(script) = &request.query {
        let Some(host) = script_host else {
            anyhow::bail!(ErrorMetadata::bad_request(
                "ScriptedQueriesUnavailable",
                "this hub has no script host configured",
            ));
        };
        let script = base64::decode(script).context(ErrorMetadata::bad_request(
            "MalformedScript",
            "the query field must be base64",
        ))?;
        let env: Arc<dyn QueryEnv> = Arc::new(DatabaseQueryEnv { db: db.clone() });
        let results = host.run(script, env).await?;
        return Ok(QueryOutcome::Raw(results));
    }
    if let Some(entity_id) = &request.entity_id {
        return Ok(QueryOutcome::Items(single_entity(db, entity_id).await?));
    }
    if request.starting_entities.is_some() || request.continuations.is_some() {
        return Ok(QueryOutcome::Hop(relation_hop(db, request).await?));
    }
    anyhow::bail!(ErrorMetadata::bad_request(
        "UnrecognizedQuery",
        "the query body matches no supported query shape",
    ));
}

/// `[@context, entity]` for the current materialized version of one id,
/// searching datasets in catalog order. A missing id yields a bare context.
pub async fn single_entity(db: &Arc<Database>, id: &str) -> anyhow::Result<Vec<PageItem>> {
    let mut page = vec![PageItem::Context(PageContext::new(db.namespaces().all()))];
    let Some(internal) = db.ids().lookup_entity(id).await? else {
        return Ok(page);
    };
    for meta in regular_metas(db, &[]).await? {
        if let Some(entity) = db.latest_version(meta.id, internal).await? {
            page.push(PageItem::Entity(entity));
            break;
        }
    }
    Ok(page)
}

pub async fn relation_hop(db: &Arc<Database>, request: QueryRequest) -> anyhow::Result<HopPage> {
    let limit = request
        .limit
        .unwrap_or(*DEFAULT_QUERY_LIMIT)
        .clamp(1, *DEFAULT_QUERY_LIMIT);
    let cursors = match &request.continuations {
        Some(tokens) if !tokens.is_empty() => tokens
            .iter()
            .map(|token| RelationCursor::decode(token))
            .collect::<anyhow::Result<Vec<_>>>()?,
        _ => {
            let starts = request.starting_entities.as_deref().unwrap_or_default();
            if starts.is_empty() {
                anyhow::bail!(ErrorMetadata::bad_request(
                    "MissingStartingEntities",
                    "a relation query needs startingEntities or continuations",
                ));
            }
            let predicate = request
                .predicate
                .clone()
                .unwrap_or_else(|| WILDCARD_PREDICATE.to_string());
            starts
                .iter()
                .map(|start| RelationCursor {
                    v: RELATION_CURSOR_VERSION,
                    start: start.clone(),
                    predicate: predicate.clone(),
                    inverse: request.inverse,
                    datasets: request.datasets.clone().unwrap_or_default(),
                    after: None,
                })
                .collect()
        },
    };

    let mut triples = Vec::new();
    let mut continuations = Vec::new();
    for cursor in cursors {
        if triples.len() >= limit {
            // Untouched starts carry over verbatim.
            continuations.push(cursor.encode());
            continue;
        }
        let budget = limit - triples.len();
        let (emitted, rest) = traverse(db, &cursor, budget).await?;
        triples.extend(emitted);
        if let Some(rest) = rest {
            continuations.push(rest.encode());
        }
    }
    Ok(HopPage {
        context: PageContext::new(db.namespaces().all()),
        triples,
        continuations,
    })
}

/// Walks one start's neighbors from the cursor position, emitting at most
/// `budget` triples. Returns the remainder cursor when neighbors are left.
async fn traverse(
    db: &Arc<Database>,
    cursor: &RelationCursor,
    budget: usize,
) -> anyhow::Result<(Vec<Triple>, Option<RelationCursor>)> {
    let Some(start_internal) = db.ids().lookup_entity(&cursor.start).await? else {
        return Ok((vec![], None));
    };
    let predicate_filter = if cursor.predicate == WILDCARD_PREDICATE {
        None
    } else {
        match db.ids().lookup_predicate(&cursor.predicate).await? {
            Some(predicate) => Some(predicate),
            // A predicate the hub has never seen matches nothing.
            None => return Ok((vec![], None)),
        }
    };

    // Merge index entries across the datasets in scope. Entries are keyed
    // `(neighbor, predicate)`, the order both directions page by.
    let mut entries: BTreeMap<(InternalId, InternalId), u32> = BTreeMap::new();
    for meta in regular_metas(db, &cursor.datasets).await? {
        let scanned = if cursor.inverse {
            scan_inverse(db.kv(), meta.id, start_internal).await?
        } else {
            scan_outgoing(db.kv(), meta.id, start_internal).await?
        };
        for entry in scanned {
            if let Some(filter) = predicate_filter {
                if entry.predicate != filter {
                    continue;
                }
            }
            entries
                .entry((entry.neighbor, entry.predicate))
                .or_insert(meta.id);
        }
    }

    // Outgoing hops return neighbors in descending internal id order,
    // inverse hops in ascending order, matching each index's scan
    // direction.
    let in_order: Vec<((InternalId, InternalId), u32)> = if cursor.inverse {
        entries
            .into_iter()
            .filter(|(pos, _)| cursor.after.map_or(true, |after| *pos > after))
            .collect()
    } else {
        entries
            .into_iter()
            .rev()
            .filter(|(pos, _)| cursor.after.map_or(true, |after| *pos < after))
            .collect()
    };

    let mut emitted = Vec::with_capacity(budget.min(in_order.len()));
    for ((neighbor, predicate), dataset) in in_order.iter().take(budget) {
        let predicate = db
            .ids()
            .predicate_for(*predicate)
            .await?
            .context("relation entry references an unknown predicate")?;
        let entity = match db.latest_version(*dataset, *neighbor).await? {
            Some(entity) => entity,
            None => {
                // Referenced but never written: materialize a bare shell.
                let id = db
                    .ids()
                    .entity_for(*neighbor)
                    .await?
                    .context("relation entry references an unknown entity")?;
                let mut shell = Entity::new(id);
                shell.internal_id = *neighbor;
                shell
            },
        };
        emitted.push(Triple {
            predicate,
            start: cursor.start.clone(),
            entity,
        });
    }

    let rest = if in_order.len() > emitted.len() {
        let last = in_order[emitted.len() - 1].0;
        let mut rest = cursor.clone();
        rest.after = Some(last);
        Some(rest)
    } else {
        None
    };
    Ok((emitted, rest))
}

async fn regular_metas(db: &Arc<Database>, scope: &[String]) -> anyhow::Result<Vec<DatasetMeta>> {
    let mut metas: Vec<DatasetMeta> = db
        .list_metas()
        .await?
        .into_iter()
        .filter(|meta| meta.kind == DatasetKind::Regular)
        .filter(|meta| scope.is_empty() || scope.iter().any(|name| *name == meta.name))
        .collect();
    metas.sort_by_key(|meta| meta.id);
    Ok(metas)
}

impl Database {
    /// All change records of a dataset, oldest first, capped at the page
    /// knob. Script hosts read datasets through this.
    pub async fn dataset_changes(&self, name: &str) -> anyhow::Result<Vec<Entity>> {
        let meta = self.require_meta(name).await?;
        let prefix = keys::changes_prefix(meta.id);
        self.scan_entities(prefix).await
    }

    /// The materialized view of a dataset, capped at the page knob.
    pub async fn dataset_entities(&self, name: &str) -> anyhow::Result<Vec<Entity>> {
        let meta = self.require_meta(name).await?;
        let prefix = keys::latest_prefix(meta.id);
        self.scan_entities(prefix).await
    }

    async fn scan_entities(&self, prefix: Vec<u8>) -> anyhow::Result<Vec<Entity>> {
        let end = prefix_end(&prefix);
        let rows = self
            .kv()
            .range(&prefix, end.as_deref(), Order::Asc, *DEFAULT_PAGE_LIMIT)
            .await?;
        let mut entities = Vec::with_capacity(rows.len());
        for (_, value) in rows {
            entities.push(serde_json::from_slice(&value).context("corrupt entity record")?);
        }
        Ok(entities)
    }
}
