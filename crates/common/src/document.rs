//! The entity data model and the JSON wire format for ingest and read pages.
//!
//! A page is a JSON array shaped `[@context, item, ..., @continuation]`. The
//! context carries the namespace prefix expansions used in the page, the
//! continuation a token that resumes the scan. Both are modeled as variants
//! of [`PageItem`] so a page serializes as one homogeneous array.

use std::collections::BTreeMap;

use anyhow::Context;
use errors::ErrorMetadata;
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value as JsonValue;

use crate::{
    InternalId,
    ANONYMOUS_PREFIX,
    CONTEXT_ID,
    CONTINUATION_ID,
};

/// One version of an entity: the unit stored in the change log and the
/// materialized view, and the unit returned in read pages.
///
/// `props` maps predicate to a scalar or ordered list of scalars, `refs` maps
/// predicate to one or more target entity ids. All ids and predicates are
/// namespace-prefixed against the hub registry (`nsN:suffix`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,

    #[serde(rename = "internalId", default, skip_serializing_if = "is_zero")]
    pub internal_id: InternalId,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub recorded: u64,

    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub props: BTreeMap<String, JsonValue>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub refs: BTreeMap<String, JsonValue>,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Entity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            internal_id: 0,
            recorded: 0,
            deleted: false,
            props: BTreeMap::new(),
            refs: BTreeMap::new(),
        }
    }

    /// Content equality, ignoring bookkeeping fields. Two versions with equal
    /// content are deduplicated by the change log.
    pub fn same_content(&self, other: &Entity) -> bool {
        self.deleted == other.deleted && self.props == other.props && self.refs == other.refs
    }

    /// The target ids of all outgoing references, in `refs` order.
    pub fn ref_targets(&self) -> Vec<(&str, Vec<&str>)> {
        self.refs
            .iter()
            .map(|(predicate, value)| (predicate.as_str(), ref_value_targets(value)))
            .collect()
    }
}

fn ref_value_targets(value: &JsonValue) -> Vec<&str> {
    match value {
        JsonValue::String(s) => vec![s.as_str()],
        JsonValue::Array(items) => items.iter().filter_map(|v| v.as_str()).collect(),
        _ => vec![],
    }
}

/// An element of a read page.
#[derive(Clone, Debug, PartialEq)]
pub enum PageItem {
    Context(PageContext),
    Entity(Entity),
    Continuation(Continuation),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PageContext {
    pub id: String,
    pub namespaces: BTreeMap<String, String>,
}

impl PageContext {
    pub fn new(namespaces: BTreeMap<String, String>) -> Self {
        Self {
            id: CONTEXT_ID.to_string(),
            namespaces,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Continuation {
    pub id: String,
    pub token: String,
}

impl Continuation {
    pub fn new(token: String) -> Self {
        Self {
            id: CONTINUATION_ID.to_string(),
            token,
        }
    }
}

impl Serialize for PageItem {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PageItem::Context(c) => c.serialize(serializer),
            PageItem::Entity(e) => e.serialize(serializer),
            PageItem::Continuation(c) => c.serialize(serializer),
        }
    }
}

/// The namespace expansions local to one ingest batch, from its `@context`.
#[derive(Clone, Debug, Default)]
pub struct BatchContext {
    pub namespaces: BTreeMap<String, String>,
}

impl BatchContext {
    /// Splits a batch-local CURIE into its prefix expansion and suffix.
    /// An id without a colon belongs to the anonymous `_` namespace.
    pub fn expand<'a>(&self, curie: &'a str) -> anyhow::Result<(&str, &'a str)> {
        let (prefix, suffix) = match curie.split_once(':') {
            Some((prefix, suffix)) => (prefix, suffix),
            None => (ANONYMOUS_PREFIX, curie),
        };
        let uri = self.namespaces.get(prefix).ok_or_else(|| {
            anyhow::anyhow!(ErrorMetadata::bad_request(
                "UnknownNamespacePrefix",
                format!("namespace prefix {prefix} is not declared in the batch @context"),
            ))
        })?;
        Ok((uri.as_str(), suffix))
    }
}

/// One entity body as submitted in an ingest batch, still in batch-local
/// prefixes.
#[derive(Clone, Debug, Deserialize)]
pub struct EntityBody {
    pub id: Option<String>,

    #[serde(default)]
    pub deleted: bool,

    #[serde(default)]
    pub props: BTreeMap<String, JsonValue>,

    #[serde(default)]
    pub refs: BTreeMap<String, JsonValue>,
}

/// Parses an ingest batch: a JSON array whose first element is the batch
/// `@context`, followed by entity bodies.
pub fn parse_ingest_batch(body: &[u8]) -> anyhow::Result<(BatchContext, Vec<EntityBody>)> {
    let items: Vec<JsonValue> = serde_json::from_slice(body).context(
        ErrorMetadata::bad_request("MalformedBatch", "request body is not a JSON array"),
    )?;
    let mut context = BatchContext::default();
    let mut entities = Vec::with_capacity(items.len().saturating_sub(1));
    for item in items {
        let id = item.get("id").and_then(|v| v.as_str());
        if id == Some(CONTEXT_ID) {
            let parsed: PageContext = serde_json::from_value(item).context(
                ErrorMetadata::bad_request("MalformedContext", "invalid @context element"),
            )?;
            context.namespaces.extend(parsed.namespaces);
            continue;
        }
        let body: EntityBody = serde_json::from_value(item).context(
            ErrorMetadata::bad_request("MalformedEntity", "invalid entity in batch"),
        )?;
        if body.id.as_deref().unwrap_or("").is_empty() {
            anyhow::bail!(ErrorMetadata::bad_request(
                "MissingEntityId",
                "all entities in a batch must carry an id",
            ));
        }
        entities.push(body);
    }
    Ok((context, entities))
}

#[cfg(test)]
mod tests {
    use errors::ErrorMetadataAnyhowExt;

    use super::*;

    #[test]
    fn parse_batch_with_context() {
        let body = br#"[
            {"id": "@context", "namespaces": {"_": "http://example.com"}},
            {"id": "1"},
            {"id": "2", "deleted": true},
            {"id": "3", "refs": {"link": ["1", "2"]}}
        ]"#;
        let (context, entities) = parse_ingest_batch(body).unwrap();
        assert_eq!(
            context.namespaces.get("_").map(String::as_str),
            Some("http://example.com")
        );
        assert_eq!(entities.len(), 3);
        assert!(entities[1].deleted);
        assert_eq!(context.expand("1").unwrap(), ("http://example.com", "1"));
        assert_eq!(context.expand("x:1").unwrap_err().http_status(), 400);
    }

    #[test]
    fn entity_without_id_is_rejected() {
        let body = br#"[
            {"id": "@context", "namespaces": {"_": "http://example.com"}},
            {"props": {"name": "nameless"}}
        ]"#;
        let err = parse_ingest_batch(body).unwrap_err();
        assert_eq!(err.short_msg(), "MissingEntityId");
    }

    #[test]
    fn content_equality_ignores_bookkeeping() {
        let mut a = Entity::new("ns3:1");
        let mut b = Entity::new("ns3:1");
        a.recorded = 1;
        b.recorded = 2;
        a.internal_id = 7;
        assert!(a.same_content(&b));
        b.deleted = true;
        assert!(!a.same_content(&b));
    }

    #[test]
    fn page_serializes_as_flat_array() {
        let page = vec![
            PageItem::Context(PageContext::new(maplit::btreemap! {
                "ns0".to_string() => "http://example.com".to_string(),
            })),
            PageItem::Entity(Entity::new("ns0:1")),
            PageItem::Continuation(Continuation::new("tok".to_string())),
        ];
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json[0]["id"], "@context");
        assert_eq!(json[1]["id"], "ns0:1");
        assert_eq!(json[2]["token"], "tok");
    }
}
