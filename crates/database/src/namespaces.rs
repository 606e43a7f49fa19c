//! The namespace registry: a process-wide bijection between namespace URIs
//! and short `nsN` prefixes, stable for the lifetime of a store.
//!
//! The whole mapping is small and read-mostly, so it lives in memory behind
//! a `RwLock` and is written through to a single key as one JSON document.

use std::{
    collections::BTreeMap,
    sync::Arc,
};

use anyhow::Context;
use keyvalue::{
    KeyValue,
    WriteBatch,
};
use parking_lot::RwLock;

use crate::keys;

/// Namespace URI of the core dataset-catalog entities (`ns0`).
pub const CORE_DATASET_NAMESPACE: &str = "http://data.graphhub.io/core/dataset/";
/// Namespace URI of the core vocabulary (`ns1`).
pub const CORE_VOCABULARY_NAMESPACE: &str = "http://data.graphhub.io/core/";
/// The rdf-syntax namespace (`ns2`), used for the `type` predicate.
pub const RDF_NAMESPACE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";

pub struct NamespaceRegistry {
    kv: Arc<dyn KeyValue>,
    inner: RwLock<Inner>,
    /// Serializes intern write-throughs so a slower writer cannot clobber a
    /// newer snapshot on disk. Reads only touch the `RwLock`.
    write_lock: tokio::sync::Mutex<()>,
}

struct Inner {
    by_uri: BTreeMap<String, String>,
    by_prefix: BTreeMap<String, String>,
    next: u32,
}

impl NamespaceRegistry {
    pub async fn load(kv: Arc<dyn KeyValue>) -> anyhow::Result<Self> {
        let by_uri: BTreeMap<String, String> = match kv.get(keys::GLOBAL_NAMESPACES).await? {
            Some(bytes) => serde_json::from_slice(&bytes).context("corrupt namespace registry")?,
            None => BTreeMap::new(),
        };
        let mut by_prefix = BTreeMap::new();
        let mut next = 0;
        for (uri, prefix) in &by_uri {
            if let Some(n) = prefix.strip_prefix("ns").and_then(|n| n.parse::<u32>().ok()) {
                next = next.max(n + 1);
            }
            by_prefix.insert(prefix.clone(), uri.clone());
        }
        let registry = Self {
            kv,
            inner: RwLock::new(Inner {
                by_uri,
                by_prefix,
                next,
            }),
            write_lock: tokio::sync::Mutex::new(()),
        };
        // The core namespaces claim ns0..ns2 on first start.
        registry.intern(CORE_DATASET_NAMESPACE).await?;
        registry.intern(CORE_VOCABULARY_NAMESPACE).await?;
        registry.intern(RDF_NAMESPACE).await?;
        Ok(registry)
    }

    /// Returns the prefix for `uri`, assigning and persisting the next `nsN`
    /// on first sighting. Idempotent and case-sensitive.
    pub async fn intern(&self, uri: &str) -> anyhow::Result<String> {
        if let Some(prefix) = self.prefix_for(uri) {
            return Ok(prefix);
        }
        let _guard = self.write_lock.lock().await;
        let (assigned, snapshot) = {
            let mut inner = self.inner.write();
            if let Some(prefix) = inner.by_uri.get(uri) {
                return Ok(prefix.clone());
            }
            let prefix = format!("ns{}", inner.next);
            inner.next += 1;
            inner.by_uri.insert(uri.to_string(), prefix.clone());
            inner.by_prefix.insert(prefix.clone(), uri.to_string());
            (prefix, inner.by_uri.clone())
        };
        // Write-through: the full map is rewritten, so a failed write is
        // repaired by the next successful intern.
        let mut batch = WriteBatch::new();
        batch.put(
            keys::GLOBAL_NAMESPACES.to_vec(),
            serde_json::to_vec(&snapshot)?,
        );
        self.kv.write(batch).await?;
        Ok(assigned)
    }

    pub fn expand(&self, prefix: &str) -> Option<String> {
        self.inner.read().by_prefix.get(prefix).cloned()
    }

    pub fn prefix_for(&self, uri: &str) -> Option<String> {
        self.inner.read().by_uri.get(uri).cloned()
    }

    /// The full `prefix -> uri` mapping, as emitted in page contexts.
    pub fn all(&self) -> BTreeMap<String, String> {
        self.inner.read().by_prefix.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use keyvalue::MemoryKeyValue;

    use super::*;

    #[tokio::test]
    async fn interning_is_idempotent_and_ordered() {
        let kv = Arc::new(MemoryKeyValue::new());
        let registry = NamespaceRegistry::load(kv.clone()).await.unwrap();
        assert_eq!(registry.prefix_for(CORE_DATASET_NAMESPACE).unwrap(), "ns0");
        assert_eq!(registry.prefix_for(RDF_NAMESPACE).unwrap(), "ns2");

        let p1 = registry.intern("http://example.com").await.unwrap();
        let p2 = registry.intern("http://example.mimiro.io/").await.unwrap();
        assert_eq!(p1, "ns3");
        assert_eq!(p2, "ns4");
        assert_eq!(registry.intern("http://example.com").await.unwrap(), "ns3");
        assert_eq!(registry.expand("ns4").unwrap(), "http://example.mimiro.io/");

        // Reload sees the same assignments.
        let reloaded = NamespaceRegistry::load(kv).await.unwrap();
        assert_eq!(reloaded.prefix_for("http://example.com").unwrap(), "ns3");
        assert_eq!(reloaded.intern("http://a.example").await.unwrap(), "ns5");
    }

    #[tokio::test]
    async fn case_sensitive_exact_match() {
        let kv = Arc::new(MemoryKeyValue::new());
        let registry = NamespaceRegistry::load(kv).await.unwrap();
        let lower = registry.intern("http://example.com/a").await.unwrap();
        let upper = registry.intern("http://example.com/A").await.unwrap();
        assert_ne!(lower, upper);
    }
}
