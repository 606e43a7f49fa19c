//! The proxy-dataset adapter: transparent pass-through of reads and writes
//! to a remote hub, with credential injection and namespace remapping.
//!
//! Reads re-emit the remote page with every remote namespace interned into
//! this hub's registry and all ids rewritten to hub prefixes; continuation
//! elements pass through untouched so paging state stays the remote's.
//! Writes forward the body and the fullsync headers verbatim and perform no
//! local writes.

use std::collections::HashMap;

use anyhow::Context;
use bytes::Bytes;
use common::{
    ANONYMOUS_PREFIX,
    CONTEXT_ID,
    CONTINUATION_ID,
    FULLSYNC_END_HEADER,
    FULLSYNC_ID_HEADER,
    FULLSYNC_START_HEADER,
};
use database::{
    DatasetMeta,
    ProxyConfig,
};
use errors::ErrorMetadata;
use http::{
    header::{
        AUTHORIZATION,
        CONTENT_TYPE,
    },
    HeaderMap,
};
use serde_json::{
    json,
    Value as JsonValue,
};

use crate::LocalAppState;

fn proxy_config(meta: &DatasetMeta) -> anyhow::Result<&ProxyConfig> {
    meta.proxy
        .as_ref()
        .context("proxy dataset has no proxy configuration")
}

fn remote_failure(meta: &DatasetMeta) -> ErrorMetadata {
    ErrorMetadata::remote_failure(
        "ProxyRemoteFailure",
        format!("the remote behind dataset {} did not answer", meta.name),
    )
}

/// Remote authentication failures pass through as 401; everything else is a
/// bad gateway.
fn check_remote_status(meta: &DatasetMeta, status: reqwest::StatusCode) -> anyhow::Result<()> {
    if status == reqwest::StatusCode::UNAUTHORIZED {
        anyhow::bail!(ErrorMetadata::unauthenticated(
            "ProxyRemoteUnauthenticated",
            format!("the remote behind dataset {} rejected the credentials", meta.name),
        ));
    }
    if !status.is_success() {
        anyhow::bail!(remote_failure(meta));
    }
    Ok(())
}

pub async fn forward_changes(
    st: &LocalAppState,
    meta: &DatasetMeta,
    since: Option<String>,
    limit: Option<String>,
) -> anyhow::Result<JsonValue> {
    let mut params = Vec::new();
    if let Some(limit) = limit {
        params.push(("limit", limit));
    }
    if let Some(since) = since {
        params.push(("since", since));
    }
    forward_read(st, meta, "changes", params).await
}

pub async fn forward_entities(
    st: &LocalAppState,
    meta: &DatasetMeta,
    from: Option<String>,
    limit: Option<String>,
) -> anyhow::Result<JsonValue> {
    let mut params = Vec::new();
    if let Some(from) = from {
        params.push(("from", from));
    }
    if let Some(limit) = limit {
        params.push(("limit", limit));
    }
    forward_read(st, meta, "entities", params).await
}

async fn forward_read(
    st: &LocalAppState,
    meta: &DatasetMeta,
    endpoint: &str,
    mut params: Vec<(&str, String)>,
) -> anyhow::Result<JsonValue> {
    let config = proxy_config(meta)?;
    // Deterministic outbound URLs: query parameters in alphabetical order.
    params.sort_by(|a, b| a.0.cmp(b.0));
    let mut request = st.http_client.get(config.remote_endpoint(endpoint));
    if !params.is_empty() {
        request = request.query(&params);
    }
    request = authorize(st, config, request).await?;
    let response = request.send().await.context(remote_failure(meta))?;
    check_remote_status(meta, response.status())?;
    let items: Vec<JsonValue> = response.json().await.context(remote_failure(meta))?;
    remap_page(st, meta, items).await
}

pub async fn forward_post(
    st: &LocalAppState,
    meta: &DatasetMeta,
    headers: &HeaderMap,
    body: Bytes,
) -> anyhow::Result<()> {
    let config = proxy_config(meta)?;
    let mut request = st
        .http_client
        .post(config.remote_endpoint("entities"))
        .header(CONTENT_TYPE, "application/json")
        .body(body);
    for header in [FULLSYNC_START_HEADER, FULLSYNC_ID_HEADER, FULLSYNC_END_HEADER] {
        if let Some(value) = headers.get(header) {
            request = request.header(header, value);
        }
    }
    request = authorize(st, config, request).await?;
    let response = request.send().await.context(remote_failure(meta))?;
    check_remote_status(meta, response.status())?;
    Ok(())
}

async fn authorize(
    st: &LocalAppState,
    config: &ProxyConfig,
    request: reqwest::RequestBuilder,
) -> anyhow::Result<reqwest::RequestBuilder> {
    let Some(provider) = &config.auth_provider_name else {
        return Ok(request);
    };
    match st.broker.auth_header(provider).await? {
        Some(header) => Ok(request.header(AUTHORIZATION, header)),
        None => Ok(request),
    }
}

/// Rewrites a remote page into hub namespaces: the remote context's named
/// prefixes are interned here, entity ids and predicate keys are rewritten,
/// and the emitted context carries the hub registry (restricted to
/// `publicNamespaces` when configured).
async fn remap_page(
    st: &LocalAppState,
    meta: &DatasetMeta,
    items: Vec<JsonValue>,
) -> anyhow::Result<JsonValue> {
    let mut mapping: HashMap<String, String> = HashMap::new();
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match item.get("id").and_then(|v| v.as_str()) {
            Some(CONTEXT_ID) => {
                if let Some(namespaces) = item.get("namespaces").and_then(|v| v.as_object()) {
                    for (prefix, uri) in namespaces {
                        // The remote's anonymous namespace has no stable
                        // prefix to rewrite from.
                        if prefix == ANONYMOUS_PREFIX {
                            continue;
                        }
                        if let Some(uri) = uri.as_str() {
                            let hub = st.database.namespaces().intern(uri).await?;
                            mapping.insert(prefix.clone(), hub);
                        }
                    }
                }
                out.push(hub_context(st, meta));
            },
            Some(CONTINUATION_ID) => out.push(item),
            _ => out.push(remap_entity(item, &mapping)),
        }
    }
    Ok(JsonValue::Array(out))
}

fn hub_context(st: &LocalAppState, meta: &DatasetMeta) -> JsonValue {
    let mut namespaces = st.database.namespaces().all();
    if !meta.public_namespaces.is_empty() {
        namespaces.retain(|_, uri| meta.public_namespaces.iter().any(|public| public == uri));
    }
    json!({ "id": CONTEXT_ID, "namespaces": namespaces })
}

fn remap_entity(item: JsonValue, mapping: &HashMap<String, String>) -> JsonValue {
    let JsonValue::Object(mut entity) = item else {
        return item;
    };
    if let Some(JsonValue::String(id)) = entity.get("id") {
        let id = remap_curie(id, mapping);
        entity.insert("id".to_string(), JsonValue::String(id));
    }
    for section in ["props", "refs"] {
        let remap_values = section == "refs";
        let Some(JsonValue::Object(fields)) = entity.remove(section) else {
            continue;
        };
        let mut rewritten = serde_json::Map::with_capacity(fields.len());
        for (predicate, value) in fields {
            let value = if remap_values {
                remap_ref_value(value, mapping)
            } else {
                value
            };
            rewritten.insert(remap_curie(&predicate, mapping), value);
        }
        entity.insert(section.to_string(), JsonValue::Object(rewritten));
    }
    JsonValue::Object(entity)
}

fn remap_ref_value(value: JsonValue, mapping: &HashMap<String, String>) -> JsonValue {
    match value {
        JsonValue::String(target) => JsonValue::String(remap_curie(&target, mapping)),
        JsonValue::Array(targets) => JsonValue::Array(
            targets
                .into_iter()
                .map(|target| remap_ref_value(target, mapping))
                .collect(),
        ),
        other => other,
    }
}

/// Rewrites `prefix:suffix` through the remote-to-hub prefix mapping.
/// Unmapped prefixes (including the anonymous one) pass through unchanged.
fn remap_curie(curie: &str, mapping: &HashMap<String, String>) -> String {
    match curie.split_once(':') {
        Some((prefix, suffix)) => match mapping.get(prefix) {
            Some(hub) => format!("{hub}:{suffix}"),
            None => curie.to_string(),
        },
        None => curie.to_string(),
    }
}
