//! Ingest and read handlers for `/datasets/{name}/entities` and
//! `/datasets/{name}/changes`. Proxy datasets are forwarded wholesale; see
//! [`crate::proxy`].

use anyhow::Context;
use axum::{
    extract::{
        Path,
        Query,
        State,
    },
    response::{
        IntoResponse,
        Response,
    },
    Json,
};
use bytes::Bytes;
use common::{
    document::parse_ingest_batch,
    http::HttpResponseError,
    FULLSYNC_END_HEADER,
    FULLSYNC_ID_HEADER,
    FULLSYNC_START_HEADER,
};
use database::{
    DatasetKind,
    FullSyncDirectives,
};
use errors::ErrorMetadata;
use http::{
    HeaderMap,
    StatusCode,
};
use serde::Deserialize;

use crate::{
    proxy,
    LocalAppState,
};

#[derive(Deserialize)]
pub struct ChangesParams {
    #[serde(default)]
    pub since: Option<String>,
    #[serde(default)]
    pub limit: Option<String>,
}

#[derive(Deserialize)]
pub struct EntitiesParams {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub limit: Option<String>,
}

pub fn fullsync_directives(headers: &HeaderMap) -> FullSyncDirectives {
    let flag = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    };
    FullSyncDirectives {
        start: flag(FULLSYNC_START_HEADER),
        end: flag(FULLSYNC_END_HEADER),
        sync_id: headers
            .get(FULLSYNC_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(String::from),
    }
}

/// Parses a client-supplied limit for local scans. Proxied requests forward
/// the raw string instead.
fn parse_limit(limit: &Option<String>) -> anyhow::Result<Option<usize>> {
    limit
        .as_deref()
        .map(|value| {
            value.parse().context(ErrorMetadata::bad_request(
                "InvalidLimit",
                "limit must be a non-negative integer",
            ))
        })
        .transpose()
}

pub async fn post_entities(
    State(st): State<LocalAppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, HttpResponseError> {
    let meta = st.database.require_meta(&name).await?;
    if meta.kind == DatasetKind::Proxy {
        proxy::forward_post(&st, &meta, &headers, body).await?;
        return Ok(StatusCode::OK);
    }
    let directives = fullsync_directives(&headers);
    let (context, bodies) = parse_ingest_batch(&body)?;
    st.database.append(&name, context, bodies, directives).await?;
    Ok(StatusCode::OK)
}

pub async fn get_entities(
    State(st): State<LocalAppState>,
    Path(name): Path<String>,
    Query(params): Query<EntitiesParams>,
) -> Result<Response, HttpResponseError> {
    let meta = st.database.require_meta(&name).await?;
    if meta.kind == DatasetKind::Proxy {
        let page = proxy::forward_entities(&st, &meta, params.from, params.limit).await?;
        return Ok(Json(page).into_response());
    }
    let limit = parse_limit(&params.limit)?;
    let page = st
        .database
        .entities_page(&name, params.from.as_deref(), limit)
        .await?;
    Ok(Json(page).into_response())
}

pub async fn get_changes(
    State(st): State<LocalAppState>,
    Path(name): Path<String>,
    Query(params): Query<ChangesParams>,
) -> Result<Response, HttpResponseError> {
    let meta = st.database.require_meta(&name).await?;
    if meta.kind == DatasetKind::Proxy {
        let page = proxy::forward_changes(&st, &meta, params.since, params.limit).await?;
        return Ok(Json(page).into_response());
    }
    let limit = parse_limit(&params.limit)?;
    let page = st
        .database
        .changes_page(&name, params.since.as_deref(), limit)
        .await?;
    Ok(Json(page).into_response())
}
