//! The `POST /query` handler. The body selects the query shape: a scripted
//! query, a single-id lookup, or a relation hop.

use anyhow::Context;
use axum::{
    extract::State,
    response::{
        IntoResponse,
        Response,
    },
    Json,
};
use bytes::Bytes;
use common::http::HttpResponseError;
use database::{
    query,
    QueryOutcome,
    QueryRequest,
};
use errors::ErrorMetadata;

use crate::LocalAppState;

pub async fn post_query(
    State(st): State<LocalAppState>,
    body: Bytes,
) -> Result<Response, HttpResponseError> {
    let request: QueryRequest = serde_json::from_slice(&body).context(
        ErrorMetadata::bad_request("MalformedQuery", "the query body is not valid JSON"),
    )?;
    let outcome = query::execute(&st.database, st.script_host.as_ref(), request).await?;
    Ok(match outcome {
        QueryOutcome::Items(items) => Json(items).into_response(),
        QueryOutcome::Hop(page) => Json(page).into_response(),
        QueryOutcome::Raw(values) => Json(values).into_response(),
    })
}
