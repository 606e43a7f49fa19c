//! Handlers for the dataset catalog: create, fetch, list, delete.

use anyhow::Context;
use axum::{
    extract::{
        Path,
        Query,
        State,
    },
    Json,
};
use bytes::Bytes;
use common::{
    document::Entity,
    http::HttpResponseError,
};
use database::CreateDatasetRequest;
use errors::ErrorMetadata;
use http::StatusCode;
use serde::Deserialize;

use crate::LocalAppState;

#[derive(Deserialize)]
pub struct CreateDatasetParams {
    #[serde(default)]
    proxy: Option<bool>,
}

pub async fn create_dataset(
    State(st): State<LocalAppState>,
    Path(name): Path<String>,
    Query(params): Query<CreateDatasetParams>,
    body: Bytes,
) -> Result<StatusCode, HttpResponseError> {
    let request: CreateDatasetRequest = if body.is_empty() {
        CreateDatasetRequest::default()
    } else {
        serde_json::from_slice(&body).context(ErrorMetadata::bad_request(
            "MalformedDatasetConfig",
            "the dataset configuration body is not valid JSON",
        ))?
    };
    st.database
        .create_dataset(&name, request, params.proxy.unwrap_or(false))
        .await?;
    Ok(StatusCode::OK)
}

pub async fn get_dataset(
    State(st): State<LocalAppState>,
    Path(name): Path<String>,
) -> Result<Json<Entity>, HttpResponseError> {
    Ok(Json(st.database.dataset_entity(&name).await?))
}

pub async fn list_datasets(
    State(st): State<LocalAppState>,
) -> Result<Json<Vec<Entity>>, HttpResponseError> {
    Ok(Json(st.database.list_datasets().await?))
}

pub async fn delete_dataset(
    State(st): State<LocalAppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, HttpResponseError> {
    st.database.delete_dataset(&name).await?;
    Ok(StatusCode::OK)
}
