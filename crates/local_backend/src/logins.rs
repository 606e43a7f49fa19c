//! Credential provider registration: `POST /provider/logins`.

use anyhow::Context;
use axum::extract::State;
use bytes::Bytes;
use common::http::HttpResponseError;
use errors::ErrorMetadata;
use http::StatusCode;
use keybroker::ProviderConfig;

use crate::LocalAppState;

pub async fn register_login(
    State(st): State<LocalAppState>,
    body: Bytes,
) -> Result<StatusCode, HttpResponseError> {
    let config: ProviderConfig = serde_json::from_slice(&body).context(
        ErrorMetadata::bad_request(
            "InvalidProviderConfiguration",
            "the provider definition is not valid JSON",
        ),
    )?;
    st.broker.register(config).await?;
    Ok(StatusCode::OK)
}
