//! The hub's HTTP backend: routing, dataset and ingest handlers, the proxy
//! adapter for remote datasets, credential provider registration and the
//! query endpoint.

pub mod config;
pub mod datasets;
pub mod ingest;
pub mod logins;
pub mod proxy;
pub mod query;
pub mod router;

use std::sync::Arc;

use common::knobs::REMOTE_REQUEST_TIMEOUT;
use database::{
    Database,
    DatabaseOptions,
    ScriptHost,
};
use keybroker::CredentialBroker;
use keyvalue::KeyValue;

#[derive(Clone)]
pub struct LocalAppState {
    pub database: Arc<Database>,
    pub broker: Arc<CredentialBroker>,
    pub http_client: reqwest::Client,
    pub script_host: Option<Arc<dyn ScriptHost>>,
}

/// Wires the application leaves-first: store, engine, broker, HTTP state.
pub async fn make_app(
    kv: Arc<dyn KeyValue>,
    options: DatabaseOptions,
    script_host: Option<Arc<dyn ScriptHost>>,
) -> anyhow::Result<LocalAppState> {
    let http_client = reqwest::Client::builder()
        .timeout(*REMOTE_REQUEST_TIMEOUT)
        .build()?;
    let database = Database::load(kv.clone(), options).await?;
    let broker = Arc::new(CredentialBroker::new(kv, http_client.clone()));
    Ok(LocalAppState {
        database,
        broker,
        http_client,
        script_host,
    })
}
