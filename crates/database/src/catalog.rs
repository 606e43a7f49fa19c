//! Dataset catalog types. The user-visible catalog is itself stored as
//! entities in the core dataset; the `DatasetMeta` records here hold the
//! parts the engine needs before it can read that dataset (the numeric id
//! the keyspace is partitioned by, and proxy configuration).

use errors::ErrorMetadata;
use serde::{
    Deserialize,
    Serialize,
};

/// The dataset every hub starts with: one catalog entity per dataset,
/// including itself.
pub const CORE_DATASET: &str = "core.Dataset";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    Regular,
    Proxy,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatasetMeta {
    pub id: u32,
    pub name: String,
    pub kind: DatasetKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub public_namespaces: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    pub remote_url: String,

    #[serde(
        default,
        alias = "authProvider",
        skip_serializing_if = "Option::is_none"
    )]
    pub auth_provider_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_transform: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downstream_transform: Option<String>,
}

/// The JSON body accepted by `POST /datasets/{name}`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDatasetRequest {
    #[serde(default)]
    pub proxy_dataset_config: Option<ProxyConfig>,

    #[serde(default)]
    pub public_namespaces: Option<Vec<String>>,
}

pub fn invalid_proxy_configuration() -> ErrorMetadata {
    ErrorMetadata::bad_request(
        "InvalidProxyConfiguration",
        "invalid proxy configuration provided",
    )
}

pub fn dataset_not_found(name: &str) -> ErrorMetadata {
    ErrorMetadata::not_found("DatasetNotFound", format!("dataset {name} does not exist"))
}

impl ProxyConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.remote_url.trim().is_empty() {
            anyhow::bail!(invalid_proxy_configuration());
        }
        Ok(())
    }

    /// The remote dataset endpoint with a sub-path appended.
    pub fn remote_endpoint(&self, suffix: &str) -> String {
        let base = self.remote_url.trim_end_matches('/');
        format!("{base}/{suffix}")
    }
}
