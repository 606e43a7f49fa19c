//! Provider definitions as registered through `POST /provider/logins`.

use errors::ErrorMetadata;
use serde::{
    Deserialize,
    Serialize,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Basic,
    Bearer,
}

/// An indirection for secret values: the configuration names where a value
/// comes from instead of (necessarily) inlining it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ValueReader {
    /// The literal value, inline.
    Text { value: String },
    /// Read from the named environment variable at resolution time.
    Env { value: String },
}

impl ValueReader {
    pub fn resolve(&self) -> anyhow::Result<String> {
        match self {
            ValueReader::Text { value } => Ok(value.clone()),
            ValueReader::Env { value } => std::env::var(value).map_err(|_| {
                ErrorMetadata::bad_request(
                    "UnresolvableSecret",
                    format!("environment variable {value} is not set"),
                )
                .into()
            }),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: ProviderKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<ValueReader>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<ValueReader>,

    /// Token endpoint for `bearer` providers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Client id for the client-credentials exchange.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<ValueReader>,

    /// Client secret for the client-credentials exchange.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<ValueReader>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
}

impl ProviderConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!(invalid("providers need a non-empty name"));
        }
        match self.kind {
            ProviderKind::Basic => {
                if self.user.is_none() || self.password.is_none() {
                    anyhow::bail!(invalid("basic providers need user and password"));
                }
            },
            ProviderKind::Bearer => {
                if self.endpoint.as_deref().unwrap_or("").is_empty()
                    || self.key.is_none()
                    || self.secret.is_none()
                {
                    anyhow::bail!(invalid("bearer providers need endpoint, key and secret"));
                }
            },
        }
        Ok(())
    }
}

fn invalid(msg: &'static str) -> ErrorMetadata {
    ErrorMetadata::bad_request("InvalidProviderConfiguration", msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_wire_shape() {
        let body = r#"{
            "name": "local",
            "type": "basic",
            "user": { "value": "u0", "type": "text" },
            "password": { "value": "u1", "type": "text" }
        }"#;
        let config: ProviderConfig = serde_json::from_str(body).unwrap();
        assert_eq!(config.kind, ProviderKind::Basic);
        config.validate().unwrap();
        assert_eq!(config.user.unwrap().resolve().unwrap(), "u0");
    }

    #[test]
    fn bearer_requires_endpoint_and_credentials() {
        let config: ProviderConfig = serde_json::from_str(
            r#"{"name": "t", "type": "bearer", "key": {"type": "text", "value": "k"}}"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_reader_resolves_lazily() {
        let reader = ValueReader::Env {
            value: "KEYBROKER_TEST_SECRET".to_string(),
        };
        assert!(reader.resolve().is_err());
        std::env::set_var("KEYBROKER_TEST_SECRET", "hunter2");
        assert_eq!(reader.resolve().unwrap(), "hunter2");
        std::env::remove_var("KEYBROKER_TEST_SECRET");
    }
}
