use std::{
    collections::HashMap,
    sync::Arc,
    time::{
        Duration,
        Instant,
    },
};

use anyhow::Context;
use errors::ErrorMetadata;
use keyvalue::{
    KeyValue,
    WriteBatch,
};
use serde::{
    Deserialize,
    Serialize,
};
use tokio::sync::Mutex;

use crate::providers::{
    ProviderConfig,
    ProviderKind,
};

/// Refresh bearer tokens this long before they would expire.
const EXPIRY_SLACK: Duration = Duration::from_secs(30);

fn login_key(name: &str) -> Vec<u8> {
    [b"logins/", name.as_bytes()].concat()
}

pub struct CredentialBroker {
    kv: Arc<dyn KeyValue>,
    http: reqwest::Client,
    /// Bearer token cache. The mutex is held across a refresh so concurrent
    /// callers share one in-flight fetch.
    tokens: Mutex<HashMap<String, CachedToken>>,
}

struct CachedToken {
    token: String,
    valid_until: Instant,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    audience: Option<&'a str>,
    grant_type: &'static str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl CredentialBroker {
    pub fn new(kv: Arc<dyn KeyValue>, http: reqwest::Client) -> Self {
        Self {
            kv,
            http,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Stores (or replaces) a provider definition keyed by its name.
    pub async fn register(&self, config: ProviderConfig) -> anyhow::Result<()> {
        config.validate()?;
        let mut batch = WriteBatch::new();
        batch.put(login_key(&config.name), serde_json::to_vec(&config)?);
        self.kv.write(batch).await?;
        // A replaced provider must not keep serving stale tokens.
        self.tokens.lock().await.remove(&config.name);
        tracing::info!("Registered auth provider {}", config.name);
        Ok(())
    }

    pub async fn provider(&self, name: &str) -> anyhow::Result<Option<ProviderConfig>> {
        match self.kv.get(&login_key(name)).await? {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).context("corrupt provider definition")?,
            )),
            None => Ok(None),
        }
    }

    /// The `Authorization` header value for a provider, or `None` when the
    /// provider is unknown (requests then go out unauthenticated).
    pub async fn auth_header(&self, name: &str) -> anyhow::Result<Option<String>> {
        let Some(config) = self.provider(name).await? else {
            tracing::debug!("Auth provider {name} is not registered; proceeding unauthenticated");
            return Ok(None);
        };
        let header = match config.kind {
            ProviderKind::Basic => {
                let user = required(&config.user, "user")?.resolve()?;
                let password = required(&config.password, "password")?.resolve()?;
                format!("Basic {}", base64::encode(format!("{user}:{password}")))
            },
            ProviderKind::Bearer => {
                format!("Bearer {}", self.bearer_token(&config).await?)
            },
        };
        Ok(Some(header))
    }

    async fn bearer_token(&self, config: &ProviderConfig) -> anyhow::Result<String> {
        let mut tokens = self.tokens.lock().await;
        if let Some(cached) = tokens.get(&config.name) {
            if Instant::now() < cached.valid_until {
                return Ok(cached.token.clone());
            }
        }

        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or_else(|| ErrorMetadata::bad_request(
                "InvalidProviderConfiguration",
                "bearer providers need an endpoint",
            ))?;
        let client_id = required(&config.key, "key")?.resolve()?;
        let client_secret = required(&config.secret, "secret")?.resolve()?;
        let request = TokenRequest {
            client_id: &client_id,
            client_secret: &client_secret,
            audience: config.audience.as_deref(),
            grant_type: "client_credentials",
        };
        let response = self
            .http
            .post(endpoint)
            .json(&request)
            .send()
            .await
            .context(token_endpoint_failure(&config.name))?;
        if !response.status().is_success() {
            anyhow::bail!(token_endpoint_failure(&config.name));
        }
        let token: TokenResponse = response
            .json()
            .await
            .context(token_endpoint_failure(&config.name))?;

        let ttl = Duration::from_secs(token.expires_in.unwrap_or(0));
        let valid_until = Instant::now() + ttl.saturating_sub(EXPIRY_SLACK);
        tokens.insert(
            config.name.clone(),
            CachedToken {
                token: token.access_token.clone(),
                valid_until,
            },
        );
        tracing::debug!(
            "Fetched bearer token for provider {} (ttl {ttl:?})",
            config.name
        );
        Ok(token.access_token)
    }
}

fn required<'a, T>(value: &'a Option<T>, field: &'static str) -> anyhow::Result<&'a T> {
    value.as_ref().ok_or_else(|| {
        ErrorMetadata::bad_request(
            "InvalidProviderConfiguration",
            format!("provider is missing the {field} field"),
        )
        .into()
    })
}

fn token_endpoint_failure(provider: &str) -> ErrorMetadata {
    ErrorMetadata::remote_failure(
        "TokenEndpointFailure",
        format!("the token endpoint for provider {provider} did not return a token"),
    )
}
