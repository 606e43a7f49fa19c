//! The credential broker: resolves a provider name to an outbound
//! `Authorization` header for proxied requests.
//!
//! Providers are registered over the API and persisted in the store. Two
//! provider types are supported: `basic` (user/password) and `bearer`
//! (client-credentials flow against a token endpoint, with the access token
//! cached until shortly before it expires).

mod broker;
mod providers;

pub use broker::CredentialBroker;
pub use providers::{
    ProviderConfig,
    ProviderKind,
    ValueReader,
};
