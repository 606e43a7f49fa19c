//! Tunable limits and parameters for the hub.
//!
//! Every knob can be overridden with an environment variable of the same
//! name. Each knob should have a comment explaining what it's for so an
//! oncall engineer can adjust it safely.

use std::{
    sync::LazyLock,
    time::Duration,
};

use crate::env::{
    env_config,
    env_duration,
};

/// Upper bound on `changes`/`entities` page sizes; also the page size used
/// when the client does not pass a limit.
pub static DEFAULT_PAGE_LIMIT: LazyLock<usize> =
    LazyLock::new(|| env_config("DEFAULT_PAGE_LIMIT", 10_000));

/// Maximum number of entities accepted in one ingest batch.
pub static MAX_INGEST_BATCH_SIZE: LazyLock<usize> =
    LazyLock::new(|| env_config("MAX_INGEST_BATCH_SIZE", 100_000));

/// How long a fullsync lease survives without traffic before it is
/// considered abandoned. Duration string, eg `500ms` or `20s`.
pub static FULLSYNC_LEASE_TIMEOUT: LazyLock<Duration> =
    LazyLock::new(|| env_duration("FULLSYNC_LEASE_TIMEOUT", Duration::from_secs(20)));

/// Per-request timeout for outbound calls to proxied remotes and token
/// endpoints.
pub static REMOTE_REQUEST_TIMEOUT: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_secs(env_config("REMOTE_REQUEST_TIMEOUT_SECS", 30)));

/// Default number of triples returned by one relation-hop query call when
/// the client does not pass a limit.
pub static DEFAULT_QUERY_LIMIT: LazyLock<usize> =
    LazyLock::new(|| env_config("DEFAULT_QUERY_LIMIT", 10_000));
