//! The hub's dataset engine: namespace interning, the versioned change log
//! with its materialized entity view, relation indexes, fullsync leases,
//! the dataset catalog and the graph query engine.

pub mod catalog;
pub mod database;
pub mod fullsync;
pub mod ids;
pub mod keys;
pub mod namespaces;
pub mod query;
pub mod relations;

pub use catalog::{
    CreateDatasetRequest,
    DatasetKind,
    DatasetMeta,
    ProxyConfig,
    CORE_DATASET,
};
pub use database::{
    Database,
    DatabaseOptions,
};
pub use fullsync::FullSyncDirectives;
pub use query::{
    QueryEnv,
    QueryOutcome,
    QueryRequest,
    ScriptHost,
};
