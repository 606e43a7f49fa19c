use std::{
    net::SocketAddr,
    sync::Arc,
};

use anyhow::Context;
use clap::Parser;
use database::DatabaseOptions;
use keyvalue::SqliteKeyValue;
use local_backend::{
    config::LocalConfig,
    make_app,
    router::router,
};

fn main() -> anyhow::Result<()> {
    common::env::config_service();
    let config = LocalConfig::parse();
    tracing::info!("Starting the dataset hub with config {config:?}");

    let tokio = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    tokio.block_on(run_server(config))
}

async fn run_server(config: LocalConfig) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.store_location).with_context(|| {
        format!(
            "failed to create store directory {}",
            config.store_location.display()
        )
    })?;
    let db_path = config.db_path();
    let db_path = db_path
        .to_str()
        .context("the store location must be valid UTF-8")?;
    let kv = Arc::new(SqliteKeyValue::open(db_path)?);
    let st = make_app(kv, DatabaseOptions::default(), None).await?;
    let router = router(st);

    let addr = SocketAddr::from(config.http_bind_address());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Dataset hub listening on {addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install the shutdown handler: {e}");
    }
}
