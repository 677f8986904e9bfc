use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;

use tracing::info;

use playlist_proxy::{AppConfig, Logger, ProxyApplicationServer, connect_store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let config = Arc::new(AppConfig::parse());

    // guards are kept alive to flush logs and keep sentry connected
    let _guards = Logger::init(config.cargo_env, config.sentry_dsn.clone());

    info!("logger and env prepped...");

    let store = connect_store(&config.storage_backend())
        .await
        .context("session storage failed to start")?;

    info!("{} storage ok, starting proxy server...", store.backend_name());

    ProxyApplicationServer::serve(config, store)
        .await
        .context("proxy server failed to start")?;

    Ok(())
}
