//! The keychain daemon: a JSON-RPC wrapper around the keychain engine.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use keychain_common::logging::{self, LoggerConfig};
use keychain_engine::KeychainService;
use keychain_store::{InMemoryStore, KeychainStore, SqliteStore};
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::runtime;
use tracing::{debug, info, trace, warn};

use crate::config::{Config, StoreSettings};
use crate::rpc_server::KeychainRpc;

mod args;
mod config;
mod rpc_server;

fn main() {
    logging::init(LoggerConfig::with_base_name("keychaind"));

    let cli = args::Cli::parse();
    let config = parse_toml::<Config>(cli.config);

    let runtime = runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("must be able to create runtime");

    if let Err(e) = runtime.block_on(run(config)) {
        panic!("keychaind crashed: {e:?}");
    }

    info!("keychaind shutdown complete");
}

async fn run(config: Config) -> anyhow::Result<()> {
    let store: Arc<dyn KeychainStore> = match &config.store {
        StoreSettings::Memory => {
            warn!("using the in-memory store; keychains will not survive a restart");
            Arc::new(InMemoryStore::new())
        }
        StoreSettings::Sqlite { path, retry } => {
            debug!(?path, "opening sqlite store");
            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true);
            let pool = SqlitePoolOptions::new()
                .connect_with(options)
                .await
                .context("open sqlite database")?;
            Arc::new(
                SqliteStore::new_with_config(pool, *retry)
                    .await
                    .context("initialize sqlite store")?,
            )
        }
    };

    let service = KeychainService::new(store);
    let rpc = KeychainRpc::new(service, config.request_timeout, config.default_lookahead);
    let handle = rpc_server::start_rpc(rpc, &config.rpc_addr).await?;

    tokio::signal::ctrl_c()
        .await
        .context("listen for shutdown signal")?;
    info!("shutting down");

    if handle.stop().is_err() {
        warn!("rpc server already stopped");
    }
    handle.stopped().await;

    Ok(())
}

/// Reads and parses a TOML file from the given path into the given type `T`.
///
/// # Panics
///
/// 1. If the file is not readable.
/// 2. If the contents of the file cannot be deserialized into the given type
///    `T`.
fn parse_toml<T>(path: impl AsRef<Path>) -> T
where
    T: std::fmt::Debug + DeserializeOwned,
{
    fs::read_to_string(path)
        .map(|p| {
            trace!(?p, "read file");

            let parsed = toml::from_str::<T>(&p).unwrap_or_else(|e| {
                panic!("failed to parse TOML file: {e:?}");
            });
            debug!(?parsed, "parsed TOML file");

            parsed
        })
        .unwrap_or_else(|_| {
            panic!("failed to read TOML file");
        })
}
