use std::sync::Arc;

use anyhow::{Context, Result};
use rollup_sdk::config::SdkConfig;
use rollup_sdk::core_sdk::{CoreSdk, CoreSdkOptions, CLIENT_VERSION};
use rollup_sdk::events::SdkEvent;
use rollup_sdk::provider::RollupProvider;
use rollup_sdk::provider_http::HttpRollupProvider;
use rollup_sdk::SharedStorage;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tree::{Blake3Hasher, FileBackedStorage};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = SdkConfig::from_env()?;

    // --- Storage ---
    let storage: SharedStorage = Arc::new(
        FileBackedStorage::new(&cfg.data_path)
            .with_context(|| format!("Failed to open {}", cfg.data_path.display()))?,
    );

    // --- Provider (fail fast) ---
    let provider = Arc::new(HttpRollupProvider::new(cfg.provider_url.clone()));
    let status = provider.get_status().await.context("Rollup provider unreachable")?;
    info!(version = %status.version, next_rollup_id = status.next_rollup_id, "provider: ok");

    let sdk = CoreSdk::new(CoreSdkOptions {
        storage,
        provider,
        hash_paths: None,
        prover: None,
        hasher: Arc::new(Blake3Hasher::new()),
        decrypt_threads: cfg.decrypt_threads,
        download_queue_size: cfg.download_queue_size,
        poll_interval: cfg.sync_poll_interval,
        lock: cfg.lock.clone(),
    })
    .context("Failed to build sdk")?;

    let mut events = sdk.events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SdkEvent::UpdatedWorldState { rollup_id, data_size }) => {
                    info!(rollup_id, data_size, "world state updated")
                }
                Ok(SdkEvent::UpdatedUserState { user_id, rollup_id }) => {
                    info!(user = %user_id, rollup_id, "user synced")
                }
                Ok(SdkEvent::UpdatedUserTx { user_id, tx_id }) => info!(user = %user_id, tx_id = %tx_id, "user tx updated"),
                Ok(SdkEvent::VersionMismatch { client, server }) => warn!(%client, %server, "version mismatch"),
                Ok(SdkEvent::SyncStopped) => break,
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "event log lagging"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    for key in cfg.account_keys.iter().cloned() {
        let user = sdk.add_user(key).await.context("Failed to add account")?;
        info!(user = %user.id(), "account tracked");
    }

    sdk.start_sync()
        .await
        .with_context(|| format!("Cannot sync as client {CLIENT_VERSION}"))?;

    tokio::signal::ctrl_c().await.context("Failed to listen for ctrl-c")?;
    info!("shutting down");
    sdk.destroy().await;
    Ok(())
}
