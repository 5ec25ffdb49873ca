use anyhow::Result;
use kube::Client;
use l7lb_core::{BackendSyncer, EndpointStore, EnvoyServiceBackendSyncer};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod backend_watcher;
mod config;
mod usage_controller;

use backend_watcher::BackendWatcher;
use config::{LogFormat, SyncerConfig};
use usage_controller::UsageController;

#[tokio::main]
async fn main() -> Result<()> {
    let config = SyncerConfig::load()?;
    init_tracing(&config);

    info!("Starting l7lb-syncer...");
    info!("  - Watch namespace: {}", config.watch_namespace.as_deref().unwrap_or("<all>"));
    info!("  - Preferred zone: {}", config.zone.as_deref().unwrap_or("<none>"));

    let client = Client::try_default().await?;

    let store = EndpointStore::new();
    let syncer: Arc<dyn BackendSyncer> =
        Arc::new(EnvoyServiceBackendSyncer::new(Arc::new(store.clone())));
    info!("{} backend syncer initialized", syncer.proxy_name());

    let (resync_tx, resync_rx) = mpsc::channel(config.resync_buffer);

    let usage_controller = UsageController::new(syncer.clone(), resync_tx);
    let namespace = config.watch_namespace.clone();
    let usage_client = client.clone();
    tokio::spawn(async move {
        if let Err(e) = usage_controller.run(usage_client, namespace).await {
            error!("Usage controller error: {}", e);
        }
    });

    let backend_watcher = BackendWatcher::new(client, syncer, config.zone.clone());
    let namespace = config.watch_namespace.clone();
    tokio::spawn(async move {
        if let Err(e) = backend_watcher.run(namespace, resync_rx).await {
            error!("Backend watcher error: {}", e);
        }
    });

    // Keep the process alive
    tokio::signal::ctrl_c().await?;
    info!(
        "Shutdown signal received, exiting with {} services synced",
        store.len().await
    );

    Ok(())
}

fn init_tracing(config: &SyncerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.log_format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
