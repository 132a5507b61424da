//! worthy-sync - background sync daemon for the Worthy local store.
//!
//! Opens the on-device store, probes the remote API and keeps the two in
//! step until interrupted.

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use worthy_client::{
    spawn_probe, BackgroundTrigger, Config, ConflictSurface, Connectivity, HttpGateway,
    LocalStore, Orchestrator, RemoteGateway, SyncService,
};
use worthy_engine::SystemClock;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "worthy_client=debug,worthy_sync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!(
        api = %config.api_base_url,
        strategy = %config.conflict_strategy,
        "Starting worthy-sync"
    );

    // Open the local store, upgrading its layout if needed
    let store = LocalStore::open(&config.database_url).await?;
    tracing::info!(version = store.version(), "Local store ready at {}", config.database_url);

    let gateway: Arc<dyn RemoteGateway> = Arc::new(HttpGateway::from_config(&config)?);
    let orchestrator = Orchestrator::new(store.clone(), gateway.clone(), Arc::new(SystemClock))
        .with_strategy(config.conflict_strategy)
        .with_backoff(config.backoff);

    let recovered = orchestrator.recover().await?;
    if recovered > 0 {
        tracing::warn!(recovered, "Re-queued items interrupted by a previous run");
    }

    let surface = ConflictSurface::new(store, orchestrator.queue().clone());
    let sync = SyncService::spawn(orchestrator);

    // Connectivity drives the trigger; the probe drives connectivity
    let connectivity = Connectivity::new(gateway.ping().await);
    let probe = spawn_probe(gateway, connectivity.clone(), config.probe_interval);
    let trigger = BackgroundTrigger::spawn(sync.clone(), &connectivity, config.sync_interval);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    probe.abort();
    trigger.shutdown().await;

    let status = surface.status().await?;
    tracing::info!(
        pending = status.pending,
        manual = status.manual,
        conflicts = status.conflicts,
        "Final sync status"
    );

    Ok(())
}
