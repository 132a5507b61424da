//! Background Trigger: decides when a sync pass runs.
//!
//! A pass starts on every offline→online transition and on a fixed interval
//! while online, so a missed connectivity event only delays syncing until
//! the next tick.

use crate::gateway::RemoteGateway;
use crate::orchestrator::SyncReport;
use crate::service::SyncHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Tag the platform's background scheduler knows the sync task by.
pub const SYNC_TAG: &str = "sync-data";

/// Why a platform-scheduled pass did not finish.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("Unknown background task tag: {0}")]
    UnknownTag(String),

    #[error("Sync service has stopped")]
    ServiceStopped,

    #[error("Sync pass did not complete")]
    Incomplete(SyncReport),
}

/// Shared online/offline flag.
#[derive(Debug, Clone)]
pub struct Connectivity {
    sender: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (sender, _) = watch::channel(online);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    /// Publish the current state. Only changes wake subscribers.
    pub fn set_online(&self, online: bool) {
        self.sender.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            tracing::info!(online, "Connectivity changed");
            true
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

/// Running trigger loop. Dropping it does not stop the loop; call [`shutdown`](Self::shutdown).
pub struct BackgroundTrigger {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl BackgroundTrigger {
    /// Start triggering passes on `sync` from `connectivity` and a periodic tick.
    pub fn spawn(sync: SyncHandle, connectivity: &Connectivity, interval: Duration) -> Self {
        let (shutdown, mut stop) = watch::channel(false);
        let mut online = connectivity.subscribe();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; that is the startup pass.
            let mut was_online = *online.borrow_and_update();

            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    changed = online.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let now_online = *online.borrow_and_update();
                        if now_online && !was_online {
                            tracing::info!("Back online, requesting sync");
                            if !sync.request_sync() {
                                break;
                            }
                        }
                        was_online = now_online;
                    }
                    _ = ticker.tick() => {
                        if was_online {
                            tracing::debug!("Periodic sync");
                            if !sync.request_sync() {
                                break;
                            }
                        }
                    }
                }
            }

            tracing::info!("Background trigger stopped");
        });

        Self { shutdown, task }
    }

    /// Stop the loop and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

/// Entry point for the platform's background scheduler.
///
/// Returns `Ok` only when the pass ran to completion; on `Err` the platform
/// should schedule a retry.
pub async fn on_platform_event(sync: &SyncHandle, tag: &str) -> Result<SyncReport, TriggerError> {
    if tag != SYNC_TAG {
        return Err(TriggerError::UnknownTag(tag.to_string()));
    }
    let report = sync.sync().await.map_err(|_| TriggerError::ServiceStopped)?;
    if report.is_complete() {
        Ok(report)
    } else {
        tracing::warn!(offline = report.offline, errors = report.errors.len(), "Background pass incomplete");
        Err(TriggerError::Incomplete(report))
    }
}

/// Feed `connectivity` from the gateway's reachability probe every `period`.
pub fn spawn_probe(
    gateway: Arc<dyn RemoteGateway>,
    connectivity: Connectivity,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            connectivity.set_online(gateway.ping().await);
        }
    })
}
