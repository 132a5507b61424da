//! Single-writer sync service.
//!
//! One task owns the [`Orchestrator`] and runs commands one after another, so
//! two passes never race on the same queue. Sync and drain requests that pile
//! up while a pass is running are folded into the next pass and all of them
//! receive its report.

use crate::error::{Error, Result};
use crate::orchestrator::{DrainReport, Orchestrator, SyncReport};
use std::collections::VecDeque;
use tokio::sync::{mpsc, oneshot};
use worthy_engine::{QueueItemId, Record, Resolution};

const COMMAND_CAPACITY: usize = 64;

/// Commands accepted by the service task.
#[derive(Debug)]
enum Command {
    /// Full pass. `None` when nobody waits for the report.
    Sync {
        reply: Option<oneshot::Sender<SyncReport>>,
    },
    Drain {
        reply: oneshot::Sender<std::result::Result<DrainReport, String>>,
    },
    Reset {
        id: QueueItemId,
        reply: oneshot::Sender<Result<bool>>,
    },
    ResolveConflict {
        id: String,
        resolution: Resolution,
        reply: oneshot::Sender<Result<Record>>,
    },
}

/// Cloneable handle to a running [`SyncService`].
#[derive(Debug, Clone)]
pub struct SyncHandle {
    sender: mpsc::Sender<Command>,
}

impl SyncHandle {
    /// Run a full pass (reconcile, then drain) and wait for its report.
    pub async fn sync(&self) -> Result<SyncReport> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Sync { reply: Some(reply) }).await?;
        rx.await.map_err(|_| Error::ServiceStopped)
    }

    /// Drain the queue and wait for the report.
    pub async fn drain(&self) -> Result<DrainReport> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Drain { reply }).await?;
        rx.await
            .map_err(|_| Error::ServiceStopped)?
            .map_err(Error::PassFailed)
    }

    /// Ask for a pass without waiting. Returns `false` if the service is gone.
    ///
    /// A full command channel means passes are already lined up, so the
    /// request is dropped.
    pub fn request_sync(&self) -> bool {
        match self.sender.try_send(Command::Sync { reply: None }) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Return a queue item to `pending` with zero attempts.
    pub async fn reset(&self, id: impl Into<QueueItemId>) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Reset {
            id: id.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| Error::ServiceStopped)?
    }

    /// Settle a conflict with a human's pick.
    pub async fn resolve_conflict(
        &self,
        id: impl Into<String>,
        resolution: Resolution,
    ) -> Result<Record> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ResolveConflict {
            id: id.into(),
            resolution,
            reply,
        })
        .await?;
        rx.await.map_err(|_| Error::ServiceStopped)?
    }

    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.sender
            .send(command)
            .await
            .map_err(|_| Error::ServiceStopped)
    }
}

/// The task that owns the orchestrator.
pub struct SyncService {
    orchestrator: Orchestrator,
    receiver: mpsc::Receiver<Command>,
    backlog: VecDeque<Command>,
}

impl SyncService {
    /// Start the service. It stops once every handle has been dropped.
    pub fn spawn(orchestrator: Orchestrator) -> SyncHandle {
        let (sender, receiver) = mpsc::channel(COMMAND_CAPACITY);
        let service = Self {
            orchestrator,
            receiver,
            backlog: VecDeque::new(),
        };
        tokio::spawn(service.run());
        SyncHandle { sender }
    }

    async fn next(&mut self) -> Option<Command> {
        match self.backlog.pop_front() {
            Some(command) => Some(command),
            None => self.receiver.recv().await,
        }
    }

    /// Take every waiting command `take` accepts; the rest keep their order.
    fn gather<T>(&mut self, mut take: impl FnMut(Command) -> std::result::Result<T, Command>) -> Vec<T> {
        let mut taken = Vec::new();
        let mut rest = VecDeque::with_capacity(self.backlog.len());
        for command in self.backlog.drain(..) {
            match take(command) {
                Ok(t) => taken.push(t),
                Err(command) => rest.push_back(command),
            }
        }
        while let Ok(command) = self.receiver.try_recv() {
            match take(command) {
                Ok(t) => taken.push(t),
                Err(command) => rest.push_back(command),
            }
        }
        self.backlog = rest;
        taken
    }

    async fn run(mut self) {
        tracing::info!("Sync service started");

        while let Some(command) = self.next().await {
            match command {
                Command::Sync { reply } => {
                    let mut waiters: Vec<_> = reply.into_iter().collect();
                    waiters.extend(
                        self.gather(|c| match c {
                            Command::Sync { reply } => Ok(reply),
                            other => Err(other),
                        })
                        .into_iter()
                        .flatten(),
                    );

                    let report = self.orchestrator.sync_pass().await;
                    for waiter in waiters {
                        let _ = waiter.send(report.clone());
                    }
                }
                Command::Drain { reply } => {
                    let mut waiters = vec![reply];
                    waiters.extend(self.gather(|c| match c {
                        Command::Drain { reply } => Ok(reply),
                        other => Err(other),
                    }));
                    if waiters.len() > 1 {
                        tracing::debug!(waiters = waiters.len(), "Coalesced drain requests");
                    }

                    let report = self.orchestrator.drain().await.map_err(|e| {
                        tracing::error!(error = %e, "Drain failed");
                        e.to_string()
                    });
                    for waiter in waiters {
                        let _ = waiter.send(report.clone());
                    }
                }
                Command::Reset { id, reply } => {
                    let _ = reply.send(self.orchestrator.reset(&id).await);
                }
                Command::ResolveConflict {
                    id,
                    resolution,
                    reply,
                } => {
                    let _ = reply.send(self.orchestrator.resolve_conflict(&id, resolution).await);
                }
            }
        }

        tracing::info!("Sync service stopped");
    }
}
