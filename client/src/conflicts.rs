//! Conflict Surface: what the UI needs to show about sync state.
//!
//! [`ConflictLog`] is the write side used by the orchestrator.
//! [`ConflictSurface`] is a read-only view for the UI.

use crate::queue::SyncQueue;
use crate::store::{LocalStore, Result};
use serde::Serialize;
use worthy_engine::{collections::CONFLICTS, DataConflict};

/// Persistent record of conflicts awaiting a human.
#[derive(Debug, Clone)]
pub struct ConflictLog {
    store: LocalStore,
}

impl ConflictLog {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Store a conflict. An open conflict for the same entity is refreshed
    /// with the new versions and keeps its original `createdAt`.
    pub async fn record(&self, conflict: DataConflict) -> Result<DataConflict> {
        let stored = match self.get(&conflict.id).await? {
            Some(mut open) if !open.resolved => {
                open.refresh(conflict.local_version, conflict.remote_version);
                open
            }
            _ => conflict,
        };
        self.store.put_as(CONFLICTS, &stored).await?;
        tracing::info!(conflict_id = %stored.id, collection = %stored.collection, "Recorded conflict");
        Ok(stored)
    }

    pub async fn get(&self, id: &str) -> Result<Option<DataConflict>> {
        self.store.get_as(CONFLICTS, id).await
    }

    /// Flag a conflict as settled. Returns whether it existed.
    pub async fn mark_resolved(&self, id: &str) -> Result<bool> {
        let Some(mut conflict) = self.get(id).await? else {
            return Ok(false);
        };
        conflict.resolved = true;
        self.store.put_as(CONFLICTS, &conflict).await?;
        Ok(true)
    }

    /// Delete settled conflicts, returning how many went.
    pub async fn purge_resolved(&self) -> Result<usize> {
        let mut purged = 0;
        for conflict in self.store.get_all_as::<DataConflict>(CONFLICTS).await? {
            if conflict.resolved && self.store.remove(CONFLICTS, &conflict.id).await? {
                purged += 1;
            }
        }
        if purged > 0 {
            tracing::debug!(purged, "Purged resolved conflicts");
        }
        Ok(purged)
    }
}

/// Counts shown by the UI's sync indicator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    /// Mutations automatic delivery will still try
    pub pending: usize,
    /// Mutations that exhausted their attempts
    pub manual: usize,
    /// Unresolved conflicts
    pub conflicts: usize,
}

impl StatusView {
    pub fn is_clean(&self) -> bool {
        self.pending == 0 && self.manual == 0 && self.conflicts == 0
    }
}

/// Read-only view of conflicts and queue health.
#[derive(Clone)]
pub struct ConflictSurface {
    store: LocalStore,
    queue: SyncQueue,
}

impl ConflictSurface {
    pub fn new(store: LocalStore, queue: SyncQueue) -> Self {
        Self { store, queue }
    }

    /// Open conflicts, oldest first.
    pub async fn unresolved(&self) -> Result<Vec<DataConflict>> {
        let mut open: Vec<DataConflict> = self
            .store
            .get_all_as::<DataConflict>(CONFLICTS)
            .await?
            .into_iter()
            .filter(|c| !c.resolved)
            .collect();
        open.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(open)
    }

    pub async fn count(&self) -> Result<usize> {
        Ok(self.unresolved().await?.len())
    }

    pub async fn get(&self, id: &str) -> Result<Option<DataConflict>> {
        self.store.get_as(CONFLICTS, id).await
    }

    pub async fn status(&self) -> Result<StatusView> {
        Ok(StatusView {
            pending: self.queue.pending_count().await?,
            manual: self.queue.manual_count().await?,
            conflicts: self.count().await?,
        })
    }
}
