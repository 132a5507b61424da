//! Sync Queue: the durable, ordered list of mutations awaiting delivery.
//!
//! Items live in the `syncQueue` collection. Every transition re-reads the
//! item right before writing it back, so a stale in-memory copy can never
//! overwrite a newer one.

use crate::store::{LocalStore, Result};
use worthy_engine::{
    collections::SYNC_QUEUE, sort_for_drain, Clock, QueueItemId, SyncOperation, SyncQueueItem,
    SyncStatus,
};
use std::sync::Arc;

/// Persistent queue of pending mutations.
#[derive(Clone)]
pub struct SyncQueue {
    store: LocalStore,
    clock: Arc<dyn Clock>,
}

impl SyncQueue {
    pub fn new(store: LocalStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Append an operation.
    ///
    /// `createdAt` is kept strictly increasing so two mutations issued within
    /// the same millisecond still drain in the order they were made. Appends
    /// from every queue handle on the same store take turns.
    pub async fn enqueue(&self, operation: SyncOperation) -> Result<QueueItemId> {
        let _turn = self.store.sequenced().await;
        let mut at = self.clock.now();
        if let Some(latest) = self.all().await?.iter().map(|i| i.created_at).max() {
            if at <= latest {
                at = latest + chrono::Duration::milliseconds(1);
            }
        }
        let item = SyncQueueItem::new(operation, at);
        self.store.put_as(SYNC_QUEUE, &item).await?;
        tracing::debug!(
            item_id = %item.id,
            entity = %item.operation.entity_type,
            action = %item.operation.action,
            entity_id = %item.operation.entity_id,
            "Queued operation"
        );
        Ok(item.id)
    }

    /// Items in drain order.
    ///
    /// Without a filter this is everything automatic delivery may pick up
    /// (`pending` and `failed`); with one, only items of that status.
    pub async fn list_pending(&self, filter: Option<SyncStatus>) -> Result<Vec<SyncQueueItem>> {
        let mut items: Vec<SyncQueueItem> = self
            .all()
            .await?
            .into_iter()
            .filter(|item| match filter {
                Some(status) => item.status == status,
                None => item.status.is_retryable(),
            })
            .collect();
        sort_for_drain(&mut items);
        Ok(items)
    }

    /// Every item regardless of status, in drain order.
    pub async fn all(&self) -> Result<Vec<SyncQueueItem>> {
        let mut items: Vec<SyncQueueItem> = self.store.get_all_as(SYNC_QUEUE).await?;
        sort_for_drain(&mut items);
        Ok(items)
    }

    pub async fn get(&self, id: &str) -> Result<Option<SyncQueueItem>> {
        self.store.get_as(SYNC_QUEUE, id).await
    }

    /// Start an attempt: `processing`, attempts + 1.
    pub async fn mark_processing(&self, id: &str) -> Result<Option<SyncQueueItem>> {
        let now = self.clock.now();
        self.transition(id, |item| item.begin_attempt(now)).await
    }

    /// Record a failed attempt.
    pub async fn mark_failed(&self, id: &str, reason: &str) -> Result<Option<SyncQueueItem>> {
        let updated = self.transition(id, |item| item.record_failure(reason)).await?;
        if let Some(item) = &updated {
            if item.status == SyncStatus::ManualResolutionRequired {
                tracing::warn!(
                    item_id = %item.id,
                    attempts = item.attempts,
                    reason,
                    "Queue item needs manual resolution"
                );
            }
        }
        Ok(updated)
    }

    /// Delivered: drop the item.
    pub async fn mark_done(&self, id: &str) -> Result<bool> {
        self.store.remove(SYNC_QUEUE, id).await
    }

    /// Back to `pending` with a clean attempt count. Returns whether the item existed.
    pub async fn reset_to_pending(&self, id: &str) -> Result<bool> {
        let updated = self
            .transition(id, |item| {
                item.reset();
                Ok(())
            })
            .await?;
        Ok(updated.is_some())
    }

    /// Return items left `processing` by an interrupted pass to `pending`.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let mut recovered = 0;
        for mut item in self.list_pending(Some(SyncStatus::Processing)).await? {
            if item.recover() {
                self.store.put_as(SYNC_QUEUE, &item).await?;
                recovered += 1;
            }
        }
        if recovered > 0 {
            tracing::info!(recovered, "Recovered interrupted queue items");
        }
        Ok(recovered)
    }

    /// Items automatic delivery will still try.
    pub async fn pending_count(&self) -> Result<usize> {
        Ok(self.list_pending(None).await?.len())
    }

    /// Items waiting for a human.
    pub async fn manual_count(&self) -> Result<usize> {
        Ok(self
            .list_pending(Some(SyncStatus::ManualResolutionRequired))
            .await?
            .len())
    }

    /// Re-read, apply `change`, write back. `None` when the item is gone.
    /// An illegal transition leaves the stored item untouched.
    async fn transition<F>(&self, id: &str, change: F) -> Result<Option<SyncQueueItem>>
    where
        F: FnOnce(&mut SyncQueueItem) -> worthy_engine::error::Result<()>,
    {
        let Some(mut item) = self.get(id).await? else {
            return Ok(None);
        };
        change(&mut item)?;
        self.store.put_as(SYNC_QUEUE, &item).await?;
        Ok(Some(item))
    }
}
