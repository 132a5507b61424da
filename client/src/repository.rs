//! Local repository: the UI-facing write path.
//!
//! Every mutation lands in the Local Store first and is queued for delivery
//! in the same call, so the UI works the same online and offline.

use crate::error::{Error, Result};
use crate::queue::SyncQueue;
use crate::service::SyncHandle;
use crate::store::LocalStore;
use serde_json::Value;
use std::sync::Arc;
use worthy_engine::{clock, validate_payload, Clock, EntityType, Record, RecordId, SyncOperation};

/// Offline-first CRUD over the synced collections.
#[derive(Clone)]
pub struct LocalRepository {
    store: LocalStore,
    queue: SyncQueue,
    clock: Arc<dyn Clock>,
    sync: Option<SyncHandle>,
}

impl LocalRepository {
    pub fn new(store: LocalStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            queue: SyncQueue::new(store.clone(), clock.clone()),
            store,
            clock,
            sync: None,
        }
    }

    /// Builder-style method to nudge a sync service after every mutation.
    pub fn with_sync(mut self, handle: SyncHandle) -> Self {
        self.sync = Some(handle);
        self
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    /// Create a record under a fresh local id.
    pub async fn create(&self, entity: EntityType, fields: Value) -> Result<Record> {
        let Value::Object(mut fields) = fields else {
            return Err(worthy_engine::Error::InvalidPayload("fields must be an object".into()).into());
        };
        let now = self.clock.now();
        fields
            .entry("createdAt")
            .or_insert_with(|| Value::String(clock::to_iso(&now)));
        validate_payload(entity, &Value::Object(fields.clone()))?;

        let record = Record::new(RecordId::new_local(now), fields, Some(now));
        self.store.put(entity.collection(), &record.to_value()).await?;
        self.queue.enqueue(SyncOperation::create(entity, &record)).await?;

        tracing::debug!(entity = %entity, id = %record.id, "Created record");
        self.nudge();
        Ok(record)
    }

    /// Replace an existing record, stamping a new `updatedAt`.
    pub async fn update(&self, entity: EntityType, record: Record) -> Result<Record> {
        let collection = entity.collection();
        if self.store.get(collection, &record.id.store_key()).await?.is_none() {
            return Err(Error::NotFound(format!("{entity} {}", record.id)));
        }
        validate_payload(entity, &Value::Object(record.fields.clone()))?;

        let mut record = record;
        record.touch(self.clock.now());
        self.store.put(collection, &record.to_value()).await?;
        self.queue.enqueue(SyncOperation::update(entity, &record)).await?;

        tracing::debug!(entity = %entity, id = %record.id, "Updated record");
        self.nudge();
        Ok(record)
    }

    /// Delete a record locally and queue the delete.
    pub async fn delete(&self, entity: EntityType, id: &RecordId) -> Result<()> {
        if !self.store.remove(entity.collection(), &id.store_key()).await? {
            return Err(Error::NotFound(format!("{entity} {id}")));
        }
        self.queue
            .enqueue(SyncOperation::delete(entity, id.clone()))
            .await?;

        tracing::debug!(entity = %entity, id = %id, "Deleted record");
        self.nudge();
        Ok(())
    }

    pub async fn get(&self, entity: EntityType, id: &RecordId) -> Result<Option<Record>> {
        match self.store.get(entity.collection(), &id.store_key()).await? {
            Some(value) => Ok(Some(Record::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Every readable record of a collection. Unreadable ones are skipped.
    pub async fn list(&self, entity: EntityType) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        for value in self.store.get_all(entity.collection()).await? {
            match Record::from_value(value) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(entity = %entity, error = %e, "Skipping unreadable record"),
            }
        }
        Ok(records)
    }

    fn nudge(&self) {
        if let Some(sync) = &self.sync {
            if !sync.request_sync() {
                tracing::warn!("Sync service is not running; change stays queued");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use worthy_engine::{Action, ManualClock};

    async fn repo() -> LocalRepository {
        let store = LocalStore::in_memory().await.unwrap();
        LocalRepository::new(store, Arc::new(ManualClock::at_millis(1_706_745_600_000)))
    }

    fn coffee() -> Value {
        json!({
            "amount": 350,
            "isIncome": false,
            "currency": "EUR",
            "description": "Coffee"
        })
    }

    #[tokio::test]
    async fn create_assigns_local_id_and_queues() {
        let repo = repo().await;
        let record = repo.create(EntityType::Transaction, coffee()).await.unwrap();

        assert!(record.id.is_local());
        assert!(record.id.to_string().starts_with("local_1706745600000_"));
        assert_eq!(record.get("createdAt"), Some(&json!("2024-02-01T00:00:00.000Z")));

        let pending = repo.queue().list_pending(None).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].operation.action, Action::Create);
        assert_eq!(pending[0].operation.entity_id, record.id);

        assert_eq!(repo.get(EntityType::Transaction, &record.id).await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn invalid_payload_writes_nothing() {
        let repo = repo().await;
        let err = repo
            .create(EntityType::Transaction, json!({"amount": "lots"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Engine(_)));
        assert!(repo.list(EntityType::Transaction).await.unwrap().is_empty());
        assert_eq!(repo.queue().pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn update_and_delete_require_the_record() {
        let repo = repo().await;
        let ghost = Record::from_value(json!({"id": 9, "name": "x"})).unwrap();
        assert!(matches!(
            repo.update(EntityType::ShoppingSession, ghost.clone()).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            repo.delete(EntityType::ShoppingSession, &ghost.id).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_then_delete() {
        let repo = repo().await;
        let mut record = repo.create(EntityType::Transaction, coffee()).await.unwrap();
        record.fields.insert("description".into(), json!("Espresso"));

        let updated = repo.update(EntityType::Transaction, record).await.unwrap();
        assert_eq!(updated.get("description"), Some(&json!("Espresso")));

        repo.delete(EntityType::Transaction, &updated.id).await.unwrap();
        assert!(repo.get(EntityType::Transaction, &updated.id).await.unwrap().is_none());

        let actions: Vec<Action> = repo
            .queue()
            .all()
            .await
            .unwrap()
            .iter()
            .map(|i| i.operation.action)
            .collect();
        assert_eq!(actions, vec![Action::Create, Action::Update, Action::Delete]);
    }
}
