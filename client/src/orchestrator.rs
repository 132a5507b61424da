//! Sync Orchestrator: drains the queue and reconciles collections.
//!
//! # Drain
//!
//! Items are taken in `createdAt` order. Before anything goes over the wire
//! each item is checked against local state:
//!
//! - a create whose local id was already rebound is a duplicate and is dropped
//! - a create whose record was deleted before it ever synced is dropped
//! - updates and deletes issued against a local id are retargeted at the
//!   server id recorded in `idRebindings`; without one a delete is dropped
//!   and an update waits for its create
//! - an update whose local record has moved past every queued edit was
//!   overtaken by a newer server version and is dropped
//! - a failed item still inside its backoff window is held back, together
//!   with every later item for the same entity
//!
//! A network failure ends the pass at once. A rejection fails only its item.
//!
//! # Full pass
//!
//! [`Orchestrator::sync_pass`] reconciles every collection against the
//! server first and drains afterwards, so a stale queued edit is recognised
//! as overtaken before it can overwrite a newer server version.

use crate::conflicts::ConflictLog;
use crate::error::{Error, Result};
use crate::gateway::{GatewayError, RemoteGateway, RemoteResult};
use crate::queue::SyncQueue;
use crate::store::LocalStore;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use worthy_engine::{
    clock, collections::ID_REBINDINGS, Action, Backoff, Clock, EntityType, QueueItemId,
    Reconciler, Record, RecordId, Resolution, Strategy, SyncOperation, SyncQueueItem, SyncStatus,
    Timestamp,
};

/// Local id to server id mapping written when a create is acknowledged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdRebinding {
    /// The local id
    pub id: String,
    pub server_id: i64,
    pub collection: String,
    #[serde(with = "clock::iso8601")]
    pub rebound_at: Timestamp,
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    /// Acknowledged by the server and removed
    pub delivered: usize,
    /// Failed and left for a later retry
    pub failed: usize,
    /// Failed for the last time and now need a human
    pub escalated: usize,
    /// Removed without a remote call (duplicates, dead or overtaken edits)
    pub dropped: usize,
    /// Updates waiting for their create to be acknowledged
    pub deferred: usize,
    /// Skipped this pass by backoff or to keep per-entity order
    pub held: usize,
    /// The pass stopped on a network failure
    pub halted: bool,
}

impl DrainReport {
    pub fn is_complete(&self) -> bool {
        !self.halted
    }
}

/// Outcome of reconciling one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionReport {
    pub collection: String,
    pub inserted: usize,
    pub updated: usize,
    pub kept_local: usize,
    pub conflicts: usize,
    /// Merged records queued for delivery
    pub pushed: usize,
    pub unsynced: usize,
    pub orphaned: usize,
    /// Server records left out because a delete for them is queued
    pub awaiting_delete: usize,
    /// Planned writes the store refused
    pub write_failures: usize,
}

/// Outcome of a full sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub collections: Vec<CollectionReport>,
    pub drain: Option<DrainReport>,
    /// The server could not be reached; the drain was skipped
    pub offline: bool,
    pub errors: Vec<String>,
}

impl SyncReport {
    /// Whether the pass ran to the end without network or storage trouble.
    pub fn is_complete(&self) -> bool {
        !self.offline
            && self.errors.is_empty()
            && self.drain.as_ref().is_some_and(DrainReport::is_complete)
    }
}

/// What to do with a queue item before touching the network.
enum Prepared {
    /// Send this operation.
    Send(SyncOperation),
    /// Remove the item without a remote call.
    Drop(&'static str),
    /// Leave the item pending for a later pass.
    Defer,
}

/// A create for a local record is only done once the server named its id.
fn acknowledged(
    operation: &SyncOperation,
    result: RemoteResult,
) -> std::result::Result<RemoteResult, GatewayError> {
    if operation.action == Action::Create
        && operation.entity_id.is_local()
        && result.server_id.is_none()
    {
        return Err(GatewayError::InvalidResponse(format!(
            "create of {} acknowledged without a server id",
            operation.entity_id
        )));
    }
    Ok(result)
}

/// Drives delivery of queued mutations and reconciliation of collections.
pub struct Orchestrator {
    store: LocalStore,
    queue: SyncQueue,
    conflicts: ConflictLog,
    gateway: Arc<dyn RemoteGateway>,
    clock: Arc<dyn Clock>,
    reconciler: Reconciler,
    backoff: Backoff,
}

impl Orchestrator {
    pub fn new(store: LocalStore, gateway: Arc<dyn RemoteGateway>, clock: Arc<dyn Clock>) -> Self {
        Self {
            queue: SyncQueue::new(store.clone(), clock.clone()),
            conflicts: ConflictLog::new(store.clone()),
            store,
            gateway,
            clock,
            reconciler: Reconciler::default(),
            backoff: Backoff::default(),
        }
    }

    /// Builder-style method to set the bulk reconciliation strategy.
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.reconciler = Reconciler::new(strategy);
        self
    }

    /// Builder-style method to set the retry backoff.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub fn conflicts(&self) -> &ConflictLog {
        &self.conflicts
    }

    pub fn gateway(&self) -> &Arc<dyn RemoteGateway> {
        &self.gateway
    }

    /// Server id a local id was rebound to, if any.
    pub async fn rebinding(&self, local_id: &str) -> Result<Option<i64>> {
        let entry: Option<IdRebinding> = self.store.get_as(ID_REBINDINGS, local_id).await?;
        Ok(entry.map(|e| e.server_id))
    }

    /// Deliver queued mutations in order.
    ///
    /// Only one drain runs at a time, so an item still `processing` when a
    /// pass starts was left behind by an earlier one and is picked up again.
    pub async fn drain(&self) -> Result<DrainReport> {
        self.queue.recover_interrupted().await?;
        let snapshot = self.queue.all().await?;
        let now = self.clock.now();
        let mut report = DrainReport::default();
        let mut held: HashSet<(EntityType, String)> = HashSet::new();

        for item in snapshot.iter().filter(|i| i.status.is_retryable()) {
            let entity_key = (item.operation.entity_type, item.operation.entity_id.store_key());

            if held.contains(&entity_key) {
                report.held += 1;
                continue;
            }
            if !self.backoff.is_due(item, now) {
                tracing::debug!(item_id = %item.id, attempts = item.attempts, "Waiting out backoff");
                held.insert(entity_key);
                report.held += 1;
                continue;
            }

            let operation = match self.prepare(item, &snapshot).await? {
                Prepared::Send(operation) => operation,
                Prepared::Drop(reason) => {
                    tracing::debug!(item_id = %item.id, entity = %item.operation.entity_type, reason, "Dropping queue item");
                    self.queue.mark_done(&item.id).await?;
                    report.dropped += 1;
                    continue;
                }
                Prepared::Defer => {
                    tracing::debug!(item_id = %item.id, entity_id = %item.operation.entity_id, "Deferring until create is acknowledged");
                    held.insert(entity_key);
                    report.deferred += 1;
                    continue;
                }
            };

            if self.queue.mark_processing(&item.id).await?.is_none() {
                continue;
            }

            let outcome = self
                .gateway
                .execute(&item.id, &operation)
                .await
                .and_then(|result| acknowledged(&operation, result));
            match outcome {
                Ok(result) => {
                    if let Err(e) = self.settle(item, result).await {
                        tracing::error!(item_id = %item.id, error = %e, "Failed to record delivery");
                        if let Err(release) = self.queue.mark_failed(&item.id, &e.to_string()).await {
                            tracing::error!(item_id = %item.id, error = %release, "Failed to release queue item");
                        }
                        return Err(e);
                    }
                    report.delivered += 1;
                    tracing::debug!(
                        item_id = %item.id,
                        entity = %operation.entity_type,
                        action = %operation.action,
                        entity_id = %operation.entity_id,
                        "Delivered"
                    );
                }
                Err(e) => {
                    let updated = self.queue.mark_failed(&item.id, &e.to_string()).await?;
                    if updated.is_some_and(|i| i.status == SyncStatus::ManualResolutionRequired) {
                        report.escalated += 1;
                    } else {
                        report.failed += 1;
                    }

                    if e.is_network() {
                        tracing::warn!(item_id = %item.id, error = %e, "Network failure, halting drain");
                        report.halted = true;
                        break;
                    }
                    tracing::warn!(item_id = %item.id, entity = %operation.entity_type, error = %e, "Operation rejected");
                    held.insert(entity_key);
                }
            }
        }

        tracing::info!(
            delivered = report.delivered,
            failed = report.failed,
            escalated = report.escalated,
            dropped = report.dropped,
            deferred = report.deferred,
            held = report.held,
            halted = report.halted,
            "Drain pass finished"
        );
        Ok(report)
    }

    async fn prepare(&self, item: &SyncQueueItem, snapshot: &[SyncQueueItem]) -> Result<Prepared> {
        let op = &item.operation;
        let collection = op.collection();

        let RecordId::Local(local_id) = &op.entity_id else {
            if op.action == Action::Update && self.is_overtaken(op, snapshot).await? {
                return Ok(Prepared::Drop("overtaken by a newer version"));
            }
            return Ok(Prepared::Send(op.clone()));
        };

        let server_id = self.rebinding(local_id).await?;
        match (op.action, server_id) {
            (Action::Create, Some(_)) => Ok(Prepared::Drop("already created")),
            (Action::Create, None) => {
                if self.store.get(collection, local_id).await?.is_none() {
                    Ok(Prepared::Drop("deleted before it synced"))
                } else {
                    Ok(Prepared::Send(op.clone()))
                }
            }
            (_, Some(server_id)) => Ok(Prepared::Send(op.rebound_to(RecordId::Remote(server_id)))),
            (Action::Delete, None) => Ok(Prepared::Drop("never reached the server")),
            (Action::Update, None) => {
                let create_queued = snapshot.iter().any(|other| {
                    other.operation.action == Action::Create
                        && other.operation.entity_type == op.entity_type
                        && other.operation.entity_id == op.entity_id
                });
                if create_queued {
                    Ok(Prepared::Defer)
                } else {
                    Ok(Prepared::Drop("no create to wait for"))
                }
            }
        }
    }

    /// An update queued against a server id is overtaken when the local
    /// record is newer than every edit queued for that entity.
    async fn is_overtaken(&self, op: &SyncOperation, snapshot: &[SyncQueueItem]) -> Result<bool> {
        let Some(value) = self.store.get(op.collection(), &op.entity_id.store_key()).await? else {
            return Ok(false);
        };
        let Ok(local) = Record::from_value(value) else {
            return Ok(false);
        };
        let newest_edit = snapshot
            .iter()
            .filter(|i| {
                i.operation.action == Action::Update
                    && i.operation.entity_type == op.entity_type
                    && i.operation.entity_id == op.entity_id
            })
            .map(|i| i.operation.payload_updated_millis())
            .max()
            .unwrap_or(0);
        Ok(local.updated_millis() > newest_edit)
    }

    async fn settle(&self, item: &SyncQueueItem, result: RemoteResult) -> Result<()> {
        self.complete(item, result).await?;
        self.queue.mark_done(&item.id).await?;
        Ok(())
    }

    /// Apply local effects of an acknowledged operation.
    async fn complete(&self, item: &SyncQueueItem, result: RemoteResult) -> Result<()> {
        let op = &item.operation;
        let (Action::Create, RecordId::Local(local_id), Some(server_id)) =
            (op.action, &op.entity_id, result.server_id)
        else {
            return Ok(());
        };

        let collection = op.collection();
        let now = self.clock.now();

        // The rebinding goes first: it is what makes a replayed create a no-op.
        self.store
            .put_as(
                ID_REBINDINGS,
                &IdRebinding {
                    id: local_id.clone(),
                    server_id,
                    collection: collection.to_string(),
                    rebound_at: now,
                },
            )
            .await?;

        if let Some(value) = self.store.get(collection, local_id).await? {
            let mut record = Record::from_value(value)?.with_id(RecordId::Remote(server_id));
            record.touch(now);
            self.store.put(collection, &record.to_value()).await?;
            self.store.remove(collection, local_id).await?;
        }

        tracing::info!(collection, local_id = %local_id, server_id, "Rebound local record to server id");
        Ok(())
    }

    /// Merge one collection with the server's copy.
    pub async fn reconcile_collection(&self, entity: EntityType) -> Result<CollectionReport> {
        let collection = entity.collection();
        let remote = self.gateway.fetch_all(entity).await?;

        let mut local = Vec::new();
        for value in self.store.get_all(collection).await? {
            match Record::from_value(value) {
                Ok(record) => local.push(record),
                Err(e) => tracing::warn!(collection, error = %e, "Skipping unreadable local record"),
            }
        }

        // A local edit newer than the server copy and still queued is on its
        // way up; the drain delivers it, reconciliation leaves it alone.
        // Records with a queued delete stay gone locally whatever their state.
        let mut in_flight = HashSet::new();
        let mut deleting = HashSet::new();
        for item in self.queue.all().await? {
            let op = item.operation;
            if op.entity_type != entity {
                continue;
            }
            match (op.action, op.entity_id) {
                (Action::Delete, RecordId::Local(local_id)) => {
                    if let Some(server_id) = self.rebinding(&local_id).await? {
                        deleting.insert(RecordId::Remote(server_id).store_key());
                    }
                }
                (Action::Delete, id) => {
                    deleting.insert(id.store_key());
                }
                (_, id) if item.status != SyncStatus::ManualResolutionRequired => {
                    in_flight.insert(id.store_key());
                }
                _ => {}
            }
        }
        let remote_by_key: HashMap<String, &Record> =
            remote.iter().map(|r| (r.id.store_key(), r)).collect();
        let (ahead, local): (Vec<Record>, Vec<Record>) = local.into_iter().partition(|ours| {
            let key = ours.id.store_key();
            in_flight.contains(&key)
                && remote_by_key
                    .get(&key)
                    .is_some_and(|theirs| ours.updated_millis() > theirs.updated_millis())
        });
        let ahead: HashSet<String> = ahead.iter().map(|r| r.id.store_key()).collect();
        let (dying, theirs): (Vec<Record>, Vec<Record>) = remote
            .iter()
            .filter(|r| !ahead.contains(&r.id.store_key()))
            .cloned()
            .partition(|r| deleting.contains(&r.id.store_key()));

        let plan = self.reconciler.plan(collection, &local, &theirs, self.clock.now());
        let mut report = CollectionReport {
            collection: collection.to_string(),
            inserted: plan.inserted,
            updated: plan.updated,
            kept_local: plan.kept_local + ahead.len(),
            conflicts: plan.conflicts.len(),
            unsynced: plan.unsynced.len(),
            orphaned: plan.orphaned.len(),
            awaiting_delete: dying.len(),
            ..CollectionReport::default()
        };

        for record in &plan.writes {
            if let Err(e) = self.store.put(collection, &record.to_value()).await {
                tracing::error!(collection, id = %record.id, error = %e, "Failed to store reconciled record");
                report.write_failures += 1;
                continue;
            }
            // Merged records carry local changes the server has not seen.
            let differs_from_remote = remote_by_key
                .get(&record.id.store_key())
                .is_some_and(|r| r.fields != record.fields);
            if differs_from_remote {
                self.queue.enqueue(SyncOperation::update(entity, record)).await?;
                report.pushed += 1;
            }
        }

        for conflict in plan.conflicts {
            self.conflicts.record(conflict).await?;
        }

        if !plan.orphaned.is_empty() {
            tracing::warn!(collection, orphaned = ?plan.orphaned, "Local records missing on the server");
        }
        tracing::debug!(
            collection,
            inserted = report.inserted,
            updated = report.updated,
            conflicts = report.conflicts,
            "Reconciled collection"
        );
        Ok(report)
    }

    /// Reconcile every synced collection.
    pub async fn reconcile_all(&self) -> Result<Vec<CollectionReport>> {
        let mut reports = Vec::with_capacity(EntityType::ALL.len());
        for entity in EntityType::ALL {
            reports.push(self.reconcile_collection(entity).await?);
        }
        Ok(reports)
    }

    /// Reconcile everything, then drain. Never fails; problems are reported.
    pub async fn sync_pass(&self) -> SyncReport {
        let mut report = SyncReport::default();

        for entity in EntityType::ALL {
            match self.reconcile_collection(entity).await {
                Ok(collection) => report.collections.push(collection),
                Err(Error::Gateway(e)) if e.is_network() => {
                    tracing::warn!(entity = %entity, error = %e, "Server unreachable, skipping drain");
                    report.offline = true;
                    break;
                }
                Err(e) => {
                    tracing::error!(entity = %entity, error = %e, "Reconciliation failed");
                    report.errors.push(e.to_string());
                }
            }
        }

        if !report.offline {
            match self.drain().await {
                Ok(drain) => report.drain = Some(drain),
                Err(e) => {
                    tracing::error!(error = %e, "Drain failed");
                    report.errors.push(e.to_string());
                }
            }
        }

        tracing::info!(
            offline = report.offline,
            errors = report.errors.len(),
            complete = report.is_complete(),
            "Sync pass finished"
        );
        report
    }

    /// Settle a stored conflict with a human's choice.
    ///
    /// Local and merged picks are queued for delivery so the server catches up.
    pub async fn resolve_conflict(&self, id: &str, resolution: Resolution) -> Result<Record> {
        let conflict = self
            .conflicts
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("conflict {id}")))?;
        let entity = EntityType::from_collection(&conflict.collection)?;

        let record = conflict.pick(resolution, self.clock.now());
        self.store.put(&conflict.collection, &record.to_value()).await?;
        if resolution != Resolution::Remote {
            self.queue.enqueue(SyncOperation::update(entity, &record)).await?;
        }
        self.conflicts.mark_resolved(id).await?;

        tracing::info!(conflict_id = %id, ?resolution, "Conflict resolved");
        Ok(record)
    }

    /// Put a queue item back to `pending` with a clean attempt count.
    pub async fn reset(&self, id: &QueueItemId) -> Result<bool> {
        Ok(self.queue.reset_to_pending(id).await?)
    }

    /// Run once at startup: items left `processing` by a dead process go back to `pending`.
    pub async fn recover(&self) -> Result<usize> {
        Ok(self.queue.recover_interrupted().await?)
    }
}
