//! End-to-end sync behaviour against an in-memory remote.

mod common;

use common::{at, record, transaction, Device};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use worthy_client::{ConflictSurface, GatewayError, InMemoryRemote, SyncService};
use worthy_engine::{
    clock::to_iso, collections::TRANSACTIONS, Action, Backoff, EntityType, Reconciler, Record,
    RecordId, Resolution, Strategy, SyncOperation, SyncStatus,
};

fn shared_transaction(id: i64, description: &str, secs: i64) -> Record {
    record(json!({
        "id": id,
        "amount": 1250,
        "isIncome": false,
        "currency": "EUR",
        "description": description,
        "updatedAt": to_iso(&at(secs))
    }))
}

async fn seed(device: &Device, remote: &InMemoryRemote, shared: &Record) {
    remote.insert(EntityType::Transaction, shared.clone());
    device
        .store
        .put(TRANSACTIONS, &shared.to_value())
        .await
        .unwrap();
}

async fn edit(device: &Device, id: i64, description: &str) -> Record {
    let mut current = device
        .repo
        .get(EntityType::Transaction, &RecordId::Remote(id))
        .await
        .unwrap()
        .unwrap();
    current.fields.insert("description".into(), json!(description));
    device
        .repo
        .update(EntityType::Transaction, current)
        .await
        .unwrap()
}

fn description(record: &Record) -> &str {
    record.get("description").and_then(|v| v.as_str()).unwrap_or_default()
}

#[tokio::test]
async fn replayed_create_does_not_duplicate_server_record() {
    let remote = Arc::new(InMemoryRemote::starting_at(77));
    let device = Device::new(remote.clone()).await;

    let created = device
        .repo
        .create(EntityType::Transaction, transaction("Coffee"))
        .await
        .unwrap();
    let report = device.orchestrator.drain().await.unwrap();
    assert_eq!(report.delivered, 1);

    // The same create queued again, as if the process died before removing it.
    device
        .repo
        .queue()
        .enqueue(SyncOperation::create(EntityType::Transaction, &created))
        .await
        .unwrap();
    let report = device.orchestrator.drain().await.unwrap();

    assert_eq!(report.dropped, 1);
    assert_eq!(report.delivered, 0);
    assert_eq!(remote.count_calls(Action::Create), 1);
    assert_eq!(remote.records(EntityType::Transaction).len(), 1);
    assert_eq!(device.repo.queue().pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn network_failure_stops_later_edits_in_the_same_pass() {
    let remote = Arc::new(InMemoryRemote::new());
    let device = Device::new(remote.clone()).await;
    seed(&device, &remote, &shared_transaction(5, "Groceries", 0)).await;

    for text in ["one", "two", "three"] {
        device.wait(1);
        edit(&device, 5, text).await;
    }

    remote.pass_next();
    remote.fail_next(GatewayError::Network("connection reset".into()));
    let report = device.orchestrator.drain().await.unwrap();

    assert!(report.halted);
    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed, 1);
    let sent: Vec<String> = remote
        .calls()
        .iter()
        .map(|c| c.operation.payload["description"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(sent, vec!["one", "two"]);

    let left = device.repo.queue().all().await.unwrap();
    assert_eq!(left.len(), 2);
    assert_eq!((left[0].status, left[0].attempts), (SyncStatus::Failed, 1));
    assert_eq!((left[1].status, left[1].attempts), (SyncStatus::Pending, 0));

    let report = device.orchestrator.drain().await.unwrap();
    assert_eq!(report.delivered, 2);
    assert_eq!(
        description(&remote.get(EntityType::Transaction, 5).unwrap()),
        "three"
    );
}

#[tokio::test]
async fn five_failures_need_a_human_until_reset() {
    let remote = Arc::new(InMemoryRemote::new());
    let device = Device::new(remote.clone()).await;
    device
        .repo
        .create(EntityType::Transaction, transaction("Rent"))
        .await
        .unwrap();

    for attempt in 1..=5 {
        remote.fail_next(GatewayError::Rejected {
            status: 500,
            message: "internal error".into(),
        });
        let report = device.orchestrator.drain().await.unwrap();
        assert_eq!(report.escalated, usize::from(attempt == 5));
    }

    let queue = device.repo.queue();
    assert!(queue.list_pending(None).await.unwrap().is_empty());
    let item = queue.all().await.unwrap().remove(0);
    assert_eq!(item.status, SyncStatus::ManualResolutionRequired);
    assert_eq!(item.attempts, 5);

    let surface = ConflictSurface::new(device.store.clone(), queue.clone());
    assert_eq!(surface.status().await.unwrap().manual, 1);

    device.orchestrator.drain().await.unwrap();
    assert_eq!(remote.count_calls(Action::Create), 5);

    assert!(device.orchestrator.reset(&item.id).await.unwrap());
    let item = queue.get(&item.id).await.unwrap().unwrap();
    assert_eq!((item.status, item.attempts), (SyncStatus::Pending, 0));

    let report = device.orchestrator.drain().await.unwrap();
    assert_eq!(report.delivered, 1);
    assert!(surface.status().await.unwrap().is_clean());
}

#[test]
fn equal_timestamps_go_to_the_remote_version() {
    let reconciler = Reconciler::new(Strategy::Timestamp);
    let local = shared_transaction(5, "mine", 30);
    let remote = shared_transaction(5, "theirs", 30);

    for _ in 0..10 {
        let out = reconciler.reconcile(TRANSACTIONS, &local, &remote, at(60));
        assert_eq!(out.record(), &remote);
    }
}

#[test]
fn merge_keeps_remote_fields_local_did_not_touch() {
    let local = record(json!({"id": 1, "amount": 5, "updatedAt": to_iso(&at(1))}));
    let remote = record(json!({
        "id": 1, "amount": 5, "description": "x", "updatedAt": to_iso(&at(2))
    }));

    let out = Reconciler::new(Strategy::Merge).reconcile(TRANSACTIONS, &local, &remote, at(3));
    let merged = out.record();
    assert_eq!(merged.get("amount"), Some(&json!(5)));
    assert_eq!(merged.get("description"), Some(&json!("x")));
    assert_eq!(merged.fields.len(), 2);
}

#[tokio::test]
async fn offline_create_is_rebound_once_online() {
    let remote = Arc::new(InMemoryRemote::starting_at(77));
    let device = Device::new(remote.clone()).await;
    remote.set_offline(true);

    let created = device
        .repo
        .create(EntityType::Transaction, transaction("Bus ticket"))
        .await
        .unwrap();
    assert!(created.id.to_string().starts_with("local_"));
    assert_eq!(device.repo.queue().pending_count().await.unwrap(), 1);

    let report = device.orchestrator.sync_pass().await;
    assert!(report.offline);
    assert_eq!(device.repo.queue().pending_count().await.unwrap(), 1);

    remote.set_offline(false);
    device.wait(60);
    let report = device.orchestrator.sync_pass().await;
    assert!(report.is_complete());

    assert_eq!(device.repo.queue().pending_count().await.unwrap(), 0);
    let local_key = created.id.store_key();
    assert!(device.store.get(TRANSACTIONS, &local_key).await.unwrap().is_none());
    let rebound = device.store.get(TRANSACTIONS, "77").await.unwrap().unwrap();
    assert_eq!(rebound["id"], 77);
    assert_eq!(rebound["description"], "Bus ticket");
    assert_eq!(rebound["updatedAt"], to_iso(&at(60)));
    assert_eq!(
        device.orchestrator.rebinding(&local_key).await.unwrap(),
        Some(77)
    );
}

#[tokio::test]
async fn older_edit_from_second_device_does_not_win() {
    let remote = Arc::new(InMemoryRemote::new());
    let device_a = Device::new(remote.clone()).await;
    let device_b = Device::new(remote.clone()).await;
    let shared = shared_transaction(5, "Groceries", 0);
    seed(&device_a, &remote, &shared).await;
    seed(&device_b, &remote, &shared).await;

    remote.set_offline(true);
    device_b.wait(10);
    edit(&device_b, 5, "Groceries (B)").await;
    device_a.wait(20);
    edit(&device_a, 5, "Groceries (A)").await;
    remote.set_offline(false);

    assert!(device_a.orchestrator.sync_pass().await.is_complete());
    let report = device_b.orchestrator.sync_pass().await;
    assert!(report.is_complete());
    assert_eq!(report.drain.unwrap().dropped, 1);

    let server = remote.get(EntityType::Transaction, 5).unwrap();
    assert_eq!(description(&server), "Groceries (A)");
    assert_eq!(remote.count_calls(Action::Update), 1);

    let on_b = device_b.store.get(TRANSACTIONS, "5").await.unwrap().unwrap();
    assert_eq!(on_b["description"], "Groceries (A)");
}

#[tokio::test]
async fn rejection_does_not_block_other_entities() {
    let remote = Arc::new(InMemoryRemote::new());
    let device = Device::new(remote.clone()).await;
    device
        .repo
        .create(EntityType::Transaction, transaction("Rent"))
        .await
        .unwrap();
    device.wait(1);
    device
        .repo
        .create(EntityType::Transaction, transaction("Salary"))
        .await
        .unwrap();

    remote.fail_next(GatewayError::Rejected {
        status: 422,
        message: "amount must be positive".into(),
    });
    let report = device.orchestrator.drain().await.unwrap();

    assert!(!report.halted);
    assert_eq!((report.failed, report.delivered), (1, 1));
    let left = device.repo.queue().all().await.unwrap();
    assert_eq!(left.len(), 1);
    assert!(left[0]
        .last_error
        .as_deref()
        .unwrap()
        .contains("amount must be positive"));
}

#[tokio::test]
async fn backoff_holds_an_entity_until_due() {
    let remote = Arc::new(InMemoryRemote::new());
    let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
    let device = Device::with(remote.clone(), Strategy::Timestamp, backoff).await;

    let mut created = device
        .repo
        .create(EntityType::Transaction, transaction("Gym"))
        .await
        .unwrap();
    device.wait(1);
    created.fields.insert("amount".into(), json!(3000));
    device
        .repo
        .update(EntityType::Transaction, created)
        .await
        .unwrap();

    remote.fail_next(GatewayError::Rejected {
        status: 503,
        message: "try later".into(),
    });
    let first = device.orchestrator.drain().await.unwrap();
    assert_eq!((first.failed, first.held), (1, 1));

    let second = device.orchestrator.drain().await.unwrap();
    assert_eq!(second.held, 2);
    assert_eq!(remote.calls().len(), 1);

    device.wait(1);
    let third = device.orchestrator.drain().await.unwrap();
    assert_eq!(third.delivered, 2);

    let server = remote.records(EntityType::Transaction);
    assert_eq!(server.len(), 1);
    assert_eq!(server[0].get("amount"), Some(&json!(3000)));
}

#[tokio::test]
async fn manual_conflict_is_settled_through_the_service() {
    let remote = Arc::new(InMemoryRemote::new());
    let device = Device::with(remote.clone(), Strategy::Manual, Backoff::disabled()).await;
    remote.insert(EntityType::Transaction, shared_transaction(5, "server", 0));
    device
        .store
        .put(TRANSACTIONS, &shared_transaction(5, "local", 5).to_value())
        .await
        .unwrap();
    let surface = ConflictSurface::new(device.store.clone(), device.repo.queue().clone());
    let store = device.store.clone();
    let clock = device.clock.clone();
    let sync = SyncService::spawn(device.orchestrator);

    let report = sync.sync().await.unwrap();
    assert_eq!(report.collections.iter().map(|c| c.conflicts).sum::<usize>(), 1);
    let open = surface.unresolved().await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, "transactions_5");
    let interim = store.get(TRANSACTIONS, "5").await.unwrap().unwrap();
    assert_eq!(interim["description"], "server");

    clock.advance(chrono::Duration::seconds(30));
    let picked = sync
        .resolve_conflict("transactions_5", Resolution::Local)
        .await
        .unwrap();
    assert_eq!(description(&picked), "local");
    assert_eq!(surface.count().await.unwrap(), 0);

    let report = sync.sync().await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.collections.iter().map(|c| c.conflicts).sum::<usize>(), 0);
    assert_eq!(
        description(&remote.get(EntityType::Transaction, 5).unwrap()),
        "local"
    );
    assert!(surface.status().await.unwrap().is_clean());
}

#[tokio::test]
async fn offline_delete_stays_deleted_on_both_sides() {
    let remote = Arc::new(InMemoryRemote::new());
    let device = Device::new(remote.clone()).await;
    seed(&device, &remote, &shared_transaction(5, "Groceries", 0)).await;

    device
        .repo
        .delete(EntityType::Transaction, &RecordId::Remote(5))
        .await
        .unwrap();

    let report = device.orchestrator.sync_pass().await;
    assert!(report.is_complete());
    assert_eq!(report.collections[0].awaiting_delete, 1);
    assert_eq!(report.collections[0].inserted, 0);
    assert!(remote.get(EntityType::Transaction, 5).is_none());
    assert!(device.store.get(TRANSACTIONS, "5").await.unwrap().is_none());

    let report = device.orchestrator.sync_pass().await;
    assert!(report.is_complete());
    assert_eq!(report.collections[0].orphaned, 0);
    assert!(device.store.get(TRANSACTIONS, "5").await.unwrap().is_none());
}

#[tokio::test]
async fn delete_by_local_id_is_matched_through_its_rebinding() {
    let remote = Arc::new(InMemoryRemote::starting_at(40));
    let device = Device::new(remote.clone()).await;

    let created = device
        .repo
        .create(EntityType::Transaction, transaction("Cinema"))
        .await
        .unwrap();
    device.orchestrator.drain().await.unwrap();

    // A delete issued while the create was in flight still names the local id.
    device.store.remove(TRANSACTIONS, "40").await.unwrap();
    device
        .repo
        .queue()
        .enqueue(SyncOperation::delete(EntityType::Transaction, created.id.clone()))
        .await
        .unwrap();

    let report = device.orchestrator.sync_pass().await;
    assert!(report.is_complete());
    assert_eq!(report.collections[0].awaiting_delete, 1);
    assert!(remote.records(EntityType::Transaction).is_empty());
    assert!(device.store.get(TRANSACTIONS, "40").await.unwrap().is_none());
}
