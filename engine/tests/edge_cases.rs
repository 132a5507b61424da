//! Edge case tests for worthy-engine
//!
//! These tests cover boundary conditions and unusual inputs.

use serde_json::json;
use worthy_engine::{
    clock::from_millis, sort_for_drain, validate_payload, Backoff, DataConflict, EntityType,
    Layout, Reconciled, Reconciler, Record, RecordId, Resolution, Strategy, SyncOperation,
    SyncQueueItem, SyncStatus, MAX_ATTEMPTS,
};

fn record(value: serde_json::Value) -> Record {
    Record::from_value(value).unwrap()
}

// ============================================================================
// Identifier Edge Cases
// ============================================================================

#[test]
fn numeric_string_ids_are_server_ids() {
    let rec = record(json!({"id": "77", "amount": 1}));
    assert_eq!(rec.id, RecordId::Remote(77));
    assert_eq!(rec.to_value()["id"], json!(77));
}

#[test]
fn large_server_ids() {
    let rec = record(json!({"id": i64::MAX}));
    assert_eq!(rec.id.as_remote(), Some(i64::MAX));
    assert!(Record::from_value(json!({"id": u64::MAX})).is_err());
}

#[test]
fn local_ids_with_unicode_suffix() {
    let rec = record(json!({"id": "local_日本語", "description": "Ünïcödé 🎉"}));
    assert!(rec.id.is_local());
    assert_eq!(rec.id.store_key(), "local_日本語");
}

// ============================================================================
// Timestamp Edge Cases
// ============================================================================

#[test]
fn numeric_updated_at_is_read_as_millis() {
    let rec = record(json!({"id": 1, "updatedAt": 1_706_745_600_000i64}));
    assert_eq!(rec.updated_millis(), 1_706_745_600_000);
    assert_eq!(rec.to_value()["updatedAt"], "2024-02-01T00:00:00.000Z");
}

#[test]
fn null_updated_at_counts_as_zero() {
    let rec = record(json!({"id": 1, "updatedAt": null}));
    assert_eq!(rec.updated_millis(), 0);
    assert!(rec.to_value().get("updatedAt").is_none());
}

#[test]
fn same_millisecond_is_not_a_conflict() {
    let local = record(json!({"id": 1, "v": 1, "updatedAt": "2024-02-01T00:00:00.000Z"}));
    let remote = record(json!({"id": 1, "v": 2, "updatedAt": "2024-02-01T02:00:00+02:00"}));

    let plan = Reconciler::new(Strategy::Manual).plan("transactions", &[local], &[remote], from_millis(0));
    assert!(plan.is_noop());
}

// ============================================================================
// Reconciliation Edge Cases
// ============================================================================

#[test]
fn plan_with_empty_sides() {
    let reconciler = Reconciler::default();
    let only = vec![record(json!({"id": 1, "updatedAt": "2024-02-01T00:00:00.000Z"}))];

    let plan = reconciler.plan("templates", &[], &[], from_millis(0));
    assert!(plan.is_noop());

    let plan = reconciler.plan("templates", &[], &only, from_millis(0));
    assert_eq!(plan.inserted, 1);

    let plan = reconciler.plan("templates", &only, &[], from_millis(0));
    assert!(plan.is_noop());
    assert_eq!(plan.orphaned, vec![RecordId::Remote(1)]);
}

#[test]
fn merge_with_nested_fields_replaces_whole_values() {
    let local = record(json!({"id": 1, "tags": [{"id": 1}], "updatedAt": "2024-02-01T00:00:00.000Z"}));
    let remote = record(json!({"id": 1, "tags": [{"id": 2}, {"id": 3}], "session": {"id": 9}, "updatedAt": "2024-02-02T00:00:00.000Z"}));

    let out = Reconciler::new(Strategy::Merge).reconcile("transactions", &local, &remote, from_millis(0));
    let merged = out.record();
    assert_eq!(merged.get("tags"), Some(&json!([{"id": 1}])));
    assert_eq!(merged.get("session"), Some(&json!({"id": 9})));
}

#[test]
fn manual_conflict_for_local_record_keys_by_local_id() {
    let local = record(json!({"id": "local_5_abc", "updatedAt": "2024-02-02T00:00:00.000Z"}));
    let remote = record(json!({"id": "local_5_abc", "updatedAt": "2024-02-01T00:00:00.000Z"}));

    let out = Reconciler::new(Strategy::Manual).reconcile("shoppingSessions", &local, &remote, from_millis(0));
    match out {
        Reconciled::Escalate { conflict, .. } => {
            assert_eq!(conflict.id, DataConflict::key("shoppingSessions", &local.id));
            assert_eq!(conflict.id, "shoppingSessions_local_5_abc");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn merged_pick_is_newer_than_both_versions() {
    let conflict = DataConflict::new(
        "transactions",
        record(json!({"id": 2, "amount": 1, "updatedAt": "2024-02-01T00:00:00.000Z"})),
        record(json!({"id": 2, "amount": 2, "updatedAt": "2024-02-03T00:00:00.000Z"})),
        from_millis(0),
    );
    let now = from_millis(1_800_000_000_000);
    let picked = conflict.pick(Resolution::Merged, now);
    assert!(picked.updated_millis() > conflict.remote_version.updated_millis());
    assert!(picked.updated_millis() > conflict.local_version.updated_millis());
}

// ============================================================================
// Queue Edge Cases
// ============================================================================

#[test]
fn full_retry_lifecycle() {
    let op = SyncOperation::delete(EntityType::Transaction, RecordId::Remote(3));
    let mut item = SyncQueueItem::new(op, from_millis(0));
    let backoff = Backoff::default();

    let mut now = 0i64;
    for _ in 0..MAX_ATTEMPTS {
        assert!(backoff.is_due(&item, from_millis(now)));
        item.begin_attempt(from_millis(now)).unwrap();
        item.record_failure("HTTP 500").unwrap();
        now += 600_000;
    }
    assert_eq!(item.status, SyncStatus::ManualResolutionRequired);
    assert!(!backoff.is_due(&item, from_millis(now)));

    item.reset();
    assert_eq!(item.attempts, 0);
    assert!(backoff.is_due(&item, from_millis(now)));
}

#[test]
fn drain_order_breaks_ties_by_id() {
    let op = SyncOperation::delete(EntityType::Template, RecordId::Remote(1));
    let mut items: Vec<_> = (0..20)
        .map(|_| SyncQueueItem::new(op.clone(), from_millis(5)))
        .collect();
    sort_for_drain(&mut items);
    for pair in items.windows(2) {
        assert!(pair[0].id <= pair[1].id);
    }
}

#[test]
fn many_queue_items_keep_creation_order() {
    let op = SyncOperation::delete(EntityType::Template, RecordId::Remote(1));
    let mut items: Vec<_> = (0..500i64)
        .rev()
        .map(|i| SyncQueueItem::new(op.clone(), from_millis(i)))
        .collect();
    sort_for_drain(&mut items);
    assert!(items.windows(2).all(|w| w[0].created_at <= w[1].created_at));
}

// ============================================================================
// Validation and Layout Edge Cases
// ============================================================================

#[test]
fn very_large_amounts_validate() {
    let payload = json!({
        "amount": i64::MAX,
        "isIncome": true,
        "currency": "",
        "description": "x".repeat(100_000),
    });
    assert!(validate_payload(EntityType::Transaction, &payload).is_ok());
}

#[test]
fn float_amount_is_rejected() {
    let payload = json!({"amount": 1.5, "isIncome": true, "currency": "EUR", "description": "d"});
    assert!(validate_payload(EntityType::Transaction, &payload).is_err());
}

#[test]
fn every_entity_collection_is_in_the_layout() {
    let layout = Layout::current();
    for entity in EntityType::ALL {
        assert!(layout.contains(entity.collection()));
    }
}
