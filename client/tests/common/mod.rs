//! Shared fixtures for client integration tests.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::sync::Arc;
use worthy_client::{InMemoryRemote, LocalRepository, LocalStore, Orchestrator};
use worthy_engine::{clock::from_millis, Backoff, ManualClock, Record, Strategy, Timestamp};

/// 2024-02-01T00:00:00Z
pub const START_MS: i64 = 1_706_745_600_000;

/// One device: its store, repository and orchestrator, talking to `remote`.
pub struct Device {
    pub store: LocalStore,
    pub clock: ManualClock,
    pub repo: LocalRepository,
    pub orchestrator: Orchestrator,
}

impl Device {
    pub async fn new(remote: Arc<InMemoryRemote>) -> Self {
        Self::with(remote, Strategy::Timestamp, Backoff::disabled()).await
    }

    pub async fn with(remote: Arc<InMemoryRemote>, strategy: Strategy, backoff: Backoff) -> Self {
        let store = LocalStore::in_memory().await.expect("in-memory store");
        let clock = ManualClock::at_millis(START_MS);
        let repo = LocalRepository::new(store.clone(), Arc::new(clock.clone()));
        let orchestrator = Orchestrator::new(store.clone(), remote, Arc::new(clock.clone()))
            .with_strategy(strategy)
            .with_backoff(backoff);
        Self {
            store,
            clock,
            repo,
            orchestrator,
        }
    }

    /// Move this device's clock forward by `secs` seconds.
    pub fn wait(&self, secs: i64) {
        self.clock.advance(chrono::Duration::seconds(secs));
    }
}

/// A transaction payload as the UI would submit it.
pub fn transaction(description: &str) -> Value {
    json!({
        "amount": 1250,
        "isIncome": false,
        "currency": "EUR",
        "description": description
    })
}

pub fn record(value: Value) -> Record {
    Record::from_value(value).expect("valid record")
}

/// `START_MS` plus `secs` seconds.
pub fn at(secs: i64) -> Timestamp {
    from_millis(START_MS + secs * 1_000)
}
