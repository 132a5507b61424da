//! A remote API held in memory.
//!
//! Behaves like the real server for the operations the client uses: creates
//! assign increasing ids, updates replace, deletes remove. Failures can be
//! scripted, which makes it the gateway of choice for tests and local demos.

use super::{GatewayError, RemoteGateway, RemoteResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use worthy_engine::{Action, EntityType, Record, RecordId, SyncOperation};

/// One delivered (or attempted) operation, as the server saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
    pub key: String,
    pub operation: SyncOperation,
}

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    records: HashMap<EntityType, BTreeMap<i64, Record>>,
    calls: Vec<RemoteCall>,
    scripted: VecDeque<Option<GatewayError>>,
    offline: bool,
    honour_keys: bool,
    seen_keys: HashMap<String, RemoteResult>,
}

/// In-memory stand-in for the remote API.
#[derive(Debug)]
pub struct InMemoryRemote {
    state: Mutex<State>,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// A remote whose next created record gets `next_id`.
    pub fn starting_at(next_id: i64) -> Self {
        Self {
            state: Mutex::new(State {
                next_id,
                ..State::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every call fail with a network error (or stop doing so).
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Replay the recorded result for a delivery key instead of executing again.
    pub fn honour_idempotency_keys(&self, honour: bool) {
        self.lock().honour_keys = honour;
    }

    /// Fail the next `execute` call with `error`. Scripted outcomes queue up.
    pub fn fail_next(&self, error: GatewayError) {
        self.lock().scripted.push_back(Some(error));
    }

    /// Let the next `execute` call through ahead of later scripted failures.
    pub fn pass_next(&self) {
        self.lock().scripted.push_back(None);
    }

    /// Store a record directly, as another device would.
    pub fn insert(&self, entity: EntityType, record: Record) {
        let mut state = self.lock();
        if let Some(id) = record.id.as_remote() {
            state.next_id = state.next_id.max(id + 1);
            state.records.entry(entity).or_default().insert(id, record);
        }
    }

    pub fn get(&self, entity: EntityType, id: i64) -> Option<Record> {
        self.lock().records.get(&entity)?.get(&id).cloned()
    }

    pub fn records(&self, entity: EntityType) -> Vec<Record> {
        self.lock()
            .records
            .get(&entity)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Every call that reached `execute`, failed ones included.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    /// Number of `execute` calls with the given action.
    pub fn count_calls(&self, action: Action) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.operation.action == action)
            .count()
    }

    fn not_found(entity: EntityType, id: &RecordId) -> GatewayError {
        GatewayError::Rejected {
            status: 404,
            message: format!("{entity} {id} not found"),
        }
    }
}

#[async_trait]
impl RemoteGateway for InMemoryRemote {
    async fn execute(
        &self,
        key: &str,
        operation: &SyncOperation,
    ) -> Result<RemoteResult, GatewayError> {
        let mut state = self.lock();
        if state.offline {
            return Err(GatewayError::Network("connection refused".into()));
        }
        state.calls.push(RemoteCall {
            key: key.to_string(),
            operation: operation.clone(),
        });
        if let Some(Some(error)) = state.scripted.pop_front() {
            return Err(error);
        }
        if state.honour_keys {
            if let Some(result) = state.seen_keys.get(key) {
                return Ok(*result);
            }
        }

        let entity = operation.entity_type;
        let result = match operation.action {
            Action::Create => {
                let id = state.next_id;
                state.next_id += 1;
                let mut record = Record::from_value(operation.payload.clone())
                    .map_err(|e| GatewayError::Rejected {
                        status: 400,
                        message: e.to_string(),
                    })?
                    .with_id(RecordId::Remote(id));
                if record.updated_at.is_none() {
                    record.updated_at = Some(chrono::Utc::now());
                }
                state.records.entry(entity).or_default().insert(id, record);
                RemoteResult {
                    server_id: Some(id),
                }
            }
            Action::Update => {
                let id = operation
                    .entity_id
                    .as_remote()
                    .ok_or_else(|| Self::not_found(entity, &operation.entity_id))?;
                let record = Record::from_value(operation.payload.clone()).map_err(|e| {
                    GatewayError::Rejected {
                        status: 400,
                        message: e.to_string(),
                    }
                })?;
                let stored = state
                    .records
                    .entry(entity)
                    .or_default()
                    .get_mut(&id)
                    .ok_or_else(|| Self::not_found(entity, &operation.entity_id))?;
                *stored = record.with_id(RecordId::Remote(id));
                RemoteResult::default()
            }
            Action::Delete => {
                let id = operation
                    .entity_id
                    .as_remote()
                    .ok_or_else(|| Self::not_found(entity, &operation.entity_id))?;
                state
                    .records
                    .entry(entity)
                    .or_default()
                    .remove(&id)
                    .ok_or_else(|| Self::not_found(entity, &operation.entity_id))?;
                RemoteResult::default()
            }
        };

        state.seen_keys.insert(key.to_string(), result);
        Ok(result)
    }

    async fn fetch_all(&self, entity: EntityType) -> Result<Vec<Record>, GatewayError> {
        let state = self.lock();
        if state.offline {
            return Err(GatewayError::Network("connection refused".into()));
        }
        Ok(state
            .records
            .get(&entity)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn ping(&self) -> bool {
        !self.lock().offline
    }
}
