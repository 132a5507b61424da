//! Mutations queued for delivery to the server.
//!
//! Every local change is expressed as a [`SyncOperation`] so it can be
//! persisted, retried and replayed in the order the user issued it.

use crate::{collections, error::Result, Error, Record, RecordId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kinds of entity that take part in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityType {
    Transaction,
    Template,
    ShoppingSession,
}

impl EntityType {
    /// Every synced entity type.
    pub const ALL: [EntityType; 3] = [
        EntityType::Transaction,
        EntityType::Template,
        EntityType::ShoppingSession,
    ];

    /// The local store collection holding this entity.
    pub fn collection(self) -> &'static str {
        match self {
            EntityType::Transaction => collections::TRANSACTIONS,
            EntityType::Template => collections::TEMPLATES,
            EntityType::ShoppingSession => collections::SHOPPING_SESSIONS,
        }
    }

    /// Inverse of [`EntityType::collection`].
    pub fn from_collection(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|e| e.collection() == name)
            .ok_or_else(|| Error::UnknownCollection(name.to_string()))
    }

    /// Name used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Transaction => "transaction",
            EntityType::Template => "template",
            EntityType::ShoppingSession => "shoppingSession",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| Error::UnknownEntityType(s.to_string()))
    }
}

/// What a queued mutation does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        })
    }
}

/// A mutation against one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOperation {
    /// Which kind of entity
    pub entity_type: EntityType,
    /// What to do with it
    pub action: Action,
    /// Full record for create/update, `{ "id": … }` for delete
    pub payload: serde_json::Value,
    /// Target entity
    pub entity_id: RecordId,
}

impl SyncOperation {
    /// Create `record` on the server.
    pub fn create(entity_type: EntityType, record: &Record) -> Self {
        Self {
            entity_type,
            action: Action::Create,
            payload: record.to_value(),
            entity_id: record.id.clone(),
        }
    }

    /// Replace the server copy with `record`.
    pub fn update(entity_type: EntityType, record: &Record) -> Self {
        Self {
            entity_type,
            action: Action::Update,
            payload: record.to_value(),
            entity_id: record.id.clone(),
        }
    }

    /// Delete the entity `id`.
    pub fn delete(entity_type: EntityType, id: RecordId) -> Self {
        Self {
            entity_type,
            action: Action::Delete,
            payload: serde_json::json!({ "id": id.to_json() }),
            entity_id: id,
        }
    }

    /// The local store collection this operation touches.
    pub fn collection(&self) -> &'static str {
        self.entity_type.collection()
    }

    /// `updatedAt` carried by the payload, in milliseconds (0 when absent).
    pub fn payload_updated_millis(&self) -> i64 {
        self.payload
            .get("updatedAt")
            .and_then(|v| v.as_str())
            .and_then(crate::clock::parse_iso)
            .map(|ts| ts.timestamp_millis())
            .unwrap_or(0)
    }

    /// The same operation retargeted at another id, payload included.
    pub fn rebound_to(&self, id: RecordId) -> Self {
        let mut op = self.clone();
        if let Some(obj) = op.payload.as_object_mut() {
            obj.insert("id".into(), id.to_json());
        }
        op.entity_id = id;
        op
    }
}
