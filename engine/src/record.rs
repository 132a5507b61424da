//! Record types for synced entities.

use crate::{clock, error::Result, Error, RecordId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A synced entity (transaction, template or shopping session).
///
/// Only `id` and `updatedAt` carry meaning for sync; every other field is
/// passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Server id or local id
    pub id: RecordId,
    /// Last modification time, the sole reconciliation clock
    #[serde(
        default,
        with = "clock::iso8601::lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<Timestamp>,
    /// Entity fields
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Create a record with the given fields.
    pub fn new(id: RecordId, fields: Map<String, Value>, updated_at: Option<Timestamp>) -> Self {
        let mut fields = fields;
        fields.remove("id");
        fields.remove("updatedAt");
        Self {
            id,
            updated_at,
            fields,
        }
    }

    /// Parse a record from its JSON form.
    pub fn from_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::InvalidRecord("record must be an object".into()));
        }
        serde_json::from_value(value).map_err(|e| Error::InvalidRecord(e.to_string()))
    }

    /// Serialize to the JSON form stored locally and sent to the server.
    pub fn to_value(&self) -> Value {
        let mut obj = self.fields.clone();
        obj.insert("id".into(), self.id.to_json());
        if let Some(ts) = &self.updated_at {
            obj.insert("updatedAt".into(), Value::String(clock::to_iso(ts)));
        }
        Value::Object(obj)
    }

    /// `updatedAt` in milliseconds; a missing timestamp counts as 0.
    pub fn updated_millis(&self) -> i64 {
        self.updated_at.map(|ts| ts.timestamp_millis()).unwrap_or(0)
    }

    /// Stamp a new modification time.
    pub fn touch(&mut self, now: Timestamp) {
        self.updated_at = Some(now);
    }

    /// The same record under a different id.
    pub fn with_id(mut self, id: RecordId) -> Self {
        self.id = id;
        self
    }

    /// Read a field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}
