//! Record identifiers.
//!
//! A record is either acknowledged by the server (numeric id) or only known
//! to this device (a `local_`-prefixed id minted offline). The tag is carried
//! in the type so callers never sniff string prefixes.

use crate::{error::Result, Error, Timestamp};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Prefix reserved for ids minted on the device.
pub const LOCAL_ID_PREFIX: &str = "local_";

/// Identifier of a synced entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordId {
    /// Minted on this device, never acknowledged by the server.
    Local(String),
    /// Assigned by the server.
    Remote(i64),
}

impl RecordId {
    /// Mint a fresh local id: `local_<millis>_<random>`.
    pub fn new_local(now: Timestamp) -> Self {
        let random = uuid::Uuid::new_v4().simple().to_string();
        RecordId::Local(format!(
            "{LOCAL_ID_PREFIX}{}_{}",
            now.timestamp_millis(),
            &random[..9]
        ))
    }

    /// Whether the server has never seen this id.
    pub fn is_local(&self) -> bool {
        matches!(self, RecordId::Local(_))
    }

    /// The server id, if this is one.
    pub fn as_remote(&self) -> Option<i64> {
        match self {
            RecordId::Remote(id) => Some(*id),
            RecordId::Local(_) => None,
        }
    }

    /// The key this record is stored under in the local store.
    pub fn store_key(&self) -> String {
        self.to_string()
    }

    /// JSON form: numbers for server ids, strings for local ids.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            RecordId::Local(id) => serde_json::Value::String(id.clone()),
            RecordId::Remote(id) => serde_json::Value::from(*id),
        }
    }

    /// Read an id from its JSON form.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(RecordId::Remote)
                .ok_or_else(|| Error::InvalidId(n.to_string())),
            serde_json::Value::String(s) => s.parse(),
            other => Err(Error::InvalidId(other.to_string())),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Local(id) => f.write_str(id),
            RecordId::Remote(id) => write!(f, "{id}"),
        }
    }
}

impl FromStr for RecordId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.starts_with(LOCAL_ID_PREFIX) && s.len() > LOCAL_ID_PREFIX.len() {
            return Ok(RecordId::Local(s.to_string()));
        }
        s.parse::<i64>()
            .map(RecordId::Remote)
            .map_err(|_| Error::InvalidId(s.to_string()))
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        RecordId::Remote(id)
    }
}

impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            RecordId::Local(id) => s.serialize_str(id),
            RecordId::Remote(id) => s.serialize_i64(*id),
        }
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(d)?;
        RecordId::from_json(&value).map_err(serde::de::Error::custom)
    }
}
