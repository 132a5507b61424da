//! Wall-clock abstraction and ISO-8601 timestamp helpers.
//!
//! Reconciliation uses `updatedAt` wall-clock timestamps as its only clock.
//! Everything that stamps a time goes through [`Clock`] so tests can drive
//! time explicitly with [`ManualClock`].

use crate::Timestamp;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use std::sync::{Arc, Mutex};

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same underlying time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Timestamp>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Create a clock frozen at the given milliseconds since the epoch.
    pub fn at_millis(millis: i64) -> Self {
        Self::new(from_millis(millis))
    }

    /// Move the clock forward.
    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    /// Jump to an absolute time.
    pub fn set(&self, to: Timestamp) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Convert milliseconds since the epoch into a timestamp, saturating at the epoch.
pub fn from_millis(millis: i64) -> Timestamp {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Format a timestamp the way JavaScript's `toISOString` does
/// (`2024-02-01T09:30:00.000Z`).
pub fn to_iso(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an ISO-8601 / RFC 3339 timestamp.
pub fn parse_iso(s: &str) -> Option<Timestamp> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Serde adapter for required timestamps in `toISOString` form.
pub mod iso8601 {
    use super::{parse_iso, to_iso};
    use crate::Timestamp;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &Timestamp, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&to_iso(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Timestamp, D::Error> {
        let raw = String::deserialize(d)?;
        parse_iso(&raw).ok_or_else(|| D::Error::custom(format!("invalid timestamp: {raw}")))
    }

    /// Optional timestamps. Unparseable values read as `None` rather than failing,
    /// since remote and legacy records carry whatever their writers produced.
    pub mod lenient {
        use super::{parse_iso, to_iso};
        use crate::Timestamp;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(ts: &Option<Timestamp>, s: S) -> Result<S::Ok, S::Error> {
            match ts {
                Some(ts) => s.serialize_str(&to_iso(ts)),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Timestamp>, D::Error> {
            let raw = Option::<serde_json::Value>::deserialize(d)?;
            Ok(match raw {
                Some(serde_json::Value::String(s)) => parse_iso(&s),
                Some(serde_json::Value::Number(n)) => n.as_i64().map(super::super::from_millis),
                _ => None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_format_matches_javascript() {
        let ts = from_millis(1_706_745_600_123);
        assert_eq!(to_iso(&ts), "2024-02-01T00:00:00.123Z");
    }

    #[test]
    fn parse_accepts_offsets() {
        let ts = parse_iso("2024-02-01T02:00:00+02:00").unwrap();
        assert_eq!(to_iso(&ts), "2024-02-01T00:00:00.000Z");
        assert!(parse_iso("yesterday").is_none());
    }

    #[test]
    fn manual_clock_advances_shared_time() {
        let clock = ManualClock::at_millis(1_000);
        let other = clock.clone();
        clock.advance(chrono::Duration::milliseconds(500));
        assert_eq!(other.now().timestamp_millis(), 1_500);

        other.set(from_millis(42));
        assert_eq!(clock.now().timestamp_millis(), 42);
    }

    #[test]
    fn pre_epoch_millis_are_preserved() {
        let ts = from_millis(-5);
        assert_eq!(ts.timestamp_millis(), -5);
    }
}
