//! # Worthy Engine
//!
//! Pure sync logic for the Worthy personal-finance tracker.
//!
//! The app writes every change to an on-device store first and replays it
//! against the server later. This crate holds the parts of that process that
//! need no IO: identifiers, records, queued operations and their delivery
//! state machine, retry backoff, payload validation, the store layout, and
//! conflict resolution. The `worthy-client` crate wires it to SQLite and HTTP.
//!
//! ## Design Principles
//!
//! - **No IO**: nothing here touches files, sockets or tasks
//! - **Injectable time**: everything that stamps a time takes a [`Timestamp`]
//!   or a [`Clock`], so tests drive time with [`ManualClock`]
//! - **Tagged ids**: [`RecordId`] says whether the server has seen a record
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`Record`] is an id, an optional `updatedAt` and a bag of entity fields.
//! `updatedAt` is the only clock used for reconciliation.
//!
//! ### Operations and the queue
//!
//! Each local mutation becomes a [`SyncOperation`] wrapped in a
//! [`SyncQueueItem`]. Items move through [`SyncStatus`] states; after
//! [`MAX_ATTEMPTS`] failed deliveries an item waits for a human.
//!
//! ### Reconciliation
//!
//! The [`Reconciler`] settles disagreements between local and remote versions
//! with a [`Strategy`]:
//! - [`Strategy::Timestamp`] - later `updatedAt` wins, ties go to the server (default)
//! - [`Strategy::Merge`] - field-level merge, local fields win
//! - [`Strategy::Manual`] - keep the server version and record a [`DataConflict`]
//!
//! ## Quick Start
//!
//! ```rust
//! use worthy_engine::{clock::from_millis, Reconciler, Record, Strategy};
//! use serde_json::json;
//!
//! let local = Record::from_value(json!({
//!     "id": 77, "amount": 10, "updatedAt": "2024-02-01T10:00:00.000Z"
//! })).unwrap();
//! let remote = Record::from_value(json!({
//!     "id": 77, "amount": 12, "updatedAt": "2024-02-01T11:00:00.000Z"
//! })).unwrap();
//!
//! let out = Reconciler::new(Strategy::Timestamp)
//!     .reconcile("transactions", &local, &remote, from_millis(0));
//! assert_eq!(out.record(), &remote);
//! ```

pub mod backoff;
pub mod clock;
pub mod error;
pub mod id;
pub mod layout;
pub mod operation;
pub mod queue;
pub mod reconcile;
pub mod record;
pub mod schema;

// Re-export main types at crate root
pub use backoff::Backoff;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::Error;
pub use id::{RecordId, LOCAL_ID_PREFIX};
pub use layout::{collections, Layout, Upgrade};
pub use operation::{Action, EntityType, SyncOperation};
pub use queue::{sort_for_drain, QueueItemId, SyncQueueItem, SyncStatus, MAX_ATTEMPTS};
pub use reconcile::{
    is_conflict_candidate, merge_fields, DataConflict, MergePlan, Reconciled, Reconciler,
    Resolution, Strategy,
};
pub use record::Record;
pub use schema::{validate_payload, FieldDef, FieldType};

/// Type aliases for clarity
pub type CollectionName = String;
pub type Timestamp = chrono::DateTime<chrono::Utc>;
pub type SchemaVersion = u32;
