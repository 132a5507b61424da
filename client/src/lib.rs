//! # Worthy Client
//!
//! On-device sync runtime for Worthy. Built on [`worthy_engine`], it adds the
//! IO: a SQLite-backed Local Store, the durable Sync Queue, an HTTP gateway to
//! the remote API and the orchestration that ties them together.
//!
//! ## Architecture
//!
//! ```text
//! UI ─▶ LocalRepository ─▶ LocalStore + SyncQueue
//!                                │
//!      BackgroundTrigger ─▶ SyncService ─▶ Orchestrator ─▶ RemoteGateway
//!                                │
//!                          ConflictSurface ◀─ conflicts
//! ```
//!
//! - Writes land in the store and the queue in one call, online or not.
//! - One [`SyncService`] task owns the [`Orchestrator`]; passes never overlap.
//! - A full pass reconciles every collection with the server, then drains the
//!   queue in `createdAt` order.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use worthy_client::{InMemoryRemote, LocalRepository, LocalStore, Orchestrator, SyncService};
//! use worthy_engine::{EntityType, SystemClock};
//!
//! # async fn run() -> worthy_client::Result<()> {
//! let store = LocalStore::in_memory().await?;
//! let clock = Arc::new(SystemClock);
//! let remote = Arc::new(InMemoryRemote::new());
//!
//! let sync = SyncService::spawn(Orchestrator::new(store.clone(), remote, clock.clone()));
//! let repo = LocalRepository::new(store, clock).with_sync(sync.clone());
//!
//! repo.create(
//!     EntityType::Transaction,
//!     serde_json::json!({
//!         "amount": 350, "isIncome": false, "currency": "EUR", "description": "Coffee"
//!     }),
//! )
//! .await?;
//! let report = sync.sync().await?;
//! assert!(report.is_complete());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod conflicts;
pub mod error;
pub mod gateway;
pub mod orchestrator;
pub mod queue;
pub mod repository;
pub mod service;
pub mod store;
pub mod trigger;

pub use config::{Config, ConfigError};
pub use conflicts::{ConflictLog, ConflictSurface, StatusView};
pub use error::{Error, Result};
pub use gateway::{GatewayError, HttpGateway, InMemoryRemote, RemoteGateway, RemoteResult};
pub use orchestrator::{CollectionReport, DrainReport, IdRebinding, Orchestrator, SyncReport};
pub use queue::SyncQueue;
pub use repository::LocalRepository;
pub use service::{SyncHandle, SyncService};
pub use store::{LocalStore, StoreError};
pub use trigger::{on_platform_event, spawn_probe, BackgroundTrigger, Connectivity, TriggerError, SYNC_TAG};
