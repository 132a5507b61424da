//! Sync queue items and their state machine.
//!
//! ```text
//! pending ──begin──▶ processing ──done──▶ (removed)
//!    ▲                   │
//!    │                 fail
//!    │                   ▼
//!    ├──────begin──── failed ──(attempts ≥ 5)──▶ manual_resolution_required
//!    │                                                    │
//!    └────────────────────────reset───────────────────────┘
//! ```
//!
//! Persistence lives elsewhere; this module only decides which transitions
//! are legal and what they do to an item.

use crate::{clock, error::Result, Error, SyncOperation, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Delivery attempts before an item needs a human.
pub const MAX_ATTEMPTS: u32 = 5;

/// Identifier of a queue item.
pub type QueueItemId = String;

/// Delivery status of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Processing,
    Failed,
    ManualResolutionRequired,
}

impl SyncStatus {
    /// Whether automatic delivery may pick the item up.
    pub fn is_retryable(self) -> bool {
        matches!(self, SyncStatus::Pending | SyncStatus::Failed)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Processing => "processing",
            SyncStatus::Failed => "failed",
            SyncStatus::ManualResolutionRequired => "manual_resolution_required",
        })
    }
}

/// One queued mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueItem {
    pub id: QueueItemId,
    pub operation: SyncOperation,
    #[serde(with = "clock::iso8601")]
    pub created_at: Timestamp,
    pub attempts: u32,
    pub status: SyncStatus,
    #[serde(
        default,
        with = "clock::iso8601::lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_attempt_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SyncQueueItem {
    /// A fresh `pending` item.
    pub fn new(operation: SyncOperation, now: Timestamp) -> Self {
        let random = uuid::Uuid::new_v4().simple().to_string();
        Self {
            id: format!("{}_{}", now.timestamp_millis(), &random[..9]),
            operation,
            created_at: now,
            attempts: 0,
            status: SyncStatus::Pending,
            last_attempt_at: None,
            last_error: None,
        }
    }

    /// Start a delivery attempt.
    pub fn begin_attempt(&mut self, now: Timestamp) -> Result<()> {
        if !self.status.is_retryable() {
            return Err(Error::InvalidTransition {
                from: self.status,
                action: "start",
            });
        }
        self.status = SyncStatus::Processing;
        self.attempts += 1;
        self.last_attempt_at = Some(now);
        Ok(())
    }

    /// Record a failed attempt. Escalates once the attempt budget is spent.
    pub fn record_failure(&mut self, reason: impl Into<String>) -> Result<()> {
        if self.status != SyncStatus::Processing {
            return Err(Error::InvalidTransition {
                from: self.status,
                action: "fail",
            });
        }
        self.status = if self.attempts >= MAX_ATTEMPTS {
            SyncStatus::ManualResolutionRequired
        } else {
            SyncStatus::Failed
        };
        self.last_error = Some(reason.into());
        Ok(())
    }

    /// Return to `pending` with a clean attempt count.
    pub fn reset(&mut self) {
        self.status = SyncStatus::Pending;
        self.attempts = 0;
        self.last_attempt_at = None;
        self.last_error = None;
    }

    /// Put back an item whose attempt was interrupted (process died mid-pass).
    /// Returns whether anything changed.
    pub fn recover(&mut self) -> bool {
        if self.status == SyncStatus::Processing {
            self.status = SyncStatus::Pending;
            true
        } else {
            false
        }
    }

    /// Drain order: `createdAt`, then id.
    pub fn order_key(&self) -> (Timestamp, &str) {
        (self.created_at, self.id.as_str())
    }
}

/// Sort items into drain order.
pub fn sort_for_drain(items: &mut [SyncQueueItem]) {
    items.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
}
