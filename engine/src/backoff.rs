//! Retry backoff for failed deliveries.

use crate::{SyncQueueItem, SyncStatus, Timestamp};
use std::time::Duration;

/// Capped exponential backoff keyed off an item's attempt count.
///
/// The n-th retry waits `base * 2^(n-1)`, never more than `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(300),
        }
    }
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Retry immediately on the next pass.
    pub fn disabled() -> Self {
        Self {
            base: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    /// How long to wait after `attempts` failed attempts.
    pub fn delay(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            return Duration::ZERO;
        }
        let exp = (attempts - 1).min(31);
        self.base
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max)
            .min(self.max)
    }

    /// Whether `item` may be attempted at `now`.
    pub fn is_due(&self, item: &SyncQueueItem, now: Timestamp) -> bool {
        if item.status != SyncStatus::Failed {
            return item.status == SyncStatus::Pending;
        }
        let Some(last) = item.last_attempt_at else {
            return true;
        };
        let wait = chrono::Duration::from_std(self.delay(item.attempts))
            .unwrap_or(chrono::Duration::MAX);
        match last.checked_add_signed(wait) {
            Some(due) => now >= due,
            None => false,
        }
    }
}
