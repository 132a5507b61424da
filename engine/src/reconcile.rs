//! Conflict resolution between local and remote versions of a record.
//!
//! `updatedAt` is the only clock. Two versions of the same entity are a
//! conflict candidate when both carry a timestamp and the timestamps differ;
//! how a candidate is settled depends on the [`Strategy`].
//!
//! # Bulk merge
//!
//! [`Reconciler::plan`] diffs a whole local collection against the server's
//! copy and returns the writes to apply, without touching any storage:
//!
//! 1. remote-only records are inserted
//! 2. conflict candidates are settled with the strategy
//! 3. other shared records take the remote version when it is newer
//! 4. local-only records are left alone (unsynced when they carry a local
//!    id, orphaned when they carry a server id the server no longer lists)

use crate::{clock, error::Result, CollectionName, Error, Record, RecordId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// How conflict candidates are settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Later `updatedAt` wins; equal timestamps go to the remote version.
    #[default]
    Timestamp,
    /// Remote fields are the base, local fields overwrite them.
    Merge,
    /// Keep the remote version for now and ask a human.
    Manual,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Strategy::Timestamp => "timestamp",
            Strategy::Merge => "merge",
            Strategy::Manual => "manual",
        })
    }
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "timestamp" => Ok(Strategy::Timestamp),
            "merge" => Ok(Strategy::Merge),
            "manual" => Ok(Strategy::Manual),
            other => Err(format!(
                "unknown conflict strategy '{other}' (expected timestamp, merge or manual)"
            )),
        }
    }
}

/// Which version a conflict settled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Local,
    Remote,
    Merged,
}

impl std::str::FromStr for Resolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(Resolution::Local),
            "remote" | "server" => Ok(Resolution::Remote),
            "merged" | "merge" => Ok(Resolution::Merged),
            other => Err(Error::InvalidPayload(format!("unknown resolution '{other}'"))),
        }
    }
}

/// An unresolved disagreement between the two versions of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataConflict {
    /// `<collection>_<entityId>`
    pub id: String,
    pub collection: CollectionName,
    pub local_version: Record,
    pub remote_version: Record,
    #[serde(with = "clock::iso8601")]
    pub created_at: Timestamp,
    pub resolved: bool,
}

impl DataConflict {
    pub fn new(collection: &str, local: Record, remote: Record, now: Timestamp) -> Self {
        Self {
            id: Self::key(collection, &local.id),
            collection: collection.to_string(),
            local_version: local,
            remote_version: remote,
            created_at: now,
            resolved: false,
        }
    }

    /// Conflict id for an entity. At most one open conflict exists per key.
    pub fn key(collection: &str, id: &RecordId) -> String {
        format!("{collection}_{id}")
    }

    /// Replace both versions with newer ones, keeping `createdAt`.
    pub fn refresh(&mut self, local: Record, remote: Record) {
        self.local_version = local;
        self.remote_version = remote;
        self.resolved = false;
    }

    /// The record to persist for a human's choice.
    ///
    /// Local and merged picks are stamped with `now` so they beat the remote
    /// version in the next reconciliation and get pushed upstream.
    pub fn pick(&self, resolution: Resolution, now: Timestamp) -> Record {
        match resolution {
            Resolution::Remote => self.remote_version.clone(),
            Resolution::Local => {
                let mut record = self.local_version.clone();
                record.touch(now);
                record
            }
            Resolution::Merged => {
                let mut record = merge_fields(&self.local_version, &self.remote_version);
                record.touch(now);
                record
            }
        }
    }
}

/// Outcome of reconciling one pair of versions.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciled {
    /// Settled automatically.
    Resolved { record: Record, winner: Resolution },
    /// Needs a human. `interim` is what to keep locally meanwhile.
    Escalate {
        interim: Record,
        conflict: DataConflict,
    },
}

impl Reconciled {
    /// The record that should now be stored locally.
    pub fn record(&self) -> &Record {
        match self {
            Reconciled::Resolved { record, .. } => record,
            Reconciled::Escalate { interim, .. } => interim,
        }
    }
}

/// Field-level merge: remote is the base, local fields overwrite it.
///
/// The merged `updatedAt` is the later of the two, so the result never looks
/// older than either input.
pub fn merge_fields(local: &Record, remote: &Record) -> Record {
    let mut fields = remote.fields.clone();
    for (name, value) in &local.fields {
        fields.insert(name.clone(), value.clone());
    }
    let updated_at = match (local.updated_at, remote.updated_at) {
        (Some(l), Some(r)) => Some(l.max(r)),
        (l, r) => l.or(r),
    };
    Record::new(local.id.clone(), fields, updated_at)
}

/// Both versions carry a timestamp and they differ.
pub fn is_conflict_candidate(local: &Record, remote: &Record) -> bool {
    let (l, r) = (local.updated_millis(), remote.updated_millis());
    l > 0 && r > 0 && l != r
}

/// Writes produced by a bulk merge of one collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergePlan {
    /// Records to store locally, each independently.
    pub writes: Vec<Record>,
    /// Conflicts to record for a human.
    pub conflicts: Vec<DataConflict>,
    /// Remote-only records among `writes`.
    pub inserted: usize,
    /// Shared records overwritten with remote or merged data.
    pub updated: usize,
    /// Candidates the local version won; nothing to write.
    pub kept_local: usize,
    /// Local records never acknowledged by the server.
    pub unsynced: Vec<RecordId>,
    /// Local records with a server id the server no longer lists.
    pub orphaned: Vec<RecordId>,
}

impl MergePlan {
    pub fn is_noop(&self) -> bool {
        self.writes.is_empty() && self.conflicts.is_empty()
    }
}

/// Settles conflicts with a fixed strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reconciler {
    strategy: Strategy,
}

impl Reconciler {
    pub fn new(strategy: Strategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Reconcile two versions of the entity stored in `collection`.
    pub fn reconcile(
        &self,
        collection: &str,
        local: &Record,
        remote: &Record,
        now: Timestamp,
    ) -> Reconciled {
        match self.strategy {
            Strategy::Timestamp => {
                if local.updated_millis() > remote.updated_millis() {
                    Reconciled::Resolved {
                        record: local.clone(),
                        winner: Resolution::Local,
                    }
                } else {
                    Reconciled::Resolved {
                        record: remote.clone(),
                        winner: Resolution::Remote,
                    }
                }
            }
            Strategy::Merge => Reconciled::Resolved {
                record: merge_fields(local, remote),
                winner: Resolution::Merged,
            },
            Strategy::Manual => Reconciled::Escalate {
                interim: remote.clone(),
                conflict: DataConflict::new(collection, local.clone(), remote.clone(), now),
            },
        }
    }

    /// Diff a local collection against the server's copy.
    pub fn plan(
        &self,
        collection: &str,
        local: &[Record],
        remote: &[Record],
        now: Timestamp,
    ) -> MergePlan {
        let local_by_key: HashMap<String, &Record> =
            local.iter().map(|r| (r.id.store_key(), r)).collect();
        let remote_keys: std::collections::HashSet<String> =
            remote.iter().map(|r| r.id.store_key()).collect();

        let mut plan = MergePlan::default();

        for theirs in remote {
            let Some(ours) = local_by_key.get(&theirs.id.store_key()) else {
                plan.writes.push(theirs.clone());
                plan.inserted += 1;
                continue;
            };

            if is_conflict_candidate(ours, theirs) {
                match self.reconcile(collection, ours, theirs, now) {
                    Reconciled::Resolved { record, .. } if &record == *ours => {
                        plan.kept_local += 1;
                    }
                    Reconciled::Resolved { record, .. } => {
                        plan.writes.push(record);
                        plan.updated += 1;
                    }
                    Reconciled::Escalate { interim, conflict } => {
                        plan.writes.push(interim);
                        plan.conflicts.push(conflict);
                        plan.updated += 1;
                    }
                }
            } else if theirs.updated_millis() > ours.updated_millis() {
                plan.writes.push(theirs.clone());
                plan.updated += 1;
            }
        }

        for ours in local {
            if remote_keys.contains(&ours.id.store_key()) {
                continue;
            }
            if ours.id.is_local() {
                plan.unsynced.push(ours.id.clone());
            } else {
                plan.orphaned.push(ours.id.clone());
            }
        }

        plan
    }
}
