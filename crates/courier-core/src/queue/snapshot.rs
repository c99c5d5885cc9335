//! Durable projection of queue state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EntryState, QueueEntry};
use crate::domain::{Action, Priority, RequestId};

pub const SNAPSHOT_VERSION: u32 = 1;

/// Terminal entry kept for metrics until evicted by age.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: RequestId,
    pub action: Action,
    pub priority: Priority,
    pub state: EntryState,
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl HistoryRecord {
    pub fn from_entry(entry: &QueueEntry, finished_at: DateTime<Utc>) -> Self {
        Self {
            id: entry.id(),
            action: entry.descriptor.action().clone(),
            priority: entry.priority(),
            state: entry.state,
            attempt: entry.attempt,
            enqueued_at: entry.enqueued_at,
            finished_at,
        }
    }
}

/// Everything needed to rebuild the queue after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    /// Non-terminal entries, in dequeue order for pending ones.
    pub entries: Vec<QueueEntry>,
    #[serde(default)]
    pub history: Vec<HistoryRecord>,
}

impl QueueSnapshot {
    pub fn empty(saved_at: DateTime<Utc>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at,
            entries: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Entries fit for re-admission at `now`: live, and enqueued no earlier
    /// than `now - staleness`. Every survivor comes back as `Pending` with its
    /// attempt count preserved; an `Active` entry's response is lost, so it
    /// is simply run again.
    pub fn restorable(&self, now: DateTime<Utc>, staleness: chrono::Duration) -> Vec<QueueEntry> {
        let cutoff = now - staleness;
        let mut out: Vec<QueueEntry> = self
            .entries
            .iter()
            .filter(|e| e.state.is_live() && e.enqueued_at >= cutoff)
            .cloned()
            .map(|mut e| {
                e.state = EntryState::Pending;
                e.updated_at = now;
                e
            })
            .collect();
        // stable: equal timestamps keep snapshot order
        out.sort_by_key(|e| e.enqueued_at);
        out
    }

    /// History records not yet evicted by age.
    pub fn retained_history(&self, now: DateTime<Utc>, staleness: chrono::Duration) -> Vec<HistoryRecord> {
        let cutoff = now - staleness;
        self.history
            .iter()
            .filter(|h| h.finished_at >= cutoff)
            .cloned()
            .collect()
    }
}
