//! Queue entry: descriptor + queue-local mutable state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::EntryState;
use crate::domain::{AttemptFailure, Priority, RequestDescriptor, RequestId};

/// Tracking record for one descriptor.
///
/// Design:
/// - Owned by the queue; buckets hold `RequestId`s only.
/// - All state transitions happen through the methods below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub descriptor: RequestDescriptor,
    pub state: EntryState,

    /// Charged executions so far (including the current one while Active).
    pub attempt: u32,

    /// Token refreshes spent on this descriptor. Refresh retries do not
    /// charge `attempt`.
    #[serde(default)]
    pub auth_refreshes: u32,

    /// First admission time. Kept across retries.
    pub enqueued_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<AttemptFailure>,

    pub updated_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(descriptor: RequestDescriptor, now: DateTime<Utc>) -> Self {
        Self {
            descriptor,
            state: EntryState::Pending,
            attempt: 0,
            auth_refreshes: 0,
            enqueued_at: now,
            last_error: None,
            updated_at: now,
        }
    }

    pub fn id(&self) -> RequestId {
        self.descriptor.id()
    }

    pub fn priority(&self) -> Priority {
        self.descriptor.priority()
    }

    /// Pending -> Active; charges one attempt.
    pub fn start_attempt(&mut self, now: DateTime<Utc>) {
        self.state = EntryState::Active;
        self.attempt += 1;
        self.updated_at = now;
    }

    /// Active -> Retrying.
    pub fn schedule_retry(&mut self, now: DateTime<Utc>) {
        self.state = EntryState::Retrying;
        self.updated_at = now;
    }

    /// Gives back the attempt charged by the last `start_attempt` and
    /// records a refresh instead.
    pub fn refund_for_auth_refresh(&mut self) {
        self.attempt = self.attempt.saturating_sub(1);
        self.auth_refreshes += 1;
    }

    /// Retrying -> Pending.
    pub fn readmit(&mut self, now: DateTime<Utc>) {
        self.state = EntryState::Pending;
        self.updated_at = now;
    }

    pub fn mark_done(&mut self, now: DateTime<Utc>) {
        self.state = EntryState::Done;
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, now: DateTime<Utc>) {
        self.state = EntryState::Failed;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Action, Payload};
    use ulid::Ulid;

    fn entry() -> QueueEntry {
        let now = Utc::now();
        let d = RequestDescriptor::new(
            RequestId::from_ulid(Ulid::new()),
            Action::new("save-settings"),
            Payload::new(),
            Priority::Normal,
            now,
            3,
        );
        QueueEntry::new(d, now)
    }

    #[test]
    fn retry_cycle_keeps_enqueued_at() {
        let mut e = entry();
        let enqueued = e.enqueued_at;
        let later = enqueued + chrono::Duration::seconds(3);

        e.start_attempt(later);
        e.schedule_retry(later);
        e.readmit(later);

        assert_eq!(e.state, EntryState::Pending);
        assert_eq!(e.attempt, 1);
        assert_eq!(e.enqueued_at, enqueued);
        assert_eq!(e.updated_at, later);
    }

    #[test]
    fn auth_refresh_is_attempt_neutral() {
        let mut e = entry();
        e.start_attempt(Utc::now());
        e.refund_for_auth_refresh();
        assert_eq!(e.attempt, 0);
        assert_eq!(e.auth_refreshes, 1);
    }
}
