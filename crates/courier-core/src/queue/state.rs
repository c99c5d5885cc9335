//! Entry state machine for the queue.

use serde::{Deserialize, Serialize};

/// Queue entry state.
///
/// State transitions:
/// - Pending -> Active -> Done
/// - Pending -> Active -> Retrying -> Pending (until attempts run out)
/// - Pending -> Active -> Failed
/// - Pending | Retrying | Active -> Failed (cancelled or superseded)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    /// Waiting in its priority bucket.
    Pending,

    /// Holding a concurrency slot; a transport call is (or is about to be) in flight.
    Active,

    /// Waiting for its backoff timer before re-entering its bucket.
    Retrying,

    /// Delivered.
    Done,

    /// Given up (terminal error, cancellation, supersession).
    Failed,
}

impl EntryState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, EntryState::Done | EntryState::Failed)
    }

    /// Counted against `max_queue_size`.
    pub fn is_live(self) -> bool {
        !self.is_terminal()
    }
}
