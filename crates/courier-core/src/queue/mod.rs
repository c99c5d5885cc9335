//! Queue module: entry state machine, snapshot format, and the in-memory
//! priority queue.

mod entry;
mod memory;
mod snapshot;
mod state;
mod writer;

pub use entry::QueueEntry;
pub use memory::{Completion, QueueDepth, RequestQueue, RetryCharge};
pub use snapshot::{HistoryRecord, QueueSnapshot, SNAPSHOT_VERSION};
pub use state::EntryState;

use std::time::Duration;

use crate::domain::RequestId;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue full: {limit} live entries")]
    Full { limit: usize },

    #[error("unknown entry: {0}")]
    UnknownEntry(RequestId),

    #[error("entry {id} cannot {op} from {from:?}")]
    InvalidTransition {
        id: RequestId,
        from: EntryState,
        op: &'static str,
    },

    #[error("entry already queued: {0}")]
    DuplicateId(RequestId),
}

/// Queue limits.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    /// Entries allowed in `Active` at once.
    pub max_concurrent: usize,
    /// Live entries (pending + active + retrying) allowed at once.
    pub max_queue_size: usize,
    /// Snapshot entries older than this are dropped on restore.
    pub staleness: Duration,
    /// Terminal records kept for metrics.
    pub history_limit: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            max_queue_size: 100,
            staleness: Duration::from_secs(60 * 60),
            history_limit: 200,
        }
    }
}
