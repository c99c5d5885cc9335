//! SnapshotStore port: the single durable record of queue state.
//!
//! Written after every queue mutation, read once at startup.
//!
//! # Implementations
//! - **InMemorySnapshotStore**: tests and ephemeral runs
//! - **JsonFileSnapshotStore**: one JSON file, replaced atomically

use thiserror::Error;

use crate::queue::QueueSnapshot;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot io: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot codec: {0}")]
    Codec(#[from] serde_json::Error),
}

pub trait SnapshotStore: Send + Sync {
    /// Returns `None` when nothing was stored yet.
    fn load(&self) -> Result<Option<QueueSnapshot>, StoreError>;

    fn save(&self, snapshot: &QueueSnapshot) -> Result<(), StoreError>;
}
