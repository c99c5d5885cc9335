//! In-memory snapshot store.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::ports::{SnapshotStore, StoreError};
use crate::queue::QueueSnapshot;

/// Keeps the last saved snapshot. Can be told to fail saves, which the
/// queue must survive.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    saved: Mutex<Option<QueueSnapshot>>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-loaded with `snapshot`, as if written by a previous run.
    pub fn with_snapshot(snapshot: QueueSnapshot) -> Self {
        Self {
            saved: Mutex::new(Some(snapshot)),
            ..Self::default()
        }
    }

    pub fn saved(&self) -> Option<QueueSnapshot> {
        self.saved.lock().clone()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn load(&self) -> Result<Option<QueueSnapshot>, StoreError> {
        Ok(self.saved.lock().clone())
    }

    fn save(&self, snapshot: &QueueSnapshot) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other("save disabled")));
        }
        *self.saved.lock() = Some(snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
