//! Background snapshot writer.
//!
//! Queue operations hand over the newest snapshot and return at once. One
//! task per queue writes through `spawn_blocking`, so store I/O never runs on
//! the caller or under the queue lock. Snapshots handed over while a write
//! is running coalesce: only the newest one is written next.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::snapshot::QueueSnapshot;
use crate::ports::SnapshotStore;

#[derive(Default)]
struct Latest {
    seq: u64,
    snapshot: Option<Arc<QueueSnapshot>>,
}

pub(crate) struct SnapshotWriter {
    latest: watch::Sender<Latest>,
    written: watch::Receiver<u64>,
}

impl SnapshotWriter {
    pub(crate) fn spawn(store: Arc<dyn SnapshotStore>, runtime: &Handle) -> Self {
        let (latest, rx) = watch::channel(Latest::default());
        let (written_tx, written) = watch::channel(0u64);
        runtime.spawn(run(store, rx, written_tx));
        Self { latest, written }
    }

    /// Replaces whatever is waiting to be written. Never blocks.
    pub(crate) fn submit(&self, snapshot: QueueSnapshot) {
        self.latest.send_modify(|latest| {
            latest.seq += 1;
            latest.snapshot = Some(Arc::new(snapshot));
        });
    }

    /// Resolves once everything submitted so far has reached the store (or
    /// failed to). Returns immediately when the writer task is gone.
    pub(crate) async fn flush(&self) {
        let target = self.latest.borrow().seq;
        let mut written = self.written.clone();
        let _ = written.wait_for(|seq| *seq >= target).await;
    }
}

async fn run(store: Arc<dyn SnapshotStore>, mut latest: watch::Receiver<Latest>, written: watch::Sender<u64>) {
    while latest.changed().await.is_ok() {
        let (seq, snapshot) = {
            let current = latest.borrow_and_update();
            (current.seq, current.snapshot.clone())
        };
        let Some(snapshot) = snapshot else {
            continue;
        };

        let store = Arc::clone(&store);
        let entries = snapshot.entries.len();
        match tokio::task::spawn_blocking(move || store.save(&snapshot)).await {
            Ok(Ok(())) => debug!(seq, entries, "queue snapshot written"),
            Ok(Err(e)) => warn!(error = %e, entries, "queue snapshot save failed"),
            Err(e) => warn!(error = %e, "queue snapshot write aborted"),
        }
        written.send_replace(seq);
    }
    debug!("snapshot writer stopped");
}
