//! In-memory request queue with durable snapshots.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::writer::SnapshotWriter;
use super::{EntryState, HistoryRecord, QueueConfig, QueueEntry, QueueError, QueueSnapshot};
use crate::domain::{AttemptFailure, Priority, RequestDescriptor, RequestId};
use crate::ports::{Clock, Scheduler, SnapshotStore, TimerHandle};

/// How a retry is charged against the entry's attempt budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCharge {
    /// Normal retry: the attempt that just failed stays counted.
    Attempt,
    /// Retry after a token refresh: the failed attempt is refunded.
    AuthRefresh,
}

/// Terminal result passed to `complete`.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Done,
    Failed(Option<AttemptFailure>),
}

/// Current depth per live state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueDepth {
    pub pending: usize,
    pub active: usize,
    pub retrying: usize,
}

impl QueueDepth {
    pub fn live(&self) -> usize {
        self.pending + self.active + self.retrying
    }
}

/// In-memory queue state.
///
/// `entries` is the single source of truth; `buckets` hold ids only, one
/// FIFO per priority.
struct QueueState {
    entries: HashMap<RequestId, QueueEntry>,
    buckets: [VecDeque<RequestId>; 3],
    active: usize,
    timers: HashMap<RequestId, TimerHandle>,
    history: VecDeque<HistoryRecord>,
    restored: Vec<QueueEntry>,
}

impl QueueState {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            buckets: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
            active: 0,
            timers: HashMap::new(),
            history: VecDeque::new(),
            restored: Vec::new(),
        }
    }

    fn bucket(&mut self, priority: Priority) -> &mut VecDeque<RequestId> {
        &mut self.buckets[priority.index()]
    }

    fn depth(&self) -> QueueDepth {
        let mut depth = QueueDepth::default();
        for entry in self.entries.values() {
            match entry.state {
                EntryState::Pending => depth.pending += 1,
                EntryState::Active => depth.active += 1,
                EntryState::Retrying => depth.retrying += 1,
                EntryState::Done | EntryState::Failed => {}
            }
        }
        depth
    }

    /// Moves a finished entry out of the live set into history.
    fn retire(&mut self, id: RequestId, config: &QueueConfig) -> Option<QueueEntry> {
        let entry = self.entries.remove(&id)?;
        self.timers.remove(&id);
        self.history
            .push_back(HistoryRecord::from_entry(&entry, entry.updated_at));
        while self.history.len() > config.history_limit {
            self.history.pop_front();
        }
        Some(entry)
    }

    fn to_snapshot(&self, now: chrono::DateTime<chrono::Utc>) -> QueueSnapshot {
        let mut entries: Vec<QueueEntry> = Vec::with_capacity(self.entries.len());
        // pending entries in dequeue order first
        for bucket in &self.buckets {
            entries.extend(bucket.iter().filter_map(|id| self.entries.get(id).cloned()));
        }
        let mut others: Vec<QueueEntry> = self
            .entries
            .values()
            .filter(|e| e.state != EntryState::Pending)
            .cloned()
            .collect();
        others.sort_by_key(|e| (e.enqueued_at, e.id()));
        entries.extend(others);

        let mut snap = QueueSnapshot::empty(now);
        snap.entries = entries;
        snap.history = self.history.iter().cloned().collect();
        snap
    }
}

struct QueueInner {
    state: Mutex<QueueState>,
    config: QueueConfig,
    scheduler: Arc<dyn Scheduler>,
    writer: SnapshotWriter,
    clock: Arc<dyn Clock>,
    ready: Notify,
}

impl QueueInner {
    /// Hands the snapshot to the writer. Called with the state lock held so
    /// snapshots are taken in mutation order; the write itself happens off
    /// the lock.
    fn persist(&self, state: &QueueState) {
        self.writer.submit(state.to_snapshot(self.clock.now()));
    }

    /// Retrying -> Pending at the head of its bucket.
    fn readmit(&self, id: RequestId) {
        let mut state = self.state.lock();
        let now = self.clock.now();
        state.timers.remove(&id);
        let Some(entry) = state.entries.get_mut(&id) else {
            return;
        };
        if entry.state != EntryState::Retrying {
            return;
        }
        entry.readmit(now);
        let priority = entry.priority();
        state.bucket(priority).push_front(id);
        debug!(request_id = %id, %priority, "retry readmitted at bucket head");
        self.persist(&state);
        drop(state);
        self.ready.notify_one();
    }
}

/// Priority-ordered, bounded-concurrency request queue.
///
/// Cheap to clone; clones share state. Every operation takes the state lock
/// once, mutates, persists and releases it, so no caller ever observes a
/// half-applied transition.
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<QueueInner>,
}

impl RequestQueue {
    /// Builds the queue and restores whatever the store holds. Snapshot
    /// writes run on `runtime`.
    pub fn open(
        config: QueueConfig,
        scheduler: Arc<dyn Scheduler>,
        store: Arc<dyn SnapshotStore>,
        clock: Arc<dyn Clock>,
        runtime: &Handle,
    ) -> Self {
        let queue = Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::new()),
                config,
                scheduler,
                writer: SnapshotWriter::spawn(Arc::clone(&store), runtime),
                clock,
                ready: Notify::new(),
            }),
        };
        queue.restore(store.as_ref());
        queue
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    fn restore(&self, store: &dyn SnapshotStore) {
        let inner = &self.inner;
        let snapshot = match store.load() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "queue snapshot unreadable; starting empty");
                return;
            }
        };

        let now = inner.clock.now();
        let staleness = chrono::Duration::from_std(inner.config.staleness)
            .unwrap_or(chrono::Duration::hours(1));
        let mut entries = snapshot.restorable(now, staleness);
        let stale = snapshot.entries.len() - entries.len();
        let overflow = entries.len().saturating_sub(inner.config.max_queue_size);
        if overflow > 0 {
            warn!(
                overflow,
                limit = inner.config.max_queue_size,
                "snapshot holds more live entries than the queue admits; newest dropped"
            );
            entries.truncate(inner.config.max_queue_size);
        }

        let mut state = inner.state.lock();
        for entry in &entries {
            let id = entry.id();
            let priority = entry.priority();
            state.entries.insert(id, entry.clone());
            state.bucket(priority).push_back(id);
        }
        state.history = snapshot.retained_history(now, staleness).into();
        state.restored = state
            .entries
            .values()
            .cloned()
            .collect();
        state.restored.sort_by_key(|e| e.enqueued_at);

        info!(
            restored = state.entries.len(),
            stale,
            overflow,
            "queue restored from snapshot"
        );
        inner.persist(&state);
        drop(state);
        if !entries.is_empty() {
            inner.ready.notify_one();
        }
    }

    /// Entries re-admitted from the snapshot at startup. Handed out once;
    /// later calls return nothing.
    pub fn take_restored(&self) -> Vec<QueueEntry> {
        std::mem::take(&mut self.inner.state.lock().restored)
    }

    /// Waits until every snapshot taken so far has been handed to the store.
    pub async fn flush(&self) {
        self.inner.writer.flush().await;
    }

    /// Admits a descriptor at the tail of its priority bucket.
    pub fn enqueue(&self, descriptor: RequestDescriptor) -> Result<QueueEntry, QueueError> {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        let id = descriptor.id();

        if state.entries.contains_key(&id) {
            return Err(QueueError::DuplicateId(id));
        }
        let live = state.entries.len();
        if live >= inner.config.max_queue_size {
            return Err(QueueError::Full {
                limit: inner.config.max_queue_size,
            });
        }

        let entry = QueueEntry::new(descriptor, inner.clock.now());
        let priority = entry.priority();
        state.entries.insert(id, entry.clone());
        state.bucket(priority).push_back(id);
        debug!(request_id = %id, %priority, live = live + 1, "enqueued");

        inner.persist(&state);
        drop(state);
        inner.ready.notify_one();
        Ok(entry)
    }

    /// Head of the highest-priority non-empty bucket, if a slot is free.
    pub fn dequeue(&self) -> Option<QueueEntry> {
        self.dequeue_with(|_| true)
    }

    /// Like `dequeue`, but skips entries `admit` rejects. Skipped entries
    /// keep their position. Returns `None` without side effects when all
    /// slots are taken.
    pub fn dequeue_with<F>(&self, mut admit: F) -> Option<QueueEntry>
    where
        F: FnMut(&QueueEntry) -> bool,
    {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        if state.active >= inner.config.max_concurrent {
            return None;
        }

        let mut found: Option<(Priority, usize)> = None;
        'buckets: for priority in Priority::ALL {
            for (pos, id) in state.buckets[priority.index()].iter().enumerate() {
                if let Some(entry) = state.entries.get(id)
                    && admit(entry)
                {
                    found = Some((priority, pos));
                    break 'buckets;
                }
            }
        }

        let (priority, pos) = found?;
        let id = state.bucket(priority).remove(pos)?;
        let now = inner.clock.now();
        let entry = state.entries.get_mut(&id)?;
        entry.start_attempt(now);
        let entry = entry.clone();
        state.active += 1;
        debug!(
            request_id = %id,
            attempt = entry.attempt,
            active = state.active,
            "dequeued"
        );

        inner.persist(&state);
        Some(entry)
    }

    /// Active -> Retrying; re-enters at the head of its bucket after `delay`.
    /// Releases the concurrency slot immediately.
    pub fn requeue_for_retry(
        &self,
        id: RequestId,
        delay: Duration,
        charge: RetryCharge,
        failure: Option<AttemptFailure>,
    ) -> Result<QueueEntry, QueueError> {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        let now = inner.clock.now();
        let entry = state
            .entries
            .get_mut(&id)
            .ok_or(QueueError::UnknownEntry(id))?;
        if entry.state != EntryState::Active {
            return Err(QueueError::InvalidTransition {
                id,
                from: entry.state,
                op: "requeue_for_retry",
            });
        }

        entry.schedule_retry(now);
        if charge == RetryCharge::AuthRefresh {
            entry.refund_for_auth_refresh();
        }
        if failure.is_some() {
            entry.last_error = failure;
        }
        let snapshot = entry.clone();
        state.active -= 1;

        if delay.is_zero() {
            inner.persist(&state);
            drop(state);
            inner.readmit(id);
        } else {
            let weak: Weak<QueueInner> = Arc::downgrade(&self.inner);
            let timer = inner.scheduler.schedule(
                delay,
                Box::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.readmit(id);
                    }
                }),
            );
            state.timers.insert(id, timer);
            debug!(request_id = %id, delay_ms = delay.as_millis() as u64, "retry scheduled");
            inner.persist(&state);
            drop(state);
        }

        inner.ready.notify_one();
        Ok(snapshot)
    }

    /// Active -> Done/Failed. Releases the slot and wakes the drain loop.
    pub fn complete(&self, id: RequestId, completion: Completion) -> Result<QueueEntry, QueueError> {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        let now = inner.clock.now();
        let entry = state
            .entries
            .get_mut(&id)
            .ok_or(QueueError::UnknownEntry(id))?;
        if entry.state != EntryState::Active {
            return Err(QueueError::InvalidTransition {
                id,
                from: entry.state,
                op: "complete",
            });
        }

        match completion {
            Completion::Done => entry.mark_done(now),
            Completion::Failed(failure) => {
                if failure.is_some() {
                    entry.last_error = failure;
                }
                entry.mark_failed(now);
            }
        }
        state.active -= 1;
        let entry = state
            .retire(id, &inner.config)
            .ok_or(QueueError::UnknownEntry(id))?;
        debug!(request_id = %id, state = ?entry.state, active = state.active, "completed");

        inner.persist(&state);
        drop(state);
        inner.ready.notify_one();
        Ok(entry)
    }

    /// Removes a live entry wherever it is. Returns the state it was in.
    ///
    /// An Active entry gives its slot back at once; aborting the in-flight
    /// call is the caller's job.
    pub fn cancel(&self, id: RequestId) -> Option<EntryState> {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        let now = inner.clock.now();
        let previous = state.entries.get(&id)?.state;

        match previous {
            EntryState::Pending => {
                let priority = state.entries.get(&id)?.priority();
                state.bucket(priority).retain(|x| *x != id);
            }
            EntryState::Retrying => {
                if let Some(timer) = state.timers.remove(&id) {
                    timer.cancel();
                }
            }
            EntryState::Active => state.active -= 1,
            EntryState::Done | EntryState::Failed => return None,
        }

        if let Some(entry) = state.entries.get_mut(&id) {
            entry.mark_failed(now);
        }
        state.retire(id, &inner.config);
        debug!(request_id = %id, was = ?previous, "cancelled");

        inner.persist(&state);
        drop(state);
        inner.ready.notify_one();
        Some(previous)
    }

    pub fn entry(&self, id: RequestId) -> Option<QueueEntry> {
        self.inner.state.lock().entries.get(&id).cloned()
    }

    pub fn depth(&self) -> QueueDepth {
        self.inner.state.lock().depth()
    }

    pub fn active_count(&self) -> usize {
        self.inner.state.lock().active
    }

    pub fn history(&self) -> Vec<HistoryRecord> {
        self.inner.state.lock().history.iter().cloned().collect()
    }

    /// Current durable projection (what the store last received).
    pub fn snapshot(&self) -> QueueSnapshot {
        self.inner.state.lock().to_snapshot(self.inner.clock.now())
    }

    /// Resolves after the next state change that may let more work run.
    pub async fn ready(&self) {
        self.inner.ready.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Action, Payload};
    use crate::impls::InMemorySnapshotStore;
    use crate::ports::{FixedClock, ManualScheduler};
    use chrono::{TimeZone, Utc};
    use ulid::Ulid;

    struct Fixture {
        queue: RequestQueue,
        sched: ManualScheduler,
        store: Arc<InMemorySnapshotStore>,
        clock: FixedClock,
        rt: tokio::runtime::Runtime,
    }

    impl Fixture {
        /// Latest snapshot once the writer has caught up.
        fn saved(&self) -> QueueSnapshot {
            self.rt.block_on(self.queue.flush());
            self.store.saved().unwrap()
        }

        fn reopen(&self, config: QueueConfig) -> RequestQueue {
            self.rt.block_on(self.queue.flush());
            RequestQueue::open(
                config,
                Arc::new(ManualScheduler::new()),
                self.store.clone(),
                Arc::new(self.clock.clone()),
                self.rt.handle(),
            )
        }
    }

    fn fixture(max_concurrent: usize, max_queue_size: usize) -> Fixture {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let sched = ManualScheduler::new();
        let store = Arc::new(InMemorySnapshotStore::new());
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
        let config = QueueConfig {
            max_concurrent,
            max_queue_size,
            ..QueueConfig::default()
        };
        let queue = RequestQueue::open(
            config,
            Arc::new(sched.clone()),
            store.clone(),
            Arc::new(clock.clone()),
            rt.handle(),
        );
        Fixture {
            queue,
            sched,
            store,
            clock,
            rt,
        }
    }

    fn desc(priority: Priority) -> RequestDescriptor {
        RequestDescriptor::new(
            RequestId::from_ulid(Ulid::new()),
            Action::new("save-settings"),
            Payload::new(),
            priority,
            Utc::now(),
            3,
        )
    }

    #[test]
    fn fifo_within_priority() {
        let f = fixture(10, 100);
        let ids: Vec<_> = (0..5)
            .map(|_| f.queue.enqueue(desc(Priority::Normal)).unwrap().id())
            .collect();

        let order: Vec<_> = (0..5).map(|_| f.queue.dequeue().unwrap().id()).collect();
        assert_eq!(order, ids);
    }

    #[test]
    fn high_priority_jumps_pending_normal() {
        let f = fixture(10, 100);
        let normal = f.queue.enqueue(desc(Priority::Normal)).unwrap().id();
        let low = f.queue.enqueue(desc(Priority::Low)).unwrap().id();
        let high = f.queue.enqueue(desc(Priority::High)).unwrap().id();

        assert_eq!(f.queue.dequeue().unwrap().id(), high);
        assert_eq!(f.queue.dequeue().unwrap().id(), normal);
        assert_eq!(f.queue.dequeue().unwrap().id(), low);
    }

    #[test]
    fn dequeue_respects_concurrency_cap_without_side_effects() {
        let f = fixture(2, 100);
        for _ in 0..3 {
            f.queue.enqueue(desc(Priority::Normal)).unwrap();
        }
        let a = f.queue.dequeue().unwrap();
        f.queue.dequeue().unwrap();

        let before = f.queue.depth();
        assert!(f.queue.dequeue().is_none());
        assert_eq!(f.queue.depth(), before);
        assert_eq!(before, QueueDepth { pending: 1, active: 2, retrying: 0 });

        f.queue.complete(a.id(), Completion::Done).unwrap();
        assert!(f.queue.dequeue().is_some());
    }

    #[test]
    fn queue_full_counts_live_entries() {
        let f = fixture(5, 2);
        f.queue.enqueue(desc(Priority::Normal)).unwrap();
        let b = f.queue.enqueue(desc(Priority::Normal)).unwrap();
        let err = f.queue.enqueue(desc(Priority::Normal)).unwrap_err();
        assert!(matches!(err, QueueError::Full { limit: 2 }));

        // a cancelled entry frees room
        f.queue.cancel(b.id());
        f.queue.enqueue(desc(Priority::Normal)).unwrap();
    }

    #[test]
    fn retry_reenters_at_bucket_head_after_delay() {
        let f = fixture(1, 100);
        let first = f.queue.enqueue(desc(Priority::Normal)).unwrap().id();
        let second = f.queue.enqueue(desc(Priority::Normal)).unwrap().id();

        let active = f.queue.dequeue().unwrap();
        assert_eq!(active.id(), first);
        let entry = f
            .queue
            .requeue_for_retry(first, Duration::from_millis(1000), RetryCharge::Attempt, None)
            .unwrap();
        assert_eq!(entry.state, EntryState::Retrying);
        assert_eq!(f.queue.active_count(), 0);
        assert_eq!(f.sched.pending_delays(), vec![Duration::from_millis(1000)]);

        // not yet due: the peer goes first
        f.sched.advance(Duration::from_millis(999));
        assert_eq!(f.queue.entry(first).unwrap().state, EntryState::Retrying);

        f.sched.advance(Duration::from_millis(1));
        let third = f.queue.enqueue(desc(Priority::Normal)).unwrap().id();
        // retried entry is ahead of both peers
        assert_eq!(f.queue.dequeue().unwrap().id(), first);
        f.queue.complete(first, Completion::Done).unwrap();
        assert_eq!(f.queue.dequeue().unwrap().id(), second);
        f.queue.complete(second, Completion::Done).unwrap();
        assert_eq!(f.queue.dequeue().unwrap().id(), third);
    }

    #[test]
    fn retried_entry_keeps_attempt_and_enqueued_at() {
        let f = fixture(1, 100);
        let id = f.queue.enqueue(desc(Priority::High)).unwrap().id();
        let enqueued_at = f.queue.entry(id).unwrap().enqueued_at;

        f.queue.dequeue().unwrap();
        f.clock.advance(Duration::from_secs(2));
        f.queue
            .requeue_for_retry(id, Duration::from_millis(500), RetryCharge::Attempt, None)
            .unwrap();
        f.sched.run_all();

        let again = f.queue.dequeue().unwrap();
        assert_eq!(again.attempt, 2);
        assert_eq!(again.enqueued_at, enqueued_at);
    }

    #[test]
    fn auth_refresh_retry_is_free_and_immediate() {
        let f = fixture(1, 100);
        let id = f.queue.enqueue(desc(Priority::Normal)).unwrap().id();
        f.queue.dequeue().unwrap();
        f.queue
            .requeue_for_retry(id, Duration::ZERO, RetryCharge::AuthRefresh, None)
            .unwrap();

        assert_eq!(f.sched.pending(), 0);
        let entry = f.queue.entry(id).unwrap();
        assert_eq!(entry.state, EntryState::Pending);
        assert_eq!(entry.attempt, 0);
        assert_eq!(entry.auth_refreshes, 1);
    }

    #[test]
    fn complete_requires_active_entry() {
        let f = fixture(1, 100);
        let id = f.queue.enqueue(desc(Priority::Normal)).unwrap().id();
        let err = f.queue.complete(id, Completion::Done).unwrap_err();
        assert!(matches!(err, QueueError::InvalidTransition { from: EntryState::Pending, .. }));
    }

    #[test]
    fn cancel_retrying_entry_stops_its_timer() {
        let f = fixture(1, 100);
        let id = f.queue.enqueue(desc(Priority::Normal)).unwrap().id();
        f.queue.dequeue().unwrap();
        f.queue
            .requeue_for_retry(id, Duration::from_secs(1), RetryCharge::Attempt, None)
            .unwrap();

        assert_eq!(f.queue.cancel(id), Some(EntryState::Retrying));
        f.sched.run_all();

        assert!(f.queue.entry(id).is_none());
        assert_eq!(f.queue.depth().live(), 0);
        assert_eq!(f.queue.history().last().unwrap().state, EntryState::Failed);
    }

    #[test]
    fn cancel_active_entry_releases_slot() {
        let f = fixture(1, 100);
        let id = f.queue.enqueue(desc(Priority::Normal)).unwrap().id();
        f.queue.enqueue(desc(Priority::Normal)).unwrap();
        f.queue.dequeue().unwrap();
        assert!(f.queue.dequeue().is_none());

        assert_eq!(f.queue.cancel(id), Some(EntryState::Active));
        assert!(f.queue.dequeue().is_some());
    }

    #[test]
    fn gated_dequeue_skips_without_reordering() {
        let f = fixture(5, 100);
        let held = f.queue.enqueue(desc(Priority::Normal)).unwrap().id();
        let open = f.queue.enqueue(desc(Priority::Normal)).unwrap().id();

        let got = f.queue.dequeue_with(|e| e.id() != held).unwrap();
        assert_eq!(got.id(), open);
        assert_eq!(f.queue.dequeue().unwrap().id(), held);
    }

    #[test]
    fn every_mutation_is_persisted() {
        let f = fixture(5, 100);
        let a = f.queue.enqueue(desc(Priority::Normal)).unwrap().id();
        f.queue.enqueue(desc(Priority::Low)).unwrap();
        assert_eq!(f.saved().entries.len(), 2);

        f.queue.dequeue().unwrap();
        let saved = f.saved();
        assert_eq!(saved.entries.iter().find(|e| e.id() == a).unwrap().state, EntryState::Active);

        f.queue.complete(a, Completion::Done).unwrap();
        let saved = f.saved();
        assert_eq!(saved.entries.len(), 1);
        assert_eq!(saved.history.len(), 1);
        assert_eq!(saved.history[0].state, EntryState::Done);
    }

    #[test]
    fn restore_readmits_live_entries_as_pending() {
        let f = fixture(5, 100);
        let a = f.queue.enqueue(desc(Priority::Normal)).unwrap().id();
        f.clock.advance(Duration::from_secs(1));
        let b = f.queue.enqueue(desc(Priority::High)).unwrap().id();
        f.clock.advance(Duration::from_secs(1));
        let c = f.queue.enqueue(desc(Priority::Normal)).unwrap().id();
        f.queue.dequeue().unwrap(); // b active
        f.queue.dequeue().unwrap(); // a active
        f.queue
            .requeue_for_retry(a, Duration::from_secs(5), RetryCharge::Attempt, None)
            .unwrap();

        // "restart": a new queue over the same store
        let reopened = f.reopen(QueueConfig::default());

        let depth = reopened.depth();
        assert_eq!(depth, QueueDepth { pending: 3, active: 0, retrying: 0 });
        assert_eq!(reopened.entry(b).unwrap().attempt, 1);
        assert_eq!(reopened.entry(a).unwrap().attempt, 1);
        assert_eq!(reopened.take_restored().len(), 3);
        assert!(reopened.take_restored().is_empty());

        // high first, then normal bucket by enqueue time
        assert_eq!(reopened.dequeue().unwrap().id(), b);
        assert_eq!(reopened.dequeue().unwrap().id(), a);
        assert_eq!(reopened.dequeue().unwrap().id(), c);
    }

    #[test]
    fn restore_drops_stale_entries() {
        let f = fixture(5, 100);
        let old = f.queue.enqueue(desc(Priority::Normal)).unwrap().id();
        f.clock.advance(Duration::from_secs(30 * 60));
        let fresh = f.queue.enqueue(desc(Priority::Normal)).unwrap().id();
        f.clock.advance(Duration::from_secs(31 * 60));

        let reopened = f.reopen(QueueConfig::default());

        assert!(reopened.entry(old).is_none());
        assert!(reopened.entry(fresh).is_some());
        // the pruned view is written back
        f.rt.block_on(reopened.flush());
        assert_eq!(f.store.saved().unwrap().entries.len(), 1);
    }

    #[test]
    fn restore_keeps_oldest_entries_up_to_the_size_limit() {
        let f = fixture(5, 100);
        let ids: Vec<_> = (0..4)
            .map(|_| {
                f.clock.advance(Duration::from_secs(1));
                f.queue.enqueue(desc(Priority::Normal)).unwrap().id()
            })
            .collect();

        let reopened = f.reopen(QueueConfig {
            max_queue_size: 2,
            ..QueueConfig::default()
        });

        assert_eq!(reopened.depth().pending, 2);
        assert!(reopened.entry(ids[0]).is_some());
        assert!(reopened.entry(ids[1]).is_some());
        assert!(reopened.entry(ids[3]).is_none());
        assert_eq!(reopened.take_restored().len(), 2);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Enqueue(Priority),
            Dequeue,
            Complete,
            Retry(u64),
            Cancel(usize),
            Tick(u64),
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                prop::sample::select(Priority::ALL.to_vec()).prop_map(Op::Enqueue),
                Just(Op::Dequeue),
                Just(Op::Complete),
                (0u64..3000).prop_map(Op::Retry),
                any::<usize>().prop_map(Op::Cancel),
                (0u64..3000).prop_map(Op::Tick),
            ]
        }

        proptest! {
            #[test]
            fn caps_hold_under_any_sequence(ops in prop::collection::vec(op(), 1..80)) {
                let f = fixture(3, 10);
                let mut active: Vec<RequestId> = Vec::new();
                let mut known: Vec<RequestId> = Vec::new();

                for op in ops {
                    match op {
                        Op::Enqueue(p) => {
                            if let Ok(entry) = f.queue.enqueue(desc(p)) {
                                known.push(entry.id());
                            }
                        }
                        Op::Dequeue => {
                            if let Some(entry) = f.queue.dequeue() {
                                active.push(entry.id());
                            }
                        }
                        Op::Complete => {
                            if !active.is_empty() {
                                let id = active.remove(0);
                                let _ = f.queue.complete(id, Completion::Done);
                            }
                        }
                        Op::Retry(ms) => {
                            if !active.is_empty() {
                                let id = active.remove(0);
                                let _ = f.queue.requeue_for_retry(
                                    id,
                                    Duration::from_millis(ms),
                                    RetryCharge::Attempt,
                                    None,
                                );
                            }
                        }
                        Op::Cancel(i) => {
                            if !known.is_empty() {
                                let id = known[i % known.len()];
                                f.queue.cancel(id);
                                active.retain(|a| *a != id);
                            }
                        }
                        Op::Tick(ms) => f.sched.advance(Duration::from_millis(ms)),
                    }

                    let depth = f.queue.depth();
                    prop_assert!(depth.active <= 3);
                    prop_assert!(depth.live() <= 10);
                    prop_assert_eq!(depth.active, active.len());
                }
            }
        }
    }
}
