//! Scheduler port: `schedule(delay, fn) -> handle`.
//!
//! The queue never sleeps itself. Retry re-admission is handed to the
//! scheduler, which makes the timing testable without real waits:
//! - `TokioScheduler` spawns a sleeping task (use `start_paused` in tests)
//! - `ManualScheduler` holds tasks until the test advances it

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

/// Cancellation handle for a scheduled task. Cancelling after the task ran
/// is a no-op.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    abort: Option<AbortHandle>,
}

impl TimerHandle {
    fn new(cancelled: Arc<AtomicBool>, abort: Option<AbortHandle>) -> Self {
        Self { cancelled, abort }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

pub trait Scheduler: Send + Sync {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle;
}

/// Runs tasks on a Tokio runtime after `tokio::time::sleep`.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Scheduler bound to the runtime of the calling context, if any.
    pub fn try_current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if !flag.load(Ordering::SeqCst) {
                task();
            }
        });
        TimerHandle::new(cancelled, Some(join.abort_handle()))
    }
}

struct ManualTimer {
    due: Duration,
    seq: u64,
    task: TimerTask,
    cancelled: Arc<AtomicBool>,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_seq: u64,
    timers: Vec<ManualTimer>,
}

/// Test scheduler driven by `advance`. Tasks fire in due order, ties in
/// scheduling order.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    state: Arc<Mutex<ManualState>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of scheduled, not yet fired, not cancelled tasks.
    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .timers
            .iter()
            .filter(|t| !t.cancelled.load(Ordering::SeqCst))
            .count()
    }

    /// Delays (relative to now) of pending tasks, soonest first.
    pub fn pending_delays(&self) -> Vec<Duration> {
        let state = self.state.lock();
        let mut delays: Vec<Duration> = state
            .timers
            .iter()
            .filter(|t| !t.cancelled.load(Ordering::SeqCst))
            .map(|t| t.due.saturating_sub(state.now))
            .collect();
        delays.sort();
        delays
    }

    /// Moves time forward and runs every task that became due.
    pub fn advance(&self, by: Duration) {
        let target = self.state.lock().now + by;
        loop {
            // pop one due task at a time so tasks may schedule new ones
            let next = {
                let mut state = self.state.lock();
                let idx = state
                    .timers
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.due <= target)
                    .min_by_key(|(_, t)| (t.due, t.seq))
                    .map(|(i, _)| i);
                match idx {
                    Some(i) => {
                        let timer = state.timers.swap_remove(i);
                        state.now = state.now.max(timer.due);
                        Some(timer)
                    }
                    None => {
                        state.now = target;
                        None
                    }
                }
            };
            match next {
                Some(timer) if !timer.cancelled.load(Ordering::SeqCst) => (timer.task)(),
                Some(_) => {}
                None => break,
            }
        }
    }

    /// Runs everything currently scheduled, however far in the future.
    pub fn run_all(&self) {
        let furthest = {
            let state = self.state.lock();
            state
                .timers
                .iter()
                .map(|t| t.due.saturating_sub(state.now))
                .max()
        };
        if let Some(by) = furthest {
            self.advance(by);
        }
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        let due = state.now + delay;
        state.timers.push(ManualTimer {
            due,
            seq,
            task,
            cancelled: Arc::clone(&cancelled),
        });
        TimerHandle::new(cancelled, None)
    }
}
