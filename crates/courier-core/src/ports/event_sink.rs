//! EventSink port: lifecycle notifications for the UI collaborator.
//!
//! Purely observational. `emit` must not block and must not fail the
//! pipeline; sinks drop events they cannot deliver.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::domain::{EventType, LifecycleEvent, RequestId};

pub trait EventSink: Send + Sync {
    fn emit(&self, event: LifecycleEvent);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: LifecycleEvent) {}
}

/// Forwards events to an unbounded channel. A dropped receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: LifecycleEvent) {
        // receiver may be gone; notifications are at-most-once
        let _ = self.tx.send(event);
    }
}

/// Keeps every event in memory. Clones share the log.
#[derive(Debug, Clone, Default)]
pub struct RecordingEventSink {
    events: Arc<Mutex<Vec<LifecycleEvent>>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().clone()
    }

    pub fn kinds_for(&self, id: RequestId) -> Vec<EventType> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.request_id == id)
            .map(|e| e.kind)
            .collect()
    }

    pub fn count(&self, kind: EventType) -> usize {
        self.events.lock().iter().filter(|e| e.kind == kind).count()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: LifecycleEvent) {
        self.events.lock().push(event);
    }
}
