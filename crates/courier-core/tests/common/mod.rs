//! Shared wiring for the integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use courier_core::app::{DeliveryConfig, Orchestrator, OrchestratorBuilder};
use courier_core::domain::{EventType, LifecycleEvent};
use courier_core::impls::{InMemorySnapshotStore, RotatingAuthProvider, SimulatedTransport};
use courier_core::ports::{Clock, FixedClock, RecordingEventSink};

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub transport: Arc<SimulatedTransport>,
    pub events: RecordingEventSink,
    pub store: Arc<InMemorySnapshotStore>,
    pub auth: Arc<RotatingAuthProvider>,
    pub clock: FixedClock,
}

impl Harness {
    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn events_of(&self, kind: EventType) -> Vec<LifecycleEvent> {
        self.events
            .events()
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect()
    }
}

/// Must be called inside a Tokio runtime.
pub fn harness(config: DeliveryConfig, transport: SimulatedTransport) -> Harness {
    harness_with(
        config,
        transport,
        Arc::new(InMemorySnapshotStore::new()),
        FixedClock::new(Utc::now()),
    )
}

pub fn harness_with(
    config: DeliveryConfig,
    transport: SimulatedTransport,
    store: Arc<InMemorySnapshotStore>,
    clock: FixedClock,
) -> Harness {
    let transport = Arc::new(transport);
    let events = RecordingEventSink::new();
    let auth = Arc::new(RotatingAuthProvider::new("tok"));
    let orchestrator = OrchestratorBuilder::new(config)
        .transport(transport.clone())
        .auth(auth.clone())
        .snapshot_store(store.clone())
        .event_sink(Arc::new(events.clone()))
        .clock(Arc::new(clock.clone()))
        .build()
        .expect("orchestrator builds");
    Harness {
        orchestrator,
        transport,
        events,
        store,
        auth,
        clock,
    }
}
