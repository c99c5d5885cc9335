//! OrchestratorBuilder: wiring and startup validation.
//!
//! Fail-fast: a missing transport or auth provider, an unusable config, or
//! no Tokio runtime is a `BuildError` at `build()`, never a panic later.

use std::sync::Arc;

use tokio::runtime::Handle;

use crate::app::config::{ConfigError, DeliveryConfig};
use crate::app::orchestrator::{Orchestrator, Parts};
use crate::breaker::CircuitBreaker;
use crate::dedup::Deduplicator;
use crate::impls::InMemorySnapshotStore;
use crate::ports::{
    AuthProvider, Clock, EventSink, IdGenerator, NoopEventSink, Scheduler, SnapshotStore, SystemClock,
    TokioScheduler, Transport, UlidGenerator,
};
use crate::queue::RequestQueue;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no transport configured")]
    MissingTransport,

    #[error("no auth provider configured")]
    MissingAuth,

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    #[error("must be built inside a Tokio runtime")]
    NoRuntime,
}

/// Builds an `Orchestrator`.
///
/// # Example
/// ```ignore
/// let orchestrator = OrchestratorBuilder::new(DeliveryConfig::default())
///     .transport(Arc::new(HttpTransport::new(endpoint)?))
///     .auth(Arc::new(StaticAuthProvider::new("token")))
///     .snapshot_store(Arc::new(JsonFileSnapshotStore::new("queue.json")))
///     .build()?;
/// ```
///
/// Defaults: in-memory snapshot store, no-op event sink, system clock,
/// Tokio timers, ULID ids.
pub struct OrchestratorBuilder {
    config: DeliveryConfig,
    transport: Option<Arc<dyn Transport>>,
    auth: Option<Arc<dyn AuthProvider>>,
    store: Option<Arc<dyn SnapshotStore>>,
    events: Option<Arc<dyn EventSink>>,
    clock: Option<Arc<dyn Clock>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

impl OrchestratorBuilder {
    pub fn new(config: DeliveryConfig) -> Self {
        Self {
            config,
            transport: None,
            auth: None,
            store: None,
            events: None,
            clock: None,
            scheduler: None,
            ids: None,
        }
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Validates, restores the queue from the snapshot store and starts the
    /// drain pump.
    pub fn build(self) -> Result<Orchestrator, BuildError> {
        self.config.validate()?;
        let transport = self.transport.ok_or(BuildError::MissingTransport)?;
        let auth = self.auth.ok_or(BuildError::MissingAuth)?;
        let runtime = Handle::try_current().map_err(|_| BuildError::NoRuntime)?;

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let scheduler: Arc<dyn Scheduler> = self
            .scheduler
            .unwrap_or_else(|| Arc::new(TokioScheduler::new(runtime.clone())));
        let store: Arc<dyn SnapshotStore> = self
            .store
            .unwrap_or_else(|| Arc::new(InMemorySnapshotStore::new()));
        let events: Arc<dyn EventSink> = self.events.unwrap_or_else(|| Arc::new(NoopEventSink));
        let ids: Arc<dyn IdGenerator> = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));

        let config = self.config;
        let queue = RequestQueue::open(config.queue_config(), scheduler, store, Arc::clone(&clock), &runtime);

        Ok(Orchestrator::start(Parts {
            queue,
            dedup: Deduplicator::new(config.dedup_config(), Arc::clone(&clock)),
            breaker: CircuitBreaker::new(config.breaker.policy(), Arc::clone(&clock)),
            retry: config.retry.policy(),
            transport,
            auth,
            events,
            clock,
            ids,
            runtime,
            config,
        }))
    }
}
