//! Orchestrator: the submit façade over dedup, queue, breaker, transport
//! and retry policy.
//!
//! # Flow
//! `submit` → dedup check → enqueue → drain. The drain loop dequeues while
//! slots are free, asks the breaker, and runs each admitted entry in its own
//! task: token → transport (with timeout) → breaker → retry decision →
//! requeue or settle.
//!
//! # Locking
//! `tracker` (waiters, in-flight handles, attempt history) is taken before
//! the queue's lock, never after it. No lock is held across an `.await`.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::app::config::DeliveryConfig;
use crate::app::metrics::{Metrics, MetricsSnapshot};
use crate::breaker::{Admission, CircuitBreaker, CircuitStatus};
use crate::dedup::{DedupVerdict, Deduplicator};
use crate::domain::{
    Action, AttemptFailure, AttemptOutcome, AttemptRecord, DeliveryError, DeliveryResult,
    ErrorKind, EventType, FailureClass, LifecycleEvent, Payload, RequestDescriptor, RequestId,
    SubmitOptions,
};
use crate::ports::{
    AuthProvider, Clock, EventSink, IdGenerator, Transport, WireRequest, clock::elapsed_ms,
    send_with_timeout,
};
use crate::queue::{Completion, EntryState, QueueDepth, QueueEntry, QueueError, RequestQueue, RetryCharge};
use crate::retry::{RetryDecision, RetryPolicy};

type Waiter = oneshot::Sender<DeliveryResult>;

/// Future returned by `submit`. Resolves once the request (or the request
/// it was folded into) settles.
#[derive(Debug)]
pub struct DeliveryHandle {
    request_id: RequestId,
    rx: oneshot::Receiver<DeliveryResult>,
}

impl DeliveryHandle {
    /// Id of the request that will deliver this caller's result. For a
    /// duplicate this is the surviving request's id.
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    fn ready(request_id: RequestId, result: DeliveryResult) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { request_id, rx }
    }
}

impl Future for DeliveryHandle {
    type Output = DeliveryResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or_else(|_| Err(DeliveryError::cancelled())))
    }
}

/// Caller-side bookkeeping. The queue owns entry state; this owns who is
/// waiting for what.
#[derive(Default)]
struct Tracker {
    waiters: HashMap<RequestId, Vec<Waiter>>,
    in_flight: HashMap<RequestId, AbortHandle>,
    probes: HashSet<RequestId>,
    history: HashMap<RequestId, Vec<AttemptRecord>>,
}

/// Everything the orchestrator is wired with.
pub(crate) struct Parts {
    pub config: DeliveryConfig,
    pub queue: RequestQueue,
    pub dedup: Deduplicator,
    pub breaker: CircuitBreaker,
    pub retry: RetryPolicy,
    pub transport: Arc<dyn Transport>,
    pub auth: Arc<dyn AuthProvider>,
    pub events: Arc<dyn EventSink>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    pub runtime: Handle,
}

struct Inner {
    config: DeliveryConfig,
    queue: RequestQueue,
    dedup: Deduplicator,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    transport: Arc<dyn Transport>,
    auth: Arc<dyn AuthProvider>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    runtime: Handle,
    metrics: Metrics,
    tracker: Mutex<Tracker>,
    shutdown: watch::Sender<bool>,
}

/// Reliable delivery pipeline. Cheap to clone; clones share one pipeline.
///
/// Built by `OrchestratorBuilder` inside a Tokio runtime.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub(crate) fn start(parts: Parts) -> Self {
        let (shutdown, _) = watch::channel(false);
        let inner = Arc::new(Inner {
            config: parts.config,
            queue: parts.queue,
            dedup: parts.dedup,
            breaker: parts.breaker,
            retry: parts.retry,
            transport: parts.transport,
            auth: parts.auth,
            events: parts.events,
            clock: parts.clock,
            ids: parts.ids,
            runtime: parts.runtime,
            metrics: Metrics::new(),
            tracker: Mutex::new(Tracker::default()),
            shutdown,
        });

        let restored = inner.queue.take_restored();
        if !restored.is_empty() {
            inner.dedup.rebuild(restored.iter().map(|e| &e.descriptor));
            let mut tracker = inner.tracker.lock();
            for entry in &restored {
                tracker.waiters.entry(entry.id()).or_default();
            }
            info!(restored = restored.len(), "resuming restored requests");
        }

        Self::spawn_pump(&inner);
        inner.drain();
        Self { inner }
    }

    /// Re-runs the drain loop whenever the queue signals a state change
    /// (notably timer re-admissions). Stops on shutdown or once the
    /// orchestrator is dropped.
    fn spawn_pump(inner: &Arc<Inner>) {
        let weak = Arc::downgrade(inner);
        let queue = inner.queue.clone();
        let mut shutdown = inner.shutdown.subscribe();
        inner.runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = queue.ready() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.drain();
            }
            debug!("drain pump stopped");
        });
    }

    /// Accepts one request. Must be called from within the runtime the
    /// orchestrator was built in.
    pub fn submit(
        &self,
        action: impl Into<Action>,
        payload: Payload,
        options: SubmitOptions,
    ) -> DeliveryHandle {
        self.inner.submit(action.into(), payload, options)
    }

    /// Cancels a live request. Every caller attached to it gets
    /// `Cancelled`. Returns `false` when the id is unknown or already settled.
    pub fn cancel(&self, request_id: RequestId) -> bool {
        self.inner.cancel(request_id)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot(self.inner.queue.depth())
    }

    pub fn depth(&self) -> QueueDepth {
        self.inner.queue.depth()
    }

    pub fn circuit_status(&self, action: &Action) -> CircuitStatus {
        self.inner.breaker.status(action)
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.inner.config
    }

    /// Stops dequeuing new work. In-flight attempts run to completion; the
    /// rest stays in the snapshot for the next start.
    pub fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        info!(depth = ?self.inner.queue.depth(), "orchestrator shutting down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.is_shut_down()
    }

    /// Waits until the latest queue snapshot has been written.
    pub async fn flush(&self) {
        self.inner.queue.flush().await;
    }
}

impl Inner {
    fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn emit(&self, kind: EventType, id: RequestId, action: &Action, attempt: u32, detail: serde_json::Value) {
        self.events
            .emit(LifecycleEvent::new(kind, id, action.clone(), attempt).with_detail(detail));
    }

    fn submit(self: &Arc<Self>, action: Action, payload: Payload, options: SubmitOptions) -> DeliveryHandle {
        let id = self.ids.generate_request_id();
        self.metrics.submitted();

        if action.is_empty() {
            let err = DeliveryError::new(ErrorKind::InvalidRequest, "action must not be empty");
            self.metrics.failed();
            self.emit(EventType::Failed, id, &action, 0, json!({"kind": err.kind}));
            return DeliveryHandle::ready(id, Err(err));
        }

        let descriptor = RequestDescriptor::new(
            id,
            action,
            payload,
            options.priority.unwrap_or_default(),
            self.clock.now(),
            options.max_attempts.unwrap_or(self.config.default_max_attempts),
        );

        let (tx, rx) = oneshot::channel();
        let mut tracker = self.tracker.lock();

        let (descriptor, superseded) = match self.dedup.check(&descriptor) {
            DedupVerdict::Duplicate {
                canonical_id,
                settled,
            } if settled.is_some() || tracker.waiters.contains_key(&canonical_id) => {
                self.metrics.deduplicated();
                self.emit(
                    EventType::Deduplicated,
                    id,
                    descriptor.action(),
                    0,
                    json!({"canonicalId": canonical_id}),
                );
                debug!(request_id = %id, %canonical_id, "duplicate attached");
                match settled {
                    Some(result) => {
                        let _ = tx.send(result);
                    }
                    None => tracker.waiters.entry(canonical_id).or_default().push(tx),
                }
                return DeliveryHandle {
                    request_id: canonical_id,
                    rx,
                };
            }
            DedupVerdict::Supersedes { ids, carried } => {
                let descriptor = if carried.is_empty() {
                    descriptor
                } else {
                    descriptor.merged_with(&carried)
                };
                (descriptor, ids)
            }
            DedupVerdict::Unique | DedupVerdict::Duplicate { .. } => (descriptor, Vec::new()),
        };

        // retire the older requests first so their slots count for us
        let mut inherited: Vec<Waiter> = Vec::new();
        let mut superseded_count = 0;
        for old in superseded {
            if let Some((entry, waiters)) = self.retire_locked(&mut tracker, old) {
                superseded_count += 1;
                inherited.extend(waiters);
                self.dedup.release(old);
                self.emit(
                    EventType::Superseded,
                    old,
                    entry.descriptor.action(),
                    entry.attempt,
                    json!({"supersededBy": id}),
                );
            }
        }
        if superseded_count > 0 {
            self.metrics.superseded(superseded_count);
            debug!(request_id = %id, superseded = superseded_count, "older requests superseded");
        }

        match self.queue.enqueue(descriptor.clone()) {
            Ok(_) => {
                self.dedup.record(&descriptor);
                let waiters = tracker.waiters.entry(id).or_default();
                waiters.push(tx);
                waiters.extend(inherited);
                self.emit(
                    EventType::Queued,
                    id,
                    descriptor.action(),
                    0,
                    json!({"priority": descriptor.priority()}),
                );
            }
            Err(e) => {
                drop(tracker);
                let err = match e {
                    QueueError::Full { limit } => DeliveryError::queue_full(limit),
                    other => DeliveryError::new(ErrorKind::InvalidRequest, other.to_string()),
                };
                warn!(request_id = %id, error = %err, "submission rejected");
                self.metrics.failed();
                self.emit(EventType::Failed, id, descriptor.action(), 0, json!({"kind": err.kind}));
                let _ = tx.send(Err(err.clone()));
                if !inherited.is_empty() {
                    let orphaned = DeliveryError::new(
                        ErrorKind::DuplicateSuperseded,
                        format!("superseded by {id}, which was rejected: {}", err.message),
                    );
                    for waiter in inherited {
                        let _ = waiter.send(Err(orphaned.clone()));
                    }
                }
                return DeliveryHandle { request_id: id, rx };
            }
        }

        drop(tracker);
        self.drain();
        DeliveryHandle { request_id: id, rx }
    }

    /// Removes a live request from the queue and detaches its waiters.
    /// Aborts its in-flight call and returns any breaker probe it held.
    fn retire_locked(&self, tracker: &mut Tracker, id: RequestId) -> Option<(QueueEntry, Vec<Waiter>)> {
        let entry = self.queue.entry(id)?;
        self.queue.cancel(id)?;
        if let Some(handle) = tracker.in_flight.remove(&id) {
            handle.abort();
        }
        if tracker.probes.remove(&id) {
            self.breaker.release_probe(entry.descriptor.action());
        }
        tracker.history.remove(&id);
        let waiters = tracker.waiters.remove(&id).unwrap_or_default();
        Some((entry, waiters))
    }

    fn cancel(self: &Arc<Self>, id: RequestId) -> bool {
        let retired = {
            let mut tracker = self.tracker.lock();
            self.retire_locked(&mut tracker, id)
        };
        let Some((entry, waiters)) = retired else {
            return false;
        };

        self.dedup.release(id);
        self.metrics.cancelled();
        self.emit(EventType::Cancelled, id, entry.descriptor.action(), entry.attempt, serde_json::Value::Null);
        info!(request_id = %id, was = ?entry.state, "request cancelled");
        let err = DeliveryError::cancelled().with_attempts(entry.attempt);
        for waiter in waiters {
            let _ = waiter.send(Err(err.clone()));
        }
        self.drain();
        true
    }

    /// Dequeues and launches until no slot is free or nothing is runnable.
    fn drain(self: &Arc<Self>) {
        while !self.is_shut_down() {
            let mut admission = Admission::Allow;
            let next = self.queue.dequeue_with(|entry| {
                admission = self.breaker.admit(entry.descriptor.action());
                admission != Admission::Hold
            });
            let Some(entry) = next else {
                break;
            };

            match admission {
                Admission::Reject => self.reject_circuit_open(entry),
                Admission::Allow | Admission::Probe => {
                    self.launch(entry, admission == Admission::Probe)
                }
                Admission::Hold => {}
            }
        }
    }

    fn launch(self: &Arc<Self>, entry: QueueEntry, probe: bool) {
        let id = entry.id();
        let mut tracker = self.tracker.lock();
        // cancelled between dequeue and here
        if !self
            .queue
            .entry(id)
            .is_some_and(|e| e.state == EntryState::Active)
        {
            if probe {
                self.breaker.release_probe(entry.descriptor.action());
            }
            return;
        }
        if probe {
            tracker.probes.insert(id);
        }
        debug!(request_id = %id, attempt = entry.attempt, probe, "attempt starting");
        let this = Arc::clone(self);
        let task = self.runtime.spawn(async move { this.execute(entry).await });
        tracker.in_flight.insert(id, task.abort_handle());
    }

    async fn execute(self: Arc<Self>, entry: QueueEntry) {
        let descriptor = &entry.descriptor;
        let outcome = match self.auth.token().await {
            Ok(token) => {
                let request = WireRequest {
                    action: descriptor.action().clone(),
                    payload: descriptor.payload().clone(),
                    auth_token: token,
                    request_id: descriptor.id(),
                };
                self.metrics.transport_call();
                let outcome =
                    send_with_timeout(self.transport.as_ref(), &request, self.config.request_timeout()).await;
                self.record_health(&entry, &outcome);
                outcome
            }
            Err(e) => {
                // never reached the endpoint: give the probe back untouched
                if self.tracker.lock().probes.remove(&entry.id()) {
                    self.breaker.release_probe(descriptor.action());
                }
                Err(AttemptFailure::new(FailureClass::Auth, "auth_unavailable", e.to_string()))
            }
        };
        self.handle_outcome(entry, outcome).await;
    }

    fn record_health(&self, entry: &QueueEntry, outcome: &AttemptOutcome) {
        let probe = self.tracker.lock().probes.remove(&entry.id());
        let healthy = match outcome {
            Ok(_) => true,
            Err(f) => !f.class.counts_against_circuit(),
        };
        let action = entry.descriptor.action();
        if probe {
            self.breaker.record_probe(action, healthy);
        } else {
            self.breaker.record(action, healthy);
        }
    }

    async fn handle_outcome(self: Arc<Self>, entry: QueueEntry, outcome: AttemptOutcome) {
        match outcome {
            Ok(success) => self.settle(&entry, Completion::Done, Ok(success.data), EventType::Succeeded),
            Err(failure) => self.handle_failure(&entry, failure).await,
        }
        self.drain();
    }

    async fn handle_failure(self: &Arc<Self>, entry: &QueueEntry, failure: AttemptFailure) {
        let id = entry.id();

        let descriptor = &entry.descriptor;
        let decision = self.retry.decide(
            failure.class,
            entry.attempt,
            descriptor.max_attempts(),
            failure.retry_after,
            entry.auth_refreshes,
        );
        debug!(request_id = %id, attempt = entry.attempt, code = %failure.code, ?decision, "attempt failed");

        let record = AttemptRecord {
            attempt: entry.attempt,
            failure: failure.clone(),
        };
        self.tracker.lock().history.entry(id).or_default().push(record);

        match decision {
            RetryDecision::Retry { delay } => {
                self.requeue(entry, delay, RetryCharge::Attempt, failure);
            }
            RetryDecision::RefreshAndRetry => {
                self.metrics.auth_refreshed();
                match self.auth.refresh().await {
                    Ok(_) => self.requeue(entry, Duration::ZERO, RetryCharge::AuthRefresh, failure),
                    Err(e) => {
                        warn!(request_id = %id, error = %e, "token refresh failed");
                        let refresh = AttemptFailure::new(FailureClass::Auth, "auth_refresh_failed", e.to_string());
                        self.fail(entry, refresh);
                    }
                }
            }
            RetryDecision::GiveUp => self.fail(entry, failure),
        }
    }

    fn requeue(self: &Arc<Self>, entry: &QueueEntry, delay: Duration, charge: RetryCharge, failure: AttemptFailure) {
        let id = entry.id();
        let code = failure.code.clone();
        {
            let mut tracker = self.tracker.lock();
            tracker.in_flight.remove(&id);
            if let Err(e) = self.queue.requeue_for_retry(id, delay, charge, Some(failure)) {
                // cancelled or superseded while the attempt ran
                debug!(request_id = %id, error = %e, "retry dropped");
                return;
            }
        }

        self.metrics.retried();
        self.emit(
            EventType::Retrying,
            id,
            entry.descriptor.action(),
            entry.attempt,
            json!({
                "delayMs": delay.as_millis() as u64,
                "code": code,
                "authRefresh": charge == RetryCharge::AuthRefresh,
            }),
        );
        info!(request_id = %id, attempt = entry.attempt, delay_ms = delay.as_millis() as u64, %code, "retry scheduled");
    }

    fn fail(self: &Arc<Self>, entry: &QueueEntry, failure: AttemptFailure) {
        let history = self
            .tracker
            .lock()
            .history
            .get(&entry.id())
            .cloned()
            .unwrap_or_default();
        let mut err = DeliveryError::from_history(entry.attempt, history);
        if err.last_error_code.as_deref() != Some(failure.code.as_str()) {
            err.kind = failure.class.into();
            err.message = failure.message.clone();
            err.last_error_code = Some(failure.code.clone());
        }
        self.settle(entry, Completion::Failed(Some(failure)), Err(err), EventType::Failed);
    }

    fn reject_circuit_open(self: &Arc<Self>, entry: QueueEntry) {
        let history = self
            .tracker
            .lock()
            .history
            .get(&entry.id())
            .cloned()
            .unwrap_or_default();
        let err = DeliveryError::circuit_open(entry.descriptor.action().as_str())
            .with_attempts(entry.attempt.saturating_sub(1))
            .with_history(history);
        self.settle(&entry, Completion::Failed(None), Err(err), EventType::CircuitOpen);
    }

    /// Terminal transition: completes the queue entry, then resolves every
    /// waiter. A request that was retired meanwhile is left alone.
    fn settle(self: &Arc<Self>, entry: &QueueEntry, completion: Completion, result: DeliveryResult, kind: EventType) {
        let id = entry.id();
        let (finished, waiters) = {
            let mut tracker = self.tracker.lock();
            tracker.in_flight.remove(&id);
            if tracker.probes.remove(&id) {
                self.breaker.release_probe(entry.descriptor.action());
            }
            let finished = match self.queue.complete(id, completion) {
                Ok(finished) => finished,
                Err(e) => {
                    debug!(request_id = %id, error = %e, "outcome dropped");
                    return;
                }
            };
            tracker.history.remove(&id);
            (finished, tracker.waiters.remove(&id).unwrap_or_default())
        };

        self.dedup.settle(id, &result);
        let action = entry.descriptor.action();
        match (&result, kind) {
            (Ok(_), _) => {
                let latency = elapsed_ms(finished.enqueued_at, self.clock.now());
                self.metrics.succeeded(latency);
                self.emit(kind, id, action, entry.attempt, json!({"latencyMs": latency}));
                info!(request_id = %id, %action, attempts = entry.attempt, latency_ms = latency, "delivered");
            }
            (Err(err), EventType::CircuitOpen) => {
                self.metrics.circuit_rejected();
                self.emit(kind, id, action, entry.attempt, json!({"kind": err.kind}));
                info!(request_id = %id, %action, "rejected: circuit open");
            }
            (Err(err), _) => {
                self.metrics.failed();
                self.emit(
                    kind,
                    id,
                    action,
                    entry.attempt,
                    json!({"kind": err.kind, "code": err.last_error_code}),
                );
                info!(request_id = %id, %action, attempts = err.attempts, error = %err, "delivery failed");
            }
        }

        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }
}
