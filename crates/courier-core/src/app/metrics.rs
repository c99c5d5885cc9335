//! Read-only delivery metrics.

use parking_lot::Mutex;
use serde::Serialize;

use crate::queue::QueueDepth;

#[derive(Debug, Default, Clone)]
struct Counters {
    submitted: u64,
    deduplicated: u64,
    superseded: u64,
    succeeded: u64,
    failed: u64,
    circuit_rejected: u64,
    cancelled: u64,
    retries: u64,
    transport_calls: u64,
    auth_refreshes: u64,
    latency_total_ms: u64,
    latency_max_ms: u64,
}

/// Counters updated by the orchestrator. Callers only see snapshots.
#[derive(Debug, Default)]
pub struct Metrics {
    counters: Mutex<Counters>,
}

/// Point-in-time copy of the metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub submitted: u64,
    pub deduplicated: u64,
    pub superseded: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub circuit_rejected: u64,
    pub cancelled: u64,
    pub retries: u64,
    pub transport_calls: u64,
    pub auth_refreshes: u64,
    /// Enqueue to success, averaged over successes.
    pub mean_latency_ms: u64,
    pub max_latency_ms: u64,
    pub depth: QueueDepth,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn submitted(&self) {
        self.counters.lock().submitted += 1;
    }

    pub(crate) fn deduplicated(&self) {
        self.counters.lock().deduplicated += 1;
    }

    pub(crate) fn superseded(&self, n: usize) {
        self.counters.lock().superseded += n as u64;
    }

    pub(crate) fn succeeded(&self, latency_ms: u64) {
        let mut c = self.counters.lock();
        c.succeeded += 1;
        c.latency_total_ms += latency_ms;
        c.latency_max_ms = c.latency_max_ms.max(latency_ms);
    }

    pub(crate) fn failed(&self) {
        self.counters.lock().failed += 1;
    }

    pub(crate) fn circuit_rejected(&self) {
        self.counters.lock().circuit_rejected += 1;
    }

    pub(crate) fn cancelled(&self) {
        self.counters.lock().cancelled += 1;
    }

    pub(crate) fn retried(&self) {
        self.counters.lock().retries += 1;
    }

    pub(crate) fn transport_call(&self) {
        self.counters.lock().transport_calls += 1;
    }

    pub(crate) fn auth_refreshed(&self) {
        self.counters.lock().auth_refreshes += 1;
    }

    pub fn snapshot(&self, depth: QueueDepth) -> MetricsSnapshot {
        let c = self.counters.lock().clone();
        let mean_latency_ms = c.latency_total_ms.checked_div(c.succeeded).unwrap_or(0);
        MetricsSnapshot {
            submitted: c.submitted,
            deduplicated: c.deduplicated,
            superseded: c.superseded,
            succeeded: c.succeeded,
            failed: c.failed,
            circuit_rejected: c.circuit_rejected,
            cancelled: c.cancelled,
            retries: c.retries,
            transport_calls: c.transport_calls,
            auth_refreshes: c.auth_refreshes,
            mean_latency_ms,
            max_latency_ms: c.latency_max_ms,
            depth,
        }
    }
}
