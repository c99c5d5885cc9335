//! Per-action circuit breaker.
//!
//! # States
//! - Closed: requests pass; outcomes fill a sliding window
//! - Open: the action is assumed broken; requests fail fast
//! - Half-Open: one probe runs, everything else for the action waits
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure ratio >= threshold with >= min_samples in the window
//! Open → Half-Open: cooldown elapsed (checked lazily on admission)
//! Half-Open → Closed: probe succeeds
//! Half-Open → Open: probe fails
//! ```
//!
//! Only the probe's outcome moves a half-open circuit. Late outcomes from
//! requests admitted before the trip are dropped in Open and Half-Open.
//!
//! The window keeps the last `window_size` outcomes, minus anything older
//! than `window_span`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::Action;
use crate::ports::Clock;

#[derive(Debug, Clone, PartialEq)]
pub struct BreakerPolicy {
    pub window_size: usize,
    pub window_span: Duration,
    pub min_samples: usize,
    pub failure_ratio: f64,
    pub cooldown: Duration,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            window_size: 20,
            window_span: Duration::from_secs(60),
            min_samples: 5,
            failure_ratio: 0.5,
            cooldown: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

/// Result of asking the breaker whether a request may run now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Closed circuit.
    Allow,
    /// Half-open; the caller holds the single probe and must report back.
    Probe,
    /// Half-open with a probe outstanding; leave the request queued.
    Hold,
    /// Open; fail fast.
    Reject,
}

impl Admission {
    pub fn may_run(self) -> bool {
        matches!(self, Admission::Allow | Admission::Probe)
    }
}

#[derive(Debug)]
struct CircuitState {
    status: CircuitStatus,
    window: VecDeque<(DateTime<Utc>, bool)>,
    opened_at: Option<DateTime<Utc>>,
    probe_in_flight: bool,
}

impl CircuitState {
    fn closed() -> Self {
        Self {
            status: CircuitStatus::Closed,
            window: VecDeque::new(),
            opened_at: None,
            probe_in_flight: false,
        }
    }

    fn prune(&mut self, now: DateTime<Utc>, policy: &BreakerPolicy) {
        let span = chrono::Duration::from_std(policy.window_span).unwrap_or(chrono::Duration::seconds(60));
        let cutoff = now - span;
        while self.window.front().is_some_and(|(at, _)| *at < cutoff) {
            self.window.pop_front();
        }
        while self.window.len() > policy.window_size {
            self.window.pop_front();
        }
    }

    fn failure_ratio(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let failures = self.window.iter().filter(|(_, ok)| !ok).count();
        failures as f64 / self.window.len() as f64
    }

    fn trip(&mut self, now: DateTime<Utc>) {
        self.status = CircuitStatus::Open;
        self.opened_at = Some(now);
        self.probe_in_flight = false;
    }

    fn close(&mut self) {
        *self = CircuitState::closed();
    }
}

/// Breakers for every action seen so far, created closed on first use.
pub struct CircuitBreaker {
    policy: BreakerPolicy,
    clock: Arc<dyn Clock>,
    circuits: Mutex<HashMap<Action, CircuitState>>,
}

impl CircuitBreaker {
    pub fn new(policy: BreakerPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            clock,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &BreakerPolicy {
        &self.policy
    }

    /// Admission decision for one request. `Probe` marks the probe as taken.
    pub fn admit(&self, action: &Action) -> Admission {
        let now = self.clock.now();
        let mut circuits = self.circuits.lock();
        let Some(circuit) = circuits.get_mut(action) else {
            return Admission::Allow;
        };

        match circuit.status {
            CircuitStatus::Closed => Admission::Allow,
            CircuitStatus::Open => {
                if self.cooled(circuit, now) {
                    circuit.status = CircuitStatus::HalfOpen;
                    circuit.probe_in_flight = true;
                    info!(%action, "circuit half-open; probing");
                    Admission::Probe
                } else {
                    Admission::Reject
                }
            }
            CircuitStatus::HalfOpen if circuit.probe_in_flight => Admission::Hold,
            CircuitStatus::HalfOpen => {
                circuit.probe_in_flight = true;
                Admission::Probe
            }
        }
    }

    /// `true` when a request for `action` may run now (takes the probe if
    /// the circuit is half-open).
    pub fn allow(&self, action: &Action) -> bool {
        self.admit(action).may_run()
    }

    /// Feeds one outcome of an ordinary request. `success` means "the
    /// endpoint is healthy", so client and auth errors are reported as
    /// successes by the caller.
    pub fn record(&self, action: &Action, success: bool) {
        let now = self.clock.now();
        let mut circuits = self.circuits.lock();
        let circuit = circuits
            .entry(action.clone())
            .or_insert_with(CircuitState::closed);

        match circuit.status {
            CircuitStatus::Closed => {
                circuit.window.push_back((now, success));
                circuit.prune(now, &self.policy);
                let samples = circuit.window.len();
                let ratio = circuit.failure_ratio();
                if samples >= self.policy.min_samples && ratio >= self.policy.failure_ratio {
                    circuit.trip(now);
                    warn!(%action, samples, ratio, "circuit opened");
                }
            }
            // late result from a request admitted before the trip
            CircuitStatus::Open | CircuitStatus::HalfOpen => {}
        }
    }

    /// Feeds the outcome of the request admitted as `Admission::Probe`.
    pub fn record_probe(&self, action: &Action, success: bool) {
        let now = self.clock.now();
        let mut circuits = self.circuits.lock();
        let Some(circuit) = circuits.get_mut(action) else {
            return;
        };
        if circuit.status != CircuitStatus::HalfOpen {
            return;
        }

        if success {
            circuit.close();
            info!(%action, "circuit closed after successful probe");
        } else {
            circuit.trip(now);
            warn!(%action, "probe failed; circuit re-opened");
        }
    }

    /// Gives the probe back without an outcome (the probe was cancelled).
    pub fn release_probe(&self, action: &Action) {
        if let Some(circuit) = self.circuits.lock().get_mut(action)
            && circuit.status == CircuitStatus::HalfOpen
        {
            circuit.probe_in_flight = false;
        }
    }

    /// Current status. An open circuit whose cooldown has elapsed reads as
    /// half-open even before the next admission moves it there.
    pub fn status(&self, action: &Action) -> CircuitStatus {
        let now = self.clock.now();
        match self.circuits.lock().get(action) {
            None => CircuitStatus::Closed,
            Some(c) if c.status == CircuitStatus::Open && self.cooled(c, now) => CircuitStatus::HalfOpen,
            Some(c) => c.status,
        }
    }

    fn cooled(&self, circuit: &CircuitState, now: DateTime<Utc>) -> bool {
        let cooldown = chrono::Duration::from_std(self.policy.cooldown).unwrap_or(chrono::Duration::seconds(10));
        circuit.opened_at.is_none_or(|at| now - at >= cooldown)
    }
}
