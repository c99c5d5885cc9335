//! Simulated endpoint.
//!
//! Plays a script of steps first, then answers at random with the configured
//! failure rate. Every call is recorded with its (Tokio) timestamp, so tests
//! under paused time can assert exact retry spacing.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use serde_json::json;
use tokio::time::Instant;

use crate::domain::{Action, AttemptFailure, AttemptOutcome, AttemptSuccess, Payload, RequestId, ResponseMeta};
use crate::ports::{Transport, WireRequest};

/// One scripted response.
#[derive(Debug, Clone)]
pub enum Step {
    /// Success echoing the payload.
    Ok,
    /// Success with this body.
    Data(serde_json::Value),
    Fail(AttemptFailure),
    /// Never answers; the caller's timeout decides.
    Hang,
}

/// What the endpoint saw.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub request_id: RequestId,
    pub action: Action,
    pub payload: Payload,
    pub token: String,
    pub at: Instant,
}

#[derive(Debug)]
pub struct SimulatedTransport {
    script: Mutex<VecDeque<Step>>,
    failure_rate: f64,
    latency: Duration,
    calls: Mutex<Vec<CallRecord>>,
}

impl SimulatedTransport {
    pub fn new(failure_rate: f64, latency: Duration) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            failure_rate: failure_rate.clamp(0.0, 1.0),
            latency,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn always_ok() -> Self {
        Self::new(0.0, Duration::ZERO)
    }

    /// Plays `steps` in order, then succeeds.
    pub fn scripted(steps: impl IntoIterator<Item = Step>) -> Self {
        let transport = Self::always_ok();
        transport.script.lock().extend(steps);
        transport
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn push(&self, step: Step) {
        self.script.lock().push_back(step);
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn next_step(&self) -> Step {
        if let Some(step) = self.script.lock().pop_front() {
            return step;
        }
        if self.failure_rate > 0.0 && rand::thread_rng().gen_bool(self.failure_rate) {
            Step::Fail(AttemptFailure::http_status(503, "simulated outage"))
        } else {
            Step::Ok
        }
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn send(&self, request: &WireRequest) -> AttemptOutcome {
        let started = Instant::now();
        self.calls.lock().push(CallRecord {
            request_id: request.request_id,
            action: request.action.clone(),
            payload: request.payload.clone(),
            token: request.auth_token.expose().to_string(),
            at: started,
        });

        let step = self.next_step();
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let meta = Some(ResponseMeta {
            timestamp_ms: chrono::Utc::now().timestamp_millis().max(0) as u64,
            execution_ms: started.elapsed().as_millis() as u64,
        });

        match step {
            Step::Ok => Ok(AttemptSuccess {
                data: json!({ "saved": request.payload }),
                meta,
            }),
            Step::Data(data) => Ok(AttemptSuccess { data, meta }),
            Step::Fail(failure) => Err(failure),
            Step::Hang => std::future::pending().await,
        }
    }
}
