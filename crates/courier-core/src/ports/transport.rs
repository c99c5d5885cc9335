//! Transport port: one request to the remote endpoint, one normalized outcome.
//!
//! # Wire format
//! Request body: `{action, payload, authToken, requestId}`.
//! Success: `{success: true, data, meta: {timestampMs, executionMs}}`.
//! Error: `{success: false, error: {code, message, retryAfterMs?}}`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{
    Action, AttemptFailure, AttemptOutcome, AttemptSuccess, FailureClass, Payload, RequestId,
    ResponseMeta,
};
use crate::ports::auth::AuthToken;

/// Body of one call. Built fresh for every attempt so the token is current.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRequest {
    pub action: Action,
    pub payload: Payload,
    pub auth_token: AuthToken,
    pub request_id: RequestId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireError {
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub retry_after_ms: Option<u64>,
}

/// Response body, either shape.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseEnvelope {
    pub success: bool,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub meta: Option<ResponseMeta>,
    #[serde(default)]
    pub error: Option<WireError>,
}

impl ResponseEnvelope {
    /// Normalizes a decoded body. `status` is the HTTP status it came with.
    ///
    /// A non-2xx status classifies by status class even when the body carries
    /// a structured error; the body only contributes code, message and hint.
    pub fn into_outcome(self, status: u16) -> AttemptOutcome {
        let status_ok = (200..300).contains(&status);
        if status_ok && self.success {
            return Ok(AttemptSuccess {
                data: self.data,
                meta: self.meta,
            });
        }

        let (code, message, retry_after) = match self.error {
            Some(e) => (e.code, e.message, e.retry_after_ms.map(Duration::from_millis)),
            None if status_ok => (
                "unknown_error".to_string(),
                "endpoint reported failure without detail".to_string(),
                None,
            ),
            None => (format!("http_{status}"), format!("HTTP {status}"), None),
        };

        let class = if status_ok {
            FailureClass::from_code(&code)
        } else {
            FailureClass::from_status(status)
        };

        let mut failure = AttemptFailure::new(class, code, message);
        failure.retry_after = retry_after;
        Err(failure)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &WireRequest) -> AttemptOutcome;
}

/// Runs `send` under a per-attempt deadline. Expiry is a `Timeout` failure.
///
/// Dropping the returned future aborts the call.
pub async fn send_with_timeout(
    transport: &dyn Transport,
    request: &WireRequest,
    timeout: Duration,
) -> AttemptOutcome {
    match tokio::time::timeout(timeout, transport.send(request)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(AttemptFailure::timeout(timeout)),
    }
}
