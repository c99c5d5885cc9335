//! HTTP transport over reqwest.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use tracing::debug;

use crate::domain::{AttemptFailure, AttemptOutcome, FailureClass};
use crate::ports::{ResponseEnvelope, Transport, WireRequest};

/// POSTs each request as JSON to one endpoint.
///
/// The client carries its own timeout as a backstop; the orchestrator's
/// per-attempt deadline normally fires first.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Turns a status and raw body into an outcome. Bodies that are not the
/// endpoint's envelope fall back to status classification.
pub fn classify_response(status: StatusCode, body: &str, retry_after: Option<Duration>) -> AttemptOutcome {
    let code = status.as_u16();
    let outcome = match serde_json::from_str::<ResponseEnvelope>(body) {
        Ok(envelope) => envelope.into_outcome(code),
        Err(_) if status.is_success() => Err(AttemptFailure::new(
            FailureClass::Network,
            "invalid_response",
            "response body is not a delivery envelope",
        )),
        Err(_) => {
            let message = if body.is_empty() {
                status.to_string()
            } else {
                body.chars().take(200).collect()
            };
            Err(AttemptFailure::http_status(code, message))
        }
    };
    outcome.map_err(|mut failure| {
        if failure.retry_after.is_none() {
            failure.retry_after = retry_after;
        }
        failure
    })
}

fn classify_error(err: &reqwest::Error) -> AttemptFailure {
    if err.is_timeout() {
        AttemptFailure::new(FailureClass::Timeout, "timeout", err.to_string())
    } else {
        AttemptFailure::network(err.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &WireRequest) -> AttemptOutcome {
        let response = match self.http.post(&self.endpoint).json(request).send().await {
            Ok(response) => response,
            Err(err) => {
                debug!(request_id = %request.request_id, error = %err, "transport error");
                return Err(classify_error(&err));
            }
        };

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => return Err(classify_error(&err)),
        };
        classify_response(status, &body, retry_after)
    }
}
