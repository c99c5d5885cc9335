//! Outcome model: the normalized result of one transport attempt.
//!
//! Everything the remote endpoint can say (structured success, structured
//! error, bare HTTP status, network exception, timeout) collapses into
//! `AttemptOutcome` before the retry policy or the circuit breaker see it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Classification of a failed attempt. Drives retryability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Connection refused/reset, DNS, malformed response body.
    Network,
    /// No response within the per-attempt timeout.
    Timeout,
    /// 5xx or an explicit server-side error code.
    Server,
    /// 429 or an explicit rate-limit code.
    RateLimit,
    /// Expired or invalid credential.
    Auth,
    /// Any other 4xx. Terminal.
    Client,
}

impl FailureClass {
    /// Infers the class from an HTTP status code.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => FailureClass::Auth,
            408 => FailureClass::Timeout,
            429 => FailureClass::RateLimit,
            500..=599 => FailureClass::Server,
            _ => FailureClass::Client,
        }
    }

    /// Infers the class from a structured error code sent with a 2xx body.
    pub fn from_code(code: &str) -> Self {
        let code = code.to_ascii_lowercase();
        if code.contains("rate_limit") || code.contains("too_many_requests") {
            FailureClass::RateLimit
        } else if code.contains("auth")
            || code.contains("token")
            || code.contains("nonce")
            || code.contains("unauthorized")
            || code.contains("forbidden")
        {
            FailureClass::Auth
        } else if code.contains("timeout") {
            FailureClass::Timeout
        } else if code.contains("server") || code.contains("internal") || code.contains("unavailable") {
            FailureClass::Server
        } else {
            FailureClass::Client
        }
    }

    /// Whether this failure speaks to endpoint health (feeds the breaker).
    pub fn counts_against_circuit(self) -> bool {
        matches!(
            self,
            FailureClass::Network | FailureClass::Timeout | FailureClass::Server | FailureClass::RateLimit
        )
    }
}

/// Timing metadata echoed by the endpoint on success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    pub timestamp_ms: u64,
    pub execution_ms: u64,
}

/// A successful attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptSuccess {
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

/// A failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptFailure {
    pub class: FailureClass,
    pub code: String,
    pub message: String,
    /// Server-provided delay hint (rate limiting).
    #[serde(default, skip_serializing_if = "Option::is_none", with = "opt_millis")]
    pub retry_after: Option<Duration>,
}

impl AttemptFailure {
    pub fn new(class: FailureClass, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class,
            code: code.into(),
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FailureClass::Network, "network_error", message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            FailureClass::Timeout,
            "timeout",
            format!("no response within {}ms", after.as_millis()),
        )
    }

    pub fn http_status(status: u16, message: impl Into<String>) -> Self {
        Self::new(FailureClass::from_status(status), format!("http_{status}"), message)
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

/// Normalized outcome of one transport attempt.
pub type AttemptOutcome = Result<AttemptSuccess, AttemptFailure>;

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
