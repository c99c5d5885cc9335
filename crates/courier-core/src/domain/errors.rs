//! Errors surfaced to callers of `Orchestrator::submit`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::outcome::{AttemptFailure, FailureClass};

/// Error taxonomy.
///
/// - Recovered locally (up to `max_attempts`): Network, Timeout, Server, RateLimit
/// - Recovered after one token refresh: Auth
/// - Surfaced immediately: Client, CircuitOpen, QueueFull, InvalidRequest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Timeout,
    Server,
    Client,
    RateLimit,
    Auth,
    CircuitOpen,
    QueueFull,
    DuplicateSuperseded,
    Cancelled,
    InvalidRequest,
}

impl From<FailureClass> for ErrorKind {
    fn from(class: FailureClass) -> Self {
        match class {
            FailureClass::Network => ErrorKind::Network,
            FailureClass::Timeout => ErrorKind::Timeout,
            FailureClass::Server => ErrorKind::Server,
            FailureClass::RateLimit => ErrorKind::RateLimit,
            FailureClass::Auth => ErrorKind::Auth,
            FailureClass::Client => ErrorKind::Client,
        }
    }
}

/// One failed attempt as recorded in a terminal error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub failure: AttemptFailure,
}

/// Structured rejection delivered to the caller.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message} (attempts={attempts})")]
pub struct DeliveryError {
    pub kind: ErrorKind,
    pub message: String,
    pub attempts: u32,
    pub last_error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<AttemptRecord>,
}

impl DeliveryError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            attempts: 0,
            last_error_code: None,
            history: Vec::new(),
        }
    }

    /// Terminal error built from the attempt history. The last record decides
    /// kind, message and code.
    pub fn from_history(attempts: u32, history: Vec<AttemptRecord>) -> Self {
        let (kind, message, code) = match history.last() {
            Some(last) => (
                ErrorKind::from(last.failure.class),
                last.failure.message.clone(),
                Some(last.failure.code.clone()),
            ),
            None => (ErrorKind::Network, "request failed".to_string(), None),
        };
        Self {
            kind,
            message,
            attempts,
            last_error_code: code,
            history,
        }
    }

    pub fn circuit_open(action: &str) -> Self {
        Self::new(ErrorKind::CircuitOpen, format!("circuit open for action '{action}'"))
    }

    pub fn queue_full(limit: usize) -> Self {
        Self::new(ErrorKind::QueueFull, format!("queue is full ({limit} live requests)"))
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "request cancelled")
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_history(mut self, history: Vec<AttemptRecord>) -> Self {
        if let Some(last) = history.last() {
            self.last_error_code = Some(last.failure.code.clone());
        }
        self.history = history;
        self
    }
}

/// Result delivered to every caller attached to a request.
pub type DeliveryResult = Result<serde_json::Value, DeliveryError>;
