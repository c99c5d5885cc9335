//! Lifecycle events emitted for the notification collaborator.

use serde::{Deserialize, Serialize};

use super::ids::RequestId;
use super::request::Action;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    Queued,
    Retrying,
    Succeeded,
    Failed,
    CircuitOpen,
    /// Collapsed into an identical request already in the pipeline.
    Deduplicated,
    /// Replaced by a newer request for the same setting keys.
    Superseded,
    Cancelled,
}

impl EventType {
    /// Terminal events close a request's lifecycle. Each request emits
    /// exactly one of them.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EventType::Succeeded
                | EventType::Failed
                | EventType::CircuitOpen
                | EventType::Superseded
                | EventType::Cancelled
        )
    }
}

/// `{type, requestId, action, attempt, detail}` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    #[serde(rename = "type")]
    pub kind: EventType,
    pub request_id: RequestId,
    pub action: Action,
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub detail: serde_json::Value,
}

impl LifecycleEvent {
    pub fn new(kind: EventType, request_id: RequestId, action: Action, attempt: u32) -> Self {
        Self {
            kind,
            request_id,
            action,
            attempt,
            detail: serde_json::Value::Null,
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}
