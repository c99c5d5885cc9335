//! Request descriptor: the immutable record of one logical request.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::RequestId;

/// Remote operation name, e.g. `save-settings`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Action(String);

impl Action {
    /// The action whose payload keys are deduplicated one by one.
    pub const SAVE_SETTINGS: &'static str = "save-settings";

    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for Action {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Action {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A single setting value. Business validation happens upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl From<bool> for SettingValue {
    fn from(v: bool) -> Self {
        SettingValue::Bool(v)
    }
}

impl From<i64> for SettingValue {
    fn from(v: i64) -> Self {
        SettingValue::Number(v.into())
    }
}

impl From<&str> for SettingValue {
    fn from(v: &str) -> Self {
        SettingValue::Text(v.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(v: String) -> Self {
        SettingValue::Text(v)
    }
}

/// Ordered key -> value mapping. `BTreeMap` keeps the canonical form
/// independent of insertion order.
pub type Payload = BTreeMap<String, SettingValue>;

/// Builds a payload from `(key, value)` pairs.
pub fn payload<K, V, I>(pairs: I) -> Payload
where
    K: Into<String>,
    V: Into<SettingValue>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Canonical text form of a payload, used for dedup keys.
pub fn canonical_payload(payload: &Payload) -> String {
    // BTreeMap serializes in key order and SettingValue has no maps inside,
    // so this cannot fail in practice; fall back to Debug just in case.
    serde_json::to_string(payload).unwrap_or_else(|_| format!("{payload:?}"))
}

/// Scheduling class of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Dequeue order: high first.
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    pub fn index(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        };
        f.write_str(s)
    }
}

/// Caller-supplied submission options.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub priority: Option<Priority>,
    pub max_attempts: Option<u32>,
}

impl SubmitOptions {
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Immutable record of one logical request.
///
/// Fields are private: once built, a descriptor is only read. A merged
/// payload produces a new descriptor, never a mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    id: RequestId,
    action: Action,
    payload: Payload,
    priority: Priority,
    created_at: DateTime<Utc>,
    max_attempts: u32,
}

impl RequestDescriptor {
    pub fn new(
        id: RequestId,
        action: Action,
        payload: Payload,
        priority: Priority,
        created_at: DateTime<Utc>,
        max_attempts: u32,
    ) -> Self {
        Self {
            id,
            action,
            payload,
            priority,
            created_at,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_save_settings(&self) -> bool {
        self.action.as_str() == Action::SAVE_SETTINGS
    }

    /// Returns a copy whose payload also carries `older` keys this
    /// descriptor does not set. Existing keys always win.
    pub fn merged_with(&self, older: &Payload) -> Self {
        let mut payload = self.payload.clone();
        for (key, value) in older {
            payload
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        Self {
            payload,
            ..self.clone()
        }
    }
}
