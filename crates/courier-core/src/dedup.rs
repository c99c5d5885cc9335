//! Request deduplication.
//!
//! Two rules:
//! - Whole-payload: same action and canonical payload within the window
//!   collapse onto the first request (or its cached outcome once settled).
//! - Per-key (`save-settings` only): a newer request that sets any key an
//!   older live request sets supersedes the older one. The older request's
//!   other keys are dropped, or carried into the newer payload with
//!   `merge_partial_overlaps`.
//!
//! Keys expire lazily against the clock; nothing here is persisted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::domain::{Action, DeliveryResult, Payload, RequestDescriptor, RequestId, canonical_payload};
use crate::ports::Clock;

#[derive(Debug, Clone, PartialEq)]
pub struct DedupConfig {
    pub window: Duration,
    pub merge_partial_overlaps: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(5000),
            merge_partial_overlaps: false,
        }
    }
}

/// Action plus canonical payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    action: Action,
    canonical: String,
}

impl DedupKey {
    pub fn of(descriptor: &RequestDescriptor) -> Self {
        Self {
            action: descriptor.action().clone(),
            canonical: canonical_payload(descriptor.payload()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DedupVerdict {
    /// Not seen; enqueue it.
    Unique,
    /// Attach to `canonical_id`. `settled` carries the outcome when that
    /// request already finished inside the window.
    Duplicate {
        canonical_id: RequestId,
        settled: Option<DeliveryResult>,
    },
    /// Enqueue it, after retiring `ids`. `carried` holds keys folded in from
    /// the retired requests (empty unless merging is on).
    Supersedes { ids: Vec<RequestId>, carried: Payload },
}

#[derive(Debug)]
struct KeyRecord {
    id: RequestId,
    expires_at: DateTime<Utc>,
    settled: Option<DeliveryResult>,
}

#[derive(Debug)]
struct LiveRequest {
    key: DedupKey,
    payload: Payload,
    save_settings: bool,
    recorded_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct DedupState {
    keys: HashMap<DedupKey, KeyRecord>,
    live: HashMap<RequestId, LiveRequest>,
}

impl DedupState {
    fn evict(&mut self, now: DateTime<Utc>) {
        self.keys.retain(|_, record| record.expires_at > now);
    }
}

pub struct Deduplicator {
    config: DedupConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<DedupState>,
}

impl Deduplicator {
    pub fn new(config: DedupConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(DedupState::default()),
        }
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    /// Classifies `descriptor` against what is currently tracked. Only
    /// evicts expired keys; `record` does the bookkeeping once the
    /// descriptor is actually admitted.
    pub fn check(&self, descriptor: &RequestDescriptor) -> DedupVerdict {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.evict(now);

        let key = DedupKey::of(descriptor);
        if let Some(record) = state.keys.get(&key) {
            return DedupVerdict::Duplicate {
                canonical_id: record.id,
                settled: record.settled.clone(),
            };
        }

        if !descriptor.is_save_settings() {
            return DedupVerdict::Unique;
        }

        let newer = descriptor.payload();
        let mut older: Vec<(&RequestId, &LiveRequest)> = state
            .live
            .iter()
            .filter(|(_, live)| live.save_settings)
            .filter(|(_, live)| live.payload.keys().any(|k| newer.contains_key(k)))
            .collect();
        if older.is_empty() {
            return DedupVerdict::Unique;
        }
        // oldest first so later values overwrite earlier ones in `carried`
        older.sort_by_key(|(id, live)| (live.recorded_at, **id));

        let mut carried = Payload::new();
        if self.config.merge_partial_overlaps {
            for (_, live) in &older {
                for (k, v) in &live.payload {
                    if !newer.contains_key(k) {
                        carried.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        let ids: Vec<RequestId> = older.into_iter().map(|(id, _)| *id).collect();
        debug!(request_id = %descriptor.id(), superseded = ids.len(), "per-key supersession");
        DedupVerdict::Supersedes { ids, carried }
    }

    /// Tracks an admitted descriptor: its key for the window, and its
    /// payload until it settles.
    pub fn record(&self, descriptor: &RequestDescriptor) {
        let now = self.clock.now();
        let window = chrono::Duration::from_std(self.config.window).unwrap_or(chrono::Duration::zero());
        let key = DedupKey::of(descriptor);
        let mut state = self.state.lock();
        state.keys.insert(
            key.clone(),
            KeyRecord {
                id: descriptor.id(),
                expires_at: now + window,
                settled: None,
            },
        );
        state.live.insert(
            descriptor.id(),
            LiveRequest {
                key,
                payload: descriptor.payload().clone(),
                save_settings: descriptor.is_save_settings(),
                recorded_at: now,
            },
        );
    }

    /// The request finished. Its outcome is served to duplicates until the
    /// key expires.
    pub fn settle(&self, id: RequestId, result: &DeliveryResult) {
        let mut state = self.state.lock();
        let Some(live) = state.live.remove(&id) else {
            return;
        };
        if let Some(record) = state.keys.get_mut(&live.key)
            && record.id == id
        {
            record.settled = Some(result.clone());
        }
    }

    /// Forgets a request that will never produce an outcome of its own
    /// (superseded or cancelled).
    pub fn release(&self, id: RequestId) {
        let mut state = self.state.lock();
        let Some(live) = state.live.remove(&id) else {
            return;
        };
        if state.keys.get(&live.key).is_some_and(|r| r.id == id) {
            state.keys.remove(&live.key);
        }
    }

    /// Re-tracks descriptors restored from a snapshot.
    pub fn rebuild<'a>(&self, descriptors: impl IntoIterator<Item = &'a RequestDescriptor>) {
        for descriptor in descriptors {
            self.record(descriptor);
        }
    }

    /// Unsettled requests currently tracked.
    pub fn live_count(&self) -> usize {
        self.state.lock().live.len()
    }
}
