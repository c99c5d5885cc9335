//! courier-core
//!
//! Reliable request delivery to a remote settings endpoint: deduplicated,
//! priority-ordered, bounded-concurrency, retried with backoff, guarded by a
//! per-action circuit breaker, and durable across restarts.
//!
//! # Modules
//! - **domain**: ids, descriptors, outcomes, errors, lifecycle events
//! - **ports**: clock, ids, scheduler, event sink, snapshot store, auth, transport
//! - **queue**: priority queue with concurrency cap and snapshots
//! - **retry**: backoff and retry decisions
//! - **breaker**: per-action circuit breaker
//! - **dedup**: whole-payload and per-key deduplication
//! - **app**: config, builder, orchestrator, metrics, cross-instance sync
//! - **impls**: HTTP transport, snapshot stores, auth providers, simulated endpoint

pub mod app;
pub mod breaker;
pub mod dedup;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod retry;

pub use app::{DeliveryConfig, DeliveryHandle, Orchestrator, OrchestratorBuilder};
pub use domain::{Action, DeliveryError, DeliveryResult, ErrorKind, Payload, Priority, SubmitOptions};
