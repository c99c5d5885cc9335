//! App layer: configuration, wiring and the orchestrator.
//!
//! # Components
//! - **DeliveryConfig**: serde config with defaults and validation
//! - **OrchestratorBuilder**: wiring and fail-fast startup checks
//! - **Orchestrator**: submit / cancel / drain / settle
//! - **Metrics**: read-only counters
//! - **RemoteChangeObserver**: optional cross-instance re-submission

pub mod builder;
pub mod config;
pub mod metrics;
pub mod orchestrator;
pub mod sync;

pub use self::builder::{BuildError, OrchestratorBuilder};
pub use self::config::{BreakerConfig, ConfigError, DeliveryConfig, RetryConfig};
pub use self::metrics::{Metrics, MetricsSnapshot};
pub use self::orchestrator::{DeliveryHandle, Orchestrator};
pub use self::sync::{RemoteChange, RemoteChangeObserver};
