//! Ports: the seams between the pipeline and the outside world.
//!
//! Each trait hides one external collaborator (endpoint, credential source,
//! durable storage, notification UI) or one ambient capability (time, ids,
//! timers) so the core can be driven deterministically in tests.

pub mod auth;
pub mod clock;
pub mod event_sink;
pub mod id_generator;
pub mod scheduler;
pub mod snapshot_store;
pub mod transport;

pub use self::auth::{AuthError, AuthProvider, AuthToken};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::{ChannelEventSink, EventSink, NoopEventSink, RecordingEventSink};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::scheduler::{ManualScheduler, Scheduler, TimerHandle, TimerTask, TokioScheduler};
pub use self::snapshot_store::{SnapshotStore, StoreError};
pub use self::transport::{ResponseEnvelope, Transport, WireError, WireRequest, send_with_timeout};
