//! Domain model (ids, descriptors, outcomes, errors, events).
//!
//! Nothing in here knows about queues, timers or transports; these are the
//! values that flow between them.

pub mod errors;
pub mod events;
pub mod ids;
pub mod outcome;
pub mod request;

pub use errors::{AttemptRecord, DeliveryError, DeliveryResult, ErrorKind};
pub use events::{EventType, LifecycleEvent};
pub use ids::{Id, IdMarker, ParseIdError, RequestId};
pub use outcome::{AttemptFailure, AttemptOutcome, AttemptSuccess, FailureClass, ResponseMeta};
pub use request::{
    Action, Payload, Priority, RequestDescriptor, SettingValue, SubmitOptions, canonical_payload,
    payload,
};
