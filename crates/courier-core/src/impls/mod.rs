//! Impls: concrete adapters for the ports.
//!
//! # Included
//! - **HttpTransport**: reqwest POST to the settings endpoint
//! - **JsonFileSnapshotStore** / **InMemorySnapshotStore**: queue durability
//! - **StaticAuthProvider** / **RotatingAuthProvider**: credentials
//! - **SimulatedTransport**: scripted and randomly failing endpoint for the
//!   CLI's `simulate` command and for tests

pub mod file_snapshot;
pub mod http_transport;
pub mod memory_snapshot;
pub mod simulated_transport;
pub mod static_auth;

pub use self::file_snapshot::JsonFileSnapshotStore;
pub use self::http_transport::HttpTransport;
pub use self::memory_snapshot::InMemorySnapshotStore;
pub use self::simulated_transport::{CallRecord, SimulatedTransport, Step};
pub use self::static_auth::{RotatingAuthProvider, StaticAuthProvider};
