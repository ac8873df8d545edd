//! Industrial edge collector
//!
//! Maintains live sessions to plant-floor controllers over Modbus TCP, samples
//! production-relevant holding registers, infers completed machine cycles from
//! register transitions and relays both raw telemetry and derived production
//! events to a central backend over HTTP.
//!
//! # Architecture
//!
//! - [`pool::PoolManager`] reconciles the set of live sessions against the
//!   backend's endpoint configuration on a timer
//! - [`session::EndpointSession`] owns one controller connection and runs the
//!   connect → poll → reconnect state machine
//! - [`production`] turns confirmed register transitions into production
//!   appointments, attributed through the active-order cache
//! - [`gateway`] wraps every backend call: retried bulk reads, fire-and-forget
//!   writes
//!
//! Connectivity is best-effort by design: a down controller reconnects on its
//! own timer, a down backend costs the telemetry of that tick and nothing
//! else, and the process never exits on a data-path failure.

// Core modules
pub mod config;
pub mod error;
pub mod gateway;
pub mod model;
pub mod pool;
pub mod production;
pub mod session;
pub mod transport;

// Test support module - available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

// Re-export main types for convenience
pub use config::ServiceConfig;
pub use error::{EdgeError, Result};
pub use gateway::{BackendGateway, HttpGateway};
pub use pool::PoolManager;
pub use session::EndpointSession;
