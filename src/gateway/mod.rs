//! Outbound gateway towards the backend system of record
//!
//! Every HTTP call the collector makes goes through the [`BackendGateway`]
//! trait. The trait is the seam used by the pool manager, the order cache and
//! the production recorder, and it is what the mock backend implements in
//! tests.
//!
//! The gateway applies two distinct policies:
//! - bulk idempotent reads are retried with linear backoff and degrade to an
//!   empty result set ("no change available") on exhaustion
//! - single-item writes are fire-and-forget: one attempt, a boolean outcome,
//!   failures logged and dropped

pub mod http;

pub use http::HttpGateway;

use crate::model::{
    EndpointConfig, ProductionAppointment, ProductionOrderSnapshot, RegisterReading,
};
use async_trait::async_trait;

/// Client-side view of the backend system of record
#[async_trait]
pub trait BackendGateway: Send + Sync {
    /// Fetch active endpoint configurations (retried read).
    ///
    /// An empty result means "no change available", never "nothing exists":
    /// the read policy returns empty after exhausting its retries.
    async fn fetch_endpoint_configs(&self) -> Vec<EndpointConfig>;

    /// Fetch active production orders (retried read, same empty semantics)
    async fn fetch_active_orders(&self) -> Vec<ProductionOrderSnapshot>;

    /// Post one register reading (single attempt)
    async fn send_reading(&self, reading: &RegisterReading) -> bool;

    /// Post a batch of register readings (single attempt)
    async fn send_readings_batch(&self, readings: &[RegisterReading]) -> bool;

    /// Post a production appointment (single attempt)
    async fn send_appointment(&self, appointment: &ProductionAppointment) -> bool;

    /// Opportunistic backend liveness probe
    async fn check_health(&self) -> bool;
}
