//! Field-protocol transport layer
//!
//! Sessions talk to controllers through the [`RegisterTransport`] trait and
//! obtain connections through a [`TransportFactory`]. Production code uses the
//! Modbus TCP implementation; tests substitute scripted mocks.

pub mod modbus;

pub use modbus::{ModbusTransport, ModbusTransportFactory};

use crate::error::Result;
use crate::model::EndpointConfig;
use async_trait::async_trait;

/// One live connection to a controller.
///
/// `Send` only: transports are owned by one session behind a `Mutex`, never
/// shared by reference across tasks.
#[async_trait]
pub trait RegisterTransport: Send {
    /// Read a single holding register
    async fn read_holding_register(&mut self, address: u16) -> Result<u16>;

    /// Release the underlying connection. Close failures are ignored, the
    /// transport is unusable afterwards either way.
    async fn close(&mut self);
}

/// Creates transports for endpoint configurations
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Open a connection to the endpoint, bounded by its connect timeout
    async fn connect(&self, config: &EndpointConfig) -> Result<Box<dyn RegisterTransport>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send + ?Sized>() {}

    #[test]
    fn test_transport_objects_move_between_tasks() {
        assert_send::<Box<dyn RegisterTransport>>();
    }
}
