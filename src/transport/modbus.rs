//! Modbus TCP transport
//!
//! Wraps a `tokio-modbus` client context behind the [`RegisterTransport`]
//! trait. Transport-level failures surface as connection errors (terminal for
//! the socket); Modbus exception responses surface as read errors (non-fatal,
//! the poll pass continues).

use crate::error::{EdgeError, Result};
use crate::model::EndpointConfig;
use crate::transport::{RegisterTransport, TransportFactory};
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::time::timeout;
use tokio_modbus::client::{tcp, Client, Context, Reader};
use tokio_modbus::Slave;
use tracing::debug;

/// A live Modbus TCP connection to one controller
pub struct ModbusTransport {
    ctx: Context,
    peer: SocketAddr,
}

impl ModbusTransport {
    /// Connect to the endpoint's controller, bounded by its connect timeout
    pub async fn connect(config: &EndpointConfig) -> Result<Self> {
        let peer = resolve(&config.host, config.port).await?;
        let ctx = timeout(
            config.connect_timeout(),
            tcp::connect_slave(peer, Slave(config.unit_id)),
        )
        .await
        .map_err(|_| {
            EdgeError::timeout(format!(
                "connect to {peer} timed out after {}ms",
                config.connect_timeout_ms
            ))
        })?
        .map_err(|e| EdgeError::connection(format!("connect to {peer} failed: {e}")))?;

        debug!(endpoint_id = config.id, %peer, unit = config.unit_id, "modbus connected");
        Ok(Self { ctx, peer })
    }
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| EdgeError::connection(format!("resolve {host}:{port} failed: {e}")))?;
    addrs
        .next()
        .ok_or_else(|| EdgeError::connection(format!("no address for {host}:{port}")))
}

#[async_trait]
impl RegisterTransport for ModbusTransport {
    async fn read_holding_register(&mut self, address: u16) -> Result<u16> {
        let words = self
            .ctx
            .read_holding_registers(address, 1)
            .await
            .map_err(|e| EdgeError::connection(format!("read from {} failed: {e}", self.peer)))?
            .map_err(|e| EdgeError::read(format!("modbus exception at address {address}: {e}")))?;

        words
            .first()
            .copied()
            .ok_or_else(|| EdgeError::read(format!("empty response for address {address}")))
    }

    async fn close(&mut self) {
        let _ = self.ctx.disconnect().await;
        debug!(peer = %self.peer, "modbus transport released");
    }
}

/// Factory handing out Modbus TCP transports
#[derive(Debug, Clone, Default)]
pub struct ModbusTransportFactory;

#[async_trait]
impl TransportFactory for ModbusTransportFactory {
    async fn connect(&self, config: &EndpointConfig) -> Result<Box<dyn RegisterTransport>> {
        Ok(Box::new(ModbusTransport::connect(config).await?))
    }
}
