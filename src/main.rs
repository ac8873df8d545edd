//! Edge collector - main entry point
//!
//! Wires the HTTP gateway, order cache, cycle detector and connection pool
//! together, starts the reconciliation loop and runs until interrupted.

use clap::Parser;
use plc_edge::gateway::{BackendGateway, HttpGateway};
use plc_edge::production::{
    CycleDetector, OrderCache, ProductionRecorder, ReadingSink, TelemetryRouter,
};
use plc_edge::transport::{ModbusTransportFactory, TransportFactory};
use plc_edge::{PoolManager, Result, ServiceConfig};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Industrial edge collector for plant-floor controllers
#[derive(Parser, Debug)]
#[command(name = "plc-edge")]
#[command(about = "Polls plant-floor controllers over Modbus TCP and relays telemetry and production events")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// Base URL of the backend system of record
    #[arg(long)]
    backend_url: Option<String>,

    /// Seconds between pool reconciliations
    #[arg(long)]
    reconcile_interval: Option<u64>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.debug { "plc_edge=debug,info" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let mut config = ServiceConfig::from_env()?;
    if let Some(backend_url) = args.backend_url {
        config.backend_url = backend_url;
    }
    if let Some(secs) = args.reconcile_interval {
        config.reconcile_interval_secs = secs;
    }
    info!(
        backend_url = %config.backend_url,
        reconcile_interval_secs = config.reconcile_interval_secs,
        "starting edge collector"
    );

    let gateway: Arc<dyn BackendGateway> = Arc::new(HttpGateway::new(&config)?);
    if !gateway.check_health().await {
        warn!("backend health probe failed, starting anyway");
    }

    let orders = Arc::new(OrderCache::new());
    let recorder = Arc::new(ProductionRecorder::new(
        Arc::clone(&gateway),
        Arc::clone(&orders),
    ));
    let detector = Arc::new(CycleDetector::new(Arc::clone(&orders), recorder));
    let sink: Arc<dyn ReadingSink> =
        Arc::new(TelemetryRouter::new(Arc::clone(&gateway), detector));
    let factory: Arc<dyn TransportFactory> = Arc::new(ModbusTransportFactory);

    let pool = PoolManager::new(
        Arc::clone(&gateway),
        factory,
        sink,
        config.reconcile_interval(),
    );

    orders.refresh(gateway.as_ref()).await;
    let order_refresh = orders.start_refresh_task(
        Arc::clone(&gateway),
        config.order_refresh_interval(),
    );
    pool.start().await;
    info!("edge collector running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;

    info!("shutting down");
    order_refresh.abort();
    pool.stop().await;
    Ok(())
}
