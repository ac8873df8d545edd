//! Connection pool manager
//!
//! Owns the set of live [`EndpointSession`]s and keeps it synchronized with
//! the backend's endpoint configuration: a periodic reconciliation diffs the
//! fetched configs against the live map and applies the minimal set of
//! changes. A failed fetch leaves the pool untouched; the next tick retries.

use crate::gateway::BackendGateway;
use crate::model::{ConnectionProbe, ConnectionTestReport, EndpointConfig, PoolStatus};
use crate::production::ReadingSink;
use crate::session::EndpointSession;
use crate::transport::TransportFactory;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Manages one session per configured endpoint
pub struct PoolManager {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    sessions: RwLock<HashMap<i64, Arc<EndpointSession>>>,
    gateway: Arc<dyn BackendGateway>,
    factory: Arc<dyn TransportFactory>,
    sink: Arc<dyn ReadingSink>,
    reconcile_interval: Duration,
    reconcile_task: Mutex<Option<JoinHandle<()>>>,
}

impl PoolManager {
    /// Create a pool manager. No sessions exist until [`start`] or
    /// [`reconcile`] runs.
    ///
    /// [`start`]: PoolManager::start
    /// [`reconcile`]: PoolManager::reconcile
    pub fn new(
        gateway: Arc<dyn BackendGateway>,
        factory: Arc<dyn TransportFactory>,
        sink: Arc<dyn ReadingSink>,
        reconcile_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                sessions: RwLock::new(HashMap::new()),
                gateway,
                factory,
                sink,
                reconcile_interval,
                reconcile_task: Mutex::new(None),
            }),
        }
    }

    /// Perform an initial reconciliation, then keep reconciling on a timer
    pub async fn start(&self) {
        self.reconcile_now().await;

        let inner = Arc::clone(&self.inner);
        let pool = PoolManager { inner: Arc::clone(&self.inner) };
        let handle = tokio::spawn(async move {
            let mut ticker = interval(pool.inner.reconcile_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The immediate first tick duplicates the initial reconciliation
            ticker.tick().await;
            loop {
                ticker.tick().await;
                pool.reconcile_now().await;
            }
        });
        *inner.reconcile_task.lock().await = Some(handle);
    }

    /// Fetch the current endpoint configurations and reconcile against them.
    ///
    /// An empty fetch result means "no change available" (the gateway already
    /// exhausted its retries), so the existing pool is left running unmodified
    /// rather than torn down.
    pub async fn reconcile_now(&self) {
        let configs = self.inner.gateway.fetch_endpoint_configs().await;
        if configs.is_empty() {
            warn!("endpoint config fetch yielded nothing, leaving pool untouched");
            return;
        }
        self.reconcile(configs).await;
    }

    /// Apply the symmetric difference between the live sessions and the
    /// fetched configurations
    pub async fn reconcile(&self, configs: Vec<EndpointConfig>) {
        let desired: HashMap<i64, EndpointConfig> =
            configs.into_iter().map(|c| (c.id, c)).collect();

        let stale: Vec<i64> = {
            let sessions = self.inner.sessions.read().await;
            sessions
                .keys()
                .filter(|id| !desired.contains_key(id))
                .copied()
                .collect()
        };
        for id in stale {
            let removed = self.inner.sessions.write().await.remove(&id);
            if let Some(session) = removed {
                info!(endpoint_id = id, "endpoint no longer configured, tearing down session");
                session.disconnect().await;
            }
        }

        for (id, config) in desired {
            let existing = self.inner.sessions.read().await.get(&id).cloned();
            match existing {
                None => {
                    info!(
                        endpoint_id = id,
                        host = %config.host,
                        port = config.port,
                        "new endpoint configured, creating session"
                    );
                    let session = Arc::new(EndpointSession::new(
                        config,
                        Arc::clone(&self.inner.factory),
                        Arc::clone(&self.inner.sink),
                    ));
                    self.inner
                        .sessions
                        .write()
                        .await
                        .insert(id, Arc::clone(&session));
                    tokio::spawn(async move {
                        if let Err(e) = session.connect().await {
                            debug!(endpoint_id = id, error = %e, "initial connect failed");
                        }
                    });
                }
                Some(session) => {
                    let running = session.running_config().await;
                    if running.host != config.host
                        || running.port != config.port
                        || running.enabled_register_count() != config.enabled_register_count()
                    {
                        info!(endpoint_id = id, "endpoint configuration changed, hot-swapping");
                        tokio::spawn(async move {
                            if let Err(e) = session.update_config(config).await {
                                debug!(endpoint_id = id, error = %e, "reconnect after hot-swap failed");
                            }
                        });
                    }
                }
            }
        }
    }

    /// Cancel the reconciliation timer and disconnect every live session
    pub async fn stop(&self) {
        if let Some(task) = self.inner.reconcile_task.lock().await.take() {
            task.abort();
        }
        let sessions: Vec<Arc<EndpointSession>> =
            self.inner.sessions.write().await.drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.disconnect().await;
        }
        info!("connection pool stopped");
    }

    /// Look up a live session by endpoint id
    pub async fn get(&self, id: i64) -> Option<Arc<EndpointSession>> {
        self.inner.sessions.read().await.get(&id).cloned()
    }

    /// Read-only aggregate status of the pool
    pub async fn status(&self) -> PoolStatus {
        let sessions: Vec<Arc<EndpointSession>> =
            self.inner.sessions.read().await.values().cloned().collect();
        let mut summaries = Vec::with_capacity(sessions.len());
        for session in sessions {
            summaries.push(session.summary().await);
        }
        summaries.sort_by_key(|s| s.id);
        let connected = summaries.iter().filter(|s| s.connected).count();
        PoolStatus {
            total: summaries.len(),
            connected,
            disconnected: summaries.len() - connected,
            sessions: summaries,
        }
    }

    /// One-shot connection probe against an arbitrary controller. Runs on a
    /// throw-away session with reconnection disabled and never touches the
    /// live pool.
    pub async fn test_connection(&self, probe: ConnectionProbe) -> ConnectionTestReport {
        let config = EndpointConfig {
            id: -1,
            name: "connection-test".to_string(),
            host: probe.host,
            port: probe.port,
            unit_id: probe.unit_id,
            connect_timeout_ms: probe.connect_timeout_ms,
            poll_interval_ms: 60_000,
            reconnect_interval_ms: 0,
            time_divisor: 1.0,
            sector_id: None,
            registers: Vec::new(),
        };
        let session = EndpointSession::ephemeral(
            config,
            Arc::clone(&self.inner.factory),
            Arc::clone(&self.inner.sink),
        );

        let started = Instant::now();
        let result = session.connect().await;
        let latency_ms = started.elapsed().as_millis() as u64;
        session.disconnect().await;

        match result {
            Ok(()) => ConnectionTestReport {
                success: true,
                latency_ms,
                error: None,
            },
            Err(e) => ConnectionTestReport {
                success: false,
                latency_ms,
                error: Some(e.to_string()),
            },
        }
    }
}
