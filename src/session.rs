//! Per-endpoint session state machine
//!
//! One [`EndpointSession`] owns one physical connection to one controller and
//! runs the connect → poll → disconnect → reconnect cycle:
//!
//! ```text
//! Disconnected → Connecting → Polling
//!       ↑                        │ transport failure
//!       └── ReconnectPending ←───┘
//! ```
//!
//! `Disconnected` is both the initial state and the state entered on any
//! failure or teardown. Every failure path funnels through one disconnection
//! handler, which arms at most one reconnect timer and only while
//! `should_reconnect` holds. `disconnect()` flips that flag and marks the
//! session closed before doing any cleanup, so neither a failure event racing
//! the teardown nor a connect attempt still in flight can bring the session
//! back.

use crate::error::{EdgeError, Result};
use crate::model::{
    EndpointConfig, RegisterChange, RegisterDefinition, RegisterPurpose, RegisterReading,
    SessionState, SessionSummary,
};
use crate::production::ReadingSink;
use crate::transport::{RegisterTransport, TransportFactory};
use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Forward an unchanged register every N silent reads as a liveness signal
const HEARTBEAT_EVERY: u32 = 10;

/// Outcome of recording one successful read against the last-seen state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Observation {
    /// No prior value for this register
    First,
    /// Value differs from the previous one
    Changed { previous: u16 },
    /// Unchanged, but due for a throttled liveness forward
    Heartbeat,
    /// Unchanged, stay silent
    Silent,
}

/// Last-seen values and unchanged-read counters, per register id.
///
/// The last-seen value is updated unconditionally on every successful read,
/// before cycle completion is evaluated, so the detector always compares the
/// immediately preceding value to the new one.
#[derive(Debug, Default)]
struct ChangeTracker {
    last_values: HashMap<i64, u16>,
    unchanged_counts: HashMap<i64, u32>,
}

impl ChangeTracker {
    fn observe(&mut self, register_id: i64, value: u16) -> Observation {
        match self.last_values.insert(register_id, value) {
            None => Observation::First,
            Some(previous) if previous != value => {
                self.unchanged_counts.insert(register_id, 0);
                Observation::Changed { previous }
            }
            Some(_) => {
                let count = self.unchanged_counts.entry(register_id).or_insert(0);
                *count += 1;
                if *count % HEARTBEAT_EVERY == 0 {
                    Observation::Heartbeat
                } else {
                    Observation::Silent
                }
            }
        }
    }
}

/// A live session to one controller, owned by the pool manager
pub struct EndpointSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: RwLock<EndpointConfig>,
    state: RwLock<SessionState>,
    transport: Mutex<Option<Box<dyn RegisterTransport>>>,
    tracker: Mutex<ChangeTracker>,
    should_reconnect: AtomicBool,
    /// Set once by `disconnect()`, never cleared: the session is terminal
    closed: AtomicBool,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    factory: Arc<dyn TransportFactory>,
    sink: Arc<dyn ReadingSink>,
}

impl EndpointSession {
    /// Create a session that reconnects automatically after failures
    pub fn new(
        config: EndpointConfig,
        factory: Arc<dyn TransportFactory>,
        sink: Arc<dyn ReadingSink>,
    ) -> Self {
        Self::with_reconnect(config, factory, sink, true)
    }

    /// Create a throw-away session that never arms a reconnect timer.
    /// Used by the pool's connection probe.
    pub fn ephemeral(
        config: EndpointConfig,
        factory: Arc<dyn TransportFactory>,
        sink: Arc<dyn ReadingSink>,
    ) -> Self {
        Self::with_reconnect(config, factory, sink, false)
    }

    fn with_reconnect(
        config: EndpointConfig,
        factory: Arc<dyn TransportFactory>,
        sink: Arc<dyn ReadingSink>,
        should_reconnect: bool,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                config: RwLock::new(config),
                state: RwLock::new(SessionState::Disconnected),
                transport: Mutex::new(None),
                tracker: Mutex::new(ChangeTracker::default()),
                should_reconnect: AtomicBool::new(should_reconnect),
                closed: AtomicBool::new(false),
                poll_task: Mutex::new(None),
                reconnect_task: Mutex::new(None),
                factory,
                sink,
            }),
        }
    }

    /// Open the transport and start polling. On failure the session ends up
    /// `Disconnected` with a reconnect timer armed (unless ephemeral).
    pub async fn connect(&self) -> Result<()> {
        SessionInner::connect(&self.inner).await
    }

    /// Authoritative terminal operation: flips `should_reconnect` and marks
    /// the session closed first, so neither an in-flight disconnection handler
    /// nor a connect attempt mid-flight can resurrect it, then stops polling,
    /// clears any pending reconnect timer and releases the transport.
    pub async fn disconnect(&self) {
        self.inner.should_reconnect.store(false, Ordering::SeqCst);
        self.inner.closed.store(true, Ordering::SeqCst);
        SessionInner::teardown(&self.inner).await;
        let id = self.inner.config.read().await.id;
        debug!(endpoint_id = id, "session disconnected");
    }

    /// Replace the held configuration and force a full disconnect+reconnect
    /// cycle. Reconnection stays enabled.
    pub async fn update_config(&self, new_config: EndpointConfig) -> Result<()> {
        SessionInner::teardown(&self.inner).await;
        {
            let mut config = self.inner.config.write().await;
            info!(
                endpoint_id = config.id,
                host = %new_config.host,
                port = new_config.port,
                "hot-swapping session configuration"
            );
            *config = new_config;
        }
        SessionInner::connect(&self.inner).await
    }

    /// Current state
    pub async fn state(&self) -> SessionState {
        *self.inner.state.read().await
    }

    /// Whether the session is currently polling
    pub async fn is_connected(&self) -> bool {
        matches!(self.state().await, SessionState::Polling)
    }

    /// Snapshot of the configuration the session is currently running
    pub async fn running_config(&self) -> EndpointConfig {
        self.inner.config.read().await.clone()
    }

    /// Read-only summary for the pool's status operation
    pub async fn summary(&self) -> SessionSummary {
        let config = self.inner.config.read().await;
        SessionSummary {
            id: config.id,
            name: config.name.clone(),
            connected: matches!(*self.inner.state.read().await, SessionState::Polling),
            host: config.host.clone(),
            port: config.port,
            enabled_registers: config.enabled_register_count(),
        }
    }
}

impl SessionInner {
    async fn connect(inner: &Arc<Self>) -> Result<()> {
        if inner.closed.load(Ordering::SeqCst) {
            return Err(EdgeError::connection("session is shut down"));
        }
        {
            let state = *inner.state.read().await;
            if matches!(state, SessionState::Connecting | SessionState::Polling) {
                return Ok(());
            }
        }
        *inner.state.write().await = SessionState::Connecting;
        let config = inner.config.read().await.clone();
        debug!(
            endpoint_id = config.id,
            host = %config.host,
            port = config.port,
            "connecting"
        );

        match inner.factory.connect(&config).await {
            Ok(mut transport) => {
                if inner.closed.load(Ordering::SeqCst) {
                    // disconnect() landed while the connect was in flight
                    debug!(endpoint_id = config.id, "discarding transport, session shut down");
                    transport.close().await;
                    *inner.state.write().await = SessionState::Disconnected;
                    return Err(EdgeError::connection("session shut down during connect"));
                }
                *inner.transport.lock().await = Some(transport);
                *inner.state.write().await = SessionState::Polling;
                info!(endpoint_id = config.id, name = %config.name, "connected");
                Self::spawn_poll_loop(inner).await;
                Ok(())
            }
            Err(e) => {
                warn!(endpoint_id = config.id, error = %e, "connect failed");
                *inner.state.write().await = SessionState::Disconnected;
                Self::schedule_reconnect(inner).await;
                Err(e)
            }
        }
    }

    /// Start the poll loop. The first tick fires immediately, which performs
    /// the initial read pass required right after a successful connect.
    async fn spawn_poll_loop(inner: &Arc<Self>) {
        let loop_inner = Arc::clone(inner);
        let handle = tokio::spawn(async move {
            let period = loop_inner.config.read().await.poll_interval();
            let mut ticker = interval(period);
            // A slow pass delays the next tick instead of bursting to catch up
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !Self::poll_pass(&loop_inner).await {
                    break;
                }
            }
        });

        let mut poll_task = inner.poll_task.lock().await;
        if let Some(previous) = poll_task.replace(handle) {
            previous.abort();
        }
    }

    /// One read pass over the enabled registers. The pass's readings are
    /// forwarded as one unit at the end so a multi-register endpoint costs one
    /// backend write per pass. Returns false when the transport is gone and
    /// the loop must exit.
    async fn poll_pass(inner: &Arc<Self>) -> bool {
        let config = inner.config.read().await.clone();
        let mut outgoing = Vec::new();
        for register in config.enabled_registers() {
            let read = {
                let mut transport = inner.transport.lock().await;
                let Some(transport) = transport.as_mut() else {
                    return false;
                };
                transport.read_holding_register(register.address).await
            };

            match read {
                Ok(raw) => {
                    if let Some(reading) =
                        Self::handle_value(inner, &config, register, raw).await
                    {
                        outgoing.push(reading);
                    }
                }
                Err(e) if e.is_connection_error() => {
                    warn!(
                        endpoint_id = config.id,
                        register_id = register.id,
                        error = %e,
                        "transport failure during poll pass"
                    );
                    outgoing.push(failure_marker(register, &e.to_string()));
                    Self::flush(inner, outgoing).await;
                    Self::on_connection_lost(inner).await;
                    return false;
                }
                Err(e) => {
                    // Non-fatal: report the failed register, keep going
                    debug!(
                        endpoint_id = config.id,
                        register_id = register.id,
                        error = %e,
                        "register read failed"
                    );
                    outgoing.push(failure_marker(register, &e.to_string()));
                }
            }
        }
        Self::flush(inner, outgoing).await;
        true
    }

    async fn flush(inner: &Arc<Self>, outgoing: Vec<RegisterReading>) {
        if !outgoing.is_empty() {
            inner.sink.forward_readings(outgoing).await;
        }
    }

    /// Record the value and decide whether it is forwarded. Confirmed changes
    /// also go to the sink's change path for cycle evaluation.
    async fn handle_value(
        inner: &Arc<Self>,
        config: &EndpointConfig,
        register: &RegisterDefinition,
        raw: u16,
    ) -> Option<RegisterReading> {
        let observation = inner.tracker.lock().await.observe(register.id, raw);
        match observation {
            Observation::First | Observation::Heartbeat => Some(sample(config, register, raw)),
            Observation::Changed { previous } => {
                inner
                    .sink
                    .register_changed(RegisterChange {
                        endpoint_id: config.id,
                        register: register.clone(),
                        previous,
                        value: raw,
                    })
                    .await;
                Some(sample(config, register, raw))
            }
            Observation::Silent => None,
        }
    }

    /// Single disconnection handler: release the transport, then arm at most
    /// one reconnect timer iff reconnection is still allowed.
    async fn on_connection_lost(inner: &Arc<Self>) {
        if let Some(mut transport) = inner.transport.lock().await.take() {
            transport.close().await;
        }
        *inner.state.write().await = SessionState::Disconnected;
        Self::schedule_reconnect(inner).await;
    }

    /// Boxed return type: connect, the poll loop and the reconnect timer call
    /// each other in a cycle, so one edge needs a concrete future type for the
    /// spawned tasks to stay `Send`.
    fn schedule_reconnect(inner: &Arc<Self>) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            if !inner.should_reconnect.load(Ordering::SeqCst) {
                return;
            }
            let mut reconnect_task = inner.reconnect_task.lock().await;
            if reconnect_task.as_ref().is_some_and(|h| !h.is_finished()) {
                // One pending timer at a time guards against reconnect storms
                return;
            }
            let (id, delay) = {
                let config = inner.config.read().await;
                (config.id, config.reconnect_interval())
            };
            *inner.state.write().await = SessionState::ReconnectPending;
            let delay_ms = delay.as_millis() as u64;
            debug!(endpoint_id = id, delay_ms, "reconnect scheduled");

            let timer_inner = Arc::clone(inner);
            *reconnect_task = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if !timer_inner.should_reconnect.load(Ordering::SeqCst) {
                    return;
                }
                // Clear our own handle so a failed attempt can arm the next timer
                *timer_inner.reconnect_task.lock().await = None;
                if let Err(e) = Self::connect(&timer_inner).await {
                    debug!(endpoint_id = id, error = %e, "reconnect attempt failed");
                }
            }));
        })
    }

    /// Stop polling, cancel any pending reconnect timer and release the
    /// transport. Leaves `should_reconnect` alone: `disconnect()` clears it
    /// beforehand, `update_config()` keeps it set.
    async fn teardown(inner: &Arc<Self>) {
        if let Some(task) = inner.poll_task.lock().await.take() {
            task.abort();
        }
        if let Some(task) = inner.reconnect_task.lock().await.take() {
            task.abort();
        }
        if let Some(mut transport) = inner.transport.lock().await.take() {
            transport.close().await;
        }
        *inner.state.write().await = SessionState::Disconnected;
    }
}

/// CYCLE_TIME registers report scaled time units; everything else is raw
fn scaled_value(config: &EndpointConfig, register: &RegisterDefinition, raw: u16) -> f64 {
    if register.purpose == Some(RegisterPurpose::CycleTime) && config.time_divisor > 0.0 {
        f64::from(raw) / config.time_divisor
    } else {
        f64::from(raw)
    }
}

fn sample(config: &EndpointConfig, register: &RegisterDefinition, raw: u16) -> RegisterReading {
    RegisterReading {
        register_id: register.id,
        address: register.address,
        name: register.name.clone(),
        value: scaled_value(config, register, raw),
        timestamp: Utc::now(),
        connected: true,
        error_message: None,
    }
}

fn failure_marker(register: &RegisterDefinition, message: &str) -> RegisterReading {
    RegisterReading {
        register_id: register.id,
        address: register.address,
        name: register.name.clone(),
        value: 0.0,
        timestamp: Utc::now(),
        connected: false,
        error_message: Some(message.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockTransportFactory, ReadStep, RecordingSink};
    use std::time::Duration;

    fn register(id: i64, address: u16, purpose: Option<RegisterPurpose>) -> RegisterDefinition {
        RegisterDefinition {
            id,
            address,
            name: format!("reg-{id}"),
            data_type: "INT16".to_string(),
            enabled: true,
            purpose,
        }
    }

    fn config(id: i64, registers: Vec<RegisterDefinition>) -> EndpointConfig {
        EndpointConfig {
            id,
            name: format!("press-{id}"),
            host: "10.0.0.5".to_string(),
            port: 502,
            unit_id: 1,
            connect_timeout_ms: 100,
            poll_interval_ms: 10,
            reconnect_interval_ms: 25,
            time_divisor: 1.0,
            sector_id: None,
            registers,
        }
    }

    #[test]
    fn test_tracker_first_then_changes() {
        let mut tracker = ChangeTracker::default();
        assert_eq!(tracker.observe(1, 12), Observation::First);
        assert_eq!(tracker.observe(1, 12), Observation::Silent);
        assert_eq!(tracker.observe(1, 18), Observation::Changed { previous: 12 });
        assert_eq!(tracker.observe(1, 5), Observation::Changed { previous: 18 });
    }

    #[test]
    fn test_tracker_heartbeat_on_multiples_of_ten() {
        let mut tracker = ChangeTracker::default();
        tracker.observe(1, 7);
        for i in 1..=30u32 {
            let observation = tracker.observe(1, 7);
            if i % 10 == 0 {
                assert_eq!(observation, Observation::Heartbeat, "read {i}");
            } else {
                assert_eq!(observation, Observation::Silent, "read {i}");
            }
        }
    }

    #[test]
    fn test_tracker_change_resets_heartbeat_counter() {
        let mut tracker = ChangeTracker::default();
        tracker.observe(1, 7);
        for _ in 0..9 {
            tracker.observe(1, 7);
        }
        assert_eq!(tracker.observe(1, 8), Observation::Changed { previous: 7 });
        // Counter restarted: nine more silent reads before the next heartbeat
        for i in 1..=9u32 {
            assert_eq!(tracker.observe(1, 8), Observation::Silent, "read {i}");
        }
        assert_eq!(tracker.observe(1, 8), Observation::Heartbeat);
    }

    #[test]
    fn test_tracker_registers_are_independent() {
        let mut tracker = ChangeTracker::default();
        assert_eq!(tracker.observe(1, 7), Observation::First);
        assert_eq!(tracker.observe(2, 7), Observation::First);
        assert_eq!(tracker.observe(1, 9), Observation::Changed { previous: 7 });
        assert_eq!(tracker.observe(2, 7), Observation::Silent);
    }

    #[tokio::test]
    async fn test_connect_polls_and_forwards_first_reading() {
        let factory = Arc::new(MockTransportFactory::new());
        factory.script(100, vec![ReadStep::Value(42)]);
        let sink = Arc::new(RecordingSink::new());
        let session = EndpointSession::new(
            config(1, vec![register(10, 100, None)]),
            factory.clone(),
            sink.clone(),
        );

        session.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(session.is_connected().await);
        let readings = sink.readings();
        assert!(!readings.is_empty());
        assert_eq!(readings[0].register_id, 10);
        assert_eq!(readings[0].value, 42.0);
        assert!(readings[0].connected);
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_changes_reach_sink_and_silence_is_throttled() {
        let factory = Arc::new(MockTransportFactory::new());
        factory.script(100, vec![ReadStep::Value(12), ReadStep::Value(12), ReadStep::Value(18)]);
        let sink = Arc::new(RecordingSink::new());
        let session = EndpointSession::new(
            config(1, vec![register(10, 100, Some(RegisterPurpose::CycleTime))]),
            factory.clone(),
            sink.clone(),
        );

        session.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        session.disconnect().await;

        let changes = sink.changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].previous, 12);
        assert_eq!(changes[0].value, 18);
        assert_eq!(changes[0].endpoint_id, 1);
        // First reading and the change forwarded; unchanged reads stayed silent
        let readings = sink.readings();
        assert!(readings.len() >= 2);
        assert!(readings.len() < 4, "unchanged reads must not flood the sink");
    }

    #[tokio::test]
    async fn test_disabled_registers_are_skipped() {
        let factory = Arc::new(MockTransportFactory::new());
        factory.script(100, vec![ReadStep::Value(1)]);
        let sink = Arc::new(RecordingSink::new());
        let mut disabled = register(20, 200, None);
        disabled.enabled = false;
        let session = EndpointSession::new(
            config(1, vec![register(10, 100, None), disabled]),
            factory.clone(),
            sink.clone(),
        );

        session.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        session.disconnect().await;

        assert!(sink.readings().iter().all(|r| r.register_id == 10));
    }

    #[tokio::test]
    async fn test_read_error_forwards_marker_and_continues() {
        let factory = Arc::new(MockTransportFactory::new());
        factory.script(100, vec![ReadStep::ReadError("illegal data address".to_string())]);
        factory.script(101, vec![ReadStep::Value(7)]);
        let sink = Arc::new(RecordingSink::new());
        let session = EndpointSession::new(
            config(1, vec![register(10, 100, None), register(11, 101, None)]),
            factory.clone(),
            sink.clone(),
        );

        session.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;
        session.disconnect().await;

        let readings = sink.readings();
        let marker = readings.iter().find(|r| r.register_id == 10).unwrap();
        assert!(!marker.connected);
        assert_eq!(marker.value, 0.0);
        assert!(marker.error_message.as_deref().unwrap().contains("illegal"));
        // The pass continued past the failed register
        assert!(readings.iter().any(|r| r.register_id == 11 && r.connected));
    }

    #[tokio::test]
    async fn test_transport_loss_triggers_reconnect() {
        let factory = Arc::new(MockTransportFactory::new());
        factory.script(100, vec![ReadStep::Value(1), ReadStep::ConnectionLost, ReadStep::Value(2)]);
        let sink = Arc::new(RecordingSink::new());
        let session = EndpointSession::new(
            config(1, vec![register(10, 100, None)]),
            factory.clone(),
            sink.clone(),
        );

        session.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(factory.connect_attempts() >= 2, "expected a reconnect attempt");
        assert!(session.is_connected().await);
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_failed_connect_schedules_retries() {
        let factory = Arc::new(MockTransportFactory::new());
        factory.fail_connects();
        let sink = Arc::new(RecordingSink::new());
        let session = EndpointSession::new(
            config(1, vec![register(10, 100, None)]),
            factory.clone(),
            sink.clone(),
        );

        assert!(session.connect().await.is_err());
        assert_eq!(session.state().await, SessionState::ReconnectPending);
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(factory.connect_attempts() >= 3, "expected repeated reconnects");
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_ephemeral_session_never_reconnects() {
        let factory = Arc::new(MockTransportFactory::new());
        factory.fail_connects();
        let sink = Arc::new(RecordingSink::new());
        let session = EndpointSession::ephemeral(
            config(1, vec![register(10, 100, None)]),
            factory.clone(),
            sink.clone(),
        );

        assert!(session.connect().await.is_err());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(factory.connect_attempts(), 1);
        assert_eq!(session.state().await, SessionState::Disconnected);
    }

    #[test]
    fn test_connect_future_moves_between_threads() {
        let factory = Arc::new(MockTransportFactory::new());
        let sink = Arc::new(RecordingSink::new());
        let session = EndpointSession::new(config(1, vec![]), factory, sink);

        fn assert_send<T: Send>(_: &T) {}
        let fut = session.connect();
        assert_send(&fut);
        drop(fut);
    }

    #[tokio::test]
    async fn test_disconnect_wins_over_in_flight_connect() {
        let factory = Arc::new(MockTransportFactory::new());
        factory.script(100, vec![ReadStep::Value(1)]);
        factory.hold_connects();
        let sink = Arc::new(RecordingSink::new());
        let session = Arc::new(EndpointSession::new(
            config(1, vec![register(10, 100, None)]),
            factory.clone(),
            sink.clone(),
        ));

        let connecting = Arc::clone(&session);
        let attempt = tokio::spawn(async move { connecting.connect().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        session.disconnect().await;
        factory.release_connects();

        // The held connect resumes, finds the session closed and gives up
        let result = attempt.await.unwrap();
        assert!(result.is_err());
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(session.state().await, SessionState::Disconnected);
        assert!(sink.readings().is_empty(), "closed session must not poll");
        assert_eq!(factory.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_cancels_pending_reconnect() {
        let factory = Arc::new(MockTransportFactory::new());
        factory.fail_connects();
        let sink = Arc::new(RecordingSink::new());
        let session = EndpointSession::new(
            config(1, vec![register(10, 100, None)]),
            factory.clone(),
            sink.clone(),
        );

        assert!(session.connect().await.is_err());
        assert_eq!(session.state().await, SessionState::ReconnectPending);
        session.disconnect().await;
        tokio::time::sleep(Duration::from_millis(120)).await;

        // The armed timer was cancelled: no further connect attempts
        assert_eq!(factory.connect_attempts(), 1);
        assert_eq!(session.state().await, SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_update_config_reconnects_with_new_settings() {
        let factory = Arc::new(MockTransportFactory::new());
        factory.script(100, vec![ReadStep::Value(1)]);
        factory.script(200, vec![ReadStep::Value(2)]);
        let sink = Arc::new(RecordingSink::new());
        let session = EndpointSession::new(
            config(1, vec![register(10, 100, None)]),
            factory.clone(),
            sink.clone(),
        );

        session.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;

        let mut swapped = config(1, vec![register(20, 200, None)]);
        swapped.host = "10.0.0.6".to_string();
        session.update_config(swapped).await.unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;

        assert_eq!(factory.connect_attempts(), 2);
        assert!(session.is_connected().await);
        assert_eq!(session.running_config().await.host, "10.0.0.6");
        assert!(sink.readings().iter().any(|r| r.register_id == 20));
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_cycle_time_value_is_scaled_for_telemetry() {
        let factory = Arc::new(MockTransportFactory::new());
        factory.script(100, vec![ReadStep::Value(125)]);
        let sink = Arc::new(RecordingSink::new());
        let mut endpoint = config(1, vec![register(10, 100, Some(RegisterPurpose::CycleTime))]);
        endpoint.time_divisor = 10.0;
        let session = EndpointSession::new(endpoint, factory.clone(), sink.clone());

        session.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;
        session.disconnect().await;

        let readings = sink.readings();
        assert_eq!(readings[0].value, 12.5);
    }

    #[tokio::test]
    async fn test_summary_reflects_running_config() {
        let factory = Arc::new(MockTransportFactory::new());
        factory.script(100, vec![ReadStep::Value(1)]);
        let sink = Arc::new(RecordingSink::new());
        let session = EndpointSession::new(
            config(3, vec![register(10, 100, None)]),
            factory.clone(),
            sink.clone(),
        );

        let summary = session.summary().await;
        assert_eq!(summary.id, 3);
        assert!(!summary.connected);
        assert_eq!(summary.enabled_registers, 1);

        session.connect().await.unwrap();
        assert!(session.summary().await.connected);
        session.disconnect().await;
    }
}
