//! Mock implementations for testing
//!
//! Scripted transports, a recording backend gateway and a recording reading
//! sink. Available to unit tests and, with the `test-utils` feature, to
//! integration tests.

use crate::error::{EdgeError, Result};
use crate::gateway::BackendGateway;
use crate::model::{
    EndpointConfig, ProductionAppointment, ProductionOrderSnapshot, RegisterChange,
    RegisterReading,
};
use crate::production::ReadingSink;
use crate::transport::{RegisterTransport, TransportFactory};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted outcome for a register read
#[derive(Debug, Clone)]
pub enum ReadStep {
    /// Successful read returning this value
    Value(u16),
    /// Non-fatal read error (Modbus exception)
    ReadError(String),
    /// Transport-level failure, terminal for the socket
    ConnectionLost,
}

#[derive(Debug, Default)]
struct ReadScript {
    steps: VecDeque<ReadStep>,
    /// Value repeated after the scripted steps run out
    repeat: Option<u16>,
}

/// Shared read plan, cloned into every transport the factory hands out
#[derive(Debug, Default)]
pub struct ReadPlan {
    scripts: Mutex<HashMap<u16, ReadScript>>,
}

impl ReadPlan {
    fn next(&self, address: u16) -> Result<u16> {
        let mut scripts = self.scripts.lock().unwrap();
        let script = scripts.entry(address).or_default();
        match script.steps.pop_front() {
            Some(ReadStep::Value(v)) => {
                script.repeat = Some(v);
                Ok(v)
            }
            Some(ReadStep::ReadError(msg)) => Err(EdgeError::read(msg)),
            Some(ReadStep::ConnectionLost) => Err(EdgeError::connection("scripted reset")),
            None => match script.repeat {
                Some(v) => Ok(v),
                None => Err(EdgeError::read(format!("no script for address {address}"))),
            },
        }
    }
}

/// Scripted register transport
pub struct MockTransport {
    plan: Arc<ReadPlan>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl RegisterTransport for MockTransport {
    async fn read_holding_register(&mut self, address: u16) -> Result<u16> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EdgeError::connection("transport closed"));
        }
        self.plan.next(address)
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Factory producing scripted transports and counting connect attempts
#[derive(Default)]
pub struct MockTransportFactory {
    plan: Arc<ReadPlan>,
    connect_attempts: AtomicUsize,
    fail_connects: AtomicBool,
    hold_connects: AtomicBool,
}

impl MockTransportFactory {
    /// Create a factory whose transports answer from an empty plan
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the outcomes of successive reads at `address`. After the steps
    /// run out, the last successful value repeats.
    pub fn script(&self, address: u16, steps: Vec<ReadStep>) {
        let mut scripts = self.plan.scripts.lock().unwrap();
        let script = scripts.entry(address).or_default();
        script.steps.extend(steps);
    }

    /// Make every subsequent connect attempt fail
    pub fn fail_connects(&self) {
        self.fail_connects.store(true, Ordering::SeqCst);
    }

    /// Let subsequent connect attempts succeed again
    pub fn allow_connects(&self) {
        self.fail_connects.store(false, Ordering::SeqCst);
    }

    /// Make connect attempts block until [`release_connects`] is called
    ///
    /// [`release_connects`]: MockTransportFactory::release_connects
    pub fn hold_connects(&self) {
        self.hold_connects.store(true, Ordering::SeqCst);
    }

    /// Let held connect attempts proceed
    pub fn release_connects(&self) {
        self.hold_connects.store(false, Ordering::SeqCst);
    }

    /// Number of connect attempts seen so far
    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn connect(&self, config: &EndpointConfig) -> Result<Box<dyn RegisterTransport>> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        while self.hold_connects.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        if self.fail_connects.load(Ordering::SeqCst) {
            return Err(EdgeError::connection(format!(
                "connect to {}:{} refused",
                config.host, config.port
            )));
        }
        Ok(Box::new(MockTransport {
            plan: Arc::clone(&self.plan),
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }
}

/// Recording backend gateway
#[derive(Default)]
pub struct MockBackend {
    configs: Mutex<Vec<EndpointConfig>>,
    orders: Mutex<Vec<ProductionOrderSnapshot>>,
    readings: Mutex<Vec<RegisterReading>>,
    appointments: Mutex<Vec<ProductionAppointment>>,
    reject_writes: AtomicBool,
    config_fetches: AtomicUsize,
    order_fetches: AtomicUsize,
    batch_posts: AtomicUsize,
}

impl MockBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the endpoint configurations returned by fetches
    pub fn set_configs(&self, configs: Vec<EndpointConfig>) {
        *self.configs.lock().unwrap() = configs;
    }

    /// Set the active orders returned by fetches
    pub fn set_orders(&self, orders: Vec<ProductionOrderSnapshot>) {
        *self.orders.lock().unwrap() = orders;
    }

    /// Make subsequent writes fail
    pub fn reject_writes(&self) {
        self.reject_writes.store(true, Ordering::SeqCst);
    }

    /// Readings received so far
    pub fn readings(&self) -> Vec<RegisterReading> {
        self.readings.lock().unwrap().clone()
    }

    /// Appointments received so far
    pub fn appointments(&self) -> Vec<ProductionAppointment> {
        self.appointments.lock().unwrap().clone()
    }

    /// Number of config fetches served
    pub fn config_fetches(&self) -> usize {
        self.config_fetches.load(Ordering::SeqCst)
    }

    /// Number of order fetches served
    pub fn order_fetches(&self) -> usize {
        self.order_fetches.load(Ordering::SeqCst)
    }

    /// Number of batch reading posts received
    pub fn batch_posts(&self) -> usize {
        self.batch_posts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendGateway for MockBackend {
    async fn fetch_endpoint_configs(&self) -> Vec<EndpointConfig> {
        self.config_fetches.fetch_add(1, Ordering::SeqCst);
        self.configs.lock().unwrap().clone()
    }

    async fn fetch_active_orders(&self) -> Vec<ProductionOrderSnapshot> {
        self.order_fetches.fetch_add(1, Ordering::SeqCst);
        self.orders.lock().unwrap().clone()
    }

    async fn send_reading(&self, reading: &RegisterReading) -> bool {
        if self.reject_writes.load(Ordering::SeqCst) {
            return false;
        }
        self.readings.lock().unwrap().push(reading.clone());
        true
    }

    async fn send_readings_batch(&self, readings: &[RegisterReading]) -> bool {
        self.batch_posts.fetch_add(1, Ordering::SeqCst);
        if self.reject_writes.load(Ordering::SeqCst) {
            return false;
        }
        self.readings.lock().unwrap().extend_from_slice(readings);
        true
    }

    async fn send_appointment(&self, appointment: &ProductionAppointment) -> bool {
        if self.reject_writes.load(Ordering::SeqCst) {
            return false;
        }
        self.appointments.lock().unwrap().push(appointment.clone());
        true
    }

    async fn check_health(&self) -> bool {
        true
    }
}

/// Recording reading sink
#[derive(Default)]
pub struct RecordingSink {
    readings: Mutex<Vec<RegisterReading>>,
    changes: Mutex<Vec<RegisterChange>>,
}

impl RecordingSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Readings forwarded so far
    pub fn readings(&self) -> Vec<RegisterReading> {
        self.readings.lock().unwrap().clone()
    }

    /// Changes forwarded so far
    pub fn changes(&self) -> Vec<RegisterChange> {
        self.changes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReadingSink for RecordingSink {
    async fn forward_readings(&self, readings: Vec<RegisterReading>) {
        self.readings.lock().unwrap().extend(readings);
    }

    async fn register_changed(&self, change: RegisterChange) {
        self.changes.lock().unwrap().push(change);
    }
}
