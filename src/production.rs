//! Cycle detection and production recording
//!
//! A register tagged `CYCLE_TIME` changes once per completed machine cycle.
//! The [`CycleDetector`] turns confirmed value transitions on such registers
//! into production appointments, attributed to an order from the
//! [`OrderCache`], and posted by the [`ProductionRecorder`].
//!
//! The [`TelemetryRouter`] is the fan-out point between a session and the rest
//! of the system: every reading goes to the backend, every confirmed change
//! goes to the detector.

use crate::gateway::BackendGateway;
use crate::model::{
    ProductionAppointment, ProductionOrderSnapshot, RegisterChange, RegisterPurpose,
    RegisterReading,
};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Consumer of session output. Implemented by [`TelemetryRouter`] in
/// production and by recording mocks in tests.
#[async_trait]
pub trait ReadingSink: Send + Sync {
    /// The forwardable readings of one poll pass (first readings, changes,
    /// heartbeats and read-failure markers), never empty
    async fn forward_readings(&self, readings: Vec<RegisterReading>);

    /// A confirmed value transition (previous value existed and differs)
    async fn register_changed(&self, change: RegisterChange);
}

/// Cache of active production orders, replaced wholesale on each refresh
#[derive(Default)]
pub struct OrderCache {
    orders: RwLock<Vec<ProductionOrderSnapshot>>,
}

impl OrderCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replace the entire cache contents
    pub async fn replace_all(&self, orders: Vec<ProductionOrderSnapshot>) {
        let mut guard = self.orders.write().await;
        *guard = orders;
    }

    /// Fetch active orders and replace the cache. An empty fetch result means
    /// "no change available" (the gateway degrades to empty on exhausted
    /// retries), so the previous contents are kept.
    pub async fn refresh(&self, gateway: &dyn BackendGateway) {
        let orders = gateway.fetch_active_orders().await;
        if orders.is_empty() {
            debug!("order refresh returned nothing, keeping previous snapshot");
            return;
        }
        debug!(count = orders.len(), "order cache refreshed");
        self.replace_all(orders).await;
    }

    /// Current cache contents
    pub async fn snapshot(&self) -> Vec<ProductionOrderSnapshot> {
        self.orders.read().await.clone()
    }

    /// Resolve the order a cycle on `endpoint_id` should be attributed to:
    /// an order linked to the endpoint if one exists, otherwise any active
    /// order (inherited fallback, can misattribute across endpoints when
    /// several orders run at once).
    pub async fn resolve_for_endpoint(
        &self,
        endpoint_id: i64,
    ) -> Option<ProductionOrderSnapshot> {
        let orders = self.orders.read().await;
        orders
            .iter()
            .find(|o| o.endpoint_id == Some(endpoint_id))
            .or_else(|| orders.first())
            .cloned()
    }

    /// Spawn the periodic wholesale refresh task
    pub fn start_refresh_task(
        self: &Arc<Self>,
        gateway: Arc<dyn BackendGateway>,
        interval: Duration,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                cache.refresh(gateway.as_ref()).await;
            }
        })
    }
}

/// Posts production appointments and keeps the order cache fresh
pub struct ProductionRecorder {
    gateway: Arc<dyn BackendGateway>,
    orders: Arc<OrderCache>,
}

impl ProductionRecorder {
    /// Create a recorder
    pub fn new(gateway: Arc<dyn BackendGateway>, orders: Arc<OrderCache>) -> Self {
        Self { gateway, orders }
    }

    /// Post one appointment. On success the order cache is refreshed
    /// immediately so subsequent events see updated produced totals. On
    /// failure the event is logged and dropped: the physical cycle is lost
    /// from the business record.
    pub async fn record(&self, appointment: ProductionAppointment) {
        let order_id = appointment.order_id;
        let quantity = appointment.quantity;
        if self.gateway.send_appointment(&appointment).await {
            info!(order_id, quantity, "production appointment recorded");
            self.orders.refresh(self.gateway.as_ref()).await;
        } else {
            warn!(order_id, quantity, "appointment post failed, cycle dropped");
        }
    }
}

/// Infers completed machine cycles from register transitions
pub struct CycleDetector {
    orders: Arc<OrderCache>,
    recorder: Arc<ProductionRecorder>,
}

impl CycleDetector {
    /// Create a detector
    pub fn new(orders: Arc<OrderCache>, recorder: Arc<ProductionRecorder>) -> Self {
        Self { orders, recorder }
    }

    /// Evaluate a confirmed register transition. Fires exactly one appointment
    /// when the register is tagged `CYCLE_TIME` and the new value is greater
    /// than zero; the caller guarantees a previous value existed and differs.
    pub async fn on_register_change(&self, change: &RegisterChange) {
        if change.register.purpose != Some(RegisterPurpose::CycleTime) {
            return;
        }
        if change.value == 0 {
            debug!(
                endpoint_id = change.endpoint_id,
                register_id = change.register.id,
                "cycle register dropped to zero, not a completion"
            );
            return;
        }

        let Some(order) = self.orders.resolve_for_endpoint(change.endpoint_id).await else {
            debug!(
                endpoint_id = change.endpoint_id,
                register_id = change.register.id,
                "completed cycle with no active order, dropping event"
            );
            return;
        };

        let appointment = ProductionAppointment {
            order_id: order.id,
            quantity: i64::from(change.value),
            timestamp: Utc::now(),
            counter_value: Some(i64::from(order.mold_cavities.unwrap_or(1))),
        };
        debug!(
            endpoint_id = change.endpoint_id,
            order_id = order.id,
            previous = change.previous,
            value = change.value,
            "cycle completed"
        );
        self.recorder.record(appointment).await;
    }
}

/// Fans session output out to the backend and the cycle detector.
///
/// Telemetry writes are spawned fire-and-forget so a slow backend never
/// blocks a poll pass. There is no backpressure: a register changing on every
/// pass produces one in-flight write per pass.
pub struct TelemetryRouter {
    gateway: Arc<dyn BackendGateway>,
    detector: Arc<CycleDetector>,
}

impl TelemetryRouter {
    /// Create a router
    pub fn new(gateway: Arc<dyn BackendGateway>, detector: Arc<CycleDetector>) -> Self {
        Self { gateway, detector }
    }
}

#[async_trait]
impl ReadingSink for TelemetryRouter {
    async fn forward_readings(&self, readings: Vec<RegisterReading>) {
        let gateway = Arc::clone(&self.gateway);
        tokio::spawn(async move {
            if let [reading] = readings.as_slice() {
                gateway.send_reading(reading).await;
            } else {
                gateway.send_readings_batch(&readings).await;
            }
        });
    }

    async fn register_changed(&self, change: RegisterChange) {
        let detector = Arc::clone(&self.detector);
        tokio::spawn(async move {
            detector.on_register_change(&change).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBackend;
    use crate::model::RegisterDefinition;

    fn cycle_register() -> RegisterDefinition {
        RegisterDefinition {
            id: 10,
            address: 40001,
            name: "cycle_time".to_string(),
            data_type: "INT16".to_string(),
            enabled: true,
            purpose: Some(RegisterPurpose::CycleTime),
        }
    }

    fn order(id: i64, endpoint_id: Option<i64>, mold_cavities: Option<u32>) -> ProductionOrderSnapshot {
        ProductionOrderSnapshot {
            id,
            order_number: format!("OP-{id}"),
            mold_cavities,
            endpoint_id,
            status: "ACTIVE".to_string(),
        }
    }

    async fn detector_with(
        backend: &Arc<MockBackend>,
        orders: Vec<ProductionOrderSnapshot>,
    ) -> (Arc<CycleDetector>, Arc<OrderCache>) {
        let cache = Arc::new(OrderCache::new());
        let gateway: Arc<dyn BackendGateway> = backend.clone();
        let recorder = Arc::new(ProductionRecorder::new(gateway, cache.clone()));
        let detector = Arc::new(CycleDetector::new(cache.clone(), recorder));
        cache.replace_all(orders).await;
        (detector, cache)
    }

    fn change(endpoint_id: i64, previous: u16, value: u16) -> RegisterChange {
        RegisterChange {
            endpoint_id,
            register: cycle_register(),
            previous,
            value,
        }
    }

    fn sample_reading(register_id: i64) -> RegisterReading {
        RegisterReading {
            register_id,
            address: 40001,
            name: "cycle_time".to_string(),
            value: 1.0,
            timestamp: Utc::now(),
            connected: true,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn test_router_batches_multi_reading_passes() {
        let backend = Arc::new(MockBackend::new());
        let (detector, _) = detector_with(&backend, vec![]).await;
        let gateway: Arc<dyn BackendGateway> = backend.clone();
        let router = TelemetryRouter::new(gateway, detector);

        router
            .forward_readings(vec![sample_reading(1), sample_reading(2)])
            .await;
        router.forward_readings(vec![sample_reading(3)]).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(backend.readings().len(), 3);
        // Two readings went out as one batch, the lone reading did not
        assert_eq!(backend.batch_posts(), 1);
    }

    #[tokio::test]
    async fn test_completed_cycle_fires_appointment() {
        let backend = Arc::new(MockBackend::new());
        let (detector, _) = detector_with(&backend, vec![order(12, Some(1), Some(4))]).await;

        detector.on_register_change(&change(1, 12, 37)).await;

        let appointments = backend.appointments();
        assert_eq!(appointments.len(), 1);
        assert_eq!(appointments[0].order_id, 12);
        assert_eq!(appointments[0].quantity, 37);
        assert_eq!(appointments[0].counter_value, Some(4));
    }

    #[tokio::test]
    async fn test_decrease_is_still_a_completion() {
        let backend = Arc::new(MockBackend::new());
        let (detector, _) = detector_with(&backend, vec![order(12, Some(1), None)]).await;

        detector.on_register_change(&change(1, 18, 5)).await;

        let appointments = backend.appointments();
        assert_eq!(appointments.len(), 1);
        assert_eq!(appointments[0].quantity, 5);
        assert_eq!(appointments[0].counter_value, Some(1));
    }

    #[tokio::test]
    async fn test_zero_value_is_not_a_completion() {
        let backend = Arc::new(MockBackend::new());
        let (detector, _) = detector_with(&backend, vec![order(12, Some(1), Some(2))]).await;

        detector.on_register_change(&change(1, 18, 0)).await;

        assert!(backend.appointments().is_empty());
    }

    #[tokio::test]
    async fn test_untagged_register_never_fires() {
        let backend = Arc::new(MockBackend::new());
        let (detector, _) = detector_with(&backend, vec![order(12, Some(1), Some(2))]).await;

        let mut change = change(1, 3, 4);
        change.register.purpose = Some(RegisterPurpose::ProductionCounter);
        detector.on_register_change(&change).await;

        assert!(backend.appointments().is_empty());
    }

    #[tokio::test]
    async fn test_fallback_to_any_active_order() {
        let backend = Arc::new(MockBackend::new());
        // Order linked to a different endpoint: fallback still attributes to it
        let (detector, _) = detector_with(&backend, vec![order(33, Some(99), Some(2))]).await;

        detector.on_register_change(&change(1, 10, 11)).await;

        let appointments = backend.appointments();
        assert_eq!(appointments.len(), 1);
        assert_eq!(appointments[0].order_id, 33);
    }

    #[tokio::test]
    async fn test_endpoint_link_wins_over_fallback() {
        let backend = Arc::new(MockBackend::new());
        let (detector, _) = detector_with(
            &backend,
            vec![order(33, Some(99), Some(2)), order(44, Some(1), Some(8))],
        )
        .await;

        detector.on_register_change(&change(1, 10, 11)).await;

        let appointments = backend.appointments();
        assert_eq!(appointments[0].order_id, 44);
        assert_eq!(appointments[0].counter_value, Some(8));
    }

    #[tokio::test]
    async fn test_no_order_drops_event() {
        let backend = Arc::new(MockBackend::new());
        let (detector, _) = detector_with(&backend, vec![]).await;

        detector.on_register_change(&change(1, 10, 11)).await;

        assert!(backend.appointments().is_empty());
    }

    #[tokio::test]
    async fn test_successful_record_refreshes_order_cache() {
        let backend = Arc::new(MockBackend::new());
        let (detector, cache) = detector_with(&backend, vec![order(12, Some(1), Some(4))]).await;
        backend.set_orders(vec![order(77, Some(1), Some(4))]);

        detector.on_register_change(&change(1, 12, 37)).await;

        let snapshot = cache.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, 77);
        assert_eq!(backend.order_fetches(), 1);
    }

    #[tokio::test]
    async fn test_failed_record_keeps_cache_and_drops_event() {
        let backend = Arc::new(MockBackend::new());
        backend.reject_writes();
        let (detector, cache) = detector_with(&backend, vec![order(12, Some(1), Some(4))]).await;

        detector.on_register_change(&change(1, 12, 37)).await;

        // No refresh happened and nothing was recorded
        assert_eq!(backend.order_fetches(), 0);
        assert!(backend.appointments().is_empty());
        assert_eq!(cache.snapshot().await[0].id, 12);
    }

    #[tokio::test]
    async fn test_empty_order_fetch_keeps_previous_snapshot() {
        let backend = Arc::new(MockBackend::new());
        let cache = Arc::new(OrderCache::new());
        cache.replace_all(vec![order(12, Some(1), Some(4))]).await;

        cache.refresh(backend.as_ref()).await;

        assert_eq!(cache.snapshot().await.len(), 1);
    }
}
