//! Domain data model for the edge collector
//!
//! Wire-facing types use camelCase field names to match the backend's JSON
//! contract. Runtime-only types (session state, change events, pool status)
//! live here as well so every module shares one vocabulary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Semantic purpose of a register, assigned by the backend configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegisterPurpose {
    /// Monotonic production piece counter
    ProductionCounter,
    /// Time-domain value that changes once per completed machine cycle
    CycleTime,
}

/// A single register to poll inside an endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDefinition {
    /// Backend identity of this register
    pub id: i64,
    /// Holding-register address
    pub address: u16,
    /// Human-readable name
    pub name: String,
    /// Declared data type (informational, e.g. "INT16")
    #[serde(default = "default_data_type")]
    pub data_type: String,
    /// Disabled registers are skipped by the poll pass
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Semantic tag consumed by the cycle detector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<RegisterPurpose>,
}

fn default_data_type() -> String {
    "INT16".to_string()
}

fn default_true() -> bool {
    true
}

/// Configuration of one endpoint (one physical controller), owned by the
/// backend and refreshed wholesale at the reconciliation cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfig {
    /// Reconciliation key
    pub id: i64,
    /// Human-readable name
    #[serde(default)]
    pub name: String,
    /// Controller host or IP
    pub host: String,
    /// Modbus TCP port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Modbus unit/station identifier
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    /// Transport connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Interval between poll passes in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Delay before a reconnect attempt in milliseconds
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    /// Divisor applied to the CYCLE_TIME register value for telemetry
    /// (e.g. 10.0 when the controller reports tenths of a second)
    #[serde(default = "default_time_divisor")]
    pub time_divisor: f64,
    /// Owning sector, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sector_id: Option<i64>,
    /// Registers to poll, in backend order
    #[serde(default)]
    pub registers: Vec<RegisterDefinition>,
}

fn default_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_reconnect_interval_ms() -> u64 {
    10_000
}

fn default_time_divisor() -> f64 {
    1.0
}

impl EndpointConfig {
    /// Connect timeout as a [`Duration`]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Poll interval as a [`Duration`], clamped away from zero so a bad
    /// backend value cannot produce a busy loop
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Reconnect delay as a [`Duration`]
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Registers that the poll pass actually reads
    pub fn enabled_registers(&self) -> impl Iterator<Item = &RegisterDefinition> {
        self.registers.iter().filter(|r| r.enabled)
    }

    /// Number of enabled registers (hot-swap comparison key)
    pub fn enabled_register_count(&self) -> usize {
        self.enabled_registers().count()
    }
}

/// Connection state of an endpoint session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Initial state, and the state entered on any failure or teardown
    Disconnected,
    /// Transport connect in flight
    Connecting,
    /// Connected and polling registers
    Polling,
    /// Disconnected with a reconnect timer armed
    ReconnectPending,
}

/// One register sample forwarded to the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterReading {
    /// Backend identity of the register
    pub register_id: i64,
    /// Holding-register address
    pub address: u16,
    /// Register name
    pub name: String,
    /// Sampled value (scaled by the endpoint's time divisor for CYCLE_TIME)
    pub value: f64,
    /// Sample timestamp
    pub timestamp: DateTime<Utc>,
    /// Whether the read succeeded
    pub connected: bool,
    /// Present only on failed reads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// A confirmed value transition on a register (previous value existed and
/// differs from the new one), fed to the cycle detector
#[derive(Debug, Clone)]
pub struct RegisterChange {
    /// Endpoint the register belongs to
    pub endpoint_id: i64,
    /// Register definition at the time of the read
    pub register: RegisterDefinition,
    /// Value recorded on the previous successful read
    pub previous: u16,
    /// Newly sampled raw value
    pub value: u16,
}

/// Snapshot of an active production order, cached between refreshes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductionOrderSnapshot {
    /// Order identity
    pub id: i64,
    /// Business order number
    #[serde(default)]
    pub order_number: String,
    /// Cavity count of the mounted mold (pieces per cycle)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mold_cavities: Option<u32>,
    /// Endpoint the order is running on, if linked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_id: Option<i64>,
    /// Order status as reported by the backend
    #[serde(default)]
    pub status: String,
}

/// A recorded production event, write-only towards the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductionAppointment {
    /// Target order
    pub order_id: i64,
    /// Quantity produced (raw new register value, inherited semantics)
    pub quantity: i64,
    /// Event timestamp
    pub timestamp: DateTime<Utc>,
    /// Configured mold cavity count at the time of the event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter_value: Option<i64>,
}

/// Per-session summary exposed by the pool's status operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// Endpoint identity
    pub id: i64,
    /// Endpoint name
    pub name: String,
    /// Whether the session is currently polling
    pub connected: bool,
    /// Controller host
    pub host: String,
    /// Controller port
    pub port: u16,
    /// Number of enabled registers in the running configuration
    pub enabled_registers: usize,
}

/// Aggregate pool status, read-only and non-mutating to produce
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    /// Total live sessions
    pub total: usize,
    /// Sessions currently polling
    pub connected: usize,
    /// Sessions not currently polling
    pub disconnected: usize,
    /// Per-session summaries
    pub sessions: Vec<SessionSummary>,
}

/// Parameters for a one-shot connection probe
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionProbe {
    /// Controller host or IP
    pub host: String,
    /// Modbus TCP port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Modbus unit/station identifier
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    /// Connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// Outcome of a one-shot connection probe
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTestReport {
    /// Whether the connect succeeded
    pub success: bool,
    /// Connect latency in milliseconds
    pub latency_ms: u64,
    /// Error description on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_config_defaults_from_partial_json() {
        let json = r#"{"id": 7, "host": "10.0.0.5", "registers": []}"#;
        let config: EndpointConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.port, 502);
        assert_eq!(config.unit_id, 1);
        assert_eq!(config.poll_interval_ms, 1_000);
        assert_eq!(config.time_divisor, 1.0);
        assert!(config.sector_id.is_none());
    }

    #[test]
    fn test_register_purpose_wire_format() {
        let json = r#"{"id": 1, "address": 100, "name": "cycle", "purpose": "CYCLE_TIME"}"#;
        let reg: RegisterDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(reg.purpose, Some(RegisterPurpose::CycleTime));
        assert!(reg.enabled);

        let out = serde_json::to_value(&reg).unwrap();
        assert_eq!(out["purpose"], "CYCLE_TIME");
        assert_eq!(out["dataType"], "INT16");
    }

    #[test]
    fn test_reading_wire_format_skips_absent_error() {
        let reading = RegisterReading {
            register_id: 3,
            address: 40001,
            name: "counter".to_string(),
            value: 42.0,
            timestamp: Utc::now(),
            connected: true,
            error_message: None,
        };
        let out = serde_json::to_value(&reading).unwrap();
        assert_eq!(out["registerId"], 3);
        assert!(out.get("errorMessage").is_none());
    }

    #[test]
    fn test_enabled_register_count() {
        let config = EndpointConfig {
            id: 1,
            name: "press-1".to_string(),
            host: "10.0.0.5".to_string(),
            port: 502,
            unit_id: 1,
            connect_timeout_ms: 5_000,
            poll_interval_ms: 1_000,
            reconnect_interval_ms: 10_000,
            time_divisor: 1.0,
            sector_id: None,
            registers: vec![
                RegisterDefinition {
                    id: 1,
                    address: 0,
                    name: "a".to_string(),
                    data_type: "INT16".to_string(),
                    enabled: true,
                    purpose: None,
                },
                RegisterDefinition {
                    id: 2,
                    address: 1,
                    name: "b".to_string(),
                    data_type: "INT16".to_string(),
                    enabled: false,
                    purpose: None,
                },
            ],
        };
        assert_eq!(config.enabled_register_count(), 1);
    }
}
