//! Service configuration
//!
//! Loaded from the environment with an `EDGE_` prefix (e.g. `EDGE_BACKEND_URL`),
//! with sensible defaults for everything except the backend URL in production.

use crate::error::{EdgeError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration for the edge collector process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Base URL of the backend system of record
    pub backend_url: String,
    /// Seconds between pool reconciliations against the backend
    pub reconcile_interval_secs: u64,
    /// Seconds between wholesale refreshes of the active-order cache
    pub order_refresh_interval_secs: u64,
    /// Per-request HTTP timeout in seconds
    pub http_timeout_secs: u64,
    /// Base delay in milliseconds for the gateway's linear read backoff
    /// (attempt n waits n * base)
    pub retry_base_delay_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:3000".to_string(),
            reconcile_interval_secs: 30,
            order_refresh_interval_secs: 10,
            http_timeout_secs: 15,
            retry_base_delay_ms: 2_000,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from `EDGE_*` environment variables over defaults
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let cfg = config::Config::builder()
            .set_default("backend_url", defaults.backend_url.clone())
            .map_err(|e| EdgeError::config(e.to_string()))?
            .set_default("reconcile_interval_secs", defaults.reconcile_interval_secs as i64)
            .map_err(|e| EdgeError::config(e.to_string()))?
            .set_default(
                "order_refresh_interval_secs",
                defaults.order_refresh_interval_secs as i64,
            )
            .map_err(|e| EdgeError::config(e.to_string()))?
            .set_default("http_timeout_secs", defaults.http_timeout_secs as i64)
            .map_err(|e| EdgeError::config(e.to_string()))?
            .set_default("retry_base_delay_ms", defaults.retry_base_delay_ms as i64)
            .map_err(|e| EdgeError::config(e.to_string()))?
            .add_source(config::Environment::with_prefix("EDGE").try_parsing(true))
            .build()
            .map_err(|e| EdgeError::config(e.to_string()))?;

        cfg.try_deserialize()
            .map_err(|e| EdgeError::config(e.to_string()))
    }

    /// Reconciliation cadence as a [`Duration`]
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    /// Order-cache refresh cadence as a [`Duration`]
    pub fn order_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.order_refresh_interval_secs)
    }

    /// HTTP request timeout as a [`Duration`]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Linear backoff base as a [`Duration`]
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ServiceConfig::default();
        assert_eq!(cfg.reconcile_interval(), Duration::from_secs(30));
        assert_eq!(cfg.order_refresh_interval(), Duration::from_secs(10));
        assert_eq!(cfg.retry_base_delay(), Duration::from_millis(2_000));
    }
}
