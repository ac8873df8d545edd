//! HTTP implementation of the backend gateway
//!
//! Reads go through [`HttpGateway::get_list`], which retries with linear
//! backoff (2 s, 4 s, 6 s between attempts by default) and degrades to an
//! empty result set. Writes go through [`HttpGateway::post_once`], which makes
//! exactly one attempt and reports success as a boolean so the poll loop is
//! never blocked on a slow or down backend.

use crate::config::ServiceConfig;
use crate::error::{EdgeError, Result};
use crate::gateway::BackendGateway;
use crate::model::{
    EndpointConfig, ProductionAppointment, ProductionOrderSnapshot, RegisterReading,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

/// Initial attempt plus three retries
const READ_ATTEMPTS: u32 = 4;

/// HTTP gateway to the backend system of record
pub struct HttpGateway {
    http: reqwest::Client,
    base_url: Url,
    retry_base_delay: Duration,
}

impl HttpGateway {
    /// Build a gateway from service configuration
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()?;
        let base_url = Url::parse(&config.backend_url)
            .map_err(|e| EdgeError::config(format!("invalid backend URL: {e}")))?;
        Ok(Self {
            http,
            base_url,
            retry_base_delay: config.retry_base_delay(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| EdgeError::config(format!("invalid backend path {path}: {e}")))
    }

    async fn try_get<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let url = self.endpoint(path)?;
        let response = self.http.get(url).send().await?.error_for_status()?;
        Ok(response.json::<Vec<T>>().await?)
    }

    /// Retried bulk read. Exhaustion degrades to an empty list, which callers
    /// treat as "no change available".
    async fn get_list<T: DeserializeOwned>(&self, path: &str) -> Vec<T> {
        for attempt in 1..=READ_ATTEMPTS {
            match self.try_get(path).await {
                Ok(items) => {
                    debug!(path, count = items.len(), "backend read ok");
                    return items;
                }
                Err(e) => {
                    warn!(path, attempt, error = %e, "backend read failed");
                    if attempt < READ_ATTEMPTS {
                        sleep(self.retry_base_delay * attempt).await;
                    }
                }
            }
        }
        warn!(path, "backend read exhausted retries, treating as no change");
        Vec::new()
    }

    async fn try_post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        let url = self.endpoint(path)?;
        self.http
            .post(url)
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Single-attempt write. Failures are logged, never retried.
    async fn post_once<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> bool {
        match self.try_post(path, body).await {
            Ok(()) => true,
            Err(e) => {
                warn!(path, error = %e, "backend write failed, dropping payload");
                false
            }
        }
    }
}

#[async_trait]
impl BackendGateway for HttpGateway {
    async fn fetch_endpoint_configs(&self) -> Vec<EndpointConfig> {
        self.get_list("/plc-configs").await
    }

    async fn fetch_active_orders(&self) -> Vec<ProductionOrderSnapshot> {
        self.get_list("/production-orders/active").await
    }

    async fn send_reading(&self, reading: &RegisterReading) -> bool {
        self.post_once("/plc-data", reading).await
    }

    async fn send_readings_batch(&self, readings: &[RegisterReading]) -> bool {
        self.post_once("/plc-data/batch", readings).await
    }

    async fn send_appointment(&self, appointment: &ProductionAppointment) -> bool {
        self.post_once("/production-appointments", appointment).await
    }

    async fn check_health(&self) -> bool {
        match self.endpoint("/health") {
            Ok(url) => match self.http.get(url).send().await {
                Ok(response) => response.status().is_success(),
                Err(e) => {
                    debug!(error = %e, "backend health probe failed");
                    false
                }
            },
            Err(_) => false,
        }
    }
}
