// Source driver contract and the two built-in drivers: the generic HTTP
// gateway client and the local inventory source. Per-supplier adapters
// with bespoke protocols implement SourceDriver out of tree; selection
// is a closed factory keyed by the configured driver identifier.

use crate::model::SupplierPayload;
use crate::registry::SupplierConfig;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TripType {
    OneWay,
    RoundTrip,
}

// Canonical search request, consumed from the booking-UI collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub origin: String,
    pub destination: String,
    pub departure_date: NaiveDate,
    pub return_date: Option<NaiveDate>,
    pub adults: u32,
    pub children: u32,
    pub infants: u32,
    pub cabin: String,
    pub trip_type: TripType,
    pub currency: String,
    pub language: String,
}

#[derive(Debug, Clone)]
pub struct ConnectionProbe {
    pub success: bool,
    pub message: String,
    pub latency_ms: Option<u64>,
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Authentication rejected: {0}")]
    Auth(String),

    #[error("Upstream error: {status_code} - {message}")]
    Upstream {
        status_code: u16,
        message: String,
        is_retryable: bool,
    },

    #[error("Malformed response: {0}")]
    Protocol(String),
}

impl SourceError {
    // Transient failures are retried up to the source's budget;
    // everything else fails the source for this request.
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Network(_) | SourceError::Timeout(_) => true,
            SourceError::Upstream { is_retryable, .. } => *is_retryable,
            SourceError::Auth(_) | SourceError::Protocol(_) => false,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, SourceError::Auth(_))
    }
}

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Unknown driver identifier: {0}")]
    UnknownDriver(String),

    #[error("Driver construction failed: {0}")]
    Build(String),
}

// The interface every upstream integration implements.
#[async_trait]
pub trait SourceDriver: Send + Sync {
    async fn search(&self, request: &SearchCriteria) -> Result<SupplierPayload, SourceError>;

    async fn test_connection(&self) -> ConnectionProbe;
}

// Driver construction seam. The orchestrator builds drivers through this
// trait so tests can substitute scripted sources.
pub trait DriverFactory: Send + Sync {
    fn build(
        &self,
        config: &SupplierConfig,
        credential: Option<&str>,
    ) -> Result<Arc<dyn SourceDriver>, DriverError>;
}

pub const DRIVER_HTTP_API: &str = "http_api";
pub const DRIVER_LOCAL_INVENTORY: &str = "local_inventory";

// Closed set of driver variants, keyed by the stored identifier.
#[derive(Default)]
pub struct StandardDriverFactory;

impl StandardDriverFactory {
    pub fn new() -> Self {
        Self
    }
}

impl DriverFactory for StandardDriverFactory {
    fn build(
        &self,
        config: &SupplierConfig,
        credential: Option<&str>,
    ) -> Result<Arc<dyn SourceDriver>, DriverError> {
        match config.driver.as_str() {
            DRIVER_HTTP_API => Ok(Arc::new(HttpApiDriver::new(config, credential)?)),
            DRIVER_LOCAL_INVENTORY => Ok(Arc::new(LocalInventoryDriver::from_config(config))),
            other => Err(DriverError::UnknownDriver(other.to_string())),
        }
    }
}

// Generic HTTP gateway driver. Speaks JSON by default; XML gateways are
// recognized by response content type and handed over verbatim for the
// wire decoder to sort out.
pub struct HttpApiDriver {
    client: reqwest::Client,
    base_url: String,
    credential: Option<String>,
    timeout_ms: u64,
}

impl HttpApiDriver {
    pub fn new(config: &SupplierConfig, credential: Option<&str>) -> Result<Self, DriverError> {
        let timeout = Duration::from_secs(config.timeout_seconds.max(1));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DriverError::Build(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credential: credential.map(str::to_string),
            timeout_ms: timeout.as_millis() as u64,
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credential {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn map_transport_error(&self, err: reqwest::Error) -> SourceError {
        if err.is_timeout() {
            SourceError::Timeout(self.timeout_ms)
        } else {
            SourceError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl SourceDriver for HttpApiDriver {
    async fn search(&self, request: &SearchCriteria) -> Result<SupplierPayload, SourceError> {
        let url = format!("{}/availability", self.base_url);
        let response = self
            .authorize(self.client.post(&url).json(request))
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(SourceError::Auth(format!("upstream returned {status}")));
        }
        if !status.is_success() {
            return Err(SourceError::Upstream {
                status_code: status.as_u16(),
                message: status.canonical_reason().unwrap_or("upstream error").to_string(),
                is_retryable: status.is_server_error()
                    || status == reqwest::StatusCode::TOO_MANY_REQUESTS,
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("xml") {
            let text = response
                .text()
                .await
                .map_err(|e| SourceError::Protocol(e.to_string()))?;
            debug!(url, bytes = text.len(), "received XML availability payload");
            Ok(SupplierPayload::Xml(text))
        } else {
            let json = response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| SourceError::Protocol(e.to_string()))?;
            Ok(SupplierPayload::Json(json))
        }
    }

    async fn test_connection(&self) -> ConnectionProbe {
        let url = format!("{}/ping", self.base_url);
        let started = Instant::now();
        match self.authorize(self.client.get(&url)).send().await {
            Ok(response) if response.status().is_success() => ConnectionProbe {
                success: true,
                message: "ok".to_string(),
                latency_ms: Some(started.elapsed().as_millis() as u64),
            },
            Ok(response) => ConnectionProbe {
                success: false,
                message: format!("ping returned {}", response.status()),
                latency_ms: Some(started.elapsed().as_millis() as u64),
            },
            Err(err) => ConnectionProbe {
                success: false,
                message: err.to_string(),
                latency_ms: None,
            },
        }
    }
}

// The local inventory source: in-process fare records, served through the
// same contract as remote suppliers so the orchestrator treats them
// uniformly. Records live in the supplier's free-form settings map under
// "records", already shaped like a JSON gateway response entry.
pub struct LocalInventoryDriver {
    records: Vec<serde_json::Value>,
}

impl LocalInventoryDriver {
    pub fn new(records: Vec<serde_json::Value>) -> Self {
        Self { records }
    }

    pub fn from_config(config: &SupplierConfig) -> Self {
        let records = config
            .settings
            .get("records")
            .and_then(serde_json::Value::as_array)
            .cloned()
            .unwrap_or_default();
        Self { records }
    }

    fn matches(record: &serde_json::Value, request: &SearchCriteria) -> bool {
        let origin = record.get("origin").and_then(serde_json::Value::as_str);
        let destination = record.get("destination").and_then(serde_json::Value::as_str);
        let date = record.get("departure_date").and_then(serde_json::Value::as_str);

        origin.map_or(true, |o| o.eq_ignore_ascii_case(&request.origin))
            && destination.map_or(true, |d| d.eq_ignore_ascii_case(&request.destination))
            && date.map_or(true, |d| d == request.departure_date.to_string())
    }
}

#[async_trait]
impl SourceDriver for LocalInventoryDriver {
    async fn search(&self, request: &SearchCriteria) -> Result<SupplierPayload, SourceError> {
        let offers: Vec<serde_json::Value> = self
            .records
            .iter()
            .filter(|record| Self::matches(record, request))
            .cloned()
            .collect();
        Ok(SupplierPayload::Json(serde_json::json!({ "offers": offers })))
    }

    async fn test_connection(&self) -> ConnectionProbe {
        ConnectionProbe {
            success: true,
            message: format!("{} records loaded", self.records.len()),
            latency_ms: Some(0),
        }
    }
}
