//! Domain Models
//!
//! Core data types shared across the integration manager: service
//! configurations, operation results, per-instance metrics, derived health
//! records, and lifecycle events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Supported integration types.
///
/// One capability client constructor exists per variant; the factory match is
/// exhaustive so adding a variant without a constructor fails to compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    OpenClaw,
    BraveSearch,
    GitHub,
    Slack,
    GoogleDrive,
    WebCrawler,
    Sqlite,
    Filesystem,
}

impl ServiceType {
    /// All supported types, in registration order.
    pub const ALL: [ServiceType; 8] = [
        ServiceType::OpenClaw,
        ServiceType::BraveSearch,
        ServiceType::GitHub,
        ServiceType::Slack,
        ServiceType::GoogleDrive,
        ServiceType::WebCrawler,
        ServiceType::Sqlite,
        ServiceType::Filesystem,
    ];

    /// Wire name of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::OpenClaw => "openclaw",
            ServiceType::BraveSearch => "brave_search",
            ServiceType::GitHub => "github",
            ServiceType::Slack => "slack",
            ServiceType::GoogleDrive => "google_drive",
            ServiceType::WebCrawler => "web_crawler",
            ServiceType::Sqlite => "sqlite",
            ServiceType::Filesystem => "filesystem",
        }
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration of one service instance.
///
/// Identity is `id`. Supplied by the consumer at registration time and merged
/// through [`ServiceConfigUpdate`] afterwards; never shared across manager
/// instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Unique service identifier
    pub id: String,

    /// Integration type
    pub service_type: ServiceType,

    /// Human-readable name
    pub name: String,

    /// Whether the service participates in execution
    pub enabled: bool,

    /// Opaque credential material, passed through to the client
    #[serde(default)]
    pub credentials: HashMap<String, String>,

    /// Service endpoint, when the client needs one
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Authentication scheme hint for the client
    #[serde(default)]
    pub auth_type: Option<String>,

    /// Relative priority among services of the same type
    #[serde(default)]
    pub priority: u32,

    /// Per-service operation timeout in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Named retry policy applied to this service's operations
    #[serde(default = "default_retry_policy")]
    pub retry_policy: String,

    /// When the service was last connectivity-tested
    #[serde(default)]
    pub last_tested_at: Option<DateTime<Utc>>,

    /// Outcome of the last connectivity test
    #[serde(default)]
    pub last_test_status: Option<String>,
}

fn default_retry_policy() -> String {
    "moderate".to_string()
}

impl ServiceConfig {
    /// Minimal config used by consumers that only know id, type, and name.
    pub fn new(id: impl Into<String>, service_type: ServiceType, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            service_type,
            name: name.into(),
            enabled: true,
            credentials: HashMap::new(),
            endpoint: None,
            auth_type: None,
            priority: 0,
            timeout_ms: None,
            retry_policy: default_retry_policy(),
            last_tested_at: None,
            last_test_status: None,
        }
    }
}

/// Partial update applied to a registered service's configuration.
///
/// Only the populated fields are merged; everything else is left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfigUpdate {
    pub name: Option<String>,
    pub enabled: Option<bool>,
    pub credentials: Option<HashMap<String, String>>,
    pub endpoint: Option<String>,
    pub auth_type: Option<String>,
    pub priority: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub retry_policy: Option<String>,
    pub last_tested_at: Option<DateTime<Utc>>,
    pub last_test_status: Option<String>,
}

impl ServiceConfigUpdate {
    /// Merge this update into an existing configuration.
    pub fn apply(self, config: &mut ServiceConfig) {
        if let Some(name) = self.name {
            config.name = name;
        }
        if let Some(enabled) = self.enabled {
            config.enabled = enabled;
        }
        if let Some(credentials) = self.credentials {
            config.credentials = credentials;
        }
        if let Some(endpoint) = self.endpoint {
            config.endpoint = Some(endpoint);
        }
        if let Some(auth_type) = self.auth_type {
            config.auth_type = Some(auth_type);
        }
        if let Some(priority) = self.priority {
            config.priority = priority;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.timeout_ms = Some(timeout_ms);
        }
        if let Some(retry_policy) = self.retry_policy {
            config.retry_policy = retry_policy;
        }
        if let Some(last_tested_at) = self.last_tested_at {
            config.last_tested_at = Some(last_tested_at);
        }
        if let Some(last_test_status) = self.last_test_status {
            config.last_test_status = Some(last_test_status);
        }
    }
}

/// Terminal status of one executed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Success,
    Failed,
    Timeout,
}

/// Structured outcome of `execute_operation`.
///
/// Always returned, never thrown: runtime execution failures are folded into
/// `success = false` so callers inspect status without error handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    /// Whether the operation completed successfully
    pub success: bool,

    /// Terminal status
    pub status: OperationStatus,

    /// Payload produced by the client on success
    #[serde(default)]
    pub data: Option<Value>,

    /// Human-readable failure description
    #[serde(default)]
    pub error: Option<String>,

    /// Stable failure code from the error taxonomy
    #[serde(default)]
    pub error_code: Option<String>,

    /// Wall-clock time from call entry to return, in milliseconds
    pub execution_time_ms: u64,

    /// When the result was produced
    pub timestamp: DateTime<Utc>,
}

impl OperationResult {
    /// Successful result carrying the client's payload.
    pub fn success(data: Value, execution_time_ms: u64) -> Self {
        Self {
            success: true,
            status: OperationStatus::Success,
            data: Some(data),
            error: None,
            error_code: None,
            execution_time_ms,
            timestamp: Utc::now(),
        }
    }

    /// Failed result with a taxonomy code.
    pub fn failure(
        status: OperationStatus,
        error_code: &str,
        error: impl Into<String>,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            success: false,
            status,
            data: None,
            error: Some(error.into()),
            error_code: Some(error_code.to_string()),
            execution_time_ms,
            timestamp: Utc::now(),
        }
    }
}

/// Monotonic per-instance counters.
///
/// Updated with single atomic increments so concurrent operations against the
/// same service never tear; reset only by instance destruction.
#[derive(Debug, Default)]
pub struct ServiceMetrics {
    pub total_requests: AtomicU64,
    pub successful_requests: AtomicU64,
    pub failed_requests: AtomicU64,
    pub total_execution_time_ms: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
}

impl ServiceMetrics {
    pub fn record_success(&self, execution_time_ms: u64) {
        self.successful_requests.fetch_add(1, Ordering::Relaxed);
        self.total_execution_time_ms
            .fetch_add(execution_time_ms, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Plain-value copy of the counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            total_execution_time_ms: self.total_execution_time_ms.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ServiceMetrics`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_execution_time_ms: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl MetricsSnapshot {
    /// Failed requests as a percentage of total requests (0 when idle).
    pub fn error_rate(&self) -> f64 {
        if self.total_requests > 0 {
            (self.failed_requests as f64 / self.total_requests as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Mean execution time over successful requests.
    pub fn avg_response_time_ms(&self) -> f64 {
        if self.successful_requests > 0 {
            self.total_execution_time_ms as f64 / self.successful_requests as f64
        } else {
            0.0
        }
    }
}

/// Derived health status of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Health record derived on demand from live metrics and connection state.
///
/// Never stored; the periodic sweep only refreshes check timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    /// Service display name
    pub name: String,

    /// Integration type
    pub service_type: ServiceType,

    /// Derived status
    pub status: HealthStatus,

    /// When this record was computed
    pub last_check_at: DateTime<Utc>,

    /// Uptime percentage from the last connectivity test
    pub uptime_percent: f64,

    /// Mean response time over successful requests
    pub avg_response_time_ms: f64,

    /// Failed requests as a percentage of total requests
    pub error_rate: f64,

    /// Human-readable status summary
    pub message: String,
}

/// Derived performance metrics for one service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub service_name: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_response_time_ms: f64,
    pub error_rate: f64,
    pub cache_hit_rate: f64,
}

/// Per-service connection status summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub name: String,
    pub connected: bool,
    pub last_health_check: DateTime<Utc>,
}

/// Manager-wide status snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    pub initialized: bool,
    pub total_services: usize,
    pub connected_services: usize,
    pub pool: crate::pool::PoolStatus,
    pub sessions: crate::session::SessionStats,
    pub rate_limiter_enabled: bool,
}

/// Lifecycle and operation events published by the manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceEvent {
    Connected {
        service_id: String,
        timestamp: DateTime<Utc>,
    },
    Disconnected {
        service_id: String,
        timestamp: DateTime<Utc>,
    },
    OperationCompleted {
        service_id: String,
        action: String,
        execution_time_ms: u64,
        timestamp: DateTime<Utc>,
    },
    OperationFailed {
        service_id: String,
        action: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl ServiceEvent {
    /// Id of the service the event concerns.
    pub fn service_id(&self) -> &str {
        match self {
            ServiceEvent::Connected { service_id, .. }
            | ServiceEvent::Disconnected { service_id, .. }
            | ServiceEvent::OperationCompleted { service_id, .. }
            | ServiceEvent::OperationFailed { service_id, .. } => service_id,
        }
    }
}
