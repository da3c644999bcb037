//! Integration Manager Library
//!
//! This library provides the orchestration core for heterogeneous external
//! service integrations (search, source control, chat, storage, crawling,
//! analytics). It layers connection pooling, session tracking, rate limiting,
//! retrying, timeout enforcement, and health monitoring uniformly over
//! pluggable capability clients, and exposes a single predictable execution
//! contract to consumers.
//!
//! # Features
//!
//! - **Service Registry**: Centralized registry of configured service instances
//! - **Lifecycle Management**: Register, update, connect, disconnect, and remove services
//! - **Execution Envelope**: Rate limiting, retries with backoff, and timeout racing
//!   around every operation
//! - **Health Monitoring**: Periodic sweeps plus on-demand health derivation from
//!   live metrics
//! - **Resource Management**: A generic keyed connection pool and TTL-bound
//!   per-type sessions
//! - **Events**: A typed broadcast channel for lifecycle and operation events
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
//! │    Consumers    │────│ ServiceManager  │────│ Service Clients │
//! │ (HTTP, CLI, …)  │    │                 │    │ (capabilities)  │
//! └─────────────────┘    └─────────────────┘    └─────────────────┘
//!                               │
//!          ┌──────────┬─────────┼──────────┬───────────┐
//!   ┌──────┴───┐ ┌────┴────┐ ┌──┴──────┐ ┌─┴───────┐ ┌─┴────────┐
//!   │RateLimit │ │  Retry  │ │  Pool   │ │Sessions │ │  Health  │
//!   └──────────┘ └─────────┘ └─────────┘ └─────────┘ └──────────┘
//! ```

use thiserror::Error;

/// Integration Manager error types
#[derive(Error, Debug)]
pub enum ManagerError {
    /// Service configuration is structurally invalid
    #[error("Invalid service config: {0}")]
    InvalidConfig(String),

    /// No client constructor is registered for the service type
    #[error("Unknown service type: {0}")]
    UnknownServiceType(String),

    /// No service is registered under the given id
    #[error("Service {0} not found")]
    ServiceNotFound(String),

    /// The service instance has no usable client
    #[error("Service client not initialized")]
    NoClient,

    /// Admission control rejected the request
    #[error("Rate limit exceeded for service {0}")]
    RateLimitExceeded(String),

    /// The operation lost the race against its deadline
    #[error("Operation timed out after {0}ms")]
    OperationTimeout(u64),

    /// The underlying client call failed
    #[error("Operation failed: {0}")]
    Operation(String),

    /// The connection pool could not produce a resource within its bound
    #[error("Connection pool exhausted for key {0}")]
    PoolExhausted(String),

    /// All retry attempts were consumed; carries the last error
    #[error("Retries exhausted after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<ManagerError>,
    },

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

impl ManagerError {
    /// Stable error code carried on operation results and wire surfaces.
    pub fn code(&self) -> &'static str {
        match self {
            ManagerError::InvalidConfig(_) => "INVALID_CONFIG",
            ManagerError::UnknownServiceType(_) => "UNKNOWN_SERVICE_TYPE",
            ManagerError::ServiceNotFound(_) => "SERVICE_NOT_FOUND",
            ManagerError::NoClient => "NO_CLIENT",
            ManagerError::RateLimitExceeded(_) => "RATE_LIMIT_EXCEEDED",
            ManagerError::OperationTimeout(_) => "OPERATION_TIMEOUT",
            ManagerError::Operation(_) => "OPERATION_FAILED",
            ManagerError::PoolExhausted(_) => "POOL_EXHAUSTED",
            ManagerError::RetryExhausted { .. } => "RETRY_EXHAUSTED",
            _ => "OPERATION_FAILED",
        }
    }

    /// Whether the failure class is transient enough to retry.
    ///
    /// Rate-limit and transport-level failures are retryable; configuration,
    /// validation, and client-reported failures are terminal and surface
    /// immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ManagerError::RateLimitExceeded(_)
                | ManagerError::OperationTimeout(_)
                | ManagerError::PoolExhausted(_)
                | ManagerError::Http(_)
                | ManagerError::Io(_)
        )
    }
}

/// Type alias for Result with ManagerError
pub type Result<T> = std::result::Result<T, ManagerError>;

// Public modules
pub mod clients;
pub mod config;
pub mod events;
pub mod health;
pub mod manager;
pub mod models;
pub mod pool;
pub mod rate_limit;
pub mod retry;
pub mod session;
pub mod telemetry;

// Re-exports for convenience
pub use clients::{ClientFactory, HttpApiClient, ServiceClient, UsageReport};
pub use config::ManagerConfig;
pub use events::EventBus;
pub use health::HealthMonitor;
pub use manager::{ExecuteOptions, ServiceManager};
pub use models::{
    HealthStatus, OperationResult, OperationStatus, PerformanceMetrics, ServiceConfig,
    ServiceConfigUpdate, ServiceEvent, ServiceHealth, ServiceType,
};
pub use pool::ConnectionPool;
pub use rate_limit::RateLimiter;
pub use retry::{RetryExecutor, RetryPolicy};
pub use session::SessionManager;
