//! Service Manager
//!
//! The registry of configured service instances and the sole entry point
//! consumers use. Composes the rate limiter, retry executor, connection pool,
//! session manager, event bus, and health monitor into one predictable
//! execution contract: registry-shape errors surface as `Err`, runtime
//! execution failures fold into [`OperationResult`] and never propagate.

use crate::clients::{ClientFactory, ServiceClient};
use crate::config::ManagerConfig;
use crate::events::EventBus;
use crate::health::HealthMonitor;
use crate::models::{
    ConnectionStatus, OperationResult, OperationStatus, PerformanceMetrics, ServiceConfig,
    ServiceConfigUpdate, ServiceEvent, ServiceHealth, ServiceMetrics, SystemStatus,
};
use crate::pool::ConnectionPool;
use crate::rate_limit::RateLimiter;
use crate::retry::{RetryExecutor, RetryPolicy, MODERATE};
use crate::session::SessionManager;
use crate::{ManagerError, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Error-rate percentage above which a connected service is degraded.
const DEGRADED_ERROR_RATE_PERCENT: f64 = 10.0;

/// Per-call execution options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteOptions {
    /// Overrides the service and global timeouts for this call
    pub timeout_ms: Option<u64>,
}

/// Opaque resource managed by the connection pool on behalf of services.
#[derive(Debug, Clone)]
pub(crate) struct PooledChannel {
    pub(crate) service_id: String,
}

/// One registered service: config, capability client, connection flag, and
/// monotonic metrics. Owned by the manager, never exposed.
pub(crate) struct ServiceInstance {
    pub(crate) config: RwLock<ServiceConfig>,
    pub(crate) client: Arc<dyn ServiceClient>,
    pub(crate) connected: AtomicBool,
    pub(crate) last_health_check: Mutex<DateTime<Utc>>,
    pub(crate) metrics: ServiceMetrics,
}

impl ServiceInstance {
    fn new(config: ServiceConfig, client: Arc<dyn ServiceClient>) -> Self {
        Self {
            config: RwLock::new(config),
            client,
            connected: AtomicBool::new(false),
            last_health_check: Mutex::new(DateTime::<Utc>::MIN_UTC),
            metrics: ServiceMetrics::default(),
        }
    }

    /// Derive the health record from live metrics and connection state.
    pub(crate) fn health(&self) -> ServiceHealth {
        let config = self.config.read();
        let snapshot = self.metrics.snapshot();
        let connected = self.connected.load(Ordering::Acquire);
        let error_rate = snapshot.error_rate();

        let (status, message) = if !connected {
            (
                crate::models::HealthStatus::Unhealthy,
                "Service is not connected".to_string(),
            )
        } else if error_rate > DEGRADED_ERROR_RATE_PERCENT {
            (
                crate::models::HealthStatus::Degraded,
                format!("High error rate: {error_rate:.2}%"),
            )
        } else {
            (
                crate::models::HealthStatus::Healthy,
                "Service is operational".to_string(),
            )
        };

        let uptime_percent = if config.last_test_status.as_deref() == Some("success") {
            100.0
        } else {
            0.0
        };

        ServiceHealth {
            name: config.name.clone(),
            service_type: config.service_type,
            status,
            last_check_at: Utc::now(),
            uptime_percent,
            avg_response_time_ms: snapshot.avg_response_time_ms(),
            error_rate,
            message,
        }
    }
}

/// Registry and execution envelope for external service integrations.
///
/// Explicitly constructed and passed by reference; there is no process-wide
/// singleton. Lifecycle runs `initialize` → operations → `destroy`.
pub struct ServiceManager {
    config: ManagerConfig,
    services: Arc<DashMap<String, Arc<ServiceInstance>>>,
    factory: ClientFactory,
    pool: Arc<ConnectionPool<PooledChannel>>,
    sessions: Arc<SessionManager>,
    rate_limiter: Arc<RateLimiter>,
    events: EventBus,
    initialized: AtomicBool,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ServiceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceManager")
            .field("services", &self.services.len())
            .field("initialized", &self.initialized.load(Ordering::Acquire))
            .finish()
    }
}

impl ServiceManager {
    /// Manager with the built-in client factory.
    pub fn new(config: ManagerConfig) -> Self {
        Self::with_factory(config, ClientFactory::with_defaults())
    }

    /// Manager with a caller-provided client factory (used by embedders and
    /// tests to swap in their own capability clients).
    pub fn with_factory(config: ManagerConfig, factory: ClientFactory) -> Self {
        let pool = ConnectionPool::new(config.pool.clone(), |key: &str| PooledChannel {
            service_id: key.to_string(),
        });

        Self {
            services: Arc::new(DashMap::new()),
            factory,
            pool: Arc::new(pool),
            sessions: Arc::new(SessionManager::new(config.sessions.clone())),
            rate_limiter: Arc::new(RateLimiter::new(config.rate_limit.clone())),
            events: EventBus::new(),
            initialized: AtomicBool::new(false),
            health_task: Mutex::new(None),
            config,
        }
    }

    /// Register a batch of services and start the periodic health sweep.
    /// Calling again after a successful initialization is a no-op.
    pub async fn initialize(&self, services: Vec<ServiceConfig>) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        info!(count = services.len(), "Initializing service manager");

        for config in services {
            self.register_service(config)?;
        }

        if self.config.health.enabled {
            let monitor = HealthMonitor::new(
                Arc::clone(&self.services),
                Duration::from_secs(self.config.health.check_interval_seconds),
            );
            *self.health_task.lock() = Some(monitor.spawn());
        }

        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    /// Register one service.
    ///
    /// Fails with `InvalidConfig` when the id is empty and with
    /// `UnknownServiceType` when no client constructor exists for the type.
    /// Re-registering an existing id overwrites its instance.
    pub fn register_service(&self, config: ServiceConfig) -> Result<()> {
        if config.id.trim().is_empty() {
            return Err(ManagerError::InvalidConfig(
                "service config must have an id".to_string(),
            ));
        }
        if config.name.trim().is_empty() {
            return Err(ManagerError::InvalidConfig(
                "service config must have a name".to_string(),
            ));
        }

        let client = self.factory.create(config.service_type)?;
        let id = config.id.clone();
        let service_type = config.service_type;

        self.services
            .insert(id.clone(), Arc::new(ServiceInstance::new(config, client)));

        debug!(service_id = %id, service_type = %service_type, "Service registered");
        Ok(())
    }

    /// Merge a partial config update into a registered service.
    ///
    /// When the instance is connected this cycles disconnect → connect so the
    /// new config takes effect atomically from the caller's perspective.
    pub async fn update_service(&self, service_id: &str, update: ServiceConfigUpdate) -> Result<()> {
        let instance = self.instance(service_id)?;
        let was_connected = instance.connected.load(Ordering::Acquire);

        {
            let mut config = instance.config.write();
            update.apply(&mut config);
        }

        if was_connected {
            self.disconnect(service_id).await?;
            self.connect(service_id).await?;
        }

        debug!(service_id, "Service updated");
        Ok(())
    }

    /// Remove a service, disconnecting it first if needed. Disconnection
    /// failures are logged, not propagated; removal always succeeds once the
    /// service is found.
    pub async fn remove_service(&self, service_id: &str) -> Result<()> {
        let instance = self.instance(service_id)?;

        if instance.connected.load(Ordering::Acquire) {
            if let Err(e) = self.disconnect(service_id).await {
                error!(service_id, error = %e, "Error disconnecting during removal");
            }
        }

        self.services.remove(service_id);
        debug!(service_id, "Service removed");
        Ok(())
    }

    /// Connect a service. A no-op when already connected.
    pub async fn connect(&self, service_id: &str) -> Result<()> {
        let instance = self.instance(service_id)?;

        if instance.connected.load(Ordering::Acquire) {
            return Ok(());
        }

        let config = instance.config.read().clone();
        debug!(service_id, "Connecting to service");

        instance.client.connect(&config).await?;

        // Warm one pooled channel for the id and open a logical session for
        // the type.
        let channel = self.pool.acquire(service_id).await?;
        self.pool.release(channel);
        self.sessions.create_session(config.service_type);

        instance.connected.store(true, Ordering::Release);
        *instance.last_health_check.lock() = Utc::now();

        self.events.publish(ServiceEvent::Connected {
            service_id: service_id.to_string(),
            timestamp: Utc::now(),
        });

        debug!(service_id, "Connected to service");
        Ok(())
    }

    /// Disconnect a service. A no-op when already disconnected or unknown.
    ///
    /// Tears down all sessions for the service's *type* (not just this
    /// instance) and purges this instance's pool entries. When multiple
    /// configs share a type, their sessions go too.
    pub async fn disconnect(&self, service_id: &str) -> Result<()> {
        let Some(instance) = self.services.get(service_id).map(|e| Arc::clone(e.value())) else {
            return Ok(());
        };

        if !instance.connected.load(Ordering::Acquire) {
            return Ok(());
        }

        debug!(service_id, "Disconnecting from service");

        if let Err(e) = instance.client.disconnect().await {
            // Teardown always completes; client failures are logged only.
            error!(service_id, error = %e, "Client disconnect failed");
        }

        let service_type = instance.config.read().service_type;
        self.sessions.destroy_service_sessions(service_type);
        self.pool.purge(service_id);

        instance.connected.store(false, Ordering::Release);

        self.events.publish(ServiceEvent::Disconnected {
            service_id: service_id.to_string(),
            timestamp: Utc::now(),
        });

        debug!(service_id, "Disconnected from service");
        Ok(())
    }

    /// Execute one action against a service.
    ///
    /// Never returns an error: rate limiting, retries, the timeout race, and
    /// client failures all fold into the returned [`OperationResult`]. The
    /// `execution_time_ms` on the result is wall-clock from call entry to
    /// return.
    pub async fn execute_operation(
        &self,
        service_id: &str,
        action: &str,
        input: Value,
        options: Option<ExecuteOptions>,
    ) -> OperationResult {
        let started = Instant::now();

        let Some(instance) = self.services.get(service_id).map(|e| Arc::clone(e.value())) else {
            return OperationResult::failure(
                OperationStatus::Failed,
                "SERVICE_NOT_FOUND",
                format!("Service {service_id} not found"),
                elapsed_ms(started),
            );
        };

        if !self.rate_limiter.check_limit(service_id) {
            return OperationResult::failure(
                OperationStatus::Timeout,
                "RATE_LIMIT_EXCEEDED",
                "Rate limit exceeded",
                elapsed_ms(started),
            );
        }

        instance.metrics.total_requests.fetch_add(1, Ordering::Relaxed);

        let (policy_name, timeout_ms) = {
            let config = instance.config.read();
            let timeout_ms = options
                .and_then(|o| o.timeout_ms)
                .or(config.timeout_ms)
                .unwrap_or(self.config.timeout_ms);
            (config.retry_policy.clone(), timeout_ms)
        };
        let policy = RetryPolicy::named(&policy_name)
            .or_else(|| RetryPolicy::named(&self.config.default_retry_policy))
            .unwrap_or(&MODERATE);
        let executor = RetryExecutor::new(policy);

        let attempt = || {
            let instance = Arc::clone(&instance);
            let input = input.clone();
            async move { self.perform_operation(service_id, &instance, action, input).await }
        };

        let outcome =
            tokio::time::timeout(Duration::from_millis(timeout_ms), executor.execute(attempt))
                .await;

        let execution_time_ms = elapsed_ms(started);

        match outcome {
            Ok(Ok(data)) => {
                instance.metrics.record_success(execution_time_ms);

                self.events.publish(ServiceEvent::OperationCompleted {
                    service_id: service_id.to_string(),
                    action: action.to_string(),
                    execution_time_ms,
                    timestamp: Utc::now(),
                });

                OperationResult::success(data, execution_time_ms)
            }
            Ok(Err(error)) => {
                instance.metrics.record_failure();

                self.events.publish(ServiceEvent::OperationFailed {
                    service_id: service_id.to_string(),
                    action: action.to_string(),
                    error: error.to_string(),
                    timestamp: Utc::now(),
                });

                OperationResult::failure(
                    OperationStatus::Failed,
                    "OPERATION_FAILED",
                    error.to_string(),
                    execution_time_ms,
                )
            }
            Err(_) => {
                instance.metrics.record_failure();

                let message = format!("Operation timed out after {timeout_ms}ms");
                self.events.publish(ServiceEvent::OperationFailed {
                    service_id: service_id.to_string(),
                    action: action.to_string(),
                    error: message.clone(),
                    timestamp: Utc::now(),
                });

                OperationResult::failure(
                    OperationStatus::Timeout,
                    "OPERATION_TIMEOUT",
                    message,
                    execution_time_ms,
                )
            }
        }
    }

    /// One attempt of the underlying call, connecting lazily first.
    async fn perform_operation(
        &self,
        service_id: &str,
        instance: &ServiceInstance,
        action: &str,
        input: Value,
    ) -> Result<Value> {
        if !instance.connected.load(Ordering::Acquire) {
            self.connect(service_id).await?;
        }

        instance.client.execute(action, input).await
    }

    /// Derived health record for one service.
    pub fn check_health(&self, service_id: &str) -> Result<ServiceHealth> {
        let instance = self.instance(service_id)?;
        let health = instance.health();
        *instance.last_health_check.lock() = health.last_check_at;
        Ok(health)
    }

    /// Derived health records for every registered service.
    pub fn check_all_health(&self) -> Vec<ServiceHealth> {
        self.services
            .iter()
            .map(|entry| {
                let health = entry.value().health();
                *entry.value().last_health_check.lock() = health.last_check_at;
                health
            })
            .collect()
    }

    /// Derived performance metrics, or `None` for an unknown id.
    pub fn get_performance_metrics(&self, service_id: &str) -> Option<PerformanceMetrics> {
        let instance = self.services.get(service_id)?;
        let snapshot = instance.metrics.snapshot();
        let config = instance.config.read();

        let cache_total = snapshot.cache_hits + snapshot.cache_misses;
        let cache_hit_rate = if cache_total > 0 {
            (snapshot.cache_hits as f64 / cache_total as f64) * 100.0
        } else {
            0.0
        };

        Some(PerformanceMetrics {
            service_name: config.name.clone(),
            total_requests: snapshot.total_requests,
            successful_requests: snapshot.successful_requests,
            failed_requests: snapshot.failed_requests,
            average_response_time_ms: snapshot.total_execution_time_ms as f64
                / snapshot.successful_requests.max(1) as f64,
            error_rate: snapshot.error_rate(),
            cache_hit_rate,
        })
    }

    /// Configuration of one registered service.
    pub fn get_service(&self, service_id: &str) -> Option<ServiceConfig> {
        self.services
            .get(service_id)
            .map(|entry| entry.config.read().clone())
    }

    /// Configurations of all registered services.
    pub fn get_all_services(&self) -> Vec<ServiceConfig> {
        self.services
            .iter()
            .map(|entry| entry.config.read().clone())
            .collect()
    }

    /// Number of registered services.
    pub fn get_service_count(&self) -> usize {
        self.services.len()
    }

    /// Connection status per service id.
    pub fn get_connection_status(&self) -> HashMap<String, ConnectionStatus> {
        self.services
            .iter()
            .map(|entry| {
                let status = ConnectionStatus {
                    name: entry.config.read().name.clone(),
                    connected: entry.connected.load(Ordering::Acquire),
                    last_health_check: *entry.last_health_check.lock(),
                };
                (entry.key().clone(), status)
            })
            .collect()
    }

    /// Manager-wide status snapshot.
    pub fn get_system_status(&self) -> SystemStatus {
        let connected_services = self
            .services
            .iter()
            .filter(|entry| entry.connected.load(Ordering::Acquire))
            .count();

        SystemStatus {
            initialized: self.initialized.load(Ordering::Acquire),
            total_services: self.services.len(),
            connected_services,
            pool: self.pool.status(),
            sessions: self.sessions.stats(),
            rate_limiter_enabled: true,
        }
    }

    /// Open a subscription on the event bus.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ServiceEvent> {
        self.events.subscribe()
    }

    /// Disconnect everything and drop all state. Safe to call repeatedly.
    pub async fn destroy(&self) {
        if let Some(task) = self.health_task.lock().take() {
            task.abort();
        }

        let ids: Vec<String> = self.services.iter().map(|e| e.key().clone()).collect();
        for service_id in ids {
            if let Err(e) = self.disconnect(&service_id).await {
                error!(service_id = %service_id, error = %e, "Error disconnecting during destroy");
            }
        }

        self.pool.drain();
        self.sessions.clear();
        self.rate_limiter.reset();
        self.services.clear();
        self.initialized.store(false, Ordering::Release);

        info!("Service manager destroyed");
    }

    fn instance(&self, service_id: &str) -> Result<Arc<ServiceInstance>> {
        self.services
            .get(service_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ManagerError::ServiceNotFound(service_id.to_string()))
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ServiceType;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct StubClient {
        connects: AtomicU32,
        disconnects: AtomicU32,
    }

    impl StubClient {
        fn new() -> Self {
            Self {
                connects: AtomicU32::new(0),
                disconnects: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ServiceClient for StubClient {
        async fn connect(&self, _config: &ServiceConfig) -> Result<()> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn execute(&self, action: &str, _input: Value) -> Result<Value> {
            Ok(serde_json::json!({ "action": action }))
        }
    }

    fn stub_factory() -> ClientFactory {
        let mut factory = ClientFactory::new();
        for service_type in ServiceType::ALL {
            factory.register(service_type, Arc::new(|| Arc::new(StubClient::new()) as _));
        }
        factory
    }

    fn manager() -> ServiceManager {
        ServiceManager::with_factory(ManagerConfig::default(), stub_factory())
    }

    #[tokio::test]
    async fn test_register_rejects_empty_id() {
        let manager = manager();
        let config = ServiceConfig::new("", ServiceType::Slack, "Slack");

        let result = manager.register_service(config);
        assert!(matches!(result, Err(ManagerError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_register_rejects_empty_name() {
        let manager = manager();
        let config = ServiceConfig::new("s1", ServiceType::Slack, "");

        let result = manager.register_service(config);
        assert!(matches!(result, Err(ManagerError::InvalidConfig(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_policy_falls_back_to_configured_default() {
        struct FailingClient {
            attempts: Arc<AtomicU32>,
        }

        #[async_trait]
        impl ServiceClient for FailingClient {
            async fn connect(&self, _config: &ServiceConfig) -> Result<()> {
                Ok(())
            }
            async fn disconnect(&self) -> Result<()> {
                Ok(())
            }
            async fn execute(&self, _action: &str, _input: Value) -> Result<Value> {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                Err(ManagerError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset",
                )))
            }
        }

        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let mut factory = ClientFactory::new();
        factory.register(
            ServiceType::Slack,
            Arc::new(move || {
                Arc::new(FailingClient {
                    attempts: Arc::clone(&counter),
                }) as _
            }),
        );

        let config = ManagerConfig {
            default_retry_policy: "conservative".to_string(),
            ..Default::default()
        };
        let manager = ServiceManager::with_factory(config, factory);

        let mut service = ServiceConfig::new("s1", ServiceType::Slack, "Slack");
        service.retry_policy = "frantic".to_string();
        manager.register_service(service).unwrap();

        let result = manager
            .execute_operation("s1", "ping", Value::Null, None)
            .await;

        assert!(!result.success);
        // conservative allows one retry: two attempts total, not moderate's four
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reregistration_overwrites() {
        let manager = manager();
        manager
            .register_service(ServiceConfig::new("s1", ServiceType::Slack, "Old"))
            .unwrap();
        manager
            .register_service(ServiceConfig::new("s1", ServiceType::Slack, "New"))
            .unwrap();

        assert_eq!(manager.get_service_count(), 1);
        assert_eq!(manager.get_service("s1").unwrap().name, "New");
    }

    #[tokio::test]
    async fn test_update_unknown_service_fails() {
        let manager = manager();
        let result = manager
            .update_service("nope", ServiceConfigUpdate::default())
            .await;
        assert!(matches!(result, Err(ManagerError::ServiceNotFound(_))));
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let manager = manager();
        manager
            .register_service(ServiceConfig::new("s1", ServiceType::GitHub, "GitHub"))
            .unwrap();

        let mut rx = manager.subscribe();
        manager.connect("s1").await.unwrap();
        manager.connect("s1").await.unwrap();

        assert!(matches!(
            rx.try_recv().unwrap(),
            ServiceEvent::Connected { .. }
        ));
        assert!(rx.try_recv().is_err(), "second connect must emit no event");
    }

    #[tokio::test]
    async fn test_disconnect_twice_no_duplicate_event() {
        let manager = manager();
        manager
            .register_service(ServiceConfig::new("s1", ServiceType::GitHub, "GitHub"))
            .unwrap();
        manager.connect("s1").await.unwrap();

        let mut rx = manager.subscribe();
        manager.disconnect("s1").await.unwrap();
        manager.disconnect("s1").await.unwrap();

        assert!(matches!(
            rx.try_recv().unwrap(),
            ServiceEvent::Disconnected { .. }
        ));
        assert!(rx.try_recv().is_err(), "no duplicate disconnect event");
    }

    #[tokio::test]
    async fn test_disconnect_unknown_id_is_noop() {
        let manager = manager();
        assert!(manager.disconnect("missing").await.is_ok());
    }

    #[tokio::test]
    async fn test_remove_service() {
        let manager = manager();
        manager
            .register_service(ServiceConfig::new("s1", ServiceType::Sqlite, "DB"))
            .unwrap();
        manager.connect("s1").await.unwrap();

        manager.remove_service("s1").await.unwrap();
        assert_eq!(manager.get_service_count(), 0);

        let result = manager.remove_service("s1").await;
        assert!(matches!(result, Err(ManagerError::ServiceNotFound(_))));
    }

    #[tokio::test]
    async fn test_health_unhealthy_when_disconnected() {
        let manager = manager();
        manager
            .register_service(ServiceConfig::new("s1", ServiceType::Slack, "Slack"))
            .unwrap();

        let health = manager.check_health("s1").unwrap();
        assert_eq!(health.status, crate::models::HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_performance_metrics_unknown_id_is_none() {
        let manager = manager();
        assert!(manager.get_performance_metrics("missing").is_none());
    }

    #[tokio::test]
    async fn test_destroy_twice_is_safe() {
        let manager = manager();
        manager
            .register_service(ServiceConfig::new("s1", ServiceType::Slack, "Slack"))
            .unwrap();
        manager.connect("s1").await.unwrap();

        manager.destroy().await;
        manager.destroy().await;

        assert_eq!(manager.get_service_count(), 0);
        assert!(!manager.get_system_status().initialized);
    }
}
