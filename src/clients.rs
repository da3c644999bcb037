//! Capability Clients
//!
//! The minimal interface every pluggable service integration must implement,
//! plus the factory mapping service types to constructors. The manager only
//! ever talks to integrations through [`ServiceClient`]; the business logic
//! of any individual integration lives behind that trait, outside this crate.

use crate::models::{ServiceConfig, ServiceType};
use crate::{ManagerError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Core capability every service client must provide.
///
/// `connect` and `disconnect` are idempotent; `execute` returns an error on
/// failure, which the retry executor and manager catch and classify.
#[async_trait]
pub trait ServiceClient: Send + Sync {
    /// Establish whatever state the client needs from the config.
    async fn connect(&self, config: &ServiceConfig) -> Result<()>;

    /// Tear down client state.
    async fn disconnect(&self) -> Result<()>;

    /// Perform one action with the given input.
    async fn execute(&self, action: &str, input: Value) -> Result<Value>;

    /// Optional usage-reporting capability. Clients that track usage return
    /// `Some`; everyone else inherits the default.
    fn usage(&self) -> Option<&dyn UsageReport> {
        None
    }
}

/// Optional capability for clients that can report usage figures.
pub trait UsageReport: Send + Sync {
    /// Usage summary in a client-defined shape.
    fn usage_summary(&self) -> Value;
}

/// Constructor stored in the factory for one service type.
pub type ClientConstructor = Arc<dyn Fn() -> Arc<dyn ServiceClient> + Send + Sync>;

/// Maps service types to client constructors.
///
/// `with_defaults` covers every [`ServiceType`] variant through an exhaustive
/// match, so a new variant without a constructor is a compile error rather
/// than a runtime surprise. Tests and embedders can override entries with
/// `register`.
pub struct ClientFactory {
    constructors: HashMap<ServiceType, ClientConstructor>,
}

impl std::fmt::Debug for ClientFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientFactory")
            .field("registered", &self.constructors.len())
            .finish()
    }
}

impl ClientFactory {
    /// Empty factory with no constructors.
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Factory with a built-in constructor for every supported type.
    pub fn with_defaults() -> Self {
        let mut factory = Self::new();
        for service_type in ServiceType::ALL {
            let ctor: ClientConstructor = match service_type {
                ServiceType::OpenClaw
                | ServiceType::BraveSearch
                | ServiceType::GitHub
                | ServiceType::Slack
                | ServiceType::GoogleDrive
                | ServiceType::WebCrawler
                | ServiceType::Sqlite
                | ServiceType::Filesystem => {
                    Arc::new(move || Arc::new(HttpApiClient::new(service_type)) as _)
                }
            };
            factory.constructors.insert(service_type, ctor);
        }
        factory
    }

    /// Register or replace the constructor for a type.
    pub fn register(&mut self, service_type: ServiceType, constructor: ClientConstructor) {
        self.constructors.insert(service_type, constructor);
    }

    /// Remove a type's constructor, making the type unavailable.
    pub fn deregister(&mut self, service_type: ServiceType) {
        self.constructors.remove(&service_type);
    }

    /// Build a client for the type.
    pub fn create(&self, service_type: ServiceType) -> Result<Arc<dyn ServiceClient>> {
        let constructor = self
            .constructors
            .get(&service_type)
            .ok_or_else(|| ManagerError::UnknownServiceType(service_type.to_string()))?;
        Ok(constructor())
    }
}

impl Default for ClientFactory {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Default transport shim used for every built-in service type.
///
/// POSTs `{action, input}` to the configured endpoint. Integration-specific
/// request shaping belongs in dedicated clients registered by the embedder.
pub struct HttpApiClient {
    service_type: ServiceType,
    http: reqwest::Client,
    endpoint: RwLock<Option<String>>,
    timeout: RwLock<Duration>,
    connected: AtomicBool,
}

impl HttpApiClient {
    pub fn new(service_type: ServiceType) -> Self {
        Self {
            service_type,
            http: reqwest::Client::new(),
            endpoint: RwLock::new(None),
            timeout: RwLock::new(Duration::from_secs(30)),
            connected: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ServiceClient for HttpApiClient {
    async fn connect(&self, config: &ServiceConfig) -> Result<()> {
        if self.connected.load(Ordering::Acquire) {
            return Ok(());
        }

        let endpoint = config.endpoint.clone().ok_or_else(|| {
            ManagerError::InvalidConfig(format!(
                "service {} ({}) has no endpoint",
                config.id, self.service_type
            ))
        })?;
        url::Url::parse(&endpoint)
            .map_err(|e| ManagerError::InvalidConfig(format!("invalid endpoint: {e}")))?;

        *self.endpoint.write() = Some(endpoint);
        if let Some(timeout_ms) = config.timeout_ms {
            *self.timeout.write() = Duration::from_millis(timeout_ms);
        }
        self.connected.store(true, Ordering::Release);

        debug!(service_type = %self.service_type, "HTTP client connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::Release);
        *self.endpoint.write() = None;
        Ok(())
    }

    async fn execute(&self, action: &str, input: Value) -> Result<Value> {
        let endpoint = self
            .endpoint
            .read()
            .clone()
            .ok_or(ManagerError::NoClient)?;
        let timeout = *self.timeout.read();

        let response = self
            .http
            .post(&endpoint)
            .timeout(timeout)
            .json(&json!({ "action": action, "input": input }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ManagerError::Operation(format!(
                "{} returned status {}",
                self.service_type,
                response.status()
            )));
        }

        Ok(response.json().await?)
    }
}
