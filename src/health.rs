//! Health Monitor
//!
//! Periodic sweep that recomputes every registered service's health record
//! and refreshes its `last_health_check` timestamp. The sweep emits no events
//! and caches nothing consumers read: on-demand health checks always
//! recompute from live metrics, so the timestamp is the sweep's only
//! externally observable effect.

use crate::manager::ServiceInstance;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::debug;
use validator::Validate;

/// Health sweep configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct HealthConfig {
    /// Whether the periodic sweep runs at all
    pub enabled: bool,

    /// Sweep interval in seconds
    #[validate(range(min = 1, max = 86400))]
    pub check_interval_seconds: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_seconds: 300,
        }
    }
}

/// Periodic health sweep over the manager's service instances.
pub struct HealthMonitor {
    services: Arc<DashMap<String, Arc<ServiceInstance>>>,
    period: Duration,
}

impl HealthMonitor {
    pub(crate) fn new(
        services: Arc<DashMap<String, Arc<ServiceInstance>>>,
        period: Duration,
    ) -> Self {
        Self { services, period }
    }

    /// Start the sweep task. The returned handle is aborted on manager
    /// destruction.
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.period);
            // The first tick fires immediately; skip it so the sweep starts
            // one full period after spawn.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                self.sweep();
            }
        })
    }

    fn sweep(&self) {
        let now = Utc::now();
        let mut unhealthy = 0usize;

        for entry in self.services.iter() {
            let health = entry.value().health();
            if health.status == crate::models::HealthStatus::Unhealthy {
                unhealthy += 1;
            }
            *entry.value().last_health_check.lock() = now;
        }

        debug!(
            services = self.services.len(),
            unhealthy, "Health sweep completed"
        );
    }
}
