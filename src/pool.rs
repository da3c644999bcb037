//! Connection Pool
//!
//! Generic keyed resource pool shared by all services needing persistent
//! connections. The pool manages counts and lifetimes only; what a
//! "connection" is stays opaque to it. Capacity is bounded globally, acquire
//! waits are bounded by a timeout, and idle resources beyond the configured
//! floor are evicted lazily once their idle time lapses.

use crate::{ManagerError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;
use validator::Validate;

/// Pool sizing and lifetime configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PoolConfig {
    /// Total resource ceiling across all keys
    #[validate(range(min = 1, max = 1000))]
    pub max_connections: usize,

    /// Idle resources kept alive regardless of idle time
    #[validate(range(min = 0, max = 1000))]
    pub min_connections: usize,

    /// Idle lifetime before eviction, in milliseconds
    #[validate(range(min = 1000))]
    pub max_idle_time_ms: u64,

    /// Upper bound on how long `acquire` may wait for capacity
    #[validate(range(min = 100))]
    pub acquire_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            max_idle_time_ms: 5 * 60 * 1000,
            acquire_timeout_ms: 30 * 1000,
        }
    }
}

/// A resource checked out of the pool.
///
/// Dropping it releases the capacity without returning the resource; use
/// [`ConnectionPool::release`] to hand it back for reuse.
pub struct PooledResource<T> {
    /// Key the resource belongs to (service id)
    pub key: String,

    /// The opaque resource itself
    pub resource: T,

    /// When the resource was checked out
    pub acquired_at: Instant,

    permit: OwnedSemaphorePermit,
}

struct IdleEntry<T> {
    resource: T,
    permit: OwnedSemaphorePermit,
    idle_since: Instant,
}

/// Pool occupancy snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolStatus {
    pub max_connections: usize,
    pub in_use: usize,
    pub idle: usize,
}

/// Generic keyed resource pool.
pub struct ConnectionPool<T> {
    config: PoolConfig,
    factory: Box<dyn Fn(&str) -> T + Send + Sync>,
    capacity: Arc<Semaphore>,
    idle: Mutex<HashMap<String, Vec<IdleEntry<T>>>>,
}

impl<T> std::fmt::Debug for ConnectionPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.config)
            .field("available", &self.capacity.available_permits())
            .finish()
    }
}

impl<T: Send + 'static> ConnectionPool<T> {
    /// Create a pool. `factory` builds a fresh resource for a key when no
    /// idle one is available.
    pub fn new<F>(config: PoolConfig, factory: F) -> Self
    where
        F: Fn(&str) -> T + Send + Sync + 'static,
    {
        let capacity = Arc::new(Semaphore::new(config.max_connections));
        Self {
            config,
            factory: Box::new(factory),
            capacity,
            idle: Mutex::new(HashMap::new()),
        }
    }

    /// Check out a resource for `key`.
    ///
    /// Reuses an idle resource for the key when one exists; otherwise creates
    /// a new one up to `max_connections`. At capacity the call waits at most
    /// `acquire_timeout_ms` before failing with
    /// [`ManagerError::PoolExhausted`].
    pub async fn acquire(&self, key: &str) -> Result<PooledResource<T>> {
        self.evict_expired();

        if let Some(entry) = self.take_idle(key) {
            debug!(key, "Reusing idle pooled resource");
            return Ok(PooledResource {
                key: key.to_string(),
                resource: entry.resource,
                acquired_at: Instant::now(),
                permit: entry.permit,
            });
        }

        let permit = match tokio::time::timeout(
            Duration::from_millis(self.config.acquire_timeout_ms),
            self.capacity.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            // Elapsed wait or a closed semaphore both mean no capacity.
            Ok(Err(_)) | Err(_) => return Err(ManagerError::PoolExhausted(key.to_string())),
        };

        debug!(key, "Created new pooled resource");
        Ok(PooledResource {
            key: key.to_string(),
            resource: (self.factory)(key),
            acquired_at: Instant::now(),
            permit,
        })
    }

    /// Return a resource to the idle set for its key.
    pub fn release(&self, pooled: PooledResource<T>) {
        let mut idle = self.idle.lock();
        idle.entry(pooled.key).or_default().push(IdleEntry {
            resource: pooled.resource,
            permit: pooled.permit,
            idle_since: Instant::now(),
        });
    }

    /// Forcibly drop all idle resources for one key.
    pub fn purge(&self, key: &str) {
        let removed = self.idle.lock().remove(key).map(|v| v.len()).unwrap_or(0);
        if removed > 0 {
            debug!(key, count = removed, "Purged pooled resources");
        }
    }

    /// Drop every idle resource. In-flight resources release their capacity
    /// when their holders drop them.
    pub fn drain(&self) {
        self.idle.lock().clear();
    }

    /// Occupancy snapshot.
    pub fn status(&self) -> PoolStatus {
        let idle: usize = self.idle.lock().values().map(|v| v.len()).sum();
        let live = self.config.max_connections - self.capacity.available_permits();
        PoolStatus {
            max_connections: self.config.max_connections,
            in_use: live.saturating_sub(idle),
            idle,
        }
    }

    fn take_idle(&self, key: &str) -> Option<IdleEntry<T>> {
        let mut idle = self.idle.lock();
        let entries = idle.get_mut(key)?;
        let entry = entries.pop();
        if entries.is_empty() {
            idle.remove(key);
        }
        entry
    }

    /// Evict idle resources past their idle lifetime, keeping
    /// `min_connections` resources alive overall.
    fn evict_expired(&self) {
        let max_idle = Duration::from_millis(self.config.max_idle_time_ms);
        let now = Instant::now();
        let mut idle = self.idle.lock();

        let mut live = self.config.max_connections - self.capacity.available_permits();

        for entries in idle.values_mut() {
            entries.retain(|entry| {
                let expired = now.duration_since(entry.idle_since) > max_idle;
                if expired && live > self.config.min_connections {
                    live -= 1;
                    false
                } else {
                    true
                }
            });
        }
        idle.retain(|_, entries| !entries.is_empty());
    }
}
