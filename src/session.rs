//! Session Manager
//!
//! Tracks logical, TTL-bound sessions grouped by service *type* rather than
//! instance id, because multiple configured services can share one underlying
//! integration type. Expiry is checked lazily on access; no background timer
//! runs.

use crate::models::ServiceType;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;
use validator::Validate;

/// Session tracking configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SessionConfig {
    /// Idle lifetime of a session in minutes
    #[validate(range(min = 1, max = 1440))]
    pub session_timeout_minutes: i64,

    /// Live-session cap per service type
    #[validate(range(min = 1, max = 10000))]
    pub max_sessions_per_service: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_timeout_minutes: 30,
            max_sessions_per_service: 100,
        }
    }
}

/// A logical unit of per-type state, distinct from a physical connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub service_type: ServiceType,
    pub created_at: DateTime<Utc>,
    pub last_touched_at: DateTime<Utc>,
}

/// Session counts exposed through the system status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub sessions_per_type: HashMap<String, usize>,
}

/// Tracks sessions per service type with TTL expiry and a per-type cap.
#[derive(Debug)]
pub struct SessionManager {
    config: SessionConfig,
    sessions: DashMap<ServiceType, Vec<Session>>,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            sessions: DashMap::new(),
        }
    }

    /// Create a session for `service_type`.
    ///
    /// When the type is at its cap the oldest session is evicted first
    /// (evict-before-reject), so creation always succeeds.
    pub fn create_session(&self, service_type: ServiceType) -> Session {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            service_type,
            created_at: now,
            last_touched_at: now,
        };

        let mut entry = self.sessions.entry(service_type).or_default();
        self.expire_in_place(&mut entry, now);

        if entry.len() >= self.config.max_sessions_per_service {
            // Sessions are stored in creation order, so the front is oldest.
            let evicted = entry.remove(0);
            debug!(
                service_type = %service_type,
                session_id = %evicted.id,
                "Evicted oldest session at capacity"
            );
        }

        entry.push(session.clone());
        session
    }

    /// Look up a live session, expiring it if the TTL has lapsed.
    pub fn get_session(&self, service_type: ServiceType, id: Uuid) -> Option<Session> {
        let mut entry = self.sessions.get_mut(&service_type)?;
        self.expire_in_place(&mut entry, Utc::now());
        entry.iter().find(|s| s.id == id).cloned()
    }

    /// Refresh a session's idle timer. Returns false if the session is gone
    /// or already expired.
    pub fn touch(&self, service_type: ServiceType, id: Uuid) -> bool {
        let now = Utc::now();
        let Some(mut entry) = self.sessions.get_mut(&service_type) else {
            return false;
        };
        self.expire_in_place(&mut entry, now);

        match entry.iter_mut().find(|s| s.id == id) {
            Some(session) => {
                session.last_touched_at = now;
                true
            }
            None => false,
        }
    }

    /// Live session count for one type.
    pub fn active_count(&self, service_type: ServiceType) -> usize {
        self.sessions
            .get_mut(&service_type)
            .map(|mut entry| {
                self.expire_in_place(&mut entry, Utc::now());
                entry.len()
            })
            .unwrap_or(0)
    }

    /// Remove all sessions for a type atomically.
    pub fn destroy_service_sessions(&self, service_type: ServiceType) {
        if let Some((_, sessions)) = self.sessions.remove(&service_type) {
            debug!(
                service_type = %service_type,
                count = sessions.len(),
                "Destroyed sessions for service type"
            );
        }
    }

    /// Remove everything.
    pub fn clear(&self) {
        self.sessions.clear();
    }

    /// Counts for the system status, with expired sessions pruned.
    pub fn stats(&self) -> SessionStats {
        let now = Utc::now();
        let mut stats = SessionStats::default();

        for mut entry in self.sessions.iter_mut() {
            self.expire_in_place(&mut entry, now);
            if !entry.is_empty() {
                stats.total_sessions += entry.len();
                stats
                    .sessions_per_type
                    .insert(entry.key().to_string(), entry.len());
            }
        }

        stats
    }

    fn expire_in_place(&self, sessions: &mut Vec<Session>, now: DateTime<Utc>) {
        let ttl = Duration::minutes(self.config.session_timeout_minutes);
        sessions.retain(|s| now - s.last_touched_at <= ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_get() {
        let manager = SessionManager::new(SessionConfig::default());
        let session = manager.create_session(ServiceType::Slack);

        let found = manager.get_session(ServiceType::Slack, session.id);
        assert_eq!(found.unwrap().id, session.id);
        assert_eq!(manager.active_count(ServiceType::Slack), 1);
    }

    #[test]
    fn test_cap_evicts_oldest() {
        let manager = SessionManager::new(SessionConfig {
            session_timeout_minutes: 30,
            max_sessions_per_service: 3,
        });

        let first = manager.create_session(ServiceType::GitHub);
        manager.create_session(ServiceType::GitHub);
        manager.create_session(ServiceType::GitHub);
        let fourth = manager.create_session(ServiceType::GitHub);

        assert_eq!(manager.active_count(ServiceType::GitHub), 3);
        assert!(manager.get_session(ServiceType::GitHub, first.id).is_none());
        assert!(manager.get_session(ServiceType::GitHub, fourth.id).is_some());
    }

    #[test]
    fn test_lazy_expiry() {
        let manager = SessionManager::new(SessionConfig {
            session_timeout_minutes: 30,
            max_sessions_per_service: 100,
        });

        let session = manager.create_session(ServiceType::Sqlite);

        // Backdate the idle timer past the TTL.
        {
            let mut entry = manager.sessions.get_mut(&ServiceType::Sqlite).unwrap();
            entry[0].last_touched_at = Utc::now() - Duration::minutes(31);
        }

        assert!(manager.get_session(ServiceType::Sqlite, session.id).is_none());
        assert_eq!(manager.active_count(ServiceType::Sqlite), 0);
    }

    #[test]
    fn test_touch_refreshes() {
        let manager = SessionManager::new(SessionConfig::default());
        let session = manager.create_session(ServiceType::Filesystem);

        {
            let mut entry = manager.sessions.get_mut(&ServiceType::Filesystem).unwrap();
            entry[0].last_touched_at = Utc::now() - Duration::minutes(29);
        }

        assert!(manager.touch(ServiceType::Filesystem, session.id));
        assert!(manager
            .get_session(ServiceType::Filesystem, session.id)
            .is_some());
    }

    #[test]
    fn test_destroy_by_type_is_scoped() {
        let manager = SessionManager::new(SessionConfig::default());
        manager.create_session(ServiceType::Slack);
        manager.create_session(ServiceType::Slack);
        manager.create_session(ServiceType::GitHub);

        manager.destroy_service_sessions(ServiceType::Slack);

        assert_eq!(manager.active_count(ServiceType::Slack), 0);
        assert_eq!(manager.active_count(ServiceType::GitHub), 1);
    }

    #[test]
    fn test_stats() {
        let manager = SessionManager::new(SessionConfig::default());
        manager.create_session(ServiceType::Slack);
        manager.create_session(ServiceType::GitHub);
        manager.create_session(ServiceType::GitHub);

        let stats = manager.stats();
        assert_eq!(stats.total_sessions, 3);
        assert_eq!(stats.sessions_per_type.get("github"), Some(&2));
        assert_eq!(stats.sessions_per_type.get("slack"), Some(&1));
    }
}
