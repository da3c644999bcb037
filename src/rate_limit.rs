//! Rate Limiter
//!
//! Per-key request admission control combining rolling time windows (trailing
//! minute and hour) with a token-bucket burst allowance. Windows are computed
//! from timestamps at check time; no timers are spawned per key.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;
use validator::Validate;

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RateLimitConfig {
    /// Admitted requests per trailing 60 seconds, per key
    #[validate(range(min = 1, max = 100000))]
    pub requests_per_minute: u32,

    /// Admitted requests per trailing hour, per key
    #[validate(range(min = 1, max = 1000000))]
    pub requests_per_hour: u32,

    /// Burst token capacity; tokens refill at the per-minute steady rate
    #[validate(range(min = 1, max = 10000))]
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            requests_per_hour: 1000,
            burst: 10,
        }
    }
}

/// Admission state for one key.
#[derive(Debug)]
struct KeyState {
    /// Timestamps of admitted requests in the trailing minute
    minute: VecDeque<Instant>,

    /// Timestamps of admitted requests in the trailing hour
    hour: VecDeque<Instant>,

    /// Remaining burst tokens
    tokens: f64,

    /// Last token refill instant
    last_refill: Instant,
}

impl KeyState {
    fn new(burst: u32) -> Self {
        Self {
            minute: VecDeque::new(),
            hour: VecDeque::new(),
            tokens: burst as f64,
            last_refill: Instant::now(),
        }
    }
}

/// Per-key admission control.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    keys: DashMap<String, Mutex<KeyState>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            keys: DashMap::new(),
        }
    }

    /// Decide whether a request for `key` is admitted.
    ///
    /// Rejects when the minute ceiling or the hour ceiling is reached, or when
    /// the burst bucket is empty (meaning recent consumption has outpaced the
    /// steady-state refill rate). Only admitted requests are recorded in the
    /// windows.
    pub fn check_limit(&self, key: &str) -> bool {
        let entry = self
            .keys
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(KeyState::new(self.config.burst)));
        let mut state = entry.lock();
        let now = Instant::now();

        Self::prune(&mut state.minute, now, Duration::from_secs(60));
        Self::prune(&mut state.hour, now, Duration::from_secs(3600));

        if state.minute.len() >= self.config.requests_per_minute as usize {
            debug!(key, "Rate limit rejection: per-minute ceiling reached");
            return false;
        }

        if state.hour.len() >= self.config.requests_per_hour as usize {
            debug!(key, "Rate limit rejection: per-hour ceiling reached");
            return false;
        }

        // Refill burst tokens at the steady-state per-minute rate.
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        let refill_rate = self.config.requests_per_minute as f64 / 60.0;
        state.tokens = (state.tokens + elapsed * refill_rate).min(self.config.burst as f64);
        state.last_refill = now;

        if state.tokens < 1.0 {
            debug!(key, "Rate limit rejection: burst tokens exhausted");
            return false;
        }

        state.tokens -= 1.0;
        state.minute.push_back(now);
        state.hour.push_back(now);
        true
    }

    /// Admitted requests for `key` in the trailing minute.
    pub fn minute_count(&self, key: &str) -> usize {
        self.keys
            .get(key)
            .map(|entry| {
                let mut state = entry.lock();
                let now = Instant::now();
                Self::prune(&mut state.minute, now, Duration::from_secs(60));
                state.minute.len()
            })
            .unwrap_or(0)
    }

    /// Drop all per-key state.
    pub fn reset(&self) {
        self.keys.clear();
    }

    fn prune(window: &mut VecDeque<Instant>, now: Instant, span: Duration) {
        while let Some(oldest) = window.front() {
            if now.duration_since(*oldest) > span {
                window.pop_front();
            } else {
                break;
            }
        }
    }
}
