//! Retry Policies and Executor
//!
//! Named, immutable backoff policies and the executor that applies them to a
//! unit of work. Failures are classified as retryable or terminal by the
//! policy's predicate; terminal failures surface immediately, and exhausting
//! the attempt budget surfaces the last error wrapped in
//! [`ManagerError::RetryExhausted`].

use crate::{ManagerError, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Immutable retry configuration, selected by name rather than constructed
/// per call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Policy name used for lookup and logging
    pub name: &'static str,

    /// Additional attempts after the first one
    pub max_retries: u32,

    /// Delay before the first retry
    pub base_delay_ms: u64,

    /// Multiplier applied to the delay per attempt
    pub backoff_multiplier: f64,

    /// Random perturbation factor (0.0..1.0) applied to each delay to avoid
    /// synchronized retries across services
    pub jitter: f64,

    /// Classifies an error as retryable or terminal
    pub retryable: fn(&ManagerError) -> bool,
}

fn default_retryable(error: &ManagerError) -> bool {
    error.is_retryable()
}

/// Cautious policy for expensive or side-effectful operations.
pub static CONSERVATIVE: RetryPolicy = RetryPolicy {
    name: "conservative",
    max_retries: 1,
    base_delay_ms: 1000,
    backoff_multiplier: 2.0,
    jitter: 0.1,
    retryable: default_retryable,
};

/// Default policy applied by the manager.
pub static MODERATE: RetryPolicy = RetryPolicy {
    name: "moderate",
    max_retries: 3,
    base_delay_ms: 500,
    backoff_multiplier: 2.0,
    jitter: 0.2,
    retryable: default_retryable,
};

/// Persistent policy for cheap, idempotent reads.
pub static AGGRESSIVE: RetryPolicy = RetryPolicy {
    name: "aggressive",
    max_retries: 5,
    base_delay_ms: 200,
    backoff_multiplier: 1.5,
    jitter: 0.3,
    retryable: default_retryable,
};

impl RetryPolicy {
    /// Look up a policy from the fixed registry.
    pub fn named(name: &str) -> Option<&'static RetryPolicy> {
        match name {
            "conservative" => Some(&CONSERVATIVE),
            "moderate" => Some(&MODERATE),
            "aggressive" => Some(&AGGRESSIVE),
            _ => None,
        }
    }

    /// Backoff delay for the given zero-based attempt, jitter applied.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let jittered = if self.jitter > 0.0 {
            let factor = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
            (base * (1.0 + factor)).max(0.0)
        } else {
            base
        };
        Duration::from_millis(jittered as u64)
    }
}

/// Applies a named policy to a unit of work.
#[derive(Debug, Clone, Copy)]
pub struct RetryExecutor {
    policy: &'static RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: &'static RetryPolicy) -> Self {
        Self { policy }
    }

    /// Run `operation` under the policy.
    ///
    /// The operation is attempted at most `max_retries + 1` times. A terminal
    /// error is returned as-is from whichever attempt produced it; running
    /// out of attempts wraps the last error in
    /// [`ManagerError::RetryExhausted`].
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if !(self.policy.retryable)(&error) {
                        debug!(
                            policy = self.policy.name,
                            attempt = attempt + 1,
                            error = %error,
                            "Terminal error, not retrying"
                        );
                        return Err(error);
                    }

                    if attempt >= self.policy.max_retries {
                        warn!(
                            policy = self.policy.name,
                            attempts = attempt + 1,
                            error = %error,
                            "Retry budget exhausted"
                        );
                        return Err(ManagerError::RetryExhausted {
                            attempts: attempt + 1,
                            source: Box::new(error),
                        });
                    }

                    let delay = self.policy.delay_for_attempt(attempt);
                    debug!(
                        policy = self.policy.name,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying after backoff"
                    );

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn transient_error() -> ManagerError {
        ManagerError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset",
        ))
    }

    #[test]
    fn test_policy_registry() {
        assert_eq!(RetryPolicy::named("moderate").unwrap().max_retries, 3);
        assert_eq!(RetryPolicy::named("conservative").unwrap().max_retries, 1);
        assert_eq!(RetryPolicy::named("aggressive").unwrap().max_retries, 5);
        assert!(RetryPolicy::named("frantic").is_none());
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let executor = RetryExecutor::new(&MODERATE);
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        let result = executor
            .execute(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(7u32)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_exhausts_all_attempts() {
        let executor = RetryExecutor::new(&MODERATE);
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        let result: Result<()> = executor
            .execute(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(transient_error())
                }
            })
            .await;

        // max_retries + 1 total attempts before surfacing failure
        assert_eq!(attempts.load(Ordering::SeqCst), MODERATE.max_retries + 1);
        match result.unwrap_err() {
            ManagerError::RetryExhausted { attempts, .. } => {
                assert_eq!(attempts, MODERATE.max_retries + 1)
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_terminal_error_single_attempt() {
        let executor = RetryExecutor::new(&MODERATE);
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        let result: Result<()> = executor
            .execute(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ManagerError::Operation("invalid credentials".to_string()))
                }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(ManagerError::Operation(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let executor = RetryExecutor::new(&AGGRESSIVE);
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        let result = executor
            .execute(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(transient_error())
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_backoff_grows_with_attempts() {
        let policy = RetryPolicy {
            name: "test",
            max_retries: 3,
            base_delay_ms: 100,
            backoff_multiplier: 2.0,
            jitter: 0.0,
            retryable: default_retryable,
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
    }
}
