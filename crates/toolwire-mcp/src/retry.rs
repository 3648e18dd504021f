//! Bounded retries for discovery calls.
//!
//! A server can finish the handshake before its own tool registry is ready,
//! so the first `tools/list` may fail or hang. Discovery therefore goes
//! through [`RetryPolicy::run`].

use crate::config::{BackoffKind, RetryConfig};
use crate::error::{McpError, McpResult};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound on the pause between two attempts.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60 * 60);

/// Past this many attempts the exponential factor stops growing.
const MAX_EXPONENT: u32 = 64;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// `base * attempt`
    Linear,
    /// `base * multiplier^(attempt - 1)`
    Exponential { multiplier: f64 },
}

/// Retry configuration for discovery-style calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            backoff: Backoff::Linear,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        let backoff = match config.backoff {
            BackoffKind::Linear => Backoff::Linear,
            BackoffKind::Exponential => Backoff::Exponential {
                multiplier: config.multiplier,
            },
        };
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            backoff,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes a single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Delay to wait after the given failed attempt (1-based).
    ///
    /// Never exceeds [`MAX_RETRY_DELAY`], whatever the configuration.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let delay = match self.backoff {
            Backoff::Linear => self.base_delay.saturating_mul(attempt),
            Backoff::Exponential { multiplier } => {
                let exponent = attempt.min(MAX_EXPONENT) as i32 - 1;
                let factor = multiplier.max(1.0).powi(exponent);
                Duration::try_from_secs_f64(self.base_delay.as_secs_f64() * factor)
                    .unwrap_or(MAX_RETRY_DELAY)
            }
        };
        delay.min(MAX_RETRY_DELAY)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out.
    ///
    /// Exhaustion is reported as [`McpError::DiscoveryFailed`] wrapping the
    /// last error. Non-retryable errors are returned as they are.
    pub async fn run<T, F, Fut>(&self, method: &str, mut op: F) -> McpResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = McpResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(method, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= max_attempts => {
                    warn!(method, attempts = attempt, error = %e, "Giving up");
                    return Err(McpError::DiscoveryFailed {
                        method: method.to_string(),
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        method,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Attempt failed, retrying"
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
    use crate::protocol::JsonRpcError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(max_attempts)
            .with_base_delay(Duration::from_millis(1))
    }

    fn not_ready() -> McpError {
        McpError::Remote(JsonRpcError::new(-32002, "server not ready"))
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(200));
        assert_eq!(policy.backoff, Backoff::Linear);
    }

    #[test]
    fn test_linear_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
    }

    #[test]
    fn test_exponential_delay() {
        let policy = RetryPolicy::default()
            .with_base_delay(Duration::from_millis(100))
            .with_backoff(Backoff::Exponential { multiplier: 2.0 });
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_is_capped() {
        let huge = RetryPolicy::from(&RetryConfig {
            backoff: BackoffKind::Exponential,
            multiplier: 1e300,
            ..RetryConfig::default()
        });
        assert_eq!(huge.delay_for(2), MAX_RETRY_DELAY);
        assert_eq!(huge.delay_for(3), MAX_RETRY_DELAY);

        let doubling = RetryPolicy::default()
            .with_backoff(Backoff::Exponential { multiplier: 2.0 });
        assert_eq!(doubling.delay_for(70), MAX_RETRY_DELAY);
        assert_eq!(doubling.delay_for(u32::MAX), MAX_RETRY_DELAY);

        let odd = RetryPolicy::default().with_backoff(Backoff::Exponential {
            multiplier: f64::INFINITY,
        });
        assert_eq!(odd.delay_for(2), MAX_RETRY_DELAY);

        let nan = RetryPolicy::default().with_backoff(Backoff::Exponential {
            multiplier: f64::NAN,
        });
        assert_eq!(nan.delay_for(4), Duration::from_millis(200));

        let linear = RetryPolicy::default().with_base_delay(Duration::from_secs(u64::MAX));
        assert_eq!(linear.delay_for(u32::MAX), MAX_RETRY_DELAY);
    }

    #[test]
    fn test_from_config() {
        let config = RetryConfig {
            max_attempts: 0,
            base_delay_ms: 50,
            backoff: BackoffKind::Exponential,
            multiplier: 3.0,
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.base_delay, Duration::from_millis(50));
        assert_eq!(policy.backoff, Backoff::Exponential { multiplier: 3.0 });
    }

    #[tokio::test]
    async fn test_succeeds_on_third_attempt() {
        let attempts = AtomicU32::new(0);
        let result = fast_policy(5)
            .run("tools/list", |_| {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(not_ready())
                    } else {
                        Ok("tools")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "tools");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_first_success_short_circuits() {
        let attempts = AtomicU32::new(0);
        let result = fast_policy(5)
            .run("tools/list", |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, McpError>(1) }
            })
            .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_wraps_last_error() {
        let attempts = AtomicU32::new(0);
        let result: McpResult<()> = fast_policy(4)
            .run("tools/list", |attempt| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    Err(McpError::Remote(JsonRpcError::new(
                        -32002,
                        format!("failure {attempt}"),
                    )))
                }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        match result {
            Err(McpError::DiscoveryFailed {
                method,
                attempts,
                source,
            }) => {
                assert_eq!(method, "tools/list");
                assert_eq!(attempts, 4);
                assert!(source.to_string().contains("failure 4"));
            }
            other => panic!("Expected DiscoveryFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeouts_are_retried() {
        let attempts = AtomicU32::new(0);
        let result = fast_policy(3)
            .run("tools/list", |attempt| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 1 {
                        Err(McpError::CallTimeout {
                            method: "tools/list".to_string(),
                            id: 2,
                            timeout: Duration::from_millis(10),
                        })
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let attempts = AtomicU32::new(0);
        let result: McpResult<()> = fast_policy(5)
            .run("tools/list", |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(McpError::connection_closed("server exited")) }
            })
            .await;

        assert!(matches!(result, Err(McpError::ConnectionClosed(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
