//! Bounded exponential-backoff retry for transient remote failures.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::SyncError;

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    5_000
}

/// Retry policy. `max_attempts` counts the first try.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for every further one.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Backoff after the failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms))
    }
}

/// Outcome of [`execute_with_retry`].
#[derive(Debug)]
pub struct RetryResult<T> {
    pub result: Result<T, SyncError>,
    /// Attempts made, including the successful one.
    pub attempts: u32,
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// the attempt budget is spent. Exhaustion yields
/// [`SyncError::RetriesExhausted`] wrapping the last error.
///
/// `operation` receives the 1-based attempt number and must rebuild all of
/// its inputs on every call.
pub async fn execute_with_retry<T, F, Fut>(config: &RetryConfig, mut operation: F) -> RetryResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => {
                return RetryResult {
                    result: Ok(value),
                    attempts: attempt,
                }
            }
            Err(e) if !e.is_retryable() => {
                return RetryResult {
                    result: Err(e),
                    attempts: attempt,
                }
            }
            Err(e) if attempt >= max_attempts => {
                return RetryResult {
                    result: Err(SyncError::RetriesExhausted {
                        attempts: attempt,
                        source: Box::new(e),
                    }),
                    attempts: attempt,
                }
            }
            Err(e) => {
                let delay = config.delay_after(attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "Transient failure, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let config = RetryConfig {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 300,
        };
        assert_eq!(config.delay_after(1), Duration::from_millis(100));
        assert_eq!(config.delay_after(2), Duration::from_millis(200));
        assert_eq!(config.delay_after(3), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let outcome = execute_with_retry(&RetryConfig::default(), |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(SyncError::RemoteTransient("503".into()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(outcome.result.unwrap(), 3);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_keeps_the_last_error() {
        let outcome: RetryResult<()> = execute_with_retry(&RetryConfig::default(), |attempt| async move {
            Err(SyncError::RemoteTransient(format!("timeout #{attempt}")))
        })
        .await;
        assert_eq!(outcome.attempts, 3);
        match outcome.result.unwrap_err() {
            SyncError::RetriesExhausted { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(source.to_string().contains("timeout #3"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rejections_are_not_retried() {
        let outcome: RetryResult<()> = execute_with_retry(&RetryConfig::default(), |_| async {
            Err(SyncError::RemoteRejected {
                status: 400,
                detail: "bad field".into(),
            })
        })
        .await;
        assert_eq!(outcome.attempts, 1);
        assert!(matches!(outcome.result, Err(SyncError::RemoteRejected { status: 400, .. })));
    }
}
