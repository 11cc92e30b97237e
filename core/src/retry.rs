//! Retry with exponential backoff for cloud calls
//!
//! Every outbound provider call goes through [`RetryPolicy::run`]: it is bounded
//! by a per-call timeout, retried only while the error is transient, and
//! abandoned as soon as the caller's cancellation token fires.

use crate::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    pub jitter: bool,
    /// Upper bound on a single call; elapsing counts as a transient failure
    pub call_timeout_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 15_000,
            backoff_factor: 2.0,
            jitter: true,
            call_timeout_secs: 600,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no delay; for tests and dry runs
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter: false,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::validation("retry.max_attempts must be at least 1"));
        }
        if self.backoff_factor < 1.0 {
            return Err(Error::validation("retry.backoff_factor must be at least 1.0"));
        }
        if self.call_timeout_secs == 0 {
            return Err(Error::validation("retry.call_timeout_secs must be at least 1"));
        }
        Ok(())
    }

    pub(crate) fn delay_for(&self, attempt: u32) -> Duration {
        let exponential = self.base_delay_ms as f64 * self.backoff_factor.powi(attempt as i32);
        let capped = exponential.min(self.max_delay_ms as f64);
        let millis = if self.jitter {
            capped * rand::thread_rng().gen_range(0.5..1.5)
        } else {
            capped
        };
        Duration::from_millis(millis as u64)
    }

    /// Run `call` until it succeeds, fails permanently, exhausts attempts, or is cancelled
    pub async fn run<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        operation: &str,
        mut call: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let timeout = Duration::from_secs(self.call_timeout_secs);
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::cancelled(operation));
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::cancelled(operation)),
                res = tokio::time::timeout(timeout, call()) => match res {
                    Ok(inner) => inner,
                    Err(_) => Err(Error::transient(
                        operation,
                        format!("timed out after {}s", timeout.as_secs()),
                    )),
                },
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            attempt += 1;

            if !err.is_retryable() {
                debug!(operation, error = %err, "non-retryable error");
                return Err(err);
            }

            if attempt >= self.max_attempts {
                warn!(
                    operation,
                    error = %err,
                    attempts = attempt,
                    "retry attempts exhausted"
                );
                return Err(err);
            }

            let delay = self.delay_for(attempt - 1);
            warn!(
                operation,
                error = %err,
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "retrying after transient error"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::cancelled(operation)),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PermanentReason;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 5,
            backoff_factor: 2.0,
            jitter: false,
            call_timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_permanent_error_fails_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();

        let result: Result<()> = fast(5)
            .run(&token, "create_network", || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Error::permanent("create_network", PermanentReason::Quota, "limit"))
                }
            })
            .await;

        assert!(matches!(result, Err(Error::Permanent { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_error_retries_up_to_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();

        let result: Result<()> = fast(3)
            .run(&token, "get_boundary", || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Error::transient("get_boundary", "429"))
                }
            })
            .await;

        assert!(matches!(result, Err(Error::Transient { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();

        let result = fast(5)
            .run(&token, "get_boundary", || {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Error::transient("get_boundary", "503"))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_calling() {
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();
        token.cancel();

        let result: Result<()> = fast(5)
            .run(&token, "create_boundary", || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert!(matches!(result, Err(Error::Cancelled { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_running_call() {
        let token = CancellationToken::new();
        let child = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            child.cancel();
        });

        let result: Result<()> = fast(1)
            .run(&token, "slow", || async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await;

        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout_is_transient() {
        let token = CancellationToken::new();
        let policy = RetryPolicy {
            call_timeout_secs: 1,
            ..fast(1)
        };

        let result: Result<()> = policy
            .run(&token, "hang", || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;

        assert!(result.unwrap_err().is_retryable());
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy {
            base_delay_ms: 1000,
            max_delay_ms: 5000,
            backoff_factor: 10.0,
            jitter: false,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(1000));
        for attempt in 1..8 {
            assert!(policy.delay_for(attempt) <= Duration::from_millis(5000));
        }
    }

    #[test]
    fn test_validate() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        }
        .validate()
        .is_err());
    }
}
