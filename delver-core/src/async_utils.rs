//! Async utilities and patterns
//!
//! Provides retry logic with exponential backoff and timeout wrappers

use crate::error::{DelverError, DelverResult, ErrorContext};
use futures::future::BoxFuture;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, warn};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first)
    pub max_attempts: usize,
    /// Initial delay between retries in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_delay_ms: u64,
    /// Backoff multiplier (exponential backoff)
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Retry an async operation with exponential backoff. Only errors reporting
/// themselves recoverable are retried; rate-limit errors extend the delay
/// by their own hint.
pub async fn retry_async<T, F>(
    mut operation: F,
    config: &RetryConfig,
    operation_name: &str,
) -> DelverResult<T>
where
    F: FnMut() -> BoxFuture<'static, DelverResult<T>>,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay_ms;

    loop {
        attempt += 1;

        debug!(
            operation = operation_name,
            attempt = attempt,
            max_attempts = config.max_attempts,
            "Attempting operation"
        );

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if attempt >= config.max_attempts || !err.is_recoverable() {
                    error!(
                        operation = operation_name,
                        attempt = attempt,
                        error = %err,
                        "Operation failed, retries exhausted"
                    );
                    return Err(err);
                }

                let floor = err.retry_delay_ms().unwrap_or(0);
                let base = delay.max(floor);

                let actual_delay = if config.jitter {
                    let jitter_factor = 0.1;
                    let jitter = (fastrand::f64() - 0.5) * 2.0 * jitter_factor;
                    ((base as f64) * (1.0 + jitter)) as u64
                } else {
                    base
                };

                warn!(
                    operation = operation_name,
                    attempt = attempt,
                    error = %err,
                    delay_ms = actual_delay,
                    "Operation failed, retrying"
                );

                sleep(Duration::from_millis(actual_delay)).await;

                delay = ((base as f64) * config.backoff_multiplier) as u64;
                delay = delay.min(config.max_delay_ms);
            }
        }
    }
}

/// Timeout wrapper for async operations
pub async fn with_timeout<F, T>(future: F, timeout_ms: u64, operation_name: &str) -> DelverResult<T>
where
    F: std::future::Future<Output = T>,
{
    match timeout(Duration::from_millis(timeout_ms), future).await {
        Ok(result) => Ok(result),
        Err(_) => Err(DelverError::Timeout {
            operation: operation_name.to_string(),
            duration_ms: timeout_ms,
            context: ErrorContext::new("async_utils")
                .with_operation("timeout")
                .with_suggestion("Increase timeout duration")
                .with_suggestion("Check network connectivity"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn quick_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn retries_recoverable_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result = retry_async(
            move || {
                let calls = calls_clone.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(DelverError::Network {
                            message: "reset".to_string(),
                            source: None,
                            context: ErrorContext::new("test"),
                        })
                    } else {
                        Ok(42)
                    }
                }
                .boxed()
            },
            &quick_retry(),
            "test_op",
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_unrecoverable_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result: DelverResult<u32> = retry_async(
            move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(DelverError::UpstreamRefused {
                        status: 400,
                        message: "bad request".to_string(),
                        context: ErrorContext::new("test"),
                    })
                }
                .boxed()
            },
            &quick_retry(),
            "test_op",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_surfaces_as_timeout_error() {
        let result = with_timeout(
            async {
                sleep(Duration::from_secs(5)).await;
                1
            },
            10,
            "slow_op",
        )
        .await;
        assert!(matches!(result, Err(DelverError::Timeout { .. })));
    }
}
