// Retry with exponential backoff for idempotent GitLab reads

use std::future::Future;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, warn};

use crate::config::RetrySettings;
use crate::platform::PlatformError;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryHandler {
    config: RetryConfig,
}

impl RetryHandler {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delays between attempts: `base_delay` doubling up to `max_delay`, one fewer
    /// than `max_attempts`.
    fn backoff(&self) -> impl Iterator<Item = Duration> {
        // ExponentialBackoff yields factor * 2^n ms starting at n = 1
        let factor = (self.config.base_delay.as_millis() as u64 / 2).max(1);
        let jittered = self.config.jitter;
        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(self.config.max_delay)
            .map(move |delay| if jittered { jitter(delay) } else { delay })
            .take(self.config.max_attempts.saturating_sub(1) as usize)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent.
    pub async fn execute_with_retry<F, Fut, T>(&self, name: &str, operation: F) -> Result<T, PlatformError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PlatformError>>,
    {
        let mut failures = 0u32;
        let max_attempts = self.config.max_attempts;
        let result = RetryIf::spawn(self.backoff(), operation, |error: &PlatformError| {
            failures += 1;
            let retry = error.is_retryable();
            if retry && failures < max_attempts {
                warn!(operation = name, attempt = failures, %error, "retryable failure");
            }
            retry
        })
        .await;

        if result.is_ok() && failures > 0 {
            debug!(operation = name, attempt = failures + 1, "succeeded after retry");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn handler() -> RetryHandler {
        RetryHandler::new(RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter: false,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_success_after_failure() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let counter = attempt_count.clone();

        let result = handler()
            .execute_with_retry("get pipeline", || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(PlatformError::transport("get pipeline", "connection reset"))
                    } else {
                        Ok("success")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_fails_immediately() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let counter = attempt_count.clone();

        let result: Result<(), _> = handler()
            .execute_with_retry("create merge request", || {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(PlatformError::Conflict {
                        message: "exists".to_string(),
                    })
                }
            })
            .await;

        assert!(result.unwrap_err().is_conflict());
        assert_eq!(attempt_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_budget() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let counter = attempt_count.clone();

        let result: Result<(), _> = handler()
            .execute_with_retry("get file", || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(PlatformError::RateLimited { retry_after_secs: Some(2) }) }
            })
            .await;

        assert!(matches!(result, Err(PlatformError::RateLimited { .. })));
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let delays: Vec<_> = handler().backoff().collect();
        assert_eq!(delays, vec![Duration::from_millis(100), Duration::from_millis(200)]);

        let long = RetryHandler::new(RetryConfig {
            max_attempts: 7,
            ..handler().config
        });
        let delays: Vec<_> = long.backoff().collect();
        assert_eq!(delays.len(), 6);
        assert_eq!(delays[2], Duration::from_millis(400));
        assert_eq!(delays[5], Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_wait_for_backoff() {
        let started = tokio::time::Instant::now();
        let result: Result<(), _> = handler()
            .execute_with_retry("get pipeline", || async {
                Err(PlatformError::transport("get pipeline", "reset"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }
}
