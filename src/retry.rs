//! Retry logic with exponential backoff
//!
//! Used by both the page-load path and the download path. The delay before
//! retry `n` (zero-based) is `initial_delay * backoff_multiplier^n`, capped at
//! `max_delay`, with optional jitter.
//!
//! Failures carrying a 4xx status other than 408/429 are permanent and are
//! returned immediately without retrying.
//!
//! # Example
//!
//! ```no_run
//! use media_harvest::retry::{IsRetryable, retry_with_backoff};
//! use media_harvest::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum FetchFailure {
//!     Status(u16),
//! }
//!
//! impl std::fmt::Display for FetchFailure {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         match self {
//!             FetchFailure::Status(s) => write!(f, "status {s}"),
//!         }
//!     }
//! }
//!
//! impl IsRetryable for FetchFailure {
//!     fn http_status(&self) -> Option<u16> {
//!         match self {
//!             FetchFailure::Status(s) => Some(*s),
//!         }
//!     }
//! }
//!
//! # async fn example() -> Result<(), FetchFailure> {
//! let config = RetryConfig::default();
//! let body = retry_with_backoff(&config, || async {
//!     Ok::<_, FetchFailure>("payload")
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, ErrorKind, is_permanent_status};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// The default classification only looks at the HTTP-style status: permanent
/// 4xx statuses are not retried, everything else is.
pub trait IsRetryable {
    /// HTTP-style status carried by the failure, if any
    fn http_status(&self) -> Option<u16> {
        None
    }

    /// Returns true if the operation should be attempted again
    fn is_retryable(&self) -> bool {
        !self.http_status().is_some_and(is_permanent_status)
    }
}

impl IsRetryable for Error {
    fn http_status(&self) -> Option<u16> {
        Error::http_status(self)
    }

    fn is_retryable(&self) -> bool {
        if self.http_status().is_some_and(is_permanent_status) {
            return false;
        }
        matches!(self.kind(), ErrorKind::Transient)
    }
}

/// Information handed to a retry observer before each backoff wait
#[derive(Debug, Clone)]
pub struct RetryNotice {
    /// Retry number about to happen (1-based)
    pub attempt: u32,
    /// Total retry budget
    pub max_attempts: u32,
    /// How long the retrier will sleep before the retry
    pub delay: Duration,
    /// Rendered error that triggered the retry
    pub error: String,
}

/// Execute an async operation with exponential backoff retry logic
///
/// Returns the successful result, the first permanent error, or the last
/// error after `max_attempts` retries have been spent.
pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    retry_with_observer(config, |_: &RetryNotice| {}, operation).await
}

/// Like [`retry_with_backoff`] but calls `observer` before every wait.
///
/// The observer is for diagnostics only; it cannot influence the retry loop.
pub async fn retry_with_observer<F, Fut, T, E, O>(
    config: &RetryConfig,
    mut observer: O,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
    O: FnMut(&RetryNotice),
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                let delay = backoff_delay(config, attempt);
                let delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };
                attempt += 1;

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                observer(&RetryNotice {
                    attempt,
                    max_attempts: config.max_attempts,
                    delay,
                    error: e.to_string(),
                });

                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(
                        error = %e,
                        status = ?e.http_status(),
                        "Operation failed with non-retryable error"
                    );
                }
                return Err(e);
            }
        }
    }
}

/// Un-jittered delay before zero-based retry `attempt`
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let factor = config.backoff_multiplier.powi(attempt as i32);
    let secs = config.initial_delay.as_secs_f64() * factor;
    if !secs.is_finite() || secs >= config.max_delay.as_secs_f64() {
        return config.max_delay;
    }
    Duration::from_secs_f64(secs)
}

/// Add random jitter to a delay to prevent thundering herd
///
/// The actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct StatusError(u16);

    impl std::fmt::Display for StatusError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "status {}", self.0)
        }
    }

    impl IsRetryable for StatusError {
        fn http_status(&self) -> Option<u16> {
            Some(self.0)
        }
    }

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_success_no_retry() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_backoff(&fast_config(3), || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, StatusError>(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1, "should only call once");
    }

    #[tokio::test]
    async fn test_not_found_is_attempted_exactly_once() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_backoff(&fast_config(5), || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(StatusError(404))
            }
        })
        .await;

        assert_eq!(result.unwrap_err().0, 404);
        assert_eq!(counter.load(Ordering::SeqCst), 1, "404 must not be retried");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_uses_full_budget_with_growing_gaps() {
        let config = fast_config(3);
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let mut notices = Vec::new();

        let result = retry_with_observer(
            &config,
            |notice: &RetryNotice| notices.push(notice.clone()),
            || {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>(StatusError(503))
                }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 4, "initial + 3 retries");
        assert_eq!(notices.len(), 3);
        assert!(
            notices.windows(2).all(|w| w[0].delay <= w[1].delay),
            "gaps must not shrink: {notices:?}"
        );
        assert_eq!(notices[0].delay, Duration::from_millis(10));
        assert_eq!(notices[1].delay, Duration::from_millis(20));
        assert_eq!(notices[2].delay, Duration::from_millis(40));
        assert_eq!(notices[2].attempt, 3);
        assert_eq!(notices[2].max_attempts, 3);
        assert_eq!(notices[0].error, "status 503");
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttling_statuses_are_retried() {
        for status in [408u16, 429] {
            let counter = Arc::new(AtomicU32::new(0));
            let counter_clone = counter.clone();

            let result = retry_with_backoff(&fast_config(2), || {
                let counter = counter_clone.clone();
                async move {
                    let count = counter.fetch_add(1, Ordering::SeqCst);
                    if count < 2 {
                        Err(StatusError(status))
                    } else {
                        Ok(count)
                    }
                }
            })
            .await;

            assert_eq!(result.unwrap(), 2, "status {status} should be retried");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_waits_accumulate() {
        let start = tokio::time::Instant::now();

        let _ = retry_with_backoff(&fast_config(3), || async { Err::<i32, _>(StatusError(500)) })
            .await;

        // 10ms + 20ms + 40ms
        assert!(start.elapsed() >= Duration::from_millis(70));
    }

    #[test]
    fn test_backoff_delay_is_capped() {
        let config = RetryConfig {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 3.0,
            jitter: false,
        };
        assert_eq!(backoff_delay(&config, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(&config, 1), Duration::from_secs(3));
        assert_eq!(backoff_delay(&config, 2), Duration::from_secs(5));
        assert_eq!(backoff_delay(&config, 60), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let delay = Duration::from_millis(100);
        for _ in 0..20 {
            let jittered = add_jitter(delay);
            assert!(jittered >= delay);
            assert!(jittered <= delay * 2);
        }
    }

    #[test]
    fn test_crate_error_classification() {
        let permanent = Error::Http {
            status: 404,
            url: "https://example.com/a.png".into(),
        };
        let transient = Error::Http {
            status: 502,
            url: "https://example.com/a.png".into(),
        };
        assert!(!permanent.is_retryable());
        assert!(transient.is_retryable());
        assert!(!Error::UnsafeUrl("http://127.0.0.1/".into()).is_retryable());
        assert!(
            !Error::SizeExceeded {
                url: "https://example.com/a.png".into(),
                size: 10,
                limit: 5
            }
            .is_retryable()
        );
        assert!(Error::Browser("target crashed".into()).is_retryable());
    }
}
