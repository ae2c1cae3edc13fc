//! Pool-level retry with exponential backoff
//!
//! The Connection Manager already fails over between endpoints within one call.
//! This module adds an optional outer loop: once every endpoint has failed, the
//! whole pool traversal can be repeated after a backoff delay. Delays grow
//! exponentially and can carry random jitter so several clients do not hammer a
//! recovering archive at the same instant.
//!
//! # Example
//!
//! ```no_run
//! use ngas_client::retry::{IsRetryable, with_retry};
//! use ngas_client::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum ArchiveError {
//!     Busy,
//!     Rejected,
//! }
//!
//! impl std::fmt::Display for ArchiveError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{self:?}")
//!     }
//! }
//!
//! impl IsRetryable for ArchiveError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, ArchiveError::Busy)
//!     }
//! }
//!
//! # async fn example() -> Result<(), ArchiveError> {
//! let config = RetryConfig::default();
//! with_retry(&config, || async { Ok::<_, ArchiveError>(()) }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (every endpoint down, timeouts, connection resets) should return `true`.
/// Permanent failures (bad configuration, redirect loops, cancellation) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // The whole pool was down; it may be back after the backoff
            Error::NoServerAvailable { .. } => true,
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Timeout(_) => true,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // A redirect chain that is too long will be too long again
            Error::TooManyRedirects { .. } | Error::InvalidRedirect(_) => false,
            Error::Config { .. } => false,
            Error::Framing(_) | Error::Xml(_) => false,
            Error::Receiver(_) | Error::NoSubscription => false,
            Error::Cancelled => false,
        }
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// `config.max_attempts` counts retries, so the operation runs at most
/// `max_attempts + 1` times. Non-retryable errors are returned immediately.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;

                tracing::warn!(
                    error = %e,
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "operation failed, retrying"
                );

                let wait = if config.jitter { add_jitter(delay) } else { delay };
                tokio::time::sleep(wait).await;

                delay = next_delay(config, delay);
            }
            Err(e) => {
                if e.is_retryable() && config.max_attempts > 0 {
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
                        "operation failed after all retry attempts exhausted"
                    );
                }
                return Err(e);
            }
        }
    }
}

fn next_delay(config: &RetryConfig, delay: Duration) -> Duration {
    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier).min(config.max_delay)
}

/// Jitter is uniform between 0% and 100% of the delay, so the result lies in `[delay, 2 * delay]`.
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

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(50),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn pool_exhaustion_is_retried_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = with_retry(&fast_config(3), || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::NoServerAvailable {
                        attempted: 2,
                        cooling_down: 0,
                    })
                } else {
                    Ok("served")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "served");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn zero_attempts_runs_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = with_retry(&RetryConfig::disabled(), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::Timeout(Duration::from_secs(1)))
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn redirect_loops_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = with_retry(&fast_config(5), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::TooManyRedirects { max: 20 })
            }
        })
        .await;

        assert!(matches!(result, Err(Error::TooManyRedirects { max: 20 })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_is_capped() {
        let config = fast_config(10);
        let mut delay = config.initial_delay;
        for _ in 0..10 {
            delay = next_delay(&config, delay);
        }
        assert_eq!(delay, config.max_delay);
    }

    #[test]
    fn jitter_stays_within_double_delay() {
        let base = Duration::from_millis(100);
        for _ in 0..50 {
            let jittered = add_jitter(base);
            assert!(jittered >= base && jittered <= base * 2);
        }
    }

    #[test]
    fn classification() {
        assert!(Error::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(
            Error::Io(std::io::Error::from(std::io::ErrorKind::ConnectionRefused)).is_retryable()
        );
        assert!(!Error::Io(std::io::Error::from(std::io::ErrorKind::NotFound)).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
        assert!(!Error::config("bad", "endpoints").is_retryable());
    }
}
