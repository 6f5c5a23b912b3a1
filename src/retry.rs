//! Retry Logic and Error Resilience
//!
//! This module provides retry with exponential backoff and jitter for
//! transient failures talking to yavirtd.
//!
//! # Features
//!
//! - **Exponential Backoff**: Retry delay grows exponentially with each attempt
//! - **Jitter**: Random delay variation to prevent thundering herd
//! - **Configurable**: Max attempts, base delay, max delay, jitter factor
//! - **Smart Retry**: Only errors where [`Error::is_transient`] holds are retried
//!
//! Only idempotent reads are retried by the clients; mutating calls such as
//! `create_guest` are sent exactly once.
//!
//! # Example
//!
//! ```ignore
//! use yavirt_client::retry::{RetryConfig, retry_with_backoff};
//!
//! let config = RetryConfig::default()
//!     .max_attempts(3)
//!     .base_delay(Duration::from_millis(100))
//!     .max_delay(Duration::from_secs(5));
//!
//! let info = retry_with_backoff(&config, || client.info()).await?;
//! ```

use crate::error::{Error, Result};
use std::time::Duration;
use tokio::time::sleep;

/// Retry configuration
///
/// # Fields
///
/// * `max_attempts` - Maximum number of attempts including the first (default: 3)
/// * `base_delay` - Initial delay before first retry (default: 100ms)
/// * `max_delay` - Maximum delay between retries (default: 5s)
/// * `jitter` - Random delay variation factor (default: 0.1 = 10%)
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts (including initial attempt)
    pub max_attempts: usize,

    /// Base delay before first retry
    pub base_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter: 0.1,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of attempts (values below 1 are raised to 1)
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the base delay between retries
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the maximum delay between retries
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the jitter factor, clamped to `0.0..=1.0`
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Calculate delay for a given retry attempt
    ///
    /// Uses exponential backoff: delay = base_delay * 2^attempt,
    /// then applies jitter and caps at max_delay.
    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.min(31) as u32);
        let exponential_delay = self.base_delay.saturating_mul(factor).min(self.max_delay);

        let jitter_range = exponential_delay.mul_f64(self.jitter);
        let jitter_offset = (rand::random::<f64>() - 0.5) * 2.0 * jitter_range.as_secs_f64();
        let jittered_delay =
            exponential_delay.saturating_add(Duration::from_secs_f64(jitter_offset.abs()));

        jittered_delay.min(self.max_delay)
    }
}

/// Retry an operation with exponential backoff
///
/// The operation is attempted up to `max_attempts` times. Only transient
/// errors trigger a retry; permanent errors are returned immediately.
pub async fn retry_with_backoff<F, T, Fut>(config: &RetryConfig, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(
                        "Operation succeeded on attempt {} after {} retries",
                        attempt + 1,
                        attempt
                    );
                }
                return Ok(result);
            }
            Err(e) if attempt + 1 < max_attempts && e.is_transient() => {
                let delay = config.calculate_delay(attempt);
                tracing::warn!(
                    "Attempt {} failed: {}, retrying after {:?}",
                    attempt + 1,
                    e,
                    delay
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_transient() {
                    tracing::error!("Operation failed after {} attempts: {}", attempt + 1, e);
                }
                return Err(e);
            }
        }
    }
}

/// Retry `operation` if a policy is given, otherwise run it once
pub(crate) async fn maybe_retry<F, T, Fut>(
    config: Option<&RetryConfig>,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    match config {
        Some(config) => retry_with_backoff(config, operation).await,
        None => operation().await,
    }
}

/// Check if an HTTP status code should be retried
///
/// Retryable status codes:
/// - 408 Request Timeout
/// - 429 Too Many Requests
/// - 5xx Server Error (except 501 Not Implemented, 505 HTTP Version Not Supported)
pub fn should_retry_status(status: u16) -> bool {
    match status {
        408 | 429 => true,
        500..=599 => status != 501 && status != 505,
        _ => false,
    }
}

impl Error {
    /// Whether the error came from a retry-worthy HTTP status
    pub fn is_retryable_status(&self) -> bool {
        matches!(self, Error::Api { status, .. } if should_retry_status(*status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn unavailable() -> Error {
        Error::Api {
            status: 503,
            message: "yavirtd is starting".to_string(),
        }
    }

    fn not_found() -> Error {
        Error::Api {
            status: 404,
            message: "guest not found".to_string(),
        }
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay, Duration::from_millis(100));
        assert_eq!(config.max_delay, Duration::from_secs(5));
        assert_eq!(config.jitter, 0.1);
    }

    #[test]
    fn test_retry_config_builder() {
        let config = RetryConfig::new()
            .max_attempts(5)
            .base_delay(Duration::from_millis(50))
            .max_delay(Duration::from_secs(10))
            .jitter(0.2);

        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_delay, Duration::from_millis(50));
        assert_eq!(config.max_delay, Duration::from_secs(10));
        assert_eq!(config.jitter, 0.2);
    }

    #[test]
    fn test_max_attempts_floor() {
        assert_eq!(RetryConfig::new().max_attempts(0).max_attempts, 1);
    }

    #[test]
    fn test_calculate_delay_exponential() {
        let config = RetryConfig::new()
            .base_delay(Duration::from_millis(100))
            .max_delay(Duration::from_secs(10));

        let delay0 = config.calculate_delay(0);
        assert!(delay0 >= Duration::from_millis(100) && delay0 <= Duration::from_millis(110));

        let delay1 = config.calculate_delay(1);
        assert!(delay1 >= Duration::from_millis(200) && delay1 <= Duration::from_millis(220));

        let delay2 = config.calculate_delay(2);
        assert!(delay2 >= Duration::from_millis(400) && delay2 <= Duration::from_millis(440));

        // Large attempt should cap at max_delay
        assert_eq!(config.calculate_delay(10), Duration::from_secs(10));
        assert_eq!(config.calculate_delay(200), Duration::from_secs(10));
    }

    #[test]
    fn test_calculate_delay_without_jitter_is_exact() {
        let config = RetryConfig::new()
            .base_delay(Duration::from_millis(10))
            .jitter(0.0);
        assert_eq!(config.calculate_delay(3), Duration::from_millis(80));
    }

    #[test]
    fn test_should_retry_status() {
        assert!(should_retry_status(408));
        assert!(should_retry_status(429));
        assert!(should_retry_status(500));
        assert!(should_retry_status(503));

        assert!(!should_retry_status(400));
        assert!(!should_retry_status(404));
        assert!(!should_retry_status(501));
        assert!(!should_retry_status(505));
    }

    #[test]
    fn test_is_retryable_status() {
        assert!(unavailable().is_retryable_status());
        assert!(!not_found().is_retryable_status());
        assert!(!Error::Decode("x".to_string()).is_retryable_status());
    }

    #[tokio::test]
    async fn test_retry_with_backoff_success() {
        let config = RetryConfig::default()
            .max_attempts(3)
            .base_delay(Duration::from_millis(10));

        let attempt = Arc::new(AtomicUsize::new(0));
        let attempt_clone = Arc::clone(&attempt);

        let result: Result<i32> = retry_with_backoff(&config, move || {
            let attempt = Arc::clone(&attempt_clone);
            async move {
                if attempt.fetch_add(1, Ordering::SeqCst) < 1 {
                    Err(unavailable())
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempt.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_with_backoff_no_retry_on_permanent_error() {
        let config = RetryConfig::default().base_delay(Duration::from_millis(10));

        let attempt_count = Arc::new(AtomicUsize::new(0));
        let attempt_clone = Arc::clone(&attempt_count);

        let result: Result<i32> = retry_with_backoff(&config, move || {
            let attempt = Arc::clone(&attempt_clone);
            async move {
                attempt.fetch_add(1, Ordering::SeqCst);
                Err(not_found())
            }
        })
        .await;

        assert!(result.unwrap_err().is_not_found());
        assert_eq!(attempt_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_with_backoff_max_attempts() {
        let config = RetryConfig::default()
            .max_attempts(2)
            .base_delay(Duration::from_millis(10));

        let attempt_count = Arc::new(AtomicUsize::new(0));
        let attempt_clone = Arc::clone(&attempt_count);

        let result: Result<i32> = retry_with_backoff(&config, move || {
            let attempt = Arc::clone(&attempt_clone);
            async move {
                attempt.fetch_add(1, Ordering::SeqCst);
                Err(Error::Transport("connection refused".to_string()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempt_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_maybe_retry_without_policy_runs_once() {
        let attempt_count = Arc::new(AtomicUsize::new(0));
        let attempt_clone = Arc::clone(&attempt_count);

        let result: Result<()> = maybe_retry(None, move || {
            let attempt = Arc::clone(&attempt_clone);
            async move {
                attempt.fetch_add(1, Ordering::SeqCst);
                Err(unavailable())
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempt_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_jitter_clamping() {
        assert_eq!(RetryConfig::new().jitter(1.5).jitter, 1.0);
        assert_eq!(RetryConfig::new().jitter(-0.5).jitter, 0.0);
    }
}
