//! Retry configuration, delay calculation, and the shared retry helper.
//!
//! Provides [`RetryConfig`] for controlling retry behaviour and
//! [`with_retry()`], which runs a backend call under a per-attempt timeout
//! and retries transient failures with exponential backoff.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{BackendError, BackendResult};
use crate::{PictorError, Result, telemetry};

/// Configuration for retry behaviour on transient errors.
///
/// Uses exponential backoff: the delay before retry `n` (0-indexed) is
/// `initial_delay * 2^n`, capped at `max_delay`.
///
/// ```rust
/// # use pictor::RetryConfig;
/// # use std::time::Duration;
/// let config = RetryConfig::new()
///     .max_attempts(5)
///     .initial_delay(Duration::from_millis(200));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the initial request).
    /// 1 = no retry. Default: 3.
    pub max_attempts: u32,
    /// Base delay before the first retry. Default: 1s.
    pub initial_delay: Duration,
    /// Maximum delay between retries (caps exponential growth). Default: 60s.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config that disables retries (single attempt).
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set maximum attempts (including the initial request).
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    /// Set the base delay before the first retry.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay between retries.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    ///
    /// Uses exponential backoff: `initial_delay * 2^attempt`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.max_delay)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(PictorError::Configuration(
                "max_retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_delay < self.initial_delay {
            return Err(PictorError::Configuration(format!(
                "retry max_delay ({:?}) is shorter than initial_delay ({:?})",
                self.max_delay, self.initial_delay
            )));
        }
        Ok(())
    }
}

/// A backend failure that survived the retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryError {
    /// The last error returned.
    pub error: BackendError,
    /// How many attempts were made.
    pub attempts: u32,
}

impl From<RetryError> for PictorError {
    fn from(err: RetryError) -> Self {
        match err.error {
            BackendError::Rejected(reason) => PictorError::BackendTerminal { reason },
            transient => PictorError::BackendTransient {
                attempts: err.attempts,
                reason: transient.to_string(),
            },
        }
    }
}

/// Execute a backend call with a per-attempt timeout and retry logic.
///
/// An attempt that exceeds `timeout` counts as [`BackendError::Timeout`].
/// Transient errors (as classified by [`BackendError::is_transient()`]) are
/// retried up to `config.max_attempts` attempts in total, sleeping
/// [`RetryConfig::delay_for_attempt`] in between. Permanent errors are
/// returned immediately without retry.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    backend_name: &str,
    timeout: Duration,
    f: F,
) -> std::result::Result<T, RetryError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = BackendResult<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        let outcome = match tokio::time::timeout(timeout, f()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(BackendError::Timeout(timeout)),
        };
        let error = match outcome {
            Ok(result) => return Ok(result),
            Err(e) if e.is_transient() => e,
            Err(e) => {
                // permanent error, no retry
                return Err(RetryError {
                    error: e,
                    attempts: attempt + 1,
                });
            }
        };

        if attempt + 1 >= max_attempts {
            return Err(RetryError {
                error,
                attempts: attempt + 1,
            });
        }

        metrics::counter!(telemetry::RETRIES_TOTAL, "backend" => backend_name.to_owned())
            .increment(1);
        let delay = config.delay_for_attempt(attempt);
        warn!(
            backend = backend_name,
            attempt = attempt + 1,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "retrying after transient error"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
