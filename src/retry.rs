//! Retry utilities with exponential backoff
//!
//! Retries apply only to opening a request: once a response has started
//! streaming, its events have been shown to the host and cannot be replayed.
//! The controller therefore wraps the `post_stream` + status check in
//! [`retry_with_backoff_conditional`] when [`AgentOptions::retry`] is set.
//!
//! # Examples
//!
//! ```rust,no_run
//! use modelwar_agent::retry::{retry_with_backoff_conditional, RetryConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RetryConfig::default()
//!     .with_max_attempts(3)
//!     .with_initial_delay(Duration::from_secs(1));
//!
//! let result = retry_with_backoff_conditional(config, || async {
//!     // Timeouts, 429 and 5xx are retried; anything else is returned at once
//!     Ok::<_, modelwar_agent::Error>(42)
//! }).await?;
//! # Ok(())
//! # }
//! ```
//!
//! [`AgentOptions::retry`]: crate::AgentOptions::retry

use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_attempts: u32,

    /// Initial delay before first retry
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (e.g., 2.0 doubles the delay each time)
    pub backoff_multiplier: f64,

    /// Add random jitter to prevent thundering herd (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum number of attempts
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set initial delay
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set jitter factor (0.0 to 1.0)
    pub fn with_jitter_factor(mut self, jitter: f64) -> Self {
        self.jitter_factor = jitter.clamp(0.0, 1.0);
        self
    }

    /// Calculate delay for a given attempt with exponential backoff and jitter
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay_ms = self.initial_delay.as_millis() as f64;
        let exponential_delay = base_delay_ms * self.backoff_multiplier.powi(attempt as i32);

        // Cap at max delay
        let capped_delay = exponential_delay.min(self.max_delay.as_millis() as f64);

        // Add jitter
        let jitter_range = capped_delay * self.jitter_factor;
        let jitter = rand::random::<f64>() * jitter_range;
        let final_delay = capped_delay + jitter - (jitter_range / 2.0);

        Duration::from_millis(final_delay.max(0.0) as u64)
    }
}

/// Determine if an error is retryable
///
/// Transient conditions are retryable: network failures, timeouts, rate
/// limiting (429), server errors (5xx, including the 529 overload status)
/// and `overloaded_error` stream errors. Client errors (other 4xx) and
/// configuration or tool errors are not.
pub fn is_retryable_error(error: &Error) -> bool {
    match error {
        Error::Http(_) => true,
        Error::Timeout => true,
        Error::Api { status, .. } => *status == 429 || (500..600).contains(status),
        Error::Stream(msg) => msg.contains("overloaded"),
        _ => false,
    }
}

/// Retry an async operation with exponential backoff, only retrying on
/// errors [`is_retryable_error`] accepts
///
/// Returns the first success, the first non-retryable error, or the last
/// error once `max_attempts` is used up.
pub async fn retry_with_backoff_conditional<F, Fut, T>(
    config: RetryConfig,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..config.max_attempts {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                // Check if error is retryable
                if !is_retryable_error(&err) {
                    return Err(err);
                }

                last_error = Some(err);

                // Don't sleep after the last attempt
                if attempt < config.max_attempts - 1 {
                    let delay = config.calculate_delay(attempt);
                    sleep(delay).await;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::other("Retry failed with no error")))
}
