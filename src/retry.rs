//! Retry with exponential backoff for opening a response stream.
//!
//! Only the request step of a turn is ever retried. Once a stream has yielded
//! an event, replaying it would duplicate text in the message store, so a
//! failure after that point ends the turn instead.
//!
//! # Examples
//!
//! ```rust,no_run
//! use streamchat::retry::{retry_with_backoff_conditional, RetryConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> streamchat::Result<()> {
//! let config = RetryConfig::default()
//!     .with_max_attempts(3)
//!     .with_initial_delay(Duration::from_millis(250));
//!
//! let status = retry_with_backoff_conditional(config, || async {
//!     Ok::<_, streamchat::Error>(200)
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    pub initial_delay: Duration,

    pub max_delay: Duration,

    /// Growth factor per attempt (2.0 doubles the delay)
    pub backoff_multiplier: f64,

    /// Random spread applied to each delay, 0.0 to 1.0
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set total attempts. Values below 1 are raised to 1.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set jitter factor (clamped to 0.0..=1.0)
    pub fn with_jitter_factor(mut self, jitter: f64) -> Self {
        self.jitter_factor = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry number `attempt` (zero-based), capped and jittered
    pub(crate) fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let capped = (base_ms * self.backoff_multiplier.powi(exponent))
            .min(self.max_delay.as_millis() as f64);

        let jitter_range = capped * self.jitter_factor;
        let jitter = rand::random::<f64>() * jitter_range - jitter_range / 2.0;

        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }
}

/// Retries `operation` on any error until it succeeds or attempts run out.
///
/// Returns the last error when every attempt failed.
pub async fn retry_with_backoff<F, Fut, T>(config: RetryConfig, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_when(config, |_| true, operation).await
}

/// Like [`retry_with_backoff`], but gives up at once on errors that
/// [`is_retryable_error`] rejects.
pub async fn retry_with_backoff_conditional<F, Fut, T>(
    config: RetryConfig,
    operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_when(config, is_retryable_error, operation).await
}

async fn retry_when<F, Fut, T, P>(config: RetryConfig, should_retry: P, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&Error) -> bool,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt + 1 < attempts && should_retry(&err) => {
                let delay = config.calculate_delay(attempt);
                log::debug!(
                    "attempt {}/{} failed ({}); retrying in {:?}",
                    attempt + 1,
                    attempts,
                    err,
                    delay
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Whether an error from opening a stream is worth another attempt.
///
/// Connection-level failures, timeouts, rate limiting (429) and 5xx responses
/// are transient. Everything else (4xx, bad configuration, bad input) is not.
pub fn is_retryable_error(error: &Error) -> bool {
    match error {
        Error::Http(e) => e.status().is_none_or(|status| {
            status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        }),
        Error::Timeout | Error::Transport(_) | Error::Stream(_) => true,
        Error::Api(message) => api_status(message).is_some_and(|code| code == 429 || code >= 500),
        _ => false,
    }
}

/// First three-digit HTTP status in an API error message
fn api_status(message: &str) -> Option<u16> {
    message
        .split(|c: char| !c.is_ascii_digit())
        .filter(|token| token.len() == 3)
        .filter_map(|token| token.parse::<u16>().ok())
        .find(|code| (100..600).contains(code))
}
