//! Retry classification and backoff for transient platform failures.
//!
//! Failed requests are classified into a [`Failure`] kind; the
//! [`RetryPolicy`] decides whether another attempt is worth it and computes
//! the exponential backoff delay. Retry loops live at the component
//! boundaries (discovery controller, EPUB builder), never inside the client.

use std::time::Duration;

use rand::Rng;
use tracing::debug;

use super::FetchError;

/// Default maximum retry attempts.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff (1 second).
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap (32 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Maximum jitter added to delays (500ms).
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Classification of a failed platform request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Temporary failure that may succeed on retry (timeouts, 5xx).
    Transient,

    /// Failure that won't succeed regardless of retries (404, bad URL).
    Permanent,

    /// Authentication required; retrying with the same cookies won't help.
    NeedsAuth,

    /// Server rate limiting (HTTP 429); retried with backoff.
    RateLimited,
}

/// Decision on whether to retry a failed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// Delay formula: `min(base_delay * multiplier^(attempt-1), max_delay) +
/// jitter`. With defaults the delays are approximately 1s, 2s, 4s.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with a custom attempt cap, defaults elsewhere.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides whether the attempt that just failed should be retried.
    ///
    /// `attempt` is the 1-indexed number of the attempt that failed.
    #[must_use]
    pub fn should_retry(&self, failure: Failure, attempt: u32) -> RetryDecision {
        match failure {
            Failure::Permanent => {
                return RetryDecision::DoNotRetry {
                    reason: "permanent failure - retry would not help".to_string(),
                };
            }
            Failure::NeedsAuth => {
                return RetryDecision::DoNotRetry {
                    reason: "authentication required - retry with the same cookies would not help"
                        .to_string(),
                };
            }
            Failure::Transient | Failure::RateLimited => {}
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Calculates the backoff delay for a given failed attempt.
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let multiplier = f64::from(self.backoff_multiplier);

        // attempt 1 failing waits base * 2^0
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * multiplier.powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_ms as u64) + self.jitter()
    }

    /// Random jitter between 0 and [`MAX_JITTER`] to avoid thundering herd
    /// when several workers back off at once.
    fn jitter(&self) -> Duration {
        let mut rng = rand::thread_rng();
        let jitter_ms = rng.gen_range(0..=MAX_JITTER.as_millis() as u64);
        Duration::from_millis(jitter_ms)
    }
}

/// Classifies a fetch error for retry decisions.
///
/// | Condition | Classification |
/// |-----------|----------------|
/// | 401 / 403 | `NeedsAuth` |
/// | 404 / 410 / other 4xx | `Permanent` |
/// | 408 | `Transient` |
/// | 429 | `RateLimited` |
/// | 5xx | `Transient` |
/// | timeout / network | `Transient` |
/// | invalid URL / decode / IO | `Permanent` |
#[must_use]
pub fn classify_error(error: &FetchError) -> Failure {
    match error {
        FetchError::Status { status, .. } => classify_status(*status),
        FetchError::Timeout { .. } | FetchError::Network { .. } => Failure::Transient,
        FetchError::InvalidUrl { .. } | FetchError::Decode { .. } | FetchError::Io { .. } => {
            Failure::Permanent
        }
    }
}

/// Classifies an HTTP status code.
fn classify_status(status: u16) -> Failure {
    match status {
        401 | 403 => Failure::NeedsAuth,
        408 => Failure::Transient,
        429 => Failure::RateLimited,
        400..=499 => Failure::Permanent,
        500..=599 => Failure::Transient,
        _ => Failure::Permanent,
    }
}
