//! Retry wrapper around fallible AI provider calls.
//!
//! Classifies errors as retryable or terminal, then retries with
//! exponential backoff plus jitter up to a configured attempt count,
//! short-circuiting on cancellation and logging at each retry.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Whether a failure should be retried or surfaced immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClassification {
    Retryable,
    Terminal,
}

/// HTTP status codes treated as transient for provider calls.
const RETRYABLE_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// Text fragments that mark a provider error message as transient when no
/// status code is available (e.g. a transport-level error).
const RETRYABLE_MESSAGE_FRAGMENTS: [&str; 10] = [
    "rate limit",
    "quota exceeded",
    "too many requests",
    "service unavailable",
    "internal server error",
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "temporary failure",
];

/// Decide whether an error is worth retrying, given an optional HTTP status
/// and the error's display text.
pub fn classify_error(status: Option<u16>, message: &str) -> RetryClassification {
    if let Some(code) = status {
        if RETRYABLE_STATUS_CODES.contains(&code) {
            return RetryClassification::Retryable;
        }
        return RetryClassification::Terminal;
    }

    let lower = message.to_lowercase();
    if RETRYABLE_MESSAGE_FRAGMENTS.iter().any(|frag| lower.contains(frag)) {
        RetryClassification::Retryable
    } else {
        RetryClassification::Terminal
    }
}

/// Same as [`classify_error`] but honors a provider's explicit `retryable`
/// flag first, so an error wrapped via `ProviderError::retryable(...)` is
/// never downgraded to terminal by a message/status that doesn't match.
pub fn classify_provider_error(err: &crate::provider::ProviderError) -> RetryClassification {
    if err.retryable {
        return RetryClassification::Retryable;
    }
    classify_error(err.status, &err.message)
}

/// Backoff policy: delay doubles each attempt from `initial_delay`, capped
/// at `max_delay`, with up to `jitter_fraction` of the computed delay added
/// or subtracted at random to avoid synchronized retry storms.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub jitter_fraction: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter_fraction: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Phase 1 default: 3 attempts, 2s initial backoff capped at 30s, jitter 0.1.
    pub fn phase1_default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            jitter_fraction: 0.1,
        }
    }

    /// Phase 2 default: 2 attempts, 1s initial backoff capped at 10s, jitter 0.1.
    pub fn phase2_default() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            jitter_fraction: 0.1,
        }
    }

    /// Delay before the given zero-indexed retry attempt (0 = first retry,
    /// after the initial call already failed once).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as u64;
        let capped_ms = base_ms
            .saturating_mul(1u64 << attempt.min(20))
            .min(self.max_delay.as_millis() as u64);

        let jitter_span = (capped_ms as f64 * self.jitter_fraction) as i64;
        let jitter = if jitter_span > 0 {
            rand::thread_rng().gen_range(-jitter_span..=jitter_span)
        } else {
            0
        };

        let jittered = (capped_ms as i64 + jitter).max(0) as u64;
        Duration::from_millis(jittered)
    }
}

/// Runs `op`, retrying on retryable failures per `policy`. `classify` maps
/// an error to a retry decision; the caller supplies it because the error
/// type varies by provider implementation.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &BackoffPolicy,
    mut classify: impl FnMut(&E) -> RetryClassification,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let classification = classify(&err);
                if classification == RetryClassification::Terminal || attempt + 1 >= policy.max_attempts {
                    error!(attempt, %err, "giving up after exhausting retries or terminal error");
                    return Err(err);
                }

                let delay = policy.delay_for_attempt(attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, %err, "retrying after transient failure");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
