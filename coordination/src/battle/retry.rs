//! Bounded retry with exponential backoff for model backend calls.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Failure of a single model backend call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Connection-level failure (DNS, refused, reset, broken pipe).
    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The backend answered with no text.
    #[error("backend returned an empty response")]
    Empty,

    /// Backend misconfiguration (bad key, unknown model, missing setting).
    #[error("configuration error: {0}")]
    Config(String),

    /// Anything else, classified by its message.
    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Whether another attempt might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) | Self::Empty => true,
            Self::Http { status, .. } => *status == 429 || (500..600).contains(status),
            Self::Config(_) => false,
            Self::Other(msg) => is_transient_message(msg),
        }
    }
}

/// Classify a provider error message as transient (connection failures,
/// rate limits, proxy hiccups) or permanent (auth, schema mismatches).
pub fn is_transient_message(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    msg.contains("502")
        || msg.contains("503")
        || msg.contains("504")
        || msg.contains("429")
        || lower.contains("rate limit")
        || lower.contains("overloaded")
        || lower.contains("connection")
        || lower.contains("timed out")
        || lower.contains("timeout")
        || lower.contains("error sending request")
        || lower.contains("broken pipe")
        || lower.contains("reset by peer")
        // Proxies occasionally return empty-but-200 payloads.
        || lower.contains("no message or tool call (empty)")
        || lower.contains("response contained no message")
}

/// Retry settings for one backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first (minimum 1).
    pub max_attempts: u32,
    /// Delay after the first failure; doubles on each further failure.
    pub base_backoff: Duration,
    /// Per-attempt timeout.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(2),
            call_timeout: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no backoff.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` is 1-based.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(2u32.pow(exp))
    }
}

/// All attempts failed, or a non-transient error stopped retrying.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("gave up after {attempts} attempt(s): {source}")]
pub struct RetryExhausted {
    pub attempts: u32,
    pub source: BackendError,
}

/// Run `call` under `policy`.
///
/// Each attempt is bounded by `call_timeout`; a blank response counts as
/// [`BackendError::Empty`]. Only transient errors are retried.
pub async fn call_with_retry<F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut call: F,
) -> Result<String, RetryExhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String, BackendError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = match tokio::time::timeout(policy.call_timeout, call()).await {
            Ok(Ok(text)) if text.trim().is_empty() => Err(BackendError::Empty),
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(policy.call_timeout)),
        };

        let err = match result {
            Ok(text) => return Ok(text),
            Err(e) => e,
        };

        if !err.is_transient() || attempt >= max_attempts {
            return Err(RetryExhausted {
                attempts: attempt,
                source: err,
            });
        }

        let backoff = policy.backoff_after(attempt);
        warn!(
            call = label,
            attempt,
            max_attempts,
            backoff_secs = backoff.as_secs_f64(),
            error = %err,
            "Transient backend error, retrying"
        );
        tokio::time::sleep(backoff).await;
    }
}
