//! Retry decisions keyed on HTTP semantics
//!
//! The policy is a pure function of its inputs apart from the jitter applied to
//! backoff waits. It never sleeps itself; the orchestrator does that.

use crate::config::RetryConfig;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Statuses that are never retried and count toward circuit breaking
pub const NON_RETRYABLE_STATUSES: [u16; 4] = [401, 403, 404, 410];

/// Statuses retried with backoff
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Returns true for access-denial / not-found statuses
pub fn is_non_retryable_status(status: u16) -> bool {
    NON_RETRYABLE_STATUSES.contains(&status)
}

/// Returns true for rate-limit / transient server statuses
pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUSES.contains(&status)
}

/// Classification of a fetch that produced no HTTP status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Timeout,
    ConnectionReset,
    Dns,
    Connect,
    Tls,
    Body,
    Cancelled,
    Other,
}

impl ErrorClass {
    /// Connection-level failures are retried like transient statuses
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::ConnectionReset | Self::Dns | Self::Connect
        )
    }

    pub fn as_code(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ConnectionReset => "connection_reset",
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Body => "body",
            Self::Cancelled => "cancelled",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_code())
    }
}

/// Why a retry decision came out the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryReason {
    /// 2xx, nothing to retry
    Success,
    /// 401/403/404/410
    NonRetryable,
    /// 429/500/502/503/504
    RetryableStatus,
    /// Timeout, reset, DNS or connect failure
    ConnectionError,
    /// TLS, body or other client-side failure
    NonRetryableError,
    /// Attempt cap reached
    MaxAttempts,
    /// Server asked for a wait longer than the configured ceiling
    RetryAfterTooLong,
    /// Any other status, or no information at all
    Unclassified,
}

impl RetryReason {
    pub fn as_code(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NonRetryable => "non_retryable",
            Self::RetryableStatus => "retryable_status",
            Self::ConnectionError => "connection_error",
            Self::NonRetryableError => "non_retryable_error",
            Self::MaxAttempts => "max_attempts",
            Self::RetryAfterTooLong => "retry_after_too_long",
            Self::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_code())
    }
}

/// Outcome of [`RetryPolicy::decide`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub reason: RetryReason,
    /// Time to sleep before the next attempt; zero when not retrying
    pub wait: Duration,
}

impl RetryDecision {
    fn stop(reason: RetryReason) -> Self {
        Self {
            should_retry: false,
            reason,
            wait: Duration::ZERO,
        }
    }

    pub fn wait_seconds(&self) -> f64 {
        self.wait.as_secs_f64()
    }
}

/// Decides whether a failed attempt should be retried and how long to wait
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts_per_url
    }

    /// Longest wait before a retry
    pub fn max_wait(&self) -> Duration {
        Duration::try_from_secs_f64(self.config.max_wait_secs.max(0.0)).unwrap_or(Duration::MAX)
    }

    /// Decides what to do after attempt number `attempt` (1-based)
    ///
    /// # Arguments
    ///
    /// * `status` - HTTP status of the attempt, if one was received
    /// * `attempt` - Number of attempts made so far, including this one
    /// * `error` - Classification of a transport failure, if there was one
    /// * `retry_after` - Raw `Retry-After` header value (delta-seconds or HTTP-date)
    ///
    /// # Returns
    ///
    /// A decision whose `should_retry` and `reason` depend only on the inputs.
    /// `wait` carries jitter but always lies in `[0, max_wait_secs]`.
    pub fn decide(
        &self,
        status: Option<u16>,
        attempt: u32,
        error: Option<ErrorClass>,
        retry_after: Option<&str>,
    ) -> RetryDecision {
        match status {
            Some(code) if (200..300).contains(&code) => {
                return RetryDecision::stop(RetryReason::Success)
            }
            Some(code) if is_non_retryable_status(code) => {
                return RetryDecision::stop(RetryReason::NonRetryable)
            }
            _ => {}
        }

        if attempt >= self.config.max_attempts_per_url {
            return RetryDecision::stop(RetryReason::MaxAttempts);
        }

        let reason = match (status, error) {
            (Some(code), _) if is_retryable_status(code) => RetryReason::RetryableStatus,
            (Some(_), _) => return RetryDecision::stop(RetryReason::Unclassified),
            (None, Some(class)) if class.is_retryable() => RetryReason::ConnectionError,
            (None, Some(_)) => return RetryDecision::stop(RetryReason::NonRetryableError),
            (None, None) => return RetryDecision::stop(RetryReason::Unclassified),
        };

        let max_wait = self.max_wait();
        let mut wait = self.jittered(self.backoff(attempt));

        if let Some(requested) = retry_after.and_then(|v| parse_retry_after(v, Utc::now())) {
            if requested > max_wait {
                tracing::debug!(
                    "Retry-After of {:?} exceeds the {:?} ceiling, giving up",
                    requested,
                    max_wait
                );
                return RetryDecision::stop(RetryReason::RetryAfterTooLong);
            }
            if requested > wait {
                wait = requested;
            }
        }

        RetryDecision {
            should_retry: true,
            reason,
            wait: wait.min(max_wait),
        }
    }

    /// Exponential backoff without jitter: `base * 2^(attempt-1)`, capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.config.base_backoff_secs * 2f64.powi(exponent);
        Duration::from_secs_f64(secs.min(self.config.max_backoff_secs).max(0.0))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let fraction = self.config.jitter_fraction.clamp(0.0, 1.0);
        if fraction == 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = 1.0 + rand::rng().random_range(-fraction..=fraction);
        Duration::from_secs_f64((delay.as_secs_f64() * factor).max(0.0))
    }
}

/// Parses a `Retry-After` value relative to `now`
///
/// Accepts delta-seconds (`"120"`, `"1.5"`) and HTTP-dates
/// (`"Wed, 21 Oct 2015 07:28:00 GMT"`). Dates in the past yield zero.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    if let Ok(secs) = value.parse::<f64>() {
        // Rejects negatives, NaN, infinities and values beyond Duration::MAX
        return Duration::try_from_secs_f64(secs).ok();
    }

    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.with_timezone(&Utc) - now;
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}
