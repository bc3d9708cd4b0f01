use std::time::Duration;

use serde::Deserialize;

/// Controls the retry behavior of a single logical fetch operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of loader invocations per operation, including the
    /// first one.
    pub max_attempts: u32,

    /// Delay before the first retry. Doubles on every further retry.
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,

    /// Upper bound for the backoff delay, if any.
    #[serde(with = "humantime_serde")]
    pub max_delay: Option<Duration>,

    /// Time budget for a single attempt. Expiry counts as a transient
    /// failure and is retried.
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Some(Duration::from_secs(30)),
            timeout: None,
        }
    }
}

/// Per-fetch options, used as the cache-wide defaults and overridable per
/// call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FetchOptions {
    /// Time-to-live for cached values. A stale entry reads as absent and
    /// triggers a fresh fetch.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Retry behavior for operations started with these options.
    pub retry: RetryPolicy,

    /// Whether a wake signal refetches the observed key.
    pub refetch_on_wake: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            refetch_on_wake: true,
        }
    }
}
