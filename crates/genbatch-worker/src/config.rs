//! Runner configuration.

use std::time::Duration;

use crate::error::{RunnerError, RunnerResult};

/// How the delay before a retry grows with the attempt number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    /// Same delay before every retry
    Fixed,
    /// Delay doubles per attempt, capped at `max_backoff`
    Exponential,
}

impl BackoffKind {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "fixed" => Some(BackoffKind::Fixed),
            "exponential" | "exp" => Some(BackoffKind::Exponential),
            _ => None,
        }
    }
}

/// Batch runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Minimum gap between the starts of consecutive dispatches
    pub min_interval: Duration,
    /// Retries allowed after the first attempt of a rate-limited item
    pub max_retries: u32,
    /// Delay before a retry (base delay when exponential)
    pub retry_backoff: Duration,
    pub backoff: BackoffKind,
    /// Upper bound for exponential backoff
    pub max_backoff: Duration,
    /// Upper bound on a single external call
    pub operation_timeout: Duration,
    /// Message fragments that mark a failure as the service's rate-limit condition
    pub rate_limit_signatures: Vec<String>,
    /// Progress events buffered per subscriber
    pub event_buffer: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(12), // 5 requests per minute
            max_retries: 3,
            retry_backoff: Duration::from_secs(15), // one rate-limit reset window
            backoff: BackoffKind::Fixed,
            max_backoff: Duration::from_secs(120),
            operation_timeout: Duration::from_secs(120),
            rate_limit_signatures: vec!["rate_limit_exceeded".to_string()],
            event_buffer: 256,
        }
    }
}

impl RunnerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            min_interval: Duration::from_millis(
                std::env::var("GENBATCH_MIN_INTERVAL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(12_000),
            ),
            max_retries: std::env::var("GENBATCH_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            retry_backoff: Duration::from_millis(
                std::env::var("GENBATCH_RETRY_BACKOFF_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(15_000),
            ),
            backoff: std::env::var("GENBATCH_BACKOFF")
                .ok()
                .and_then(|s| BackoffKind::parse(&s))
                .unwrap_or(BackoffKind::Fixed),
            max_backoff: Duration::from_millis(
                std::env::var("GENBATCH_MAX_BACKOFF_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120_000),
            ),
            operation_timeout: Duration::from_secs(
                std::env::var("GENBATCH_OPERATION_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120),
            ),
            rate_limit_signatures: std::env::var("GENBATCH_RATE_LIMIT_SIGNATURES")
                .map(|s| {
                    s.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.rate_limit_signatures),
            event_buffer: std::env::var("GENBATCH_EVENT_BUFFER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.event_buffer),
        }
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    pub fn with_exponential_backoff(mut self, max_backoff: Duration) -> Self {
        self.backoff = BackoffKind::Exponential;
        self.max_backoff = max_backoff;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Reject settings the runner cannot honour.
    ///
    /// A retry always passes back through the rate limiter, so the effective
    /// retry gap is never shorter than `min_interval` even when
    /// `retry_backoff` is.
    pub fn validate(&self) -> RunnerResult<()> {
        if self.operation_timeout.is_zero() {
            return Err(RunnerError::config_error("operation timeout must be non-zero"));
        }
        if self.backoff == BackoffKind::Exponential && self.max_backoff < self.retry_backoff {
            return Err(RunnerError::config_error(format!(
                "max backoff {:?} is below the base backoff {:?}",
                self.max_backoff, self.retry_backoff
            )));
        }
        if self.rate_limit_signatures.iter().any(|s| s.is_empty()) {
            return Err(RunnerError::config_error("rate limit signatures must be non-empty"));
        }
        Ok(())
    }
}
