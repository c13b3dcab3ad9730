//! Retry policy for throttled items.
//!
//! Only the external service's rate-limit condition is worth retrying: the
//! limit resets after a known window, so waiting it out and trying again is
//! expected to succeed. Every other failure is recorded immediately.

use std::time::Duration;

use genbatch_models::OperationError;

use crate::config::{BackoffKind, RunnerConfig};

/// Classification of an operation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Retryable,
    Terminal,
}

/// What the runner should do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then dispatch the same item again.
    Retry { delay: Duration },
    /// Record the item as failed with the last error.
    Fail { exhausted: bool },
}

/// Delay schedule between retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// `base * 2^(attempt - 1)`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay after the given 1-based attempt failed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => {
                let exponent = attempt.saturating_sub(1).min(31);
                base.saturating_mul(2u32.pow(exponent)).min(max)
            }
        }
    }
}

/// Decides whether and when a failed item is retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: Backoff,
    rate_limit_signatures: Vec<String>,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Backoff) -> Self {
        Self {
            max_retries,
            backoff,
            rate_limit_signatures: vec!["rate_limit_exceeded".to_string()],
        }
    }

    pub fn from_config(config: &RunnerConfig) -> Self {
        let backoff = match config.backoff {
            BackoffKind::Fixed => Backoff::Fixed(config.retry_backoff),
            BackoffKind::Exponential => Backoff::Exponential {
                base: config.retry_backoff,
                max: config.max_backoff,
            },
        };
        Self {
            max_retries: config.max_retries,
            backoff,
            rate_limit_signatures: config.rate_limit_signatures.clone(),
        }
    }

    pub fn with_signatures(mut self, signatures: Vec<String>) -> Self {
        self.rate_limit_signatures = signatures;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Retryable only for the service's rate-limit condition: an explicit
    /// `RateLimited` error, or a failure whose message carries one of the
    /// configured rate-limit signatures. Timeouts are never retried.
    pub fn classify(&self, error: &OperationError) -> FailureClass {
        match error {
            OperationError::RateLimited { .. } => FailureClass::Retryable,
            OperationError::TimedOut { .. } => FailureClass::Terminal,
            OperationError::Terminal { .. } => {
                let message = error.message();
                if self
                    .rate_limit_signatures
                    .iter()
                    .any(|signature| message.contains(signature.as_str()))
                {
                    FailureClass::Retryable
                } else {
                    FailureClass::Terminal
                }
            }
        }
    }

    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.backoff.delay_for_attempt(attempt)
    }

    /// Decide what follows the failure of attempt number `attempts` (1-based).
    ///
    /// A server retry-after hint can lengthen the delay but never shorten it.
    pub fn decide(&self, error: &OperationError, attempts: u32) -> RetryDecision {
        match self.classify(error) {
            FailureClass::Terminal => RetryDecision::Fail { exhausted: false },
            FailureClass::Retryable if attempts <= self.max_retries => {
                let delay = self.next_delay(attempts);
                let delay = error.retry_after().map_or(delay, |hint| delay.max(hint));
                RetryDecision::Retry { delay }
            }
            FailureClass::Retryable => RetryDecision::Fail { exhausted: true },
        }
    }
}

/// Transient state for one item's retry loop.
#[derive(Debug, Clone, Default)]
pub struct RetryContext {
    /// Attempts made in this loop so far
    pub attempt_number: u32,
    pub last_error: Option<OperationError>,
    pub next_delay: Option<Duration>,
}

impl RetryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_attempt(&mut self) {
        self.attempt_number += 1;
        self.next_delay = None;
    }

    pub fn record_failure(&mut self, error: OperationError, next_delay: Option<Duration>) {
        self.last_error = Some(error);
        self.next_delay = next_delay;
    }

    /// Whether the loop is still before its first dispatch.
    pub fn is_first_attempt_pending(&self) -> bool {
        self.attempt_number == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_policy() -> RetryPolicy {
        RetryPolicy::new(3, Backoff::Fixed(Duration::from_secs(15)))
    }

    #[test]
    fn test_classification() {
        let policy = fixed_policy();
        assert_eq!(
            policy.classify(&OperationError::rate_limited("429")),
            FailureClass::Retryable
        );
        assert_eq!(
            policy.classify(&OperationError::terminal("Error: rate_limit_exceeded for images")),
            FailureClass::Retryable
        );
        assert_eq!(
            policy.classify(&OperationError::terminal("connection reset by peer")),
            FailureClass::Terminal
        );
        assert_eq!(
            policy.classify(&OperationError::timed_out(Duration::from_secs(120))),
            FailureClass::Terminal
        );
    }

    #[test]
    fn test_custom_signatures() {
        let policy = fixed_policy().with_signatures(vec!["quota".to_string()]);
        assert_eq!(
            policy.classify(&OperationError::terminal("quota exhausted")),
            FailureClass::Retryable
        );
        assert_eq!(
            policy.classify(&OperationError::terminal("rate_limit_exceeded")),
            FailureClass::Terminal
        );
    }

    #[test]
    fn test_signatures_match_raw_message() {
        // The display prefix is not part of what the service reported
        let policy = fixed_policy().with_signatures(vec!["Operation failed".to_string()]);
        assert_eq!(
            policy.classify(&OperationError::terminal("bad prompt")),
            FailureClass::Terminal
        );

        let policy = fixed_policy().with_signatures(vec!["Too Many Requests".to_string()]);
        let err = OperationError::terminal("HTTP 429 Too Many Requests");
        assert_eq!(policy.classify(&err), FailureClass::Retryable);
        assert_eq!(
            policy.decide(&err, 1),
            RetryDecision::Retry {
                delay: Duration::from_secs(15)
            }
        );
    }

    #[test]
    fn test_retry_bound() {
        let policy = fixed_policy();
        let err = OperationError::rate_limited("rate_limit_exceeded");

        for attempts in 1..=3 {
            assert_eq!(
                policy.decide(&err, attempts),
                RetryDecision::Retry {
                    delay: Duration::from_secs(15)
                }
            );
        }
        assert_eq!(policy.decide(&err, 4), RetryDecision::Fail { exhausted: true });
    }

    #[test]
    fn test_terminal_never_retried() {
        let policy = fixed_policy();
        let err = OperationError::terminal("invalid size");
        assert_eq!(policy.decide(&err, 1), RetryDecision::Fail { exhausted: false });
    }

    #[test]
    fn test_retry_after_only_lengthens() {
        let policy = fixed_policy();
        let longer = OperationError::rate_limited_after("slow down", Duration::from_secs(40));
        assert_eq!(
            policy.decide(&longer, 1),
            RetryDecision::Retry {
                delay: Duration::from_secs(40)
            }
        );

        let shorter = OperationError::rate_limited_after("slow down", Duration::from_secs(2));
        assert_eq!(
            policy.decide(&shorter, 1),
            RetryDecision::Retry {
                delay: Duration::from_secs(15)
            }
        );
    }

    #[test]
    fn test_exponential_delay_calculation() {
        let backoff = Backoff::Exponential {
            base: Duration::from_secs(15),
            max: Duration::from_secs(100),
        };
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_secs(15));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_secs(30));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_secs(60));
        assert_eq!(backoff.delay_for_attempt(4), Duration::from_secs(100));
        assert_eq!(backoff.delay_for_attempt(40), Duration::from_secs(100));
    }

    #[test]
    fn test_from_config() {
        let config = RunnerConfig::default()
            .with_max_retries(1)
            .with_retry_backoff(Duration::from_secs(5))
            .with_exponential_backoff(Duration::from_secs(20));
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_retries(), 1);
        assert_eq!(policy.next_delay(2), Duration::from_secs(10));
    }

    #[test]
    fn test_retry_context() {
        let mut ctx = RetryContext::new();
        assert!(ctx.is_first_attempt_pending());
        ctx.begin_attempt();
        ctx.record_failure(OperationError::rate_limited("x"), Some(Duration::from_secs(15)));
        assert!(!ctx.is_first_attempt_pending());
        assert_eq!(ctx.next_delay, Some(Duration::from_secs(15)));
        ctx.begin_attempt();
        assert_eq!(ctx.attempt_number, 2);
        assert!(ctx.next_delay.is_none());
        assert!(ctx.last_error.is_some());
    }
}
