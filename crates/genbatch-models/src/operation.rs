//! The external generation operation seam.
//!
//! The batch core only knows that an operation takes a payload and either
//! yields an output or fails; failures must at least separate the external
//! service's rate-limit condition from everything else.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type OperationResult<T> = Result<T, OperationError>;

/// Failure reported by the external operation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationError {
    /// The external service throttled the request.
    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        /// Server-provided hint for when the limit resets.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_after_ms: Option<u64>,
    },

    /// Validation, network, or business-logic failure.
    #[error("Operation failed: {message}")]
    Terminal { message: String },

    /// The operation did not finish within the configured timeout.
    #[error("Operation timed out after {timeout_ms}ms")]
    TimedOut { timeout_ms: u64 },
}

impl OperationError {
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited {
            message: msg.into(),
            retry_after_ms: None,
        }
    }

    pub fn rate_limited_after(msg: impl Into<String>, retry_after: Duration) -> Self {
        Self::RateLimited {
            message: msg.into(),
            retry_after_ms: Some(retry_after.as_millis() as u64),
        }
    }

    pub fn terminal(msg: impl Into<String>) -> Self {
        Self::Terminal {
            message: msg.into(),
        }
    }

    pub fn timed_out(timeout: Duration) -> Self {
        Self::TimedOut {
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Whether the service explicitly flagged this as a rate-limit response.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, OperationError::RateLimited { .. })
    }

    /// Retry-after hint carried by a rate-limit response.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            OperationError::RateLimited {
                retry_after_ms: Some(ms),
                ..
            } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }

    /// Raw message, used for signature matching.
    pub fn message(&self) -> String {
        match self {
            OperationError::RateLimited { message, .. } => message.clone(),
            OperationError::Terminal { message } => message.clone(),
            OperationError::TimedOut { .. } => self.to_string(),
        }
    }
}

/// An asynchronous external operation invoked once per dispatch.
#[async_trait]
pub trait GenerationOperation: Send + Sync {
    type Payload: Clone + Send + Sync + 'static;
    type Output: Clone + Send + Sync + 'static;

    /// Name used in logs and metrics.
    fn name(&self) -> &'static str {
        "generation"
    }

    async fn execute(&self, payload: &Self::Payload) -> OperationResult<Self::Output>;
}

/// Type-erased, shareable operation for a payload/output pair.
pub type SharedOperation<P, R> = Arc<dyn GenerationOperation<Payload = P, Output = R>>;

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl GenerationOperation for Echo {
        type Payload = String;
        type Output = String;

        async fn execute(&self, payload: &String) -> OperationResult<String> {
            if payload.is_empty() {
                return Err(OperationError::terminal("empty prompt"));
            }
            Ok(payload.to_uppercase())
        }
    }

    #[test]
    fn test_retry_after_hint() {
        let err = OperationError::rate_limited_after("slow down", Duration::from_secs(20));
        assert!(err.is_rate_limited());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(20)));
        assert_eq!(OperationError::terminal("x").retry_after(), None);
    }

    #[test]
    fn test_error_serialization_is_tagged() {
        let json = serde_json::to_value(OperationError::terminal("bad prompt")).unwrap();
        assert_eq!(json["kind"], "terminal");
        assert_eq!(json["message"], "bad prompt");
    }

    #[test]
    fn test_shared_operation_dispatch() {
        let op: SharedOperation<String, String> = Arc::new(Echo);
        let out = tokio_test::block_on(op.execute(&"paris".to_string()));
        assert_eq!(out, Ok("PARIS".to_string()));
        let err = tokio_test::block_on(op.execute(&String::new()));
        assert!(matches!(err, Err(OperationError::Terminal { .. })));
    }
}
