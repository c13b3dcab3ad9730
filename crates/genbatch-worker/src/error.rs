//! Runner error types.

use thiserror::Error;

use genbatch_models::{BatchId, RunPhase};
use genbatch_queue::QueueError;

pub type RunnerResult<T> = Result<T, RunnerError>;

#[derive(Debug, Error)]
pub enum RunnerError {
    /// Raised at a suspension point after the run was cancelled.
    /// Unwinds the run loop; never recorded as an item failure.
    #[error("Run cancelled")]
    Cancelled,

    #[error("Batch {0} is still running")]
    AlreadyRunning(BatchId),

    #[error("No batch has been started")]
    NoActiveRun,

    #[error("Cannot {action} a run that is {phase}")]
    InvalidTransition {
        phase: RunPhase,
        action: &'static str,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

impl RunnerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_transition(phase: RunPhase, action: &'static str) -> Self {
        Self::InvalidTransition { phase, action }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunnerError::Cancelled)
    }
}
