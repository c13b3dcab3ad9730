//! Batch run lifecycle phases.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Phase of a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Created, nothing dispatched yet
    #[default]
    Idle,
    /// Dispatching items
    Running,
    /// Halted after the in-flight item resolved
    Paused,
    /// Aborted; cannot be resumed
    Cancelled,
    /// Every item resolved
    Completed,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Idle => "idle",
            RunPhase::Running => "running",
            RunPhase::Paused => "paused",
            RunPhase::Cancelled => "cancelled",
            RunPhase::Completed => "completed",
        }
    }

    /// Check if the run is finished (no more dispatches will ever happen).
    pub fn is_finished(&self) -> bool {
        matches!(self, RunPhase::Cancelled | RunPhase::Completed)
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
