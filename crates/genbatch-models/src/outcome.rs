//! Per-item outcome tracking.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::operation::OperationError;

/// Processing status of a single item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Not dispatched yet
    #[default]
    Pending,
    /// Dispatched, possibly mid-retry
    Running,
    /// Operation returned a result
    Succeeded,
    /// Terminal failure or retries exhausted
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Running => "running",
            ItemStatus::Succeeded => "succeeded",
            ItemStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Succeeded | ItemStatus::Failed)
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one item. Exactly one exists per item for the life of a run.
///
/// `result` is present iff the status is `Succeeded`; `error` iff `Failed`.
/// The transition methods are the only way to move between states and they
/// refuse to move a `Running` outcome back to `Pending`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome<R> {
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<R>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,
    pub attempts: u32,
}

impl<R> Default for JobOutcome<R> {
    fn default() -> Self {
        Self::pending()
    }
}

impl<R> JobOutcome<R> {
    pub fn pending() -> Self {
        Self {
            status: ItemStatus::Pending,
            result: None,
            error: None,
            attempts: 0,
        }
    }

    /// Enter (or re-enter, for a retry) the `Running` state and count the attempt.
    pub fn begin_attempt(&mut self) {
        debug_assert!(!self.status.is_terminal(), "terminal outcomes are final");
        self.status = ItemStatus::Running;
        self.attempts += 1;
    }

    pub fn succeed(&mut self, result: R) {
        self.status = ItemStatus::Succeeded;
        self.result = Some(result);
        self.error = None;
    }

    pub fn fail(&mut self, error: OperationError) {
        self.status = ItemStatus::Failed;
        self.error = Some(error);
        self.result = None;
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_pending(&self) -> bool {
        self.status == ItemStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_lifecycle() {
        let mut outcome: JobOutcome<String> = JobOutcome::pending();
        assert!(outcome.is_pending());
        assert_eq!(outcome.attempts, 0);

        outcome.begin_attempt();
        assert_eq!(outcome.status, ItemStatus::Running);
        outcome.begin_attempt();
        assert_eq!(outcome.attempts, 2);

        outcome.succeed("https://cdn/img.png".to_string());
        assert!(outcome.is_terminal());
        assert_eq!(outcome.result.as_deref(), Some("https://cdn/img.png"));
        assert!(outcome.error.is_none());
    }

    #[test]
    fn test_failure_keeps_last_error() {
        let mut outcome: JobOutcome<String> = JobOutcome::pending();
        outcome.begin_attempt();
        outcome.fail(OperationError::terminal("content policy violation"));

        assert_eq!(outcome.status, ItemStatus::Failed);
        assert!(outcome.result.is_none());
        assert_eq!(
            outcome.error.as_ref().map(|e| e.to_string()),
            Some("Operation failed: content policy violation".to_string())
        );
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ItemStatus::Succeeded).unwrap();
        assert_eq!(json, "\"succeeded\"");
    }
}
