//! Progress snapshots exposed to callers.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{ItemId, RunPhase};

/// Point-in-time view of a batch run's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProgressSnapshot {
    /// Items in a terminal state (succeeded or failed)
    pub completed_count: usize,
    pub total_count: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Percentage of terminal items (0-100)
    pub percent: f64,
    /// Unavailable until the first item resolves
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time_remaining_ms: Option<u64>,
    pub phase: RunPhase,
    /// Item currently dispatched or mid-retry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_item: Option<ItemId>,
}

impl ProgressSnapshot {
    pub fn estimated_time_remaining(&self) -> Option<Duration> {
        self.estimated_time_remaining_ms.map(Duration::from_millis)
    }

    /// Whole-number percentage for display.
    pub fn percent_rounded(&self) -> u8 {
        self.percent.round().clamp(0.0, 100.0) as u8
    }

    pub fn remaining(&self) -> usize {
        self.total_count.saturating_sub(self.completed_count)
    }
}
