//! Progress event types emitted on every run and item transition.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{ItemId, ProgressSnapshot};

/// Event envelope, serialized with a `type` tag for streaming clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    /// A run began dispatching
    RunStarted {
        total: usize,
        /// `total * min_interval`, the estimate shown before any item resolves
        initial_estimate_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The limiter is holding the next dispatch
    RateLimitWait { item_id: ItemId, wait_ms: u64 },

    /// An attempt was dispatched
    ItemStarted { item_id: ItemId, attempt: u32 },

    /// A rate-limited attempt will be retried after a backoff
    ItemRetrying {
        item_id: ItemId,
        attempt: u32,
        max_retries: u32,
        delay_ms: u64,
        error: String,
    },

    ItemSucceeded { item_id: ItemId, attempts: u32 },

    ItemFailed {
        item_id: ItemId,
        attempts: u32,
        error: String,
    },

    /// Recomputed progress after a transition
    Progress { snapshot: ProgressSnapshot },

    Paused { timestamp: DateTime<Utc> },

    Resumed {
        /// First pending item the run continues from
        #[serde(skip_serializing_if = "Option::is_none")]
        next_item: Option<ItemId>,
        timestamp: DateTime<Utc>,
    },

    Cancelled { timestamp: DateTime<Utc> },

    Completed {
        succeeded: usize,
        failed: usize,
        timestamp: DateTime<Utc>,
    },
}

impl BatchEvent {
    pub fn run_started(total: usize, initial_estimate_ms: u64) -> Self {
        Self::RunStarted {
            total,
            initial_estimate_ms,
            timestamp: Utc::now(),
        }
    }

    pub fn paused() -> Self {
        Self::Paused {
            timestamp: Utc::now(),
        }
    }

    pub fn resumed(next_item: Option<ItemId>) -> Self {
        Self::Resumed {
            next_item,
            timestamp: Utc::now(),
        }
    }

    pub fn cancelled() -> Self {
        Self::Cancelled {
            timestamp: Utc::now(),
        }
    }

    pub fn completed(succeeded: usize, failed: usize) -> Self {
        Self::Completed {
            succeeded,
            failed,
            timestamp: Utc::now(),
        }
    }

    pub fn progress(snapshot: ProgressSnapshot) -> Self {
        Self::Progress { snapshot }
    }

    /// Short event name, used as a metrics/log label.
    pub fn kind(&self) -> &'static str {
        match self {
            BatchEvent::RunStarted { .. } => "run_started",
            BatchEvent::RateLimitWait { .. } => "rate_limit_wait",
            BatchEvent::ItemStarted { .. } => "item_started",
            BatchEvent::ItemRetrying { .. } => "item_retrying",
            BatchEvent::ItemSucceeded { .. } => "item_succeeded",
            BatchEvent::ItemFailed { .. } => "item_failed",
            BatchEvent::Progress { .. } => "progress",
            BatchEvent::Paused { .. } => "paused",
            BatchEvent::Resumed { .. } => "resumed",
            BatchEvent::Cancelled { .. } => "cancelled",
            BatchEvent::Completed { .. } => "completed",
        }
    }

    /// Whether this event ends the run.
    pub fn is_final(&self) -> bool {
        matches!(self, BatchEvent::Cancelled { .. } | BatchEvent::Completed { .. })
    }
}
