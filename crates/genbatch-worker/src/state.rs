//! Per-run state.
//!
//! A `RunState` is owned by the run loop, which is its only writer; it is
//! published through a `tokio::sync::watch` channel so readers always get
//! a consistent `(cursor, items)` pair.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use genbatch_models::{BatchId, ItemId, ItemStatus, JobItem, JobOutcome, RunPhase};
use genbatch_queue::JobQueue;

/// An item paired with its current outcome.
#[derive(Debug, Clone, Serialize)]
pub struct ItemEntry<P, R> {
    pub item: JobItem<P>,
    pub outcome: JobOutcome<R>,
}

/// State of one batch run.
#[derive(Debug, Clone, Serialize)]
pub struct RunState<P, R> {
    pub batch_id: BatchId,
    pub items: Vec<ItemEntry<P, R>>,
    /// Index of the next item to dispatch (the in-flight item while one is running)
    pub cursor: usize,
    pub phase: RunPhase,
    /// Set once, on the first dispatch
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    started_instant: Option<Instant>,
}

impl<P: Clone, R> RunState<P, R> {
    pub fn new(batch_id: BatchId, queue: &JobQueue<P>) -> Self {
        Self {
            batch_id,
            items: queue
                .items()
                .iter()
                .cloned()
                .map(|item| ItemEntry {
                    item,
                    outcome: JobOutcome::pending(),
                })
                .collect(),
            cursor: 0,
            phase: RunPhase::Idle,
            started_at: None,
            started_instant: None,
        }
    }
}

impl<P, R> RunState<P, R> {
    pub fn total(&self) -> usize {
        self.items.len()
    }

    /// Record the first dispatch time; later calls are ignored.
    pub fn mark_started(&mut self) {
        if self.started_instant.is_none() {
            self.started_instant = Some(Instant::now());
            self.started_at = Some(Utc::now());
        }
    }

    pub fn started_instant(&self) -> Option<Instant> {
        self.started_instant
    }

    pub fn elapsed(&self, now: Instant) -> Option<Duration> {
        self.started_instant
            .map(|started| now.saturating_duration_since(started))
    }

    /// Index of the first item still pending, scanning from the start.
    pub fn first_pending(&self) -> Option<usize> {
        self.items.iter().position(|entry| entry.outcome.is_pending())
    }

    /// Index of the first pending item at or after the cursor.
    pub fn next_pending_from_cursor(&self) -> Option<usize> {
        self.items
            .iter()
            .skip(self.cursor)
            .position(|entry| entry.outcome.is_pending())
            .map(|offset| self.cursor + offset)
    }

    pub fn count(&self, status: ItemStatus) -> usize {
        self.items
            .iter()
            .filter(|entry| entry.outcome.status == status)
            .count()
    }

    /// Items in a terminal state.
    pub fn completed_count(&self) -> usize {
        self.items
            .iter()
            .filter(|entry| entry.outcome.is_terminal())
            .count()
    }

    pub fn all_resolved(&self) -> bool {
        self.items.iter().all(|entry| entry.outcome.is_terminal())
    }

    /// Item dispatched or mid-retry, if any.
    pub fn current_item(&self) -> Option<&ItemId> {
        self.items
            .iter()
            .find(|entry| entry.outcome.status == ItemStatus::Running)
            .map(|entry| &entry.item.id)
    }

    pub fn entry(&self, id: &ItemId) -> Option<&ItemEntry<P, R>> {
        self.items.iter().find(|entry| &entry.item.id == id)
    }

    pub fn outcome(&self, id: &ItemId) -> Option<&JobOutcome<R>> {
        self.entry(id).map(|entry| &entry.outcome)
    }
}
