//! Structured batch logging utilities.
//!
//! Provides consistent, structured logging for batch runs with
//! tracing spans and contextual information.

use tracing::{error, info, warn, Span};

use genbatch_models::{BatchId, ItemId};

/// Batch logger for structured logging with consistent formatting.
///
/// Every line carries the batch ID and the operation name so interleaved
/// runs stay distinguishable.
#[derive(Debug, Clone)]
pub struct BatchLogger {
    batch_id: String,
    operation: String,
}

impl BatchLogger {
    /// Create a new logger for a batch and the operation it drives.
    pub fn new(batch_id: &BatchId, operation: &str) -> Self {
        Self {
            batch_id: batch_id.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            batch_id = %self.batch_id,
            operation = %self.operation,
            "Batch started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            batch_id = %self.batch_id,
            operation = %self.operation,
            "Batch progress: {}", message
        );
    }

    /// Log an item-level warning (throttling, retries).
    pub fn log_item_warning(&self, item_id: &ItemId, message: &str) {
        warn!(
            batch_id = %self.batch_id,
            operation = %self.operation,
            item_id = %item_id,
            "Item warning: {}", message
        );
    }

    /// Log an item that ended in failure.
    pub fn log_item_error(&self, item_id: &ItemId, message: &str) {
        error!(
            batch_id = %self.batch_id,
            operation = %self.operation,
            item_id = %item_id,
            "Item failed: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            batch_id = %self.batch_id,
            operation = %self.operation,
            "Batch warning: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            batch_id = %self.batch_id,
            operation = %self.operation,
            "Batch completed: {}", message
        );
    }

    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Create a tracing span for this batch.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "batch",
            batch_id = %self.batch_id,
            operation = %self.operation
        )
    }
}
