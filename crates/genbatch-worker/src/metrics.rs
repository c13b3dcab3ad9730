//! Batch runner metrics.
//!
//! Recorded through the `metrics` facade; they are no-ops until a recorder
//! (e.g. the API's Prometheus exporter) is installed.

use std::time::Duration;

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const ITEMS_DISPATCHED_TOTAL: &str = "genbatch_items_dispatched_total";
    pub const ITEMS_SUCCEEDED_TOTAL: &str = "genbatch_items_succeeded_total";
    pub const ITEMS_FAILED_TOTAL: &str = "genbatch_items_failed_total";
    pub const ITEMS_RETRIED_TOTAL: &str = "genbatch_items_retried_total";
    pub const RATE_LIMIT_WAIT_SECONDS: &str = "genbatch_rate_limit_wait_seconds";
    pub const OPERATION_DURATION_SECONDS: &str = "genbatch_operation_duration_seconds";
    pub const BATCH_PROGRESS_PERCENT: &str = "genbatch_batch_progress_percent";
    pub const BATCHES_FINISHED_TOTAL: &str = "genbatch_batches_finished_total";
}

pub fn record_dispatch(operation: &'static str) {
    counter!(names::ITEMS_DISPATCHED_TOTAL, "operation" => operation).increment(1);
}

pub fn record_success(operation: &'static str) {
    counter!(names::ITEMS_SUCCEEDED_TOTAL, "operation" => operation).increment(1);
}

/// `reason` is `terminal` or `retries_exhausted`.
pub fn record_failure(operation: &'static str, reason: &'static str) {
    counter!(names::ITEMS_FAILED_TOTAL, "operation" => operation, "reason" => reason).increment(1);
}

pub fn record_retry(operation: &'static str) {
    counter!(names::ITEMS_RETRIED_TOTAL, "operation" => operation).increment(1);
}

pub fn record_rate_limit_wait(wait: Duration) {
    histogram!(names::RATE_LIMIT_WAIT_SECONDS).record(wait.as_secs_f64());
}

pub fn record_operation_duration(operation: &'static str, elapsed: Duration) {
    histogram!(names::OPERATION_DURATION_SECONDS, "operation" => operation)
        .record(elapsed.as_secs_f64());
}

pub fn set_progress(percent: f64) {
    gauge!(names::BATCH_PROGRESS_PERCENT).set(percent);
}

/// `phase` is the final run phase (`completed` or `cancelled`).
pub fn record_batch_finished(phase: &'static str) {
    counter!(names::BATCHES_FINISHED_TOTAL, "phase" => phase).increment(1);
}
