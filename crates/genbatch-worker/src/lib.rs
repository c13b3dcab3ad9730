//! Rate-limited, resumable batch runner.
//!
//! This crate provides:
//! - Dispatch spacing and throttle-aware retries
//! - The run state machine with pause, resume and cancel
//! - Progress and ETA estimation
//! - Result aggregation and bulk export
//! - Structured logging and metrics for runs

pub mod config;
pub mod error;
pub mod estimator;
pub mod export;
pub mod logging;
pub mod manager;
pub mod metrics;
pub mod rate_limiter;
pub mod retry;
pub mod runner;
pub mod state;
pub mod store;

pub use config::{BackoffKind, RunnerConfig};
pub use error::{RunnerError, RunnerResult};
pub use estimator::ProgressEstimator;
pub use export::DirectoryExporter;
pub use logging::BatchLogger;
pub use manager::BatchManager;
pub use rate_limiter::RateLimiter;
pub use retry::{Backoff, FailureClass, RetryContext, RetryDecision, RetryPolicy};
pub use runner::{JobRunner, RunHandle};
pub use state::{ItemEntry, RunState};
pub use store::{export_all, ExportError, ExportReport, ResultExporter, ResultStore};
