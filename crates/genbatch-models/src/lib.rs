//! Shared data models for the genbatch batch processor.
//!
//! This crate provides Serde-serializable types for:
//! - Work items and their per-item outcomes
//! - Run phases and progress snapshots
//! - Progress events streamed to callers
//! - Generation requests and the external operation seam

pub mod event;
pub mod item;
pub mod operation;
pub mod outcome;
pub mod progress;
pub mod request;
pub mod run;

// Re-export common types
pub use event::BatchEvent;
pub use item::{BatchId, ItemId, JobItem};
pub use operation::{GenerationOperation, OperationError, OperationResult, SharedOperation};
pub use outcome::{ItemStatus, JobOutcome};
pub use progress::ProgressSnapshot;
pub use request::{GeneratedImage, GenerationRequest};
pub use run::RunPhase;
