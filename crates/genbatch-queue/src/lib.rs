//! Ordered job queue and progress event channel.
//!
//! This crate provides:
//! - Immutable, duplicate-checked job queues
//! - Progress event fan-out to any number of subscribers

pub mod error;
pub mod progress;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use progress::{ProgressChannel, ProgressEvent, DEFAULT_EVENT_BUFFER};
pub use queue::JobQueue;
