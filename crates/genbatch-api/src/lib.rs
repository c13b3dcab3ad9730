//! Axum HTTP API for controlling a generation batch.
//!
//! This crate provides:
//! - Batch start/pause/resume/cancel endpoints
//! - Progress, item and result queries
//! - A WebSocket feed of batch events
//! - Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod ws;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::{AppState, ImageBatchManager};
