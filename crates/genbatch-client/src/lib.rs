//! Client for the external image generation service.
//!
//! Implements [`genbatch_models::GenerationOperation`] over HTTP and
//! separates the service's rate-limit responses from every other failure.

pub mod client;
pub mod config;
pub mod error;

pub use client::{HttpGenerationClient, RATE_LIMIT_CODE};
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
