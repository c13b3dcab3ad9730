//! Application state.

use std::sync::Arc;

use genbatch_client::HttpGenerationClient;
use genbatch_models::{GeneratedImage, GenerationRequest, SharedOperation};
use genbatch_worker::{BatchManager, JobRunner, RunnerConfig};

use crate::config::ApiConfig;

/// Batch manager for image generation runs.
pub type ImageBatchManager = BatchManager<GenerationRequest, GeneratedImage>;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub batches: Arc<ImageBatchManager>,
}

impl AppState {
    /// Create state around an existing batch manager.
    pub fn new(config: ApiConfig, batches: ImageBatchManager) -> Self {
        Self {
            config,
            batches: Arc::new(batches),
        }
    }

    /// Create state backed by the HTTP generation client.
    pub fn from_env(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let client: SharedOperation<GenerationRequest, GeneratedImage> =
            Arc::new(HttpGenerationClient::from_env()?);
        let runner = JobRunner::new(RunnerConfig::from_env(), client)?;
        Ok(Self::new(config, BatchManager::new(runner)))
    }
}
