//! Batch control handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use genbatch_models::{
    BatchId, GeneratedImage, GenerationRequest, ItemId, OperationError, ProgressSnapshot,
};
use genbatch_queue::JobQueue;
use genbatch_worker::RunState;

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Start batch request.
#[derive(Debug, Deserialize)]
pub struct StartBatchRequest {
    pub items: Vec<GenerationRequest>,
}

/// Batch id plus its current progress.
#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub batch_id: BatchId,
    pub progress: ProgressSnapshot,
}

#[derive(Debug, Serialize)]
pub struct SuccessEntry {
    pub item_id: ItemId,
    pub image: GeneratedImage,
}

#[derive(Debug, Serialize)]
pub struct FailureEntry {
    pub item_id: ItemId,
    pub error: OperationError,
}

/// Successes and failures recorded so far.
#[derive(Debug, Serialize)]
pub struct ResultsResponse {
    pub batch_id: BatchId,
    pub success_count: usize,
    pub failure_count: usize,
    pub successes: Vec<SuccessEntry>,
    pub failures: Vec<FailureEntry>,
}

fn validate_items(items: &[GenerationRequest], max_items: usize) -> ApiResult<()> {
    if items.len() > max_items {
        return Err(ApiError::Validation(format!(
            "batch has {} items, at most {} allowed",
            items.len(),
            max_items
        )));
    }
    for item in items {
        item.validate()
            .map_err(|e| ApiError::Validation(format!("{}: {}", item.file_path, e)))?;
    }
    Ok(())
}

/// Start a new batch, replacing a paused one.
pub async fn start_batch(
    State(state): State<AppState>,
    Json(request): Json<StartBatchRequest>,
) -> ApiResult<(StatusCode, Json<BatchResponse>)> {
    validate_items(&request.items, state.config.max_batch_items)?;

    let total = request.items.len();
    let queue = JobQueue::from_requests(request.items)?;
    let handle = state.batches.start(queue).await?;

    info!(batch_id = %handle.batch_id(), "Started batch of {} items", total);
    metrics::record_batch_started(total);

    Ok((
        StatusCode::ACCEPTED,
        Json(BatchResponse {
            batch_id: handle.batch_id().clone(),
            progress: handle.snapshot(),
        }),
    ))
}

/// Request a pause; takes effect once the in-flight item resolves.
pub async fn pause_batch(State(state): State<AppState>) -> ApiResult<Json<BatchResponse>> {
    let handle = state.batches.current().await?;
    handle.pause()?;
    info!(batch_id = %handle.batch_id(), "Pause requested");

    Ok(Json(BatchResponse {
        batch_id: handle.batch_id().clone(),
        progress: handle.snapshot(),
    }))
}

pub async fn resume_batch(State(state): State<AppState>) -> ApiResult<Json<BatchResponse>> {
    let handle = state.batches.current().await?;
    handle.resume()?;
    info!(batch_id = %handle.batch_id(), "Resume requested");

    Ok(Json(BatchResponse {
        batch_id: handle.batch_id().clone(),
        progress: handle.snapshot(),
    }))
}

/// Cancel the current batch and return its final progress.
pub async fn cancel_batch(State(state): State<AppState>) -> ApiResult<Json<BatchResponse>> {
    let handle = state.batches.current().await?;
    handle.cancel()?;
    let progress = handle.wait().await;
    info!(batch_id = %handle.batch_id(), "Batch cancelled");

    Ok(Json(BatchResponse {
        batch_id: handle.batch_id().clone(),
        progress,
    }))
}

pub async fn get_progress(State(state): State<AppState>) -> ApiResult<Json<BatchResponse>> {
    let handle = state.batches.current().await?;

    Ok(Json(BatchResponse {
        batch_id: handle.batch_id().clone(),
        progress: handle.snapshot(),
    }))
}

/// Every item with its current outcome.
pub async fn get_items(
    State(state): State<AppState>,
) -> ApiResult<Json<RunState<GenerationRequest, GeneratedImage>>> {
    let handle = state.batches.current().await?;
    Ok(Json(handle.state()))
}

pub async fn get_results(State(state): State<AppState>) -> ApiResult<Json<ResultsResponse>> {
    let handle = state.batches.current().await?;

    let successes: Vec<SuccessEntry> = handle
        .successes()
        .await
        .into_iter()
        .map(|(item_id, image)| SuccessEntry { item_id, image })
        .collect();
    let failures: Vec<FailureEntry> = handle
        .failures()
        .await
        .into_iter()
        .map(|(item_id, error)| FailureEntry { item_id, error })
        .collect();

    Ok(Json(ResultsResponse {
        batch_id: handle.batch_id().clone(),
        success_count: successes.len(),
        failure_count: failures.len(),
        successes,
        failures,
    }))
}
