//! HTTP-level tests of the batch control API against a fake generator.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use genbatch_api::{create_router, ApiConfig, AppState};
use genbatch_models::{
    GeneratedImage, GenerationOperation, GenerationRequest, OperationError, OperationResult,
    SharedOperation,
};
use genbatch_worker::{BatchManager, JobRunner, RunnerConfig};

/// Generator that takes `latency` per image and rejects prompts containing "reject".
struct FakeImages {
    latency: Duration,
}

#[async_trait]
impl GenerationOperation for FakeImages {
    type Payload = GenerationRequest;
    type Output = GeneratedImage;

    async fn execute(&self, request: &GenerationRequest) -> OperationResult<GeneratedImage> {
        tokio::time::sleep(self.latency).await;
        if request.prompt.contains("reject") {
            return Err(OperationError::terminal("content policy violation"));
        }
        Ok(GeneratedImage {
            image_url: format!("https://images.test/{}", request.download_file_name()),
            file_name: request.download_file_name().to_string(),
            revised_prompt: None,
        })
    }
}

fn app(latency: Duration) -> (Router, AppState) {
    let operation: SharedOperation<GenerationRequest, GeneratedImage> =
        Arc::new(FakeImages { latency });
    let config = RunnerConfig::default()
        .with_min_interval(Duration::from_millis(500))
        .with_max_retries(1)
        .with_retry_backoff(Duration::from_secs(1));
    let runner = tokio_test::assert_ok!(JobRunner::new(config, operation));
    let state = AppState::new(ApiConfig::default(), BatchManager::new(runner));
    (create_router(state.clone(), None), state)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn batch(items: &[(&str, &str)]) -> Value {
    let items: Vec<Value> = items
        .iter()
        .map(|(prompt, path)| json!({ "prompt": prompt, "file_path": path }))
        .collect();
    json!({ "items": items })
}

async fn wait_for_phase(app: &Router, phase: &str) -> Value {
    for _ in 0..200 {
        let (status, body) = send(app, "GET", "/api/batch/progress", None).await;
        assert_eq!(status, StatusCode::OK);
        if body["progress"]["phase"] == phase {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("batch never reached phase {}", phase);
}

#[tokio::test(start_paused = true)]
async fn test_health() {
    let (app, _) = app(Duration::from_millis(10));
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test(start_paused = true)]
async fn test_no_active_run_is_not_found() {
    let (app, _) = app(Duration::from_millis(10));

    for uri in ["/api/batch/progress", "/api/batch/items", "/api/batch/results"] {
        let (status, body) = send(&app, "GET", uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
        assert_eq!(body["code"], "not_found");
    }
    let (status, _) = send(&app, "POST", "/api/batch/pause", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn test_start_then_conflict_while_running() {
    let (app, _) = app(Duration::from_secs(5));

    let (status, body) = send(
        &app,
        "POST",
        "/api/batch",
        Some(batch(&[("a lighthouse", "out/a.png"), ("a harbor", "out/b.png")])),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["progress"]["total_count"], 2);
    assert!(body["batch_id"].is_string());

    let (status, body) = send(
        &app,
        "POST",
        "/api/batch",
        Some(batch(&[("a boat", "out/c.png")])),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");
}

#[tokio::test(start_paused = true)]
async fn test_invalid_batches_are_rejected() {
    let (app, _) = app(Duration::from_millis(10));

    let (status, body) = send(
        &app,
        "POST",
        "/api/batch",
        Some(batch(&[("one", "same.png"), ("two", "same.png")])),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");

    let (status, body) = send(&app, "POST", "/api/batch", Some(batch(&[("", "x.png")]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_failed");

    // Neither attempt left a run behind
    let (status, _) = send(&app, "GET", "/api/batch/progress", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn test_pause_resume_cancel() {
    let (app, _) = app(Duration::from_secs(1));

    let items = [("p1", "1.png"), ("p2", "2.png"), ("p3", "3.png"), ("p4", "4.png")];
    let (status, _) = send(&app, "POST", "/api/batch", Some(batch(&items))).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, _) = send(&app, "POST", "/api/batch/pause", None).await;
    assert_eq!(status, StatusCode::OK);
    let paused = wait_for_phase(&app, "paused").await;
    let completed_at_pause = paused["progress"]["completed_count"].as_u64().unwrap();
    assert!(completed_at_pause < 4);

    // Nothing advances while paused
    tokio::time::sleep(Duration::from_secs(10)).await;
    let (_, still) = send(&app, "GET", "/api/batch/progress", None).await;
    assert_eq!(still["progress"]["completed_count"], completed_at_pause);

    let (status, _) = send(&app, "POST", "/api/batch/resume", None).await;
    assert_eq!(status, StatusCode::OK);
    wait_for_phase(&app, "running").await;

    let (status, body) = send(&app, "POST", "/api/batch/cancel", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["progress"]["phase"], "cancelled");

    // A cancelled run cannot be resumed
    let (status, _) = send(&app, "POST", "/api/batch/resume", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test(start_paused = true)]
async fn test_results_after_completion() {
    let (app, state) = app(Duration::from_millis(200));

    let items = [
        ("a red fox", "foxes/red.png"),
        ("reject this one", "foxes/bad.png"),
        ("an arctic fox", "foxes/white.png"),
    ];
    let (status, _) = send(&app, "POST", "/api/batch", Some(batch(&items))).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let handle = state.batches.current().await.unwrap();
    let final_progress = handle.wait().await;
    assert_eq!(final_progress.completed_count, 3);

    let (status, body) = send(&app, "GET", "/api/batch/results", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success_count"], 2);
    assert_eq!(body["failure_count"], 1);
    assert_eq!(body["successes"][0]["item_id"], "foxes/red.png");
    assert_eq!(body["successes"][0]["image"]["file_name"], "red.png");
    assert_eq!(body["failures"][0]["item_id"], "foxes/bad.png");

    let (status, body) = send(&app, "GET", "/api/batch/items", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "completed");
    assert_eq!(body["items"].as_array().unwrap().len(), 3);

    // A finished run can be replaced
    let (status, _) = send(
        &app,
        "POST",
        "/api/batch",
        Some(batch(&[("a grey fox", "foxes/grey.png")])),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
}
