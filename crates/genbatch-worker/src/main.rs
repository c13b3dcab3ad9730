//! Batch image generation CLI.
//!
//! Usage: `genbatch <requests.json> [output_dir]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use futures_util::StreamExt;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use validator::Validate;

use genbatch_client::HttpGenerationClient;
use genbatch_models::{BatchEvent, GeneratedImage, GenerationRequest, RunPhase, SharedOperation};
use genbatch_queue::JobQueue;
use genbatch_worker::{DirectoryExporter, JobRunner, RunnerConfig};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("genbatch=info,info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }

    if let Err(e) = run().await {
        error!("genbatch failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    let mut args = std::env::args().skip(1);
    let requests_path = PathBuf::from(
        args.next()
            .context("usage: genbatch <requests.json> [output_dir]")?,
    );
    let output_dir = args.next().map(PathBuf::from);

    let raw = tokio::fs::read_to_string(&requests_path)
        .await
        .with_context(|| format!("Failed to read {}", requests_path.display()))?;
    let requests: Vec<GenerationRequest> =
        serde_json::from_str(&raw).context("Failed to parse generation requests")?;
    for request in &requests {
        if let Err(e) = request.validate() {
            bail!("Invalid request {}: {}", request.file_path, e);
        }
    }
    let queue = JobQueue::from_requests(requests)?;

    let config = RunnerConfig::from_env();
    info!("Runner config: {:?}", config);
    let client: SharedOperation<GenerationRequest, GeneratedImage> =
        Arc::new(HttpGenerationClient::from_env()?);
    let runner = JobRunner::new(config, client)?;

    let mut events = runner.progress_channel().subscribe_stream();
    let reporter = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match &event.event {
                BatchEvent::Progress { snapshot } => info!(
                    "{}/{} done ({} ok, {} failed), eta {}",
                    snapshot.completed_count,
                    snapshot.total_count,
                    snapshot.succeeded,
                    snapshot.failed,
                    snapshot
                        .estimated_time_remaining_ms
                        .map_or("unknown".to_string(), |ms| format!("{}s", ms / 1000))
                ),
                BatchEvent::RateLimitWait { item_id, wait_ms } => {
                    info!("Waiting {}ms before {}", wait_ms, item_id)
                }
                other if other.is_final() => break,
                _ => {}
            }
        }
    });

    let handle = runner.start(queue);
    info!(
        "Started batch {} ({} items, about {}s)",
        handle.batch_id(),
        handle.state().total(),
        handle.initial_estimate().as_secs()
    );

    let snapshot = tokio::select! {
        snapshot = handle.wait() => snapshot,
        _ = tokio::signal::ctrl_c() => {
            warn!("Received shutdown signal, cancelling batch");
            handle.cancel()?;
            handle.wait().await
        }
    };
    reporter.await.ok();

    for (item_id, error) in handle.failures().await {
        warn!(item_id = %item_id, "Failed: {}", error);
    }
    info!(
        "Batch {}: {} succeeded, {} failed, {} not processed",
        snapshot.phase,
        snapshot.succeeded,
        snapshot.failed,
        snapshot.remaining()
    );

    if let Some(dir) = output_dir {
        let exporter = DirectoryExporter::new(&dir);
        let report = handle.export_all(&exporter).await;
        info!(
            "Exported {} images to {} ({} failed)",
            report.exported.len(),
            dir.display(),
            report.failed.len()
        );
    }

    if snapshot.phase == RunPhase::Cancelled {
        bail!("Batch cancelled");
    }
    Ok(())
}
