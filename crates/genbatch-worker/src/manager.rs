//! Tracks the current batch run for long-lived callers.
//!
//! Only one batch exists at a time. Starting a new one discards the
//! previous run and all of its outcomes.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use genbatch_models::RunPhase;
use genbatch_queue::{JobQueue, ProgressChannel};

use crate::error::{RunnerError, RunnerResult};
use crate::runner::{JobRunner, RunHandle};

pub struct BatchManager<P, R> {
    runner: JobRunner<P, R>,
    current: Mutex<Option<Arc<RunHandle<P, R>>>>,
}

impl<P, R> BatchManager<P, R>
where
    P: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    pub fn new(runner: JobRunner<P, R>) -> Self {
        Self {
            runner,
            current: Mutex::new(None),
        }
    }

    /// Start a new batch.
    ///
    /// Rejected with `AlreadyRunning` while the current run is dispatching.
    /// A paused run is cancelled and replaced.
    pub async fn start(&self, queue: JobQueue<P>) -> RunnerResult<Arc<RunHandle<P, R>>> {
        let mut current = self.current.lock().await;

        if let Some(previous) = current.as_ref() {
            match previous.phase() {
                RunPhase::Running => {
                    return Err(RunnerError::AlreadyRunning(previous.batch_id().clone()));
                }
                RunPhase::Paused => {
                    info!(batch_id = %previous.batch_id(), "Discarding paused batch");
                    previous.cancel()?;
                    previous.wait().await;
                }
                _ => {}
            }
        }

        let handle = Arc::new(self.runner.start(queue));
        *current = Some(Arc::clone(&handle));
        Ok(handle)
    }

    /// Handle on the most recent run.
    pub async fn current(&self) -> RunnerResult<Arc<RunHandle<P, R>>> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(Arc::clone)
            .ok_or(RunnerError::NoActiveRun)
    }

    pub fn runner(&self) -> &JobRunner<P, R> {
        &self.runner
    }

    /// Channel all runs started here publish on.
    pub fn progress_channel(&self) -> &ProgressChannel {
        self.runner.progress_channel()
    }
}
