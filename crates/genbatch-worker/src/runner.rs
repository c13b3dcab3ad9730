//! Batch run state machine.
//!
//! A run is driven by a single spawned control loop that owns the
//! [`RunState`] and is its only writer. Callers interact through a
//! [`RunHandle`]: pause and resume travel over a `watch` flag, cancellation
//! over a [`CancellationToken`], and state is read back through a `watch`
//! receiver so every read sees a consistent snapshot.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, Instrument};

use genbatch_models::{
    BatchEvent, BatchId, ItemId, ItemStatus, JobOutcome, OperationError, ProgressSnapshot,
    RunPhase, SharedOperation,
};
use genbatch_queue::{JobQueue, ProgressChannel, ProgressEvent};

use crate::config::RunnerConfig;
use crate::error::{RunnerError, RunnerResult};
use crate::estimator::ProgressEstimator;
use crate::logging::BatchLogger;
use crate::metrics;
use crate::rate_limiter::RateLimiter;
use crate::retry::{RetryContext, RetryDecision, RetryPolicy};
use crate::state::RunState;
use crate::store::{self, ExportReport, ResultExporter, ResultStore};

/// Starts batch runs of one operation.
pub struct JobRunner<P, R> {
    config: RunnerConfig,
    operation: SharedOperation<P, R>,
    progress: ProgressChannel,
}

impl<P, R> JobRunner<P, R>
where
    P: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    pub fn new(config: RunnerConfig, operation: SharedOperation<P, R>) -> RunnerResult<Self> {
        config.validate()?;
        let progress = ProgressChannel::new(config.event_buffer);
        Ok(Self {
            config,
            operation,
            progress,
        })
    }

    /// Publish events on an existing channel instead of a private one.
    pub fn with_progress_channel(mut self, progress: ProgressChannel) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Channel every run of this runner publishes on. Subscribe before
    /// `start` to observe a run from its first event.
    pub fn progress_channel(&self) -> &ProgressChannel {
        &self.progress
    }

    /// Start a new run over `queue` and return its handle.
    ///
    /// The run is `Running` as soon as this returns. Must be called from
    /// within a tokio runtime.
    pub fn start(&self, queue: JobQueue<P>) -> RunHandle<P, R> {
        let batch_id = BatchId::new();
        let mut state = RunState::new(batch_id.clone(), &queue);
        state.phase = RunPhase::Running;

        let (state_tx, state_rx) = watch::channel(state);
        let (pause_tx, pause_rx) = watch::channel(false);
        let cancel = CancellationToken::new();
        let results = Arc::new(RwLock::new(ResultStore::new()));
        let estimator = ProgressEstimator::new(self.config.min_interval);
        let logger = BatchLogger::new(&batch_id, self.operation.name());
        let span = logger.create_span();

        let run_loop = RunLoop {
            batch_id: batch_id.clone(),
            state: state_tx,
            results: Arc::clone(&results),
            operation: Arc::clone(&self.operation),
            operation_name: self.operation.name(),
            policy: RetryPolicy::from_config(&self.config),
            limiter: RateLimiter::new(self.config.min_interval),
            estimator,
            operation_timeout: self.config.operation_timeout,
            pause: pause_rx,
            cancel: cancel.clone(),
            progress: self.progress.clone(),
            logger,
        };
        tokio::spawn(run_loop.run().instrument(span));

        RunHandle {
            batch_id,
            state: state_rx,
            results,
            pause: pause_tx,
            cancel,
            estimator,
            progress: self.progress.clone(),
        }
    }
}

/// Caller-side handle on one run.
///
/// Dropping the handle cancels the run.
pub struct RunHandle<P, R> {
    batch_id: BatchId,
    state: watch::Receiver<RunState<P, R>>,
    results: Arc<RwLock<ResultStore<R>>>,
    pause: watch::Sender<bool>,
    cancel: CancellationToken,
    estimator: ProgressEstimator,
    progress: ProgressChannel,
}

impl<P, R> RunHandle<P, R>
where
    P: Clone,
    R: Clone,
{
    pub fn batch_id(&self) -> &BatchId {
        &self.batch_id
    }

    pub fn phase(&self) -> RunPhase {
        self.state.borrow().phase
    }

    pub fn is_finished(&self) -> bool {
        self.phase().is_finished()
    }

    /// Whether a pause was requested and not yet taken back.
    pub fn is_pause_requested(&self) -> bool {
        *self.pause.borrow()
    }

    /// Consistent copy of the whole run state.
    pub fn state(&self) -> RunState<P, R> {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn watch(&self) -> watch::Receiver<RunState<P, R>> {
        self.state.clone()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.estimator.snapshot(&*self.state.borrow(), Instant::now())
    }

    pub fn initial_estimate(&self) -> Duration {
        self.estimator.initial_estimate(self.state.borrow().total())
    }

    pub fn outcome(&self, item_id: &ItemId) -> Option<JobOutcome<R>> {
        self.state.borrow().outcome(item_id).cloned()
    }

    /// Request a pause. The run stops dispatching once the in-flight item
    /// reaches a terminal outcome.
    pub fn pause(&self) -> RunnerResult<()> {
        match self.phase() {
            RunPhase::Running | RunPhase::Paused => {
                self.pause.send_replace(true);
                Ok(())
            }
            phase => Err(RunnerError::invalid_transition(phase, "pause")),
        }
    }

    /// Continue a paused run from its first pending item.
    pub fn resume(&self) -> RunnerResult<()> {
        match self.phase() {
            RunPhase::Paused => {
                self.pause.send_replace(false);
                Ok(())
            }
            RunPhase::Running if self.is_pause_requested() => {
                self.pause.send_replace(false);
                Ok(())
            }
            phase => Err(RunnerError::invalid_transition(phase, "resume")),
        }
    }

    /// Abort the in-flight operation and stop the run. Cancelling twice is
    /// harmless; a completed run cannot be cancelled.
    pub fn cancel(&self) -> RunnerResult<()> {
        match self.phase() {
            RunPhase::Completed => Err(RunnerError::invalid_transition(RunPhase::Completed, "cancel")),
            _ => {
                self.cancel.cancel();
                Ok(())
            }
        }
    }

    /// Wait until the run is `Completed` or `Cancelled`.
    pub async fn wait(&self) -> ProgressSnapshot {
        let mut state = self.state.clone();
        // A closed channel means the loop is gone; report whatever it left.
        let _ = state.wait_for(|s| s.phase.is_finished()).await;
        self.snapshot()
    }

    pub async fn successes(&self) -> Vec<(ItemId, R)> {
        self.results.read().await.cloned_successes()
    }

    pub async fn failures(&self) -> Vec<(ItemId, OperationError)> {
        self.results
            .read()
            .await
            .failures()
            .map(|(id, error)| (id.clone(), error.clone()))
            .collect()
    }

    /// Export every success recorded so far. The store is not locked while
    /// exporting.
    pub async fn export_all<E>(&self, exporter: &E) -> ExportReport
    where
        R: Sync,
        E: ResultExporter<R> + ?Sized,
    {
        let successes = self.successes().await;
        store::export_all(&successes, exporter).await
    }
}

impl<P, R> RunHandle<P, R> {
    /// Events of all runs on this handle's channel.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    pub fn progress_channel(&self) -> &ProgressChannel {
        &self.progress
    }
}

impl<P, R> Drop for RunHandle<P, R> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// How processing of one item ended.
enum ItemFlow {
    Resolved,
    /// A pause arrived before the item's first dispatch.
    PauseRequested,
}

struct RunLoop<P, R> {
    batch_id: BatchId,
    state: watch::Sender<RunState<P, R>>,
    results: Arc<RwLock<ResultStore<R>>>,
    operation: SharedOperation<P, R>,
    operation_name: &'static str,
    policy: RetryPolicy,
    limiter: RateLimiter,
    estimator: ProgressEstimator,
    operation_timeout: Duration,
    pause: watch::Receiver<bool>,
    cancel: CancellationToken,
    progress: ProgressChannel,
    logger: BatchLogger,
}

impl<P, R> RunLoop<P, R>
where
    P: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    async fn run(mut self) {
        let total = self.state.borrow().total();
        let initial = self.estimator.initial_estimate(total);
        self.logger.log_start(&format!(
            "{} items, initial estimate {}s",
            total,
            initial.as_secs()
        ));
        self.publish(BatchEvent::run_started(total, initial.as_millis() as u64));
        self.emit_progress();

        match self.drive().await {
            Ok(()) => self.finish(RunPhase::Completed),
            Err(RunnerError::Cancelled) => self.finish(RunPhase::Cancelled),
            Err(e) => {
                self.logger.log_warning(&format!("Run stopped: {}", e));
                self.finish(RunPhase::Cancelled)
            }
        }
    }

    async fn drive(&mut self) -> RunnerResult<()> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(RunnerError::Cancelled);
            }

            // A resolved queue completes even if a pause is pending
            if self.state.borrow().next_pending_from_cursor().is_none() {
                return Ok(());
            }

            let pause_requested = *self.pause.borrow();
            if pause_requested {
                self.hold_paused().await?;
            }

            let next = self.state.borrow().next_pending_from_cursor();
            let Some(index) = next else {
                return Ok(());
            };
            self.state.send_modify(|s| s.cursor = index);

            match self.process_item(index).await? {
                ItemFlow::Resolved => {
                    let (completed, total) = {
                        let state = self.state.borrow();
                        (state.completed_count(), state.total())
                    };
                    self.logger
                        .log_progress(&format!("{}/{} items resolved", completed, total));
                }
                ItemFlow::PauseRequested => {}
            }
        }
    }

    /// Sit in `Paused` until resumed or cancelled.
    async fn hold_paused(&mut self) -> RunnerResult<()> {
        self.state.send_modify(|s| s.phase = RunPhase::Paused);
        self.logger.log_progress("paused");
        self.publish(BatchEvent::paused());
        self.emit_progress();

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(RunnerError::Cancelled),
            _ = wait_for_flag(&mut self.pause, false) => {}
        }

        let mut next_item = None;
        self.state.send_modify(|s| {
            s.phase = RunPhase::Running;
            s.cursor = s.first_pending().unwrap_or(s.total());
            next_item = s.items.get(s.cursor).map(|entry| entry.item.id.clone());
        });
        self.logger.log_progress(&format!(
            "resumed at {}",
            next_item.as_ref().map_or("end of queue", |id| id.as_str())
        ));
        self.publish(BatchEvent::resumed(next_item));
        self.emit_progress();
        Ok(())
    }

    /// Dispatch one item until it succeeds, fails for good, or the run is
    /// cancelled. Retries never advance past this item.
    async fn process_item(&mut self, index: usize) -> RunnerResult<ItemFlow> {
        let (item_id, payload) = {
            let state = self.state.borrow();
            let entry = &state.items[index];
            (entry.item.id.clone(), entry.item.payload.clone())
        };
        let mut retry = RetryContext::new();

        loop {
            let wait = self.limiter.time_until_ready();
            if !wait.is_zero() {
                debug!(item_id = %item_id, "Waiting {:?} for rate limiter", wait);
                metrics::record_rate_limit_wait(wait);
                self.publish(BatchEvent::RateLimitWait {
                    item_id: item_id.clone(),
                    wait_ms: wait.as_millis() as u64,
                });
            }

            if retry.is_first_attempt_pending() {
                // Nothing is in flight yet, so a pause can take effect now.
                tokio::select! {
                    biased;
                    ready = self.limiter.wait_until_ready(&self.cancel) => ready?,
                    _ = wait_for_flag(&mut self.pause, true) => return Ok(ItemFlow::PauseRequested),
                }
            } else {
                self.limiter.wait_until_ready(&self.cancel).await?;
            }

            retry.begin_attempt();
            let attempt = retry.attempt_number;
            let outcome = self.update_item(index, |s| {
                s.mark_started();
                s.items[index].outcome.begin_attempt();
            });
            self.record(&item_id, outcome).await;
            debug!(item_id = %item_id, attempt, "Dispatching item");
            metrics::record_dispatch(self.operation_name);
            self.publish(BatchEvent::ItemStarted {
                item_id: item_id.clone(),
                attempt,
            });
            self.emit_progress();

            let timeout = self.operation_timeout;
            let started = Instant::now();
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(RunnerError::Cancelled),
                result = tokio::time::timeout(timeout, self.operation.execute(&payload)) => {
                    result.unwrap_or_else(|_| Err(OperationError::timed_out(timeout)))
                }
            };
            metrics::record_operation_duration(self.operation_name, started.elapsed());

            let error = match result {
                Ok(output) => {
                    let outcome = self.update_item(index, |s| {
                        s.items[index].outcome.succeed(output);
                        s.cursor = index + 1;
                    });
                    self.record(&item_id, outcome).await;
                    metrics::record_success(self.operation_name);
                    self.publish(BatchEvent::ItemSucceeded {
                        item_id: item_id.clone(),
                        attempts: attempt,
                    });
                    self.emit_progress();
                    return Ok(ItemFlow::Resolved);
                }
                Err(error) => error,
            };

            match self.policy.decide(&error, attempt) {
                RetryDecision::Retry { delay } => {
                    self.logger.log_item_warning(
                        &item_id,
                        &format!(
                            "attempt {}/{} failed, retrying in {}s: {}",
                            attempt,
                            self.policy.max_retries() + 1,
                            delay.as_secs_f64(),
                            error
                        ),
                    );
                    metrics::record_retry(self.operation_name);
                    self.publish(BatchEvent::ItemRetrying {
                        item_id: item_id.clone(),
                        attempt,
                        max_retries: self.policy.max_retries(),
                        delay_ms: delay.as_millis() as u64,
                        error: error.to_string(),
                    });
                    retry.record_failure(error, Some(delay));

                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(RunnerError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                RetryDecision::Fail { exhausted } => {
                    let reason = if exhausted { "retries_exhausted" } else { "terminal" };
                    self.logger.log_item_error(
                        &item_id,
                        &format!("{} after {} attempt(s) ({})", error, attempt, reason),
                    );
                    metrics::record_failure(self.operation_name, reason);
                    self.publish(BatchEvent::ItemFailed {
                        item_id: item_id.clone(),
                        attempts: attempt,
                        error: error.to_string(),
                    });
                    let outcome = self.update_item(index, |s| {
                        s.items[index].outcome.fail(error);
                        s.cursor = index + 1;
                    });
                    self.record(&item_id, outcome).await;
                    self.emit_progress();
                    return Ok(ItemFlow::Resolved);
                }
            }
        }
    }

    /// Apply `change` to the run state and return the item's new outcome.
    fn update_item(
        &self,
        index: usize,
        change: impl FnOnce(&mut RunState<P, R>),
    ) -> JobOutcome<R> {
        let mut outcome = JobOutcome::pending();
        self.state.send_modify(|s| {
            change(s);
            outcome = s.items[index].outcome.clone();
        });
        outcome
    }

    async fn record(&self, item_id: &ItemId, outcome: JobOutcome<R>) {
        self.results.write().await.record(item_id.clone(), outcome);
    }

    fn publish(&self, event: BatchEvent) {
        self.progress.publish(&self.batch_id, event);
    }

    fn emit_progress(&self) {
        let snapshot = self.estimator.snapshot(&*self.state.borrow(), Instant::now());
        metrics::set_progress(snapshot.percent);
        self.progress.progress(&self.batch_id, snapshot);
    }

    fn finish(&mut self, phase: RunPhase) {
        self.state.send_modify(|s| s.phase = phase);
        self.emit_progress();

        let (succeeded, failed, pending) = {
            let state = self.state.borrow();
            (
                state.count(ItemStatus::Succeeded),
                state.count(ItemStatus::Failed),
                state.count(ItemStatus::Pending),
            )
        };
        metrics::record_batch_finished(phase.as_str());

        match phase {
            RunPhase::Cancelled => {
                self.logger.log_warning(&format!(
                    "cancelled with {} succeeded, {} failed, {} never dispatched",
                    succeeded, failed, pending
                ));
                self.publish(BatchEvent::cancelled());
            }
            _ => {
                self.logger.log_completion(&format!(
                    "{} succeeded, {} failed",
                    succeeded, failed
                ));
                self.publish(BatchEvent::completed(succeeded, failed));
            }
        }
    }
}

/// Resolve once the flag equals `target`. Never resolves if the sending
/// side is gone.
async fn wait_for_flag(flag: &mut watch::Receiver<bool>, target: bool) {
    let closed = flag.wait_for(|value| *value == target).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}
