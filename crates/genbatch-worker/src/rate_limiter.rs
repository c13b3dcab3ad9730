//! Dispatch spacing.
//!
//! Enforces a minimum gap between the *starts* of consecutive dispatches.
//! The external call's own latency counts toward the gap, so a slow call
//! is followed immediately by the next one rather than by a further delay.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{RunnerError, RunnerResult};

/// Spacing limiter for a single sequential worker.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_dispatch: Option<Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_dispatch: None,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Start time of the most recent dispatch.
    pub fn last_dispatch(&self) -> Option<Instant> {
        self.last_dispatch
    }

    /// How long `wait_until_ready` would currently suspend.
    pub fn time_until_ready(&self) -> Duration {
        match self.last_dispatch {
            Some(last) => (last + self.min_interval).saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        }
    }

    /// Suspend until the next dispatch may start, then record it as started.
    ///
    /// Returns `RunnerError::Cancelled` as soon as `cancel` fires, without
    /// recording a dispatch. Dropping the future before it resolves leaves
    /// the limiter untouched.
    pub async fn wait_until_ready(&mut self, cancel: &CancellationToken) -> RunnerResult<()> {
        if cancel.is_cancelled() {
            return Err(RunnerError::Cancelled);
        }

        if let Some(last) = self.last_dispatch {
            let ready_at = last + self.min_interval;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RunnerError::Cancelled),
                _ = tokio::time::sleep_until(ready_at) => {}
            }
        }

        self.last_dispatch = Some(Instant::now());
        Ok(())
    }
}
