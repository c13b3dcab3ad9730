//! Progress and ETA estimation.

use std::time::Duration;

use tokio::time::Instant;

use genbatch_models::{ItemStatus, ProgressSnapshot};

use crate::state::RunState;

/// Derives percent-complete and time remaining from a run's state.
///
/// The ETA adds the limiter's mandatory spacing for every remaining item
/// on top of the observed average, so it never understates wall-clock time.
#[derive(Debug, Clone, Copy)]
pub struct ProgressEstimator {
    min_interval: Duration,
}

impl ProgressEstimator {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval }
    }

    /// Estimate before anything resolves: one interval per item.
    pub fn initial_estimate(&self, total: usize) -> Duration {
        self.min_interval.saturating_mul(saturating_u32(total))
    }

    /// `remaining * (elapsed / completed) + remaining * min_interval`.
    ///
    /// `None` until the first item resolves.
    pub fn estimate(
        &self,
        completed: usize,
        total: usize,
        elapsed: Option<Duration>,
    ) -> Option<Duration> {
        let remaining = total.saturating_sub(completed);
        if remaining == 0 {
            return Some(Duration::ZERO);
        }
        if completed == 0 {
            return None;
        }

        let average = elapsed? / saturating_u32(completed);
        let remaining = saturating_u32(remaining);
        Some(
            average
                .saturating_mul(remaining)
                .saturating_add(self.min_interval.saturating_mul(remaining)),
        )
    }

    pub fn snapshot<P, R>(&self, state: &RunState<P, R>, now: Instant) -> ProgressSnapshot {
        let total = state.total();
        let completed = state.completed_count();
        let percent = if total == 0 {
            100.0
        } else {
            completed as f64 / total as f64 * 100.0
        };

        ProgressSnapshot {
            completed_count: completed,
            total_count: total,
            succeeded: state.count(ItemStatus::Succeeded),
            failed: state.count(ItemStatus::Failed),
            percent,
            estimated_time_remaining_ms: self
                .estimate(completed, total, state.elapsed(now))
                .map(|eta| eta.as_millis() as u64),
            phase: state.phase,
            current_item: state.current_item().cloned(),
        }
    }
}

fn saturating_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use genbatch_models::{BatchId, OperationError};
    use genbatch_queue::JobQueue;

    fn estimator() -> ProgressEstimator {
        ProgressEstimator::new(Duration::from_secs(12))
    }

    #[test]
    fn test_initial_estimate() {
        assert_eq!(estimator().initial_estimate(180), Duration::from_secs(2160));
    }

    #[test]
    fn test_eta_unavailable_before_first_resolution() {
        assert_eq!(estimator().estimate(0, 5, Some(Duration::from_secs(30))), None);
        assert_eq!(estimator().estimate(0, 5, None), None);
    }

    #[test]
    fn test_eta_includes_spacing() {
        // 2 done in 40s: 20s average, plus 12s spacing, for 3 remaining items.
        let eta = estimator().estimate(2, 5, Some(Duration::from_secs(40)));
        assert_eq!(eta, Some(Duration::from_secs(96)));
    }

    #[test]
    fn test_eta_zero_when_done() {
        assert_eq!(estimator().estimate(4, 4, Some(Duration::from_secs(50))), Some(Duration::ZERO));
        assert_eq!(estimator().estimate(0, 0, None), Some(Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_counts_only_terminal_items() {
        let queue = JobQueue::new(vec![("a", ()), ("b", ()), ("c", ()), ("d", ())]).unwrap();
        let mut state: RunState<(), String> = RunState::new(BatchId::new(), &queue);
        state.mark_started();

        state.items[0].outcome.begin_attempt();
        state.items[0].outcome.succeed("url".to_string());
        state.items[1].outcome.begin_attempt();
        state.items[1].outcome.fail(OperationError::terminal("nope"));
        state.items[2].outcome.begin_attempt();

        tokio::time::sleep(Duration::from_secs(20)).await;
        let snapshot = estimator().snapshot(&state, Instant::now());

        assert_eq!(snapshot.completed_count, 2);
        assert_eq!(snapshot.total_count, 4);
        assert_eq!(snapshot.succeeded, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.percent, 50.0);
        assert_eq!(snapshot.current_item.as_ref().map(|id| id.as_str()), Some("c"));
        // 10s average + 12s spacing, 2 remaining.
        assert_eq!(snapshot.estimated_time_remaining_ms, Some(44_000));
    }

    #[test]
    fn test_empty_run_is_complete() {
        let queue: JobQueue<()> = JobQueue::new(Vec::<(&str, ())>::new()).unwrap();
        let state: RunState<(), String> = RunState::new(BatchId::new(), &queue);
        let snapshot = estimator().snapshot(&state, Instant::now());
        assert_eq!(snapshot.percent, 100.0);
        assert_eq!(snapshot.estimated_time_remaining_ms, Some(0));
    }
}
