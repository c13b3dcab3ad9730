//! Result aggregation and bulk export.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use genbatch_models::{ItemId, ItemStatus, JobOutcome, OperationError};

/// Failure exporting a single result.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("Invalid result: {0}")]
    InvalidResult(String),
}

pub type ExportResult<T> = Result<T, ExportError>;

/// Hands a successful result to an external destination.
#[async_trait]
pub trait ResultExporter<R>: Send + Sync {
    async fn export(&self, item_id: &ItemId, result: &R) -> ExportResult<()>;
}

/// Per-item report of a bulk export.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExportReport {
    pub exported: Vec<ItemId>,
    /// `(item, error message)` for each export that failed
    pub failed: Vec<(ItemId, String)>,
}

impl ExportReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// In-memory collection of per-item outcomes, keyed by item id.
///
/// Iteration follows the order in which items were first recorded.
#[derive(Debug, Clone)]
pub struct ResultStore<R> {
    order: Vec<ItemId>,
    outcomes: HashMap<ItemId, JobOutcome<R>>,
}

impl<R> Default for ResultStore<R> {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            outcomes: HashMap::new(),
        }
    }
}

impl<R> ResultStore<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest outcome for an item. Last write wins.
    pub fn record(&mut self, item_id: ItemId, outcome: JobOutcome<R>) {
        if !self.outcomes.contains_key(&item_id) {
            self.order.push(item_id.clone());
        }
        self.outcomes.insert(item_id, outcome);
    }

    pub fn get(&self, item_id: &ItemId) -> Option<&JobOutcome<R>> {
        self.outcomes.get(item_id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// All recorded outcomes in record order.
    pub fn iter(&self) -> impl Iterator<Item = (&ItemId, &JobOutcome<R>)> {
        self.order
            .iter()
            .filter_map(|id| self.outcomes.get(id).map(|outcome| (id, outcome)))
    }

    pub fn successes(&self) -> impl Iterator<Item = (&ItemId, &R)> {
        self.iter().filter_map(|(id, outcome)| match outcome.status {
            ItemStatus::Succeeded => outcome.result.as_ref().map(|result| (id, result)),
            _ => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = (&ItemId, &OperationError)> {
        self.iter().filter_map(|(id, outcome)| match outcome.status {
            ItemStatus::Failed => outcome.error.as_ref().map(|error| (id, error)),
            _ => None,
        })
    }

    pub fn success_count(&self) -> usize {
        self.successes().count()
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }
}

impl<R: Clone> ResultStore<R> {
    /// Owned copy of the successes, for exporting outside a lock.
    pub fn cloned_successes(&self) -> Vec<(ItemId, R)> {
        self.successes()
            .map(|(id, result)| (id.clone(), result.clone()))
            .collect()
    }
}

impl<R: Sync> ResultStore<R> {
    /// Export every success through `exporter`. See [`export_all`].
    pub async fn export_all<E>(&self, exporter: &E) -> ExportReport
    where
        E: ResultExporter<R> + ?Sized,
    {
        let mut report = ExportReport::default();
        for (id, result) in self.successes() {
            export_one(exporter, id, result, &mut report).await;
        }
        report
    }
}

/// Export each success independently.
///
/// A failed export is logged and listed in the report; the remaining items
/// are still exported.
pub async fn export_all<R, E>(successes: &[(ItemId, R)], exporter: &E) -> ExportReport
where
    R: Sync,
    E: ResultExporter<R> + ?Sized,
{
    let mut report = ExportReport::default();
    for (id, result) in successes {
        export_one(exporter, id, result, &mut report).await;
    }
    report
}

async fn export_one<R, E>(exporter: &E, id: &ItemId, result: &R, report: &mut ExportReport)
where
    R: Sync,
    E: ResultExporter<R> + ?Sized,
{
    match exporter.export(id, result).await {
        Ok(()) => {
            debug!(item_id = %id, "Exported result");
            report.exported.push(id.clone());
        }
        Err(e) => {
            warn!(item_id = %id, "Export failed: {}", e);
            report.failed.push((id.clone(), e.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn succeeded(result: &str, attempts: u32) -> JobOutcome<String> {
        let mut outcome = JobOutcome::pending();
        for _ in 0..attempts {
            outcome.begin_attempt();
        }
        outcome.succeed(result.to_string());
        outcome
    }

    fn failed(message: &str) -> JobOutcome<String> {
        let mut outcome = JobOutcome::pending();
        outcome.begin_attempt();
        outcome.fail(OperationError::terminal(message));
        outcome
    }

    #[test]
    fn test_record_is_last_write_wins() {
        let mut store = ResultStore::new();
        let mut running = JobOutcome::pending();
        running.begin_attempt();
        store.record(ItemId::new("a"), running);
        store.record(ItemId::new("b"), failed("bad prompt"));
        store.record(ItemId::new("a"), succeeded("url-a", 2));

        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&ItemId::new("a")).map(|o| o.attempts), Some(2));

        let successes: Vec<_> = store.successes().map(|(id, r)| (id.as_str(), r.as_str())).collect();
        assert_eq!(successes, vec![("a", "url-a")]);

        let failures: Vec<_> = store.failures().map(|(id, _)| id.as_str()).collect();
        assert_eq!(failures, vec!["b"]);
    }

    #[test]
    fn test_running_outcomes_are_neither_success_nor_failure() {
        let mut store: ResultStore<String> = ResultStore::new();
        let mut running = JobOutcome::pending();
        running.begin_attempt();
        store.record(ItemId::new("a"), running);
        assert_eq!(store.success_count(), 0);
        assert_eq!(store.failure_count(), 0);
    }

    struct RecordingExporter {
        fail_on: &'static str,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ResultExporter<String> for RecordingExporter {
        async fn export(&self, item_id: &ItemId, result: &String) -> ExportResult<()> {
            self.seen.lock().unwrap().push(result.clone());
            if item_id.as_str() == self.fail_on {
                return Err(ExportError::Fetch("404 Not Found".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_export_failure_does_not_abort_the_rest() {
        let mut store = ResultStore::new();
        store.record(ItemId::new("a"), succeeded("url-a", 1));
        store.record(ItemId::new("b"), succeeded("url-b", 1));
        store.record(ItemId::new("c"), failed("nope"));
        store.record(ItemId::new("d"), succeeded("url-d", 1));

        let exporter = RecordingExporter {
            fail_on: "b",
            seen: Mutex::new(Vec::new()),
        };
        let report = store.export_all(&exporter).await;

        assert_eq!(*exporter.seen.lock().unwrap(), vec!["url-a", "url-b", "url-d"]);
        assert_eq!(report.exported, vec![ItemId::new("a"), ItemId::new("d")]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, ItemId::new("b"));
        assert!(!report.is_complete());
    }

    #[tokio::test]
    async fn test_export_cloned_successes() {
        let mut store = ResultStore::new();
        store.record(ItemId::new("a"), succeeded("url-a", 1));
        let successes = store.cloned_successes();

        let exporter = RecordingExporter {
            fail_on: "",
            seen: Mutex::new(Vec::new()),
        };
        let report = export_all(&successes, &exporter).await;
        assert!(report.is_complete());
        assert_eq!(report.exported.len(), 1);
    }
}
