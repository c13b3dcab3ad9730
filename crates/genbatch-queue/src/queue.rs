//! Ordered, immutable job queue.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use genbatch_models::{GenerationRequest, ItemId, JobItem};

use crate::error::{QueueError, QueueResult};

/// Ordered list of work items with unique, stable ids.
///
/// The item list is shared behind an `Arc` and never mutated after
/// construction, so a running batch and its observers see the same order.
#[derive(Debug)]
pub struct JobQueue<P> {
    items: Arc<[JobItem<P>]>,
}

impl<P> Clone for JobQueue<P> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

impl<P> JobQueue<P> {
    /// Build a queue from caller-ordered `(id, payload)` pairs.
    pub fn new<I, K>(entries: I) -> QueueResult<Self>
    where
        I: IntoIterator<Item = (K, P)>,
        K: Into<ItemId>,
    {
        let mut seen = HashSet::new();
        let mut items = Vec::new();

        for (position, (id, payload)) in entries.into_iter().enumerate() {
            let id = id.into();
            if id.is_blank() {
                warn!("Rejected queue: item at position {} has an empty id", position);
                return Err(QueueError::EmptyId(position));
            }
            if !seen.insert(id.clone()) {
                warn!("Rejected queue: duplicate item id {}", id);
                return Err(QueueError::DuplicateId(id));
            }
            items.push(JobItem::new(id, payload));
        }

        debug!("Built job queue with {} items", items.len());
        Ok(Self {
            items: items.into(),
        })
    }

    /// Items in dispatch order.
    pub fn items(&self) -> &[JobItem<P>] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&JobItem<P>> {
        self.items.get(index)
    }

    pub fn position(&self, id: &ItemId) -> Option<usize> {
        self.items.iter().position(|item| &item.id == id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &ItemId> {
        self.items.iter().map(|item| &item.id)
    }
}

impl JobQueue<GenerationRequest> {
    /// Build a queue of generation requests keyed by their file paths.
    pub fn from_requests(requests: Vec<GenerationRequest>) -> QueueResult<Self> {
        Self::new(requests.into_iter().map(|req| (req.item_id(), req)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preserves_caller_order() {
        let queue = JobQueue::new(vec![("c", 3), ("a", 1), ("b", 2)]).unwrap();
        let ids: Vec<&str> = queue.ids().map(|id| id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.get(1).map(|item| item.payload), Some(1));
        assert_eq!(queue.position(&ItemId::new("b")), Some(2));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let err = JobQueue::new(vec![("a", 1), ("b", 2), ("a", 3)]).unwrap_err();
        assert_eq!(err, QueueError::duplicate_id("a"));
    }

    #[test]
    fn test_empty_id_rejected() {
        let err = JobQueue::new(vec![("a", 1), (" ", 2)]).unwrap_err();
        assert_eq!(err, QueueError::EmptyId(1));
    }

    #[test]
    fn test_empty_queue_is_valid() {
        let queue: JobQueue<u8> = tokio_test::assert_ok!(JobQueue::new(Vec::<(&str, u8)>::new()));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_from_requests_uses_file_path() {
        let queue = JobQueue::from_requests(vec![
            GenerationRequest::new("Paris skyline", "destinations/paris.png"),
            GenerationRequest::new("Rome forum", "destinations/rome.png"),
        ])
        .unwrap();
        assert_eq!(queue.items()[1].id, ItemId::new("destinations/rome.png"));

        let dup = JobQueue::from_requests(vec![
            GenerationRequest::new("one", "same.png"),
            GenerationRequest::new("two", "same.png"),
        ]);
        assert!(matches!(dup, Err(QueueError::DuplicateId(_))));
    }
}
