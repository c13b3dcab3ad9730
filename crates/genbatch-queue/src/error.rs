//! Queue error types.

use thiserror::Error;

use genbatch_models::ItemId;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("Duplicate item id: {0}")]
    DuplicateId(ItemId),

    #[error("Item at position {0} has an empty id")]
    EmptyId(usize),
}

impl QueueError {
    pub fn duplicate_id(id: impl Into<ItemId>) -> Self {
        Self::DuplicateId(id.into())
    }
}
