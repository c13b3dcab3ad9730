//! Work item identity.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a work item, unique within one queue.
///
/// Stable across retries of the same item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    /// Create from an existing string.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is empty or whitespace only.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Unique identifier for one batch run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct BatchId(pub String);

impl BatchId {
    /// Generate a new random batch ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One unit of work: an identity plus an uninterpreted payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobItem<P> {
    pub id: ItemId,
    pub payload: P,
}

impl<P> JobItem<P> {
    pub fn new(id: impl Into<ItemId>, payload: P) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_id_serializes_transparently() {
        let id = ItemId::new("images/paris.png");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"images/paris.png\"");
    }

    #[test]
    fn test_blank_ids() {
        assert!(ItemId::new("").is_blank());
        assert!(ItemId::new("   ").is_blank());
        assert!(!ItemId::new("a").is_blank());
    }

    #[test]
    fn test_batch_ids_are_unique() {
        assert_ne!(BatchId::new(), BatchId::new());
    }
}
