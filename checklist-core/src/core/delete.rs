//! Delete strategy and result types for item removal.
//!
//! - [`DeleteStrategy::DeleteAll`] removes the target item and its whole
//!   subtree.
//! - [`DeleteStrategy::PromoteChildren`] removes only the target item and
//!   moves its direct children into its place, keeping their order.
//!
//! ```rust
//! use checklist_core::DeleteStrategy;
//!
//! let json = serde_json::to_string(&DeleteStrategy::PromoteChildren).unwrap();
//! assert_eq!(json, r#""PromoteChildren""#);
//! ```

use serde::{Deserialize, Serialize};

/// Determines how children are handled when an item is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum DeleteStrategy {
    /// Delete the target item and all of its descendants.
    #[default]
    DeleteAll,

    /// Delete only the target item; its children take its place.
    PromoteChildren,
}

/// The outcome of a delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    /// Number of items permanently removed.
    pub deleted_count: usize,

    /// Number of children moved up into the deleted item's place.
    pub promoted_count: usize,

    /// Ids of the removed items.
    pub deleted_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_serializes_camel_case() {
        let result = DeleteResult {
            deleted_count: 1,
            promoted_count: 2,
            deleted_ids: vec!["a".to_string()],
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("deletedCount"));
        assert!(json.contains("promotedCount"));
    }
}
