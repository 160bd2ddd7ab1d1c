use thiserror::Error;

use crate::model::NodeId;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, HierarchyError>;

/// Errors raised by hierarchy engines and row stores.
#[derive(Debug, Error)]
pub enum HierarchyError {
    /// Making `child` a child of `parent` would make `child` its own ancestor.
    #[error("making {child} a child of {parent} would create a cycle")]
    Cycle {
        /// Proposed parent.
        parent: NodeId,
        /// Node being moved.
        child: NodeId,
    },
    /// Strict `add_child` was asked to adopt a node that already has a parent.
    #[error("{child} already has a parent")]
    AlreadyHasParent {
        /// Node that already has a parent.
        child: NodeId,
    },
    /// Strict `remove_child` was given a node that is not a direct child.
    #[error("{child} is not a child of {parent}")]
    NotAChild {
        /// Node the child was supposed to belong to.
        parent: NodeId,
        /// Node that is not a direct child of `parent`.
        child: NodeId,
    },
    /// The row store lacks a capability the representation depends on.
    #[error("unsupported backend: {0}")]
    UnsupportedBackend(String),
    /// The id does not name a row in the store.
    #[error("node {0} not found")]
    NotFound(NodeId),
    /// The request cannot be expressed by the representation or the store.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Structural fields were found inconsistent while executing an operation.
    #[error("corruption detected: {0}")]
    Corruption(String),
    /// SQLite adapter failure.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// JSON encoding or decoding of a stored column failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HierarchyError {
    /// True for the precondition errors a caller is expected to handle at the call site.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            HierarchyError::Cycle { .. }
                | HierarchyError::AlreadyHasParent { .. }
                | HierarchyError::NotAChild { .. }
                | HierarchyError::UnsupportedBackend(_)
        )
    }
}
