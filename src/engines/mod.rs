//! One [`crate::Hierarchy`] implementation per storage layout.

use crate::error::{HierarchyError, Result};

pub mod adjacency;
pub mod nested_set;
pub mod path;

pub use adjacency::AdjacencyList;
pub use nested_set::NestedSet;
pub use path::PathEnumeration;

/// Converts an interval distance into a signed shift.
pub(crate) fn signed(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| HierarchyError::Invalid("interval shift out of range"))
}
