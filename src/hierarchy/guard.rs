use tracing::debug;

use crate::error::{HierarchyError, Result};
use crate::model::NodeId;

use super::Hierarchy;

/// Fails with [`HierarchyError::Cycle`] when giving `child` the parent `parent`
/// would make `child` its own ancestor.
///
/// Detaching (`parent == None`) never cycles. Callers run this inside the same
/// atomic unit as the mutation it protects.
pub fn ensure_acyclic<H>(hierarchy: &H, child: NodeId, parent: Option<NodeId>) -> Result<()>
where
    H: Hierarchy + ?Sized,
{
    let Some(parent) = parent else {
        return Ok(());
    };
    if parent == child || hierarchy.is_child_of(parent, child)? {
        debug!(
            representation = %hierarchy.representation(),
            %parent,
            %child,
            "hierarchy.guard.cycle_rejected"
        );
        return Err(HierarchyError::Cycle { parent, child });
    }
    Ok(())
}
