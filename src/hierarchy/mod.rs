//! The representation-independent hierarchy contract.
//!
//! [`Hierarchy`] is implemented once per storage layout (see
//! [`crate::engines`]). Each engine supplies the handful of operations whose
//! cost depends on the layout; everything else (checked reparenting, strict
//! child management, ancestor walks, bounded traversal) is provided here in
//! terms of those primitives and may be overridden where a layout can do it
//! in fewer statements.

use std::collections::VecDeque;

use tracing::debug;

use crate::config::HierarchyOptions;
use crate::error::{HierarchyError, Result};
use crate::model::{NodeId, Payload, Representation, Row};
use crate::store::{Query, RowStore};

pub mod guard;
pub mod node;
pub mod traversal;
pub mod verify;

pub use node::Node;
pub use traversal::TraversalOptions;
pub use verify::{Finding, IntegrityReport, Severity};

/// Parent/child queries and mutations over a [`RowStore`].
///
/// Every method takes node ids and re-reads the structural fields it needs,
/// so rows obtained earlier may be stale without affecting correctness.
/// Every structural mutation runs inside one [`RowStore::atomic`] unit and
/// leaves the table unchanged when it fails.
pub trait Hierarchy {
    /// Backing store type.
    type Store: RowStore;

    /// The backing store.
    fn store(&self) -> &Self::Store;

    /// Engine options.
    fn options(&self) -> &HierarchyOptions;

    /// Layout implemented by this engine.
    fn representation(&self) -> Representation;

    /// Creates a node without a parent.
    fn create_root(&self, payload: Payload) -> Result<Row>;

    /// Creates a node as the child of `parent`.
    ///
    /// # Errors
    /// [`HierarchyError::NotFound`] when `parent` does not exist.
    fn create_child(&self, parent: NodeId, payload: Payload) -> Result<Row>;

    /// Current parent of `node`, or `None` for a root.
    fn parent(&self, node: NodeId) -> Result<Option<Row>>;

    /// True when `candidate` is an ancestor of `node` at any level.
    fn is_child_of(&self, node: NodeId, candidate: NodeId) -> Result<bool>;

    /// Query selecting the direct children of `node`.
    fn direct_children_query(&self, node: NodeId) -> Result<Query>;

    /// Moves `node` (with its subtree) under `parent`, or makes it a root.
    ///
    /// No cycle check is made. Layouts that can represent a cycle will store
    /// one; the others reject such a move with [`HierarchyError::Invalid`].
    fn set_parent_unchecked(&self, node: NodeId, parent: Option<NodeId>) -> Result<()>;

    /// Removes `node` and repairs every row that referred to it according to
    /// the configured [`crate::config::DeletePolicy`].
    fn delete(&self, node: NodeId) -> Result<()>;

    /// Scans the whole table for broken structural invariants.
    fn check_integrity(&self) -> Result<IntegrityReport>;

    /// Fetches a row.
    ///
    /// # Errors
    /// [`HierarchyError::NotFound`] when the id is not in the store.
    fn get(&self, node: NodeId) -> Result<Row> {
        self.store()
            .get(node)?
            .ok_or(HierarchyError::NotFound(node))
    }

    /// Direct children of `node`, by id.
    fn direct_children(&self, node: NodeId) -> Result<Vec<Row>> {
        self.direct_children_with(node, &|query| query)
    }

    /// Direct children of `node` after `transform` has reshaped the query
    /// (ordering, extra conditions, a limit).
    fn direct_children_with(
        &self,
        node: NodeId,
        transform: &dyn Fn(Query) -> Query,
    ) -> Result<Vec<Row>> {
        let query = transform(self.direct_children_query(node)?);
        self.store().select(&query)
    }

    /// Moves `node` under `parent` (or detaches it), refusing to create a cycle.
    ///
    /// # Errors
    /// [`HierarchyError::Cycle`] when `parent` is `node` itself or one of its
    /// descendants; the tree is left unchanged.
    fn set_parent(&self, node: NodeId, parent: Option<NodeId>) -> Result<()> {
        self.store().atomic(|| {
            guard::ensure_acyclic(self, node, parent)?;
            self.set_parent_unchecked(node, parent)
        })
    }

    /// Makes `child` a child of `parent`.
    ///
    /// # Errors
    /// [`HierarchyError::AlreadyHasParent`] when `check_has_parent` is set and
    /// `child` has a parent; [`HierarchyError::Cycle`] as for
    /// [`Self::set_parent`].
    fn add_child(&self, parent: NodeId, child: NodeId, check_has_parent: bool) -> Result<()> {
        self.store().atomic(|| {
            if check_has_parent && self.parent(child)?.is_some() {
                return Err(HierarchyError::AlreadyHasParent { child });
            }
            self.set_parent(child, Some(parent))
        })
    }

    /// Detaches `child` from `parent` when it is a direct child. Anything else
    /// is a no-op unless `check_is_child` is set.
    ///
    /// # Errors
    /// [`HierarchyError::NotAChild`] when `check_is_child` is set and `child`
    /// is not a direct child of `parent`.
    fn remove_child(&self, parent: NodeId, child: NodeId, check_is_child: bool) -> Result<()> {
        self.store().atomic(|| match self.parent(child)? {
            Some(current) if current.id == parent => self.set_parent_unchecked(child, None),
            _ if check_is_child => Err(HierarchyError::NotAChild { parent, child }),
            _ => Ok(()),
        })
    }

    /// Ancestors of `node`, nearest first and root last, at most `max_level` of them.
    fn ancestors(&self, node: NodeId, max_level: Option<usize>) -> Result<Vec<Row>> {
        let limit = max_level.unwrap_or(usize::MAX);
        let mut ancestors = Vec::new();
        let mut current = node;
        while ancestors.len() < limit {
            let Some(parent) = self.parent(current)? else {
                break;
            };
            if ancestors.len() >= self.options().max_walk_depth {
                return Err(walk_too_deep(node, self.options().max_walk_depth));
            }
            current = parent.id;
            ancestors.push(parent);
        }
        Ok(ancestors)
    }

    /// The topmost ancestor of `node`, or `node` itself when it is a root.
    fn root(&self, node: NodeId) -> Result<Row> {
        let mut current = self.get(node)?;
        let mut hops = 0usize;
        while let Some(parent) = self.parent(current.id)? {
            hops += 1;
            if hops > self.options().max_walk_depth {
                return Err(walk_too_deep(node, self.options().max_walk_depth));
            }
            current = parent;
        }
        Ok(current)
    }

    /// Every strict descendant of `node`.
    fn descendants(&self, node: NodeId) -> Result<Vec<Row>> {
        let mut found = Vec::new();
        let mut queue = VecDeque::from([node]);
        while let Some(current) = queue.pop_front() {
            for child in self.direct_children(current)? {
                if child.id == node {
                    return Err(HierarchyError::Corruption(format!(
                        "{node} is its own descendant"
                    )));
                }
                queue.push_back(child.id);
                found.push(child);
            }
        }
        Ok(found)
    }

    /// Bounded breadth-first snapshot of the subtree under `node`.
    fn children(&self, node: NodeId, options: &TraversalOptions) -> Result<Node> {
        self.children_with(node, options, &|query| query)
    }

    /// As [`Self::children`], reshaping every direct-children query with
    /// `transform` before the limits are applied.
    fn children_with(
        &self,
        node: NodeId,
        options: &TraversalOptions,
        transform: &dyn Fn(Query) -> Query,
    ) -> Result<Node> {
        let root = self.get(node)?;
        traversal::breadth_first(self, root, options, transform)
    }
}

pub(crate) fn walk_too_deep(node: NodeId, limit: usize) -> HierarchyError {
    debug!(%node, limit, "hierarchy.walk.limit_exceeded");
    HierarchyError::Corruption(format!(
        "parent chain of {node} is longer than {limit} hops"
    ))
}
