use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{HierarchyError, Result};
use crate::model::Row;
use crate::store::{Query, RowStore};

use super::node::Node;
use super::Hierarchy;

/// Bounds for [`Hierarchy::children`]. `None` leaves a dimension unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalOptions {
    /// Levels below the root that are expanded.
    pub max_generations: Option<usize>,
    /// Children taken from each expanded node.
    pub max_siblings: Option<usize>,
    /// Nodes in the result, root included.
    pub max_total: Option<usize>,
}

impl TraversalOptions {
    /// No bounds.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Caps the number of levels below the root.
    pub fn max_generations(mut self, generations: usize) -> Self {
        self.max_generations = Some(generations);
        self
    }

    /// Caps the children taken per node.
    pub fn max_siblings(mut self, siblings: usize) -> Self {
        self.max_siblings = Some(siblings);
        self
    }

    /// Caps the size of the result, root included.
    pub fn max_total(mut self, total: usize) -> Self {
        self.max_total = Some(total);
        self
    }

    /// True when the bounds leave room for nothing but the root.
    pub fn is_root_only(&self) -> bool {
        self.max_generations == Some(0)
            || self.max_siblings == Some(0)
            || self.max_total.is_some_and(|total| total < 2)
    }
}

struct Slot {
    row: Row,
    children: Vec<usize>,
}

/// Breadth-first expansion of `root` under `options`.
///
/// `transform` is applied to each direct-children query before the sibling
/// and total limits, so it decides which children survive and in what order.
pub(crate) fn breadth_first<H>(
    hierarchy: &H,
    root: Row,
    options: &TraversalOptions,
    transform: &dyn Fn(Query) -> Query,
) -> Result<Node>
where
    H: Hierarchy + ?Sized,
{
    if options.is_root_only() {
        return Ok(Node::leaf(root));
    }

    let mut arena = vec![Slot {
        row: root,
        children: Vec::new(),
    }];
    let mut queue = VecDeque::from([(0usize, 0usize)]);
    // The root already counts towards the total.
    let mut remaining = options.max_total.map(|total| total - 1);

    while let Some((index, generation)) = queue.pop_front() {
        if options.max_generations.is_some_and(|max| generation >= max) {
            continue;
        }
        let take = match (options.max_siblings, remaining) {
            (Some(siblings), Some(left)) => Some(siblings.min(left)),
            (siblings, left) => siblings.or(left),
        };
        if take == Some(0) {
            continue;
        }

        let mut query = transform(hierarchy.direct_children_query(arena[index].row.id)?);
        if let Some(take) = take {
            query = query.limit(take);
        }
        let rows = hierarchy.store().select(&query)?;
        trace!(
            node = %arena[index].row.id,
            generation,
            children = rows.len(),
            "hierarchy.children.expand"
        );

        for row in rows {
            let child = arena.len();
            arena.push(Slot {
                row,
                children: Vec::new(),
            });
            arena[index].children.push(child);
            queue.push_back((child, generation + 1));
            if let Some(left) = remaining.as_mut() {
                *left -= 1;
            }
        }
    }

    assemble(arena).ok_or_else(|| HierarchyError::Corruption("traversal lost its root".into()))
}

/// Children always sit at higher arena indexes than their parent, so building
/// from the back finishes every subtree before its parent needs it.
fn assemble(arena: Vec<Slot>) -> Option<Node> {
    let mut built: Vec<Option<Node>> = Vec::with_capacity(arena.len());
    built.resize_with(arena.len(), || None);
    for (index, slot) in arena.into_iter().enumerate().rev() {
        let children = slot
            .children
            .iter()
            .filter_map(|child| built[*child].take())
            .collect();
        built[index] = Some(Node {
            instance: slot.row,
            children,
        });
    }
    built.into_iter().next().flatten()
}
