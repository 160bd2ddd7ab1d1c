use std::collections::VecDeque;
use std::fmt;

use crate::model::{NodeId, Row};

/// Snapshot of a subtree produced by [`crate::Hierarchy::children`].
///
/// Children are kept in the order the direct-children query returned them.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// The row at this position.
    pub instance: Row,
    /// Child subtrees, in query order.
    pub children: Vec<Node>,
}

impl Node {
    /// A node without children.
    pub fn leaf(instance: Row) -> Self {
        Self {
            instance,
            children: Vec::new(),
        }
    }

    /// Id of the row at this position.
    pub fn id(&self) -> NodeId {
        self.instance.id
    }

    /// Number of nodes in the snapshot, this one included.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Always false; a snapshot holds at least its root.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Number of levels below this node (0 for a leaf).
    pub fn depth(&self) -> usize {
        self.children
            .iter()
            .map(|child| child.depth() + 1)
            .max()
            .unwrap_or(0)
    }

    /// Nodes in breadth-first order, starting with this one.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            queue: VecDeque::from([self]),
        }
    }

    /// Ids in breadth-first order.
    pub fn ids(&self) -> Vec<NodeId> {
        self.iter().map(Node::id).collect()
    }

    /// Looks up a node by id anywhere in the snapshot.
    pub fn find(&self, id: NodeId) -> Option<&Node> {
        self.iter().find(|node| node.id() == id)
    }

    fn write_indented(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        for child in &self.children {
            writeln!(f)?;
            write!(f, "{:indent$}- {}", "", child.instance, indent = indent)?;
            child.write_indented(f, indent + 2)?;
        }
        Ok(())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.instance)?;
        self.write_indented(f, 2)
    }
}

/// Breadth-first iterator over a [`Node`].
pub struct Iter<'a> {
    queue: VecDeque<&'a Node>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.queue.pop_front()?;
        self.queue.extend(node.children.iter());
        Some(node)
    }
}

impl<'a> IntoIterator for &'a Node {
    type Item = &'a Node;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
