use std::collections::HashMap;

use tracing::debug;

use crate::config::{DeletePolicy, HierarchyOptions};
use crate::error::{HierarchyError, Result};
use crate::hierarchy::{walk_too_deep, Hierarchy, IntegrityReport};
use crate::model::{Field, NodeId, Payload, Representation, Row, RowSpec};
use crate::store::{Assign, Cond, Filter, MemoryStore, Query, RowStore};

/// Each row stores a reference to its parent.
///
/// Reparenting writes one column; ancestor tests walk the parent chain one
/// row at a time.
pub struct AdjacencyList<S = MemoryStore> {
    store: S,
    options: HierarchyOptions,
}

impl<S: RowStore> AdjacencyList<S> {
    /// Engine with default options (children of deleted nodes become roots).
    pub fn new(store: S) -> Self {
        Self::with_options(store, HierarchyOptions::default())
    }

    /// Engine with explicit options.
    pub fn with_options(store: S, options: HierarchyOptions) -> Self {
        Self { store, options }
    }

    /// Releases the store.
    pub fn into_store(self) -> S {
        self.store
    }

    fn delete_policy(&self) -> DeletePolicy {
        self.options.delete_policy(DeletePolicy::Orphan)
    }
}

impl<S: RowStore> Hierarchy for AdjacencyList<S> {
    type Store = S;

    fn store(&self) -> &S {
        &self.store
    }

    fn options(&self) -> &HierarchyOptions {
        &self.options
    }

    fn representation(&self) -> Representation {
        Representation::AdjacencyList
    }

    fn create_root(&self, payload: Payload) -> Result<Row> {
        self.store.create(RowSpec::new(payload))
    }

    fn create_child(&self, parent: NodeId, payload: Payload) -> Result<Row> {
        self.store.atomic(|| {
            self.get(parent)?;
            self.store.create(RowSpec {
                parent: Some(parent),
                payload,
                ..RowSpec::default()
            })
        })
    }

    fn parent(&self, node: NodeId) -> Result<Option<Row>> {
        match self.get(node)?.parent {
            Some(parent) => self.store.get(parent),
            None => Ok(None),
        }
    }

    fn is_child_of(&self, node: NodeId, candidate: NodeId) -> Result<bool> {
        let mut current = self.get(node)?.parent;
        let mut hops = 0usize;
        while let Some(id) = current {
            if id == candidate {
                return Ok(true);
            }
            hops += 1;
            if hops > self.options.max_walk_depth {
                return Err(walk_too_deep(node, self.options.max_walk_depth));
            }
            current = self.store.get(id)?.and_then(|row| row.parent);
        }
        Ok(false)
    }

    fn direct_children_query(&self, node: NodeId) -> Result<Query> {
        Ok(Query::new(Filter::new(Cond::ParentIs(Some(node)))))
    }

    fn set_parent_unchecked(&self, node: NodeId, parent: Option<NodeId>) -> Result<()> {
        self.store.atomic(|| {
            let mut row = self.get(node)?;
            if let Some(parent) = parent {
                self.get(parent)?;
            }
            debug!(%node, from = ?row.parent, to = ?parent, "adjacency.set_parent");
            row.parent = parent;
            self.store.update(&row, &[Field::Parent])
        })
    }

    fn delete(&self, node: NodeId) -> Result<()> {
        let policy = self.delete_policy();
        self.store.atomic(|| {
            let row = self.get(node)?;
            let adopter = match policy {
                DeletePolicy::Orphan => None,
                DeletePolicy::Promote => row.parent.filter(|parent| *parent != node),
            };
            let moved = self.store.update_where(
                &Filter::new(Cond::ParentIs(Some(node))),
                &[Assign::SetParent(adopter)],
            )?;
            self.store.delete(node)?;
            debug!(%node, ?policy, children = moved, "adjacency.delete");
            Ok(())
        })
    }

    // One read per hop instead of the two the provided walk needs.
    fn ancestors(&self, node: NodeId, max_level: Option<usize>) -> Result<Vec<Row>> {
        let limit = max_level.unwrap_or(usize::MAX);
        let mut ancestors = Vec::new();
        let mut next = self.get(node)?.parent;
        while ancestors.len() < limit {
            let Some(id) = next else { break };
            let Some(row) = self.store.get(id)? else { break };
            if ancestors.len() >= self.options.max_walk_depth {
                return Err(walk_too_deep(node, self.options.max_walk_depth));
            }
            next = row.parent;
            ancestors.push(row);
        }
        Ok(ancestors)
    }

    fn root(&self, node: NodeId) -> Result<Row> {
        let mut current = self.get(node)?;
        let mut hops = 0usize;
        while let Some(id) = current.parent {
            let Some(parent) = self.store.get(id)? else { break };
            hops += 1;
            if hops > self.options.max_walk_depth {
                return Err(walk_too_deep(node, self.options.max_walk_depth));
            }
            current = parent;
        }
        Ok(current)
    }

    fn check_integrity(&self) -> Result<IntegrityReport> {
        let rows = self.store.select(&Query::default())?;
        let mut report = IntegrityReport::new(self.representation());
        report.nodes_checked = rows.len() as u64;
        let parents: HashMap<NodeId, Option<NodeId>> =
            rows.iter().map(|row| (row.id, row.parent)).collect();

        for row in &rows {
            if let Some(parent) = row.parent {
                if !parents.contains_key(&parent) {
                    report.error(format!("{} references missing parent {parent}", row.id));
                }
            }
        }

        // 0 = unvisited, 1 = on the current walk, 2 = known to reach a root.
        let mut state: HashMap<NodeId, u8> = HashMap::with_capacity(rows.len());
        for row in &rows {
            if report.is_full() {
                break;
            }
            let mut path = Vec::new();
            let mut current = Some(row.id);
            while let Some(id) = current {
                match state.get(&id).copied().unwrap_or(0) {
                    2 => break,
                    1 => {
                        report.error(format!("parent chain through {id} forms a cycle"));
                        break;
                    }
                    _ => {
                        state.insert(id, 1);
                        path.push(id);
                        current = parents.get(&id).copied().flatten();
                    }
                }
            }
            for id in path {
                state.insert(id, 2);
            }
        }
        Ok(report)
    }
}
