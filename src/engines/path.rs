use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::config::{DeletePolicy, HierarchyOptions};
use crate::error::{HierarchyError, Result};
use crate::hierarchy::{Hierarchy, IntegrityReport};
use crate::model::{Field, NodeId, Payload, Representation, Row, RowSpec};
use crate::store::{Cond, Filter, MemoryStore, Query, RowStore};

/// Each row stores the ids of all of its ancestors, nearest first.
///
/// Ancestor tests are a list lookup; moving a node rewrites the lists of
/// its whole subtree. The store must be able to query inside the list.
pub struct PathEnumeration<S = MemoryStore> {
    store: S,
    options: HierarchyOptions,
}

impl<S: RowStore> PathEnumeration<S> {
    /// Engine with default options (children of deleted nodes become roots).
    ///
    /// # Errors
    /// [`HierarchyError::UnsupportedBackend`] when the store cannot evaluate
    /// conditions over the ancestor list.
    pub fn new(store: S) -> Result<Self> {
        Self::with_options(store, HierarchyOptions::default())
    }

    /// Engine with explicit options.
    pub fn with_options(store: S, options: HierarchyOptions) -> Result<Self> {
        if !store.capabilities().list_queries {
            return Err(HierarchyError::UnsupportedBackend(
                "path enumeration needs a store that can query list fields".to_string(),
            ));
        }
        Ok(Self { store, options })
    }

    /// Releases the store.
    pub fn into_store(self) -> S {
        self.store
    }

    fn delete_policy(&self) -> DeletePolicy {
        self.options.delete_policy(DeletePolicy::Orphan)
    }

    fn subtree(&self, node: NodeId) -> Result<Vec<Row>> {
        self.store
            .select(&Query::new(Filter::new(Cond::AncestorsContain(node))))
    }
}

/// Position of `node` in a descendant's list.
fn position(row: &Row, node: NodeId) -> Result<usize> {
    row.ancestors
        .iter()
        .position(|id| *id == node)
        .ok_or_else(|| {
            HierarchyError::Corruption(format!("{} was selected as a descendant of {node}", row.id))
        })
}

impl<S: RowStore> Hierarchy for PathEnumeration<S> {
    type Store = S;

    fn store(&self) -> &S {
        &self.store
    }

    fn options(&self) -> &HierarchyOptions {
        &self.options
    }

    fn representation(&self) -> Representation {
        Representation::PathEnumeration
    }

    fn create_root(&self, payload: Payload) -> Result<Row> {
        self.store.create(RowSpec::new(payload))
    }

    fn create_child(&self, parent: NodeId, payload: Payload) -> Result<Row> {
        self.store.atomic(|| {
            let parent = self.get(parent)?;
            let mut ancestors = Vec::with_capacity(parent.ancestors.len() + 1);
            ancestors.push(parent.id);
            ancestors.extend(parent.ancestors);
            self.store.create(RowSpec {
                ancestors,
                payload,
                ..RowSpec::default()
            })
        })
    }

    fn parent(&self, node: NodeId) -> Result<Option<Row>> {
        match self.get(node)?.ancestors.first() {
            Some(parent) => self.store.get(*parent),
            None => Ok(None),
        }
    }

    fn is_child_of(&self, node: NodeId, candidate: NodeId) -> Result<bool> {
        Ok(self.get(node)?.ancestors.contains(&candidate))
    }

    fn direct_children_query(&self, node: NodeId) -> Result<Query> {
        Ok(Query::new(Filter::new(Cond::AncestorAt(0, node))))
    }

    fn set_parent_unchecked(&self, node: NodeId, parent: Option<NodeId>) -> Result<()> {
        self.store.atomic(|| {
            let mut row = self.get(node)?;
            let lineage = match parent {
                None => Vec::new(),
                Some(parent) => {
                    let parent = self.get(parent)?;
                    if parent.id == node || parent.ancestors.contains(&node) {
                        return Err(HierarchyError::Invalid(
                            "a path enumeration node cannot move into its own subtree",
                        ));
                    }
                    let mut lineage = Vec::with_capacity(parent.ancestors.len() + 1);
                    lineage.push(parent.id);
                    lineage.extend(parent.ancestors);
                    lineage
                }
            };
            if row.ancestors == lineage {
                return Ok(());
            }

            row.ancestors = lineage.clone();
            self.store.update(&row, &[Field::Ancestors])?;

            // Each descendant keeps its path down to `node` and takes the new lineage above it.
            let descendants = self.subtree(node)?;
            for mut descendant in descendants.iter().cloned() {
                let keep = position(&descendant, node)? + 1;
                descendant.ancestors.truncate(keep);
                descendant.ancestors.extend_from_slice(&lineage);
                self.store.update(&descendant, &[Field::Ancestors])?;
            }
            debug!(
                %node,
                to = ?parent,
                descendants = descendants.len(),
                "path_enumeration.set_parent"
            );
            Ok(())
        })
    }

    fn delete(&self, node: NodeId) -> Result<()> {
        let policy = self.delete_policy();
        self.store.atomic(|| {
            self.get(node)?;
            let descendants = self.subtree(node)?;
            for mut descendant in descendants.iter().cloned() {
                let at = position(&descendant, node)?;
                match policy {
                    DeletePolicy::Orphan => descendant.ancestors.truncate(at),
                    DeletePolicy::Promote => {
                        descendant.ancestors.remove(at);
                    }
                }
                self.store.update(&descendant, &[Field::Ancestors])?;
            }
            self.store.delete(node)?;
            debug!(%node, ?policy, descendants = descendants.len(), "path_enumeration.delete");
            Ok(())
        })
    }

    fn ancestors(&self, node: NodeId, max_level: Option<usize>) -> Result<Vec<Row>> {
        let row = self.get(node)?;
        let take = max_level.unwrap_or(usize::MAX).min(row.ancestors.len());
        let ids = row.ancestors[..take].to_vec();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut found: HashMap<NodeId, Row> = self
            .store
            .select(&Query::new(Filter::new(Cond::IdIn(ids.clone()))))?
            .into_iter()
            .map(|row| (row.id, row))
            .collect();
        ids.iter()
            .map(|id| {
                found.remove(id).ok_or_else(|| {
                    HierarchyError::Corruption(format!("{node} lists missing ancestor {id}"))
                })
            })
            .collect()
    }

    fn root(&self, node: NodeId) -> Result<Row> {
        let row = self.get(node)?;
        match row.ancestors.last() {
            Some(root) => self.get(*root),
            None => Ok(row),
        }
    }

    fn descendants(&self, node: NodeId) -> Result<Vec<Row>> {
        self.get(node)?;
        self.subtree(node)
    }

    fn check_integrity(&self) -> Result<IntegrityReport> {
        let rows = self.store.select(&Query::default())?;
        let mut report = IntegrityReport::new(self.representation());
        report.nodes_checked = rows.len() as u64;
        let lists: HashMap<NodeId, &[NodeId]> = rows
            .iter()
            .map(|row| (row.id, row.ancestors.as_slice()))
            .collect();

        for row in &rows {
            if report.is_full() {
                break;
            }
            if row.ancestors.contains(&row.id) {
                report.error(format!("{} lists itself as an ancestor", row.id));
                continue;
            }
            let unique: HashSet<&NodeId> = row.ancestors.iter().collect();
            if unique.len() != row.ancestors.len() {
                report.error(format!("{} lists an ancestor twice", row.id));
            }
            let Some(parent) = row.ancestors.first() else {
                continue;
            };
            match lists.get(parent) {
                None => report.error(format!("{} references missing parent {parent}", row.id)),
                Some(stored) if *stored != &row.ancestors[1..] => report.error(format!(
                    "{} disagrees with the stored path of its parent {parent}",
                    row.id
                )),
                Some(_) => {}
            }
        }
        Ok(report)
    }
}
