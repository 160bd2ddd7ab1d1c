use std::collections::HashSet;

use tracing::debug;

use crate::config::{DeletePolicy, HierarchyOptions};
use crate::error::{HierarchyError, Result};
use crate::hierarchy::{Hierarchy, IntegrityReport};
use crate::model::{NodeId, Payload, Representation, Row, RowSpec, Side};
use crate::store::{Assign, CmpOp, Cond, Direction, Filter, MemoryStore, OrderKey, Query, RowStore};

use super::signed;

/// Each row stores an interval `[left, right]` enclosing the intervals of
/// all of its descendants.
///
/// Ancestor tests compare two rows; every structural change renumbers the
/// part of the table between the old and new position.
pub struct NestedSet<S = MemoryStore> {
    store: S,
    options: HierarchyOptions,
}

impl<S: RowStore> NestedSet<S> {
    /// Engine with default options (children of deleted nodes move up a level).
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

    /// Number of strict descendants of `node`, read from its interval width.
    pub fn descendant_count(&self, node: NodeId) -> Result<u64> {
        let row = self.get(node)?;
        Ok((row.right - row.left - 1) / 2)
    }

    fn delete_policy(&self) -> DeletePolicy {
        self.options.delete_policy(DeletePolicy::Promote)
    }

    /// Rows whose interval strictly encloses `row`'s.
    fn enclosing(row: &Row) -> Filter {
        Filter::all()
            .bound(Side::Left, CmpOp::Lt, row.left)
            .bound(Side::Right, CmpOp::Gt, row.right)
    }

    /// Rows whose interval lies strictly inside `row`'s.
    fn enclosed(row: &Row) -> Filter {
        Filter::all()
            .bound(Side::Left, CmpOp::Gt, row.left)
            .bound(Side::Right, CmpOp::Lt, row.right)
    }

    /// Moves the chunk `[a, b]` so it starts where bound value `target`
    /// currently sits; everything between shifts over by the chunk size.
    fn relocate(&self, a: u64, b: u64, target: u64) -> Result<()> {
        if (a..=b + 1).contains(&target) {
            return Ok(());
        }
        let size = signed(b - a + 1)?;
        let (lo, hi, shift, chunk_shift) = if target < a {
            (target, a - 1, size, -signed(a - target)?)
        } else {
            (b + 1, target - 1, -size, signed(target - 1 - b)?)
        };

        // Park the chunk above every bound so the range can move freely.
        let park = self.store.max(Side::Right)?.unwrap_or(b) + 1;
        let park_shift = signed(park)?;
        self.store.update_where(
            &Filter::all()
                .bound(Side::Left, CmpOp::Ge, a)
                .bound(Side::Right, CmpOp::Le, b),
            &[
                Assign::Shift(Side::Left, park_shift),
                Assign::Shift(Side::Right, park_shift),
            ],
        )?;

        // Rows with only their left bound in range.
        self.store.update_where(
            &Filter::all()
                .bound(Side::Left, CmpOp::Ge, lo)
                .bound(Side::Left, CmpOp::Le, hi)
                .bound(Side::Right, CmpOp::Gt, hi),
            &[Assign::Shift(Side::Left, shift)],
        )?;
        // Rows with only their right bound in range.
        self.store.update_where(
            &Filter::all()
                .bound(Side::Right, CmpOp::Ge, lo)
                .bound(Side::Right, CmpOp::Le, hi)
                .bound(Side::Left, CmpOp::Lt, lo),
            &[Assign::Shift(Side::Right, shift)],
        )?;
        // Rows entirely in range.
        self.store.update_where(
            &Filter::all()
                .bound(Side::Left, CmpOp::Ge, lo)
                .bound(Side::Right, CmpOp::Le, hi),
            &[
                Assign::Shift(Side::Left, shift),
                Assign::Shift(Side::Right, shift),
            ],
        )?;

        let unpark = chunk_shift - park_shift;
        self.store.update_where(
            &Filter::all().bound(Side::Left, CmpOp::Ge, a + park),
            &[
                Assign::Shift(Side::Left, unpark),
                Assign::Shift(Side::Right, unpark),
            ],
        )?;
        debug!(a, b, gap = target, lo, hi, shift, "nested_set.set_parent.relocate");
        Ok(())
    }

    /// Deletes `row` and closes its gap; its descendants move up one level.
    fn remove_and_close(&self, row: &Row) -> Result<()> {
        self.store.delete(row.id)?;
        self.store.update_where(
            &Self::enclosed(row),
            &[
                Assign::Shift(Side::Left, -1),
                Assign::Shift(Side::Right, -1),
            ],
        )?;
        self.store.update_where(
            &Self::enclosing(row),
            &[Assign::Shift(Side::Right, -2)],
        )?;
        self.store.update_where(
            &Filter::all().bound(Side::Left, CmpOp::Gt, row.right),
            &[
                Assign::Shift(Side::Left, -2),
                Assign::Shift(Side::Right, -2),
            ],
        )?;
        Ok(())
    }
}

impl<S: RowStore> Hierarchy for NestedSet<S> {
    type Store = S;

    fn store(&self) -> &S {
        &self.store
    }

    fn options(&self) -> &HierarchyOptions {
        &self.options
    }

    fn representation(&self) -> Representation {
        Representation::NestedSet
    }

    fn create_root(&self, payload: Payload) -> Result<Row> {
        self.store.atomic(|| {
            let left = match self.store.max(Side::Right)? {
                Some(max) => max + 1,
                None => 0,
            };
            self.store.create(RowSpec {
                left,
                right: left + 1,
                payload,
                ..RowSpec::default()
            })
        })
    }

    fn create_child(&self, parent: NodeId, payload: Payload) -> Result<Row> {
        self.store.atomic(|| {
            let at = self.get(parent)?.right;
            // Open a two-wide gap at the parent's right bound.
            self.store.update_where(
                &Filter::all().bound(Side::Right, CmpOp::Ge, at),
                &[Assign::Shift(Side::Right, 2)],
            )?;
            self.store.update_where(
                &Filter::all().bound(Side::Left, CmpOp::Gt, at),
                &[Assign::Shift(Side::Left, 2)],
            )?;
            self.store.create(RowSpec {
                left: at,
                right: at + 1,
                payload,
                ..RowSpec::default()
            })
        })
    }

    fn parent(&self, node: NodeId) -> Result<Option<Row>> {
        let row = self.get(node)?;
        let query = Query::new(Self::enclosing(&row))
            .order_by(OrderKey::Left, Direction::Desc)
            .limit(1);
        Ok(self.store.select(&query)?.into_iter().next())
    }

    fn is_child_of(&self, node: NodeId, candidate: NodeId) -> Result<bool> {
        let row = self.get(node)?;
        let candidate = self.get(candidate)?;
        Ok(candidate.encloses(&row))
    }

    fn direct_children_query(&self, node: NodeId) -> Result<Query> {
        let row = self.get(node)?;
        let inside = self
            .store
            .select(&Query::new(Self::enclosed(&row)).order_by(OrderKey::Left, Direction::Asc))?;
        // In left order, a direct child is any row starting after the
        // previous direct child ended.
        let mut children = Vec::new();
        let mut edge = row.left;
        for descendant in inside {
            if descendant.left > edge {
                edge = descendant.right;
                children.push(descendant.id);
            }
        }
        Ok(Query::new(Filter::new(Cond::IdIn(children))))
    }

    fn set_parent_unchecked(&self, node: NodeId, parent: Option<NodeId>) -> Result<()> {
        self.store.atomic(|| {
            let row = self.get(node)?;
            let current = self.parent(node)?.map(|p| p.id);
            if current == parent {
                return Ok(());
            }
            let (a, b) = (row.left, row.right);
            let target = match parent {
                None => {
                    let root = self.root(node)?;
                    if a - root.left < root.right - b {
                        root.left
                    } else {
                        root.right + 1
                    }
                }
                Some(parent) => {
                    let p = self.get(parent)?;
                    if p.left >= a && p.right <= b {
                        return Err(HierarchyError::Invalid(
                            "a nested set node cannot move into its own subtree",
                        ));
                    }
                    if p.left < a && b < p.right {
                        // Descending under an ancestor: take the nearer end.
                        if a - p.left < p.right - b {
                            p.left + 1
                        } else {
                            p.right
                        }
                    } else {
                        p.right
                    }
                }
            };
            debug!(%node, from = ?current, to = ?parent, gap = target, "nested_set.set_parent");
            self.relocate(a, b, target)
        })
    }

    fn delete(&self, node: NodeId) -> Result<()> {
        let policy = self.delete_policy();
        self.store.atomic(|| {
            if policy == DeletePolicy::Orphan {
                for child in self.direct_children(node)? {
                    self.set_parent_unchecked(child.id, None)?;
                }
            }
            // Bounds move while children are detached.
            let row = self.get(node)?;
            self.remove_and_close(&row)?;
            debug!(%node, ?policy, left = row.left, right = row.right, "nested_set.delete");
            Ok(())
        })
    }

    fn ancestors(&self, node: NodeId, max_level: Option<usize>) -> Result<Vec<Row>> {
        let row = self.get(node)?;
        let mut query =
            Query::new(Self::enclosing(&row)).order_by(OrderKey::Left, Direction::Desc);
        if let Some(max) = max_level {
            query = query.limit(max);
        }
        self.store.select(&query)
    }

    fn root(&self, node: NodeId) -> Result<Row> {
        let row = self.get(node)?;
        let query = Query::new(Self::enclosing(&row))
            .order_by(OrderKey::Left, Direction::Asc)
            .limit(1);
        Ok(self.store.select(&query)?.into_iter().next().unwrap_or(row))
    }

    fn descendants(&self, node: NodeId) -> Result<Vec<Row>> {
        let row = self.get(node)?;
        self.store
            .select(&Query::new(Self::enclosed(&row)).order_by(OrderKey::Left, Direction::Asc))
    }

    fn check_integrity(&self) -> Result<IntegrityReport> {
        let rows = self
            .store
            .select(&Query::default().order_by(OrderKey::Left, Direction::Asc))?;
        let mut report = IntegrityReport::new(self.representation());
        report.nodes_checked = rows.len() as u64;

        let mut bounds = HashSet::with_capacity(rows.len() * 2);
        for row in &rows {
            if row.left >= row.right {
                report.error(format!("{} has left {} >= right {}", row.id, row.left, row.right));
                continue;
            }
            if (row.right - row.left) % 2 == 0 {
                report.error(format!("{} has an even width", row.id));
            }
            for bound in [row.left, row.right] {
                if !bounds.insert(bound) {
                    report.error(format!("bound value {bound} is used twice (at {})", row.id));
                }
            }
        }

        // Intervals must nest or be disjoint.
        let mut open: Vec<&Row> = Vec::new();
        for row in &rows {
            while open.last().is_some_and(|top| top.right < row.left) {
                open.pop();
            }
            if let Some(top) = open.last() {
                if row.right > top.right {
                    report.error(format!("{} partially overlaps {}", row.id, top.id));
                }
            }
            open.push(row);
        }

        let lefts: Vec<u64> = rows.iter().map(|row| row.left).collect();
        for (index, row) in rows.iter().enumerate() {
            if report.is_full() {
                break;
            }
            if row.left >= row.right {
                continue;
            }
            let inside = lefts[index + 1..].partition_point(|left| *left < row.right) as u64;
            let expected = (row.right - row.left - 1) / 2;
            if inside != expected {
                report.error(format!(
                    "{} spans {expected} descendants but encloses {inside}",
                    row.id
                ));
            }
        }
        Ok(report)
    }
}
