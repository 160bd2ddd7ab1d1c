//! Declarative filter, ordering and bulk-update language understood by every row store.

use std::cmp::Ordering;

use crate::model::{NodeId, PropertyValue, Row, Side};

/// Comparison operator for integer bounds and payload properties.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum CmpOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    /// Applies the operator to an already computed ordering of `lhs` against `rhs`.
    pub fn holds(self, ordering: Ordering) -> bool {
        match self {
            CmpOp::Eq => ordering == Ordering::Equal,
            CmpOp::Lt => ordering == Ordering::Less,
            CmpOp::Le => ordering != Ordering::Greater,
            CmpOp::Gt => ordering == Ordering::Greater,
            CmpOp::Ge => ordering != Ordering::Less,
        }
    }

    pub(crate) fn sql(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

/// A single predicate over a row.
#[derive(Clone, Debug, PartialEq)]
pub enum Cond {
    /// Id is one of the listed ids.
    IdIn(Vec<NodeId>),
    /// Adjacency parent equals the value (`None` matches roots).
    ParentIs(Option<NodeId>),
    /// Nested-set bound compared against a constant.
    Bound(Side, CmpOp, u64),
    /// Ancestor list contains the id. Requires list queries.
    AncestorsContain(NodeId),
    /// Ancestor list has the id at the index. Requires list queries.
    AncestorAt(usize, NodeId),
    /// Payload property compared against a value; rows without the key never match.
    Property(String, CmpOp, PropertyValue),
}

impl Cond {
    /// True when evaluating the condition needs list-field support from the store.
    pub fn needs_list_queries(&self) -> bool {
        matches!(self, Cond::AncestorsContain(_) | Cond::AncestorAt(..))
    }

    /// Evaluates the condition against an in-memory row.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Cond::IdIn(ids) => ids.contains(&row.id),
            Cond::ParentIs(parent) => row.parent == *parent,
            Cond::Bound(side, op, value) => op.holds(row.bound(*side).cmp(value)),
            Cond::AncestorsContain(id) => row.ancestors.contains(id),
            Cond::AncestorAt(index, id) => row.ancestors.get(*index) == Some(id),
            Cond::Property(key, op, value) => row
                .property(key)
                .and_then(|actual| actual.partial_cmp_value(value))
                .is_some_and(|ordering| op.holds(ordering)),
        }
    }
}

/// A conjunction of conditions. The empty filter matches every row.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter {
    conds: Vec<Cond>,
}

impl Filter {
    /// Matches every row.
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter with a single condition.
    pub fn new(cond: Cond) -> Self {
        Self { conds: vec![cond] }
    }

    /// Adds a condition.
    pub fn and(mut self, cond: Cond) -> Self {
        self.conds.push(cond);
        self
    }

    /// Shorthand for `Cond::Bound`.
    pub fn bound(self, side: Side, op: CmpOp, value: u64) -> Self {
        self.and(Cond::Bound(side, op, value))
    }

    /// Conditions in insertion order.
    pub fn conds(&self) -> &[Cond] {
        &self.conds
    }

    /// True when any condition needs list-field support.
    pub fn needs_list_queries(&self) -> bool {
        self.conds.iter().any(Cond::needs_list_queries)
    }

    /// Evaluates every condition against `row`.
    pub fn matches(&self, row: &Row) -> bool {
        self.conds.iter().all(|cond| cond.matches(row))
    }
}

/// Sort key for [`Query::order_by`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum OrderKey {
    Id,
    Left,
    Right,
    /// Payload property; rows without it sort first.
    Property(String),
}

/// Sort direction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Asc,
    Desc,
}

/// A filter with ordering and an optional limit.
///
/// Rows that compare equal on every order key are returned by ascending id.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Query {
    pub filter: Filter,
    pub order: Vec<(OrderKey, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    /// Selects the rows matched by `filter` in id order.
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            order: Vec::new(),
            limit: None,
        }
    }

    /// Narrows the query with another condition.
    pub fn filter(mut self, cond: Cond) -> Self {
        self.filter = self.filter.and(cond);
        self
    }

    /// Appends a sort key.
    pub fn order_by(mut self, key: OrderKey, direction: Direction) -> Self {
        self.order.push((key, direction));
        self
    }

    /// Sorts by a payload property, ascending.
    pub fn order_by_property(self, key: impl Into<String>) -> Self {
        self.order_by(OrderKey::Property(key.into()), Direction::Asc)
    }

    /// Sorts by a payload property, descending.
    pub fn order_by_property_desc(self, key: impl Into<String>) -> Self {
        self.order_by(OrderKey::Property(key.into()), Direction::Desc)
    }

    /// Caps the number of rows; an existing smaller cap is kept.
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(self.limit.map_or(n, |current| current.min(n)));
        self
    }

    /// Compares two rows by the query's ordering, falling back to id.
    pub fn compare(&self, a: &Row, b: &Row) -> Ordering {
        for (key, direction) in &self.order {
            let ordering = match key {
                OrderKey::Id => a.id.cmp(&b.id),
                OrderKey::Left => a.left.cmp(&b.left),
                OrderKey::Right => a.right.cmp(&b.right),
                OrderKey::Property(name) => {
                    PropertyValue::sort_cmp(a.property(name), b.property(name))
                }
            };
            let ordering = match direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        a.id.cmp(&b.id)
    }
}

/// Column assignment applied by [`super::RowStore::update_where`].
#[derive(Clone, Debug, PartialEq)]
pub enum Assign {
    /// `bound = bound + delta`.
    Shift(Side, i64),
    /// `parent = value`.
    SetParent(Option<NodeId>),
}

impl Assign {
    /// Applies the assignment to an in-memory row.
    pub fn apply(&self, row: &mut Row) -> crate::error::Result<()> {
        match self {
            Assign::Shift(side, delta) => {
                let bound = row.bound_mut(*side);
                *bound = bound
                    .checked_add_signed(*delta)
                    .ok_or(crate::error::HierarchyError::Invalid("bound shift out of range"))?;
            }
            Assign::SetParent(parent) => row.parent = *parent,
        }
        Ok(())
    }
}
