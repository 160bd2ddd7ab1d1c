//! Row store contract consumed by the hierarchy engines, plus two adapters.
//!
//! Engines never touch storage directly: every read is a [`Query`] and every
//! bulk renumbering is an [`Assign`] list applied through
//! [`RowStore::update_where`]. Structural mutations run inside
//! [`RowStore::atomic`] so a failed operation leaves no partial side-updates.

use std::sync::Arc;

use crate::error::{HierarchyError, Result};
use crate::model::{Field, NodeId, Payload, PropertyValue, Row, RowSpec, Side};

pub mod memory;
pub mod metrics;
pub mod query;
pub mod sqlite;

pub use memory::MemoryStore;
pub use metrics::{CounterMetrics, MetricsSnapshot, NoopMetrics, StoreMetrics};
pub use query::{Assign, CmpOp, Cond, Direction, Filter, OrderKey, Query};
pub use sqlite::SqliteStore;

/// Optional features a backend may lack.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Capabilities {
    /// Conditions over the ancestor list column can be evaluated.
    pub list_queries: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self { list_queries: true }
    }
}

/// A homogeneous table of [`Row`]s.
pub trait RowStore: Send + Sync {
    /// Features this backend supports.
    fn capabilities(&self) -> Capabilities;

    /// Inserts a row and assigns it a fresh id.
    fn create(&self, spec: RowSpec) -> Result<Row>;

    /// Fetches a row by id.
    fn get(&self, id: NodeId) -> Result<Option<Row>>;

    /// Writes the listed fields of `row` back to storage.
    ///
    /// Fails with [`HierarchyError::NotFound`] when the row no longer exists.
    fn update(&self, row: &Row, fields: &[Field]) -> Result<()>;

    /// Removes a row; returns whether it existed.
    fn delete(&self, id: NodeId) -> Result<bool>;

    /// Evaluates a query.
    fn select(&self, query: &Query) -> Result<Vec<Row>>;

    /// Counts rows matched by the filter.
    fn count(&self, filter: &Filter) -> Result<usize>;

    /// True when at least one row matches.
    fn exists(&self, filter: &Filter) -> Result<bool> {
        Ok(!self.select(&Query::new(filter.clone()).limit(1))?.is_empty())
    }

    /// Largest value of an interval column, `None` for an empty table.
    fn max(&self, side: Side) -> Result<Option<u64>>;

    /// Applies every assignment to every matching row as one statement;
    /// returns the number of rows changed.
    fn update_where(&self, filter: &Filter, assign: &[Assign]) -> Result<usize>;

    /// Runs `f` as one isolated unit; every write made by `f` is undone when it
    /// returns an error. Units nest.
    fn atomic<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>;
}

impl<S: RowStore> RowStore for Arc<S> {
    fn capabilities(&self) -> Capabilities {
        (**self).capabilities()
    }

    fn create(&self, spec: RowSpec) -> Result<Row> {
        (**self).create(spec)
    }

    fn get(&self, id: NodeId) -> Result<Option<Row>> {
        (**self).get(id)
    }

    fn update(&self, row: &Row, fields: &[Field]) -> Result<()> {
        (**self).update(row, fields)
    }

    fn delete(&self, id: NodeId) -> Result<bool> {
        (**self).delete(id)
    }

    fn select(&self, query: &Query) -> Result<Vec<Row>> {
        (**self).select(query)
    }

    fn count(&self, filter: &Filter) -> Result<usize> {
        (**self).count(filter)
    }

    fn exists(&self, filter: &Filter) -> Result<bool> {
        (**self).exists(filter)
    }

    fn max(&self, side: Side) -> Result<Option<u64>> {
        (**self).max(side)
    }

    fn update_where(&self, filter: &Filter, assign: &[Assign]) -> Result<usize> {
        (**self).update_where(filter, assign)
    }

    fn atomic<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        (**self).atomic(f)
    }
}

/// Rejects filters the backend cannot evaluate.
pub(crate) fn check_filter(capabilities: Capabilities, filter: &Filter) -> Result<()> {
    if !capabilities.list_queries && filter.needs_list_queries() {
        return Err(HierarchyError::UnsupportedBackend(
            "store cannot query the ancestor list column".to_string(),
        ));
    }
    Ok(())
}

/// Rejects NaN and infinite floats, which JSON cannot carry and which no
/// ordering can place.
pub(crate) fn check_payload(payload: &Payload) -> Result<()> {
    let non_finite = payload
        .values()
        .any(|value| matches!(value, PropertyValue::Float(f) if !f.is_finite()));
    if non_finite {
        return Err(HierarchyError::Invalid("payload floats must be finite"));
    }
    Ok(())
}
