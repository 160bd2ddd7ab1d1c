use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use tracing::trace;

use crate::error::{HierarchyError, Result};
use crate::model::{Field, NodeId, Row, RowSpec, Side};

use super::metrics::{default_metrics, StoreMetrics};
use super::query::{Assign, Cond, Filter, Query};
use super::{check_filter, check_payload, Capabilities, RowStore};

/// Undo record for one write made inside an atomic unit.
#[derive(Debug)]
enum UndoEntry {
    /// Put the row back as it was.
    Restore(Row),
    /// Remove a row that the unit inserted.
    Remove(NodeId),
}

#[derive(Debug, Default)]
struct State {
    rows: BTreeMap<NodeId, Row>,
    next_id: u64,
    /// One frame per open atomic unit, innermost last.
    journal: Vec<Vec<UndoEntry>>,
}

impl State {
    fn record(&mut self, entry: UndoEntry) {
        if let Some(frame) = self.journal.last_mut() {
            frame.push(entry);
        }
    }

    fn rollback(&mut self, frame: Vec<UndoEntry>) {
        for entry in frame.into_iter().rev() {
            match entry {
                UndoEntry::Restore(row) => {
                    self.rows.insert(row.id, row);
                }
                UndoEntry::Remove(id) => {
                    self.rows.remove(&id);
                }
            }
        }
    }

    fn matching(&self, filter: &Filter) -> Vec<&Row> {
        // Id lists are point lookups; everything else is a scan.
        if let Some(Cond::IdIn(ids)) = filter
            .conds()
            .iter()
            .find(|cond| matches!(cond, Cond::IdIn(_)))
        {
            let mut rows: Vec<&Row> = ids
                .iter()
                .filter_map(|id| self.rows.get(id))
                .filter(|row| filter.matches(row))
                .collect();
            rows.sort_by_key(|row| row.id);
            rows.dedup_by_key(|row| row.id);
            return rows;
        }
        self.rows.values().filter(|row| filter.matches(row)).collect()
    }
}

/// Journal frame of an atomic unit in progress. If the unit unwinds before it
/// settles, dropping this pops the frame and undoes its writes.
struct OpenFrame<'a> {
    state: &'a Mutex<State>,
    open: bool,
}

impl Drop for OpenFrame<'_> {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        let mut state = self.state.lock();
        if let Some(frame) = state.journal.pop() {
            trace!(undone = frame.len(), "memory_store.atomic.unwound");
            state.rollback(frame);
        }
    }
}

/// Row store held entirely in memory.
///
/// Every call takes a re-entrant gate, so an [`RowStore::atomic`] unit on one
/// thread excludes all other threads until it finishes while the owning
/// thread can keep calling in.
pub struct MemoryStore {
    gate: ReentrantMutex<()>,
    state: Mutex<State>,
    capabilities: Capabilities,
    metrics: Arc<dyn StoreMetrics>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store with every capability.
    pub fn new() -> Self {
        Self {
            gate: ReentrantMutex::new(()),
            state: Mutex::new(State {
                next_id: 1,
                ..State::default()
            }),
            capabilities: Capabilities::default(),
            metrics: default_metrics(),
        }
    }

    /// Empty store that refuses conditions over the ancestor list.
    pub fn without_list_queries() -> Self {
        Self {
            capabilities: Capabilities {
                list_queries: false,
            },
            ..Self::new()
        }
    }

    /// Reports statement counts into `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn StoreMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        let _gate = self.gate.lock();
        self.state.lock().rows.len()
    }

    /// True when the store holds no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RowStore for MemoryStore {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn create(&self, spec: RowSpec) -> Result<Row> {
        check_payload(&spec.payload)?;
        let _gate = self.gate.lock();
        let mut state = self.state.lock();
        let id = NodeId(state.next_id);
        state.next_id += 1;
        let row = Row::from_spec(id, spec);
        state.rows.insert(id, row.clone());
        state.record(UndoEntry::Remove(id));
        self.metrics.rows_written(1);
        Ok(row)
    }

    fn get(&self, id: NodeId) -> Result<Option<Row>> {
        let _gate = self.gate.lock();
        let row = self.state.lock().rows.get(&id).cloned();
        self.metrics.query();
        self.metrics.rows_read(u64::from(row.is_some()));
        Ok(row)
    }

    fn update(&self, row: &Row, fields: &[Field]) -> Result<()> {
        if fields.contains(&Field::Payload) {
            check_payload(&row.payload)?;
        }
        let _gate = self.gate.lock();
        let mut state = self.state.lock();
        let stored = state
            .rows
            .get(&row.id)
            .cloned()
            .ok_or(HierarchyError::NotFound(row.id))?;
        let mut updated = stored.clone();
        for field in fields {
            match field {
                Field::Parent => updated.parent = row.parent,
                Field::Left => updated.left = row.left,
                Field::Right => updated.right = row.right,
                Field::Ancestors => updated.ancestors = row.ancestors.clone(),
                Field::Payload => updated.payload = row.payload.clone(),
            }
        }
        state.rows.insert(row.id, updated);
        state.record(UndoEntry::Restore(stored));
        self.metrics.rows_written(1);
        Ok(())
    }

    fn delete(&self, id: NodeId) -> Result<bool> {
        let _gate = self.gate.lock();
        let mut state = self.state.lock();
        match state.rows.remove(&id) {
            Some(row) => {
                state.record(UndoEntry::Restore(row));
                self.metrics.rows_written(1);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn select(&self, query: &Query) -> Result<Vec<Row>> {
        check_filter(self.capabilities, &query.filter)?;
        let _gate = self.gate.lock();
        let state = self.state.lock();
        let mut rows: Vec<Row> = state
            .matching(&query.filter)
            .into_iter()
            .cloned()
            .collect();
        drop(state);
        if !query.order.is_empty() {
            rows.sort_by(|a, b| query.compare(a, b));
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        self.metrics.query();
        self.metrics.rows_read(rows.len() as u64);
        Ok(rows)
    }

    fn count(&self, filter: &Filter) -> Result<usize> {
        check_filter(self.capabilities, filter)?;
        let _gate = self.gate.lock();
        let count = self.state.lock().matching(filter).len();
        self.metrics.query();
        Ok(count)
    }

    fn max(&self, side: Side) -> Result<Option<u64>> {
        let _gate = self.gate.lock();
        let max = self
            .state
            .lock()
            .rows
            .values()
            .map(|row| row.bound(side))
            .max();
        self.metrics.query();
        Ok(max)
    }

    fn update_where(&self, filter: &Filter, assign: &[Assign]) -> Result<usize> {
        check_filter(self.capabilities, filter)?;
        let _gate = self.gate.lock();
        let mut state = self.state.lock();
        // Compute every new row before touching the table so a failing
        // assignment leaves it unchanged.
        let mut changed = Vec::new();
        for row in state.matching(filter) {
            let mut updated = row.clone();
            for a in assign {
                a.apply(&mut updated)?;
            }
            changed.push((row.clone(), updated));
        }
        let count = changed.len();
        for (old, new) in changed {
            state.rows.insert(new.id, new);
            state.record(UndoEntry::Restore(old));
        }
        trace!(rows = count, "memory_store.update_where");
        self.metrics.rows_written(count as u64);
        Ok(count)
    }

    fn atomic<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let _gate = self.gate.lock();
        self.state.lock().journal.push(Vec::new());
        let mut frame_guard = OpenFrame {
            state: &self.state,
            open: true,
        };
        let result = f();
        let mut state = self.state.lock();
        frame_guard.open = false;
        let frame = state.journal.pop().unwrap_or_default();
        match result {
            Ok(value) => {
                match state.journal.last_mut() {
                    // The enclosing unit may still roll these writes back.
                    Some(outer) => outer.extend(frame),
                    None => self.metrics.transaction(),
                }
                Ok(value)
            }
            Err(err) => {
                trace!(undone = frame.len(), error = %err, "memory_store.atomic.rollback");
                state.rollback(frame);
                Err(err)
            }
        }
    }
}
