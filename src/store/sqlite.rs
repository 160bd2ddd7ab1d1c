use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use tracing::{debug, trace};

use crate::config::SqliteOptions;
use crate::error::{HierarchyError, Result};
use crate::model::{Field, NodeId, Payload, PropertyValue, Row, RowSpec, Side};

use super::metrics::{default_metrics, StoreMetrics};
use super::query::{Assign, Cond, Direction, Filter, OrderKey, Query};
use super::{check_filter, check_payload, Capabilities, RowStore};

const COLUMNS: &str = "id, parent_id, lft, rgt, ancestors, payload";
const BEGIN_OUTER: &str = "BEGIN IMMEDIATE";
const SAVEPOINT: &str = "SAVEPOINT canopy_atomic";
const RELEASE: &str = "RELEASE canopy_atomic";
const ROLLBACK_TO: &str = "ROLLBACK TO canopy_atomic; RELEASE canopy_atomic";

/// Row store backed by a single SQLite table.
///
/// The ancestor list and the payload are stored as JSON text; list and
/// property conditions use the JSON1 functions when the linked SQLite has them.
///
/// Several stores may open the same file. The outermost [`RowStore::atomic`]
/// unit takes the write lock up front (`BEGIN IMMEDIATE`) and nested units use
/// savepoints, so a unit never has to upgrade a read lock mid-way. Lock waits
/// are bounded by [`SqliteOptions::busy_timeout_ms`].
pub struct SqliteStore {
    gate: ReentrantMutex<()>,
    conn: Mutex<Connection>,
    table: String,
    depth: AtomicUsize,
    capabilities: Capabilities,
    metrics: Arc<dyn StoreMetrics>,
}

impl SqliteStore {
    /// Opens (creating if needed) a database file.
    pub fn open(path: impl AsRef<Path>, options: &SqliteOptions) -> Result<Self> {
        Self::init(Connection::open(path)?, options)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory(options: &SqliteOptions) -> Result<Self> {
        Self::init(Connection::open_in_memory()?, options)
    }

    /// Reports statement counts into `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn StoreMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Name of the backing table.
    pub fn table(&self) -> &str {
        &self.table
    }

    fn init(conn: Connection, options: &SqliteOptions) -> Result<Self> {
        validate_identifier(&options.table)?;
        conn.busy_timeout(options.busy_timeout_duration())?;
        conn.pragma_update(None, "journal_mode", options.journal_mode.pragma_value())?;
        conn.pragma_update(None, "synchronous", options.synchronous.pragma_value())?;

        let table = &options.table;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                parent_id INTEGER,
                lft INTEGER NOT NULL DEFAULT 0,
                rgt INTEGER NOT NULL DEFAULT 0,
                ancestors TEXT NOT NULL DEFAULT '[]',
                payload TEXT NOT NULL DEFAULT '{{}}'
            );
            CREATE INDEX IF NOT EXISTS idx_{table}_parent ON {table} (parent_id);
            CREATE INDEX IF NOT EXISTS idx_{table}_lft ON {table} (lft);
            CREATE INDEX IF NOT EXISTS idx_{table}_rgt ON {table} (rgt);"
        ))?;

        let list_queries = conn
            .query_row("SELECT json_array_length('[1]')", [], |row| {
                row.get::<_, i64>(0)
            })
            .is_ok();
        debug!(table = %table, list_queries, "sqlite_store.open");

        Ok(Self {
            gate: ReentrantMutex::new(()),
            conn: Mutex::new(conn),
            table: table.clone(),
            depth: AtomicUsize::new(0),
            capabilities: Capabilities { list_queries },
            metrics: default_metrics(),
        })
    }

    fn fetch(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Row>> {
        trace!(sql, "sqlite_store.query");
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(sql)?;
        let raw = stmt
            .query_map(params_from_iter(params), RawRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);
        drop(conn);
        self.metrics.query();
        self.metrics.rows_read(raw.len() as u64);
        raw.into_iter().map(RawRow::decode).collect()
    }

    fn execute(&self, sql: &str, params: Vec<Value>) -> Result<usize> {
        trace!(sql, "sqlite_store.execute");
        let changed = self
            .conn
            .lock()
            .prepare_cached(sql)?
            .execute(params_from_iter(params))?;
        self.metrics.rows_written(changed as u64);
        Ok(changed)
    }
}

impl RowStore for SqliteStore {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn create(&self, spec: RowSpec) -> Result<Row> {
        check_payload(&spec.payload)?;
        let _gate = self.gate.lock();
        let sql = format!(
            "INSERT INTO {} (parent_id, lft, rgt, ancestors, payload) VALUES (?1, ?2, ?3, ?4, ?5)",
            self.table
        );
        let params = vec![
            parent_value(spec.parent)?,
            Value::Integer(to_sql_int(spec.left)?),
            Value::Integer(to_sql_int(spec.right)?),
            Value::Text(serde_json::to_string(&spec.ancestors)?),
            Value::Text(serde_json::to_string(&spec.payload)?),
        ];
        trace!(sql = %sql, "sqlite_store.execute");
        let id = {
            let conn = self.conn.lock();
            conn.prepare_cached(&sql)?.execute(params_from_iter(params))?;
            conn.last_insert_rowid()
        };
        self.metrics.rows_written(1);
        Ok(Row::from_spec(NodeId(from_sql_int(id)?), spec))
    }

    fn get(&self, id: NodeId) -> Result<Option<Row>> {
        let _gate = self.gate.lock();
        let sql = format!("SELECT {COLUMNS} FROM {} WHERE id = ?1", self.table);
        Ok(self
            .fetch(&sql, vec![Value::Integer(to_sql_int(id.0)?)])?
            .into_iter()
            .next())
    }

    fn update(&self, row: &Row, fields: &[Field]) -> Result<()> {
        if fields.is_empty() {
            return match self.get(row.id)? {
                Some(_) => Ok(()),
                None => Err(HierarchyError::NotFound(row.id)),
            };
        }
        if fields.contains(&Field::Payload) {
            check_payload(&row.payload)?;
        }
        let _gate = self.gate.lock();
        let mut sets = Vec::with_capacity(fields.len());
        let mut params = Vec::with_capacity(fields.len() + 1);
        for field in fields {
            let (column, value) = match field {
                Field::Parent => ("parent_id", parent_value(row.parent)?),
                Field::Left => ("lft", Value::Integer(to_sql_int(row.left)?)),
                Field::Right => ("rgt", Value::Integer(to_sql_int(row.right)?)),
                Field::Ancestors => (
                    "ancestors",
                    Value::Text(serde_json::to_string(&row.ancestors)?),
                ),
                Field::Payload => ("payload", Value::Text(serde_json::to_string(&row.payload)?)),
            };
            params.push(value);
            sets.push(format!("{column} = ?{}", params.len()));
        }
        params.push(Value::Integer(to_sql_int(row.id.0)?));
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ?{}",
            self.table,
            sets.join(", "),
            params.len()
        );
        match self.execute(&sql, params)? {
            0 => Err(HierarchyError::NotFound(row.id)),
            _ => Ok(()),
        }
    }

    fn delete(&self, id: NodeId) -> Result<bool> {
        let _gate = self.gate.lock();
        let sql = format!("DELETE FROM {} WHERE id = ?1", self.table);
        Ok(self.execute(&sql, vec![Value::Integer(to_sql_int(id.0)?)])? > 0)
    }

    fn select(&self, query: &Query) -> Result<Vec<Row>> {
        check_filter(self.capabilities, &query.filter)?;
        let _gate = self.gate.lock();
        let mut sql = SqlBuilder::default();
        sql.push(&format!("SELECT {COLUMNS} FROM {}", self.table));
        sql.filter(&query.filter)?;
        sql.order(&query.order)?;
        if let Some(limit) = query.limit {
            let limit = i64::try_from(limit)
                .map_err(|_| HierarchyError::Invalid("limit exceeds sqlite integer range"))?;
            sql.push(" LIMIT ");
            sql.bind(Value::Integer(limit));
        }
        self.fetch(&sql.text, sql.params)
    }

    fn count(&self, filter: &Filter) -> Result<usize> {
        check_filter(self.capabilities, filter)?;
        let _gate = self.gate.lock();
        let mut sql = SqlBuilder::default();
        sql.push(&format!("SELECT COUNT(*) FROM {}", self.table));
        sql.filter(filter)?;
        trace!(sql = %sql.text, "sqlite_store.query");
        let count: i64 = self
            .conn
            .lock()
            .prepare_cached(&sql.text)?
            .query_row(params_from_iter(sql.params), |row| row.get(0))?;
        self.metrics.query();
        usize::try_from(count).map_err(|_| HierarchyError::Corruption(format!("negative count {count}")))
    }

    fn max(&self, side: Side) -> Result<Option<u64>> {
        let _gate = self.gate.lock();
        let sql = format!("SELECT MAX({}) FROM {}", bound_column(side), self.table);
        let max = self
            .conn
            .lock()
            .query_row(&sql, [], |row| row.get::<_, Option<i64>>(0))?;
        self.metrics.query();
        max.map(from_sql_int).transpose()
    }

    fn update_where(&self, filter: &Filter, assign: &[Assign]) -> Result<usize> {
        check_filter(self.capabilities, filter)?;
        if assign.is_empty() {
            return self.count(filter);
        }
        let _gate = self.gate.lock();
        let mut sql = SqlBuilder::default();
        sql.push(&format!("UPDATE {} SET ", self.table));
        for (i, a) in assign.iter().enumerate() {
            if i > 0 {
                sql.push(", ");
            }
            match a {
                Assign::Shift(side, delta) => {
                    let column = bound_column(*side);
                    sql.push(&format!("{column} = {column} + "));
                    sql.bind(Value::Integer(*delta));
                }
                Assign::SetParent(parent) => {
                    sql.push("parent_id = ");
                    sql.bind(parent_value(*parent)?);
                }
            }
        }
        sql.filter(filter)?;
        let changed = self.execute(&sql.text, sql.params)?;
        trace!(rows = changed, "sqlite_store.update_where");
        Ok(changed)
    }

    fn atomic<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let _gate = self.gate.lock();
        // Only the gate holder touches the depth.
        let depth = self.depth.load(Ordering::SeqCst);
        let (begin, commit, rollback) = if depth == 0 {
            (BEGIN_OUTER, "COMMIT", "ROLLBACK")
        } else {
            (SAVEPOINT, RELEASE, ROLLBACK_TO)
        };
        self.conn.lock().execute_batch(begin)?;
        let mut unit = OpenUnit {
            store: self,
            depth,
            rollback,
            open: true,
        };
        self.depth.store(depth + 1, Ordering::SeqCst);

        let result = f();
        let conn = self.conn.lock();
        match result {
            Ok(value) => {
                conn.execute_batch(commit)?;
                unit.open = false;
                if depth == 0 {
                    self.metrics.transaction();
                }
                Ok(value)
            }
            Err(err) => {
                debug!(error = %err, depth, "sqlite_store.atomic.rollback");
                unit.open = false;
                conn.execute_batch(rollback)?;
                Err(err)
            }
        }
    }
}

/// An open transaction or savepoint. Restores the nesting depth when dropped
/// and rolls the unit back if it was neither committed nor rolled back, which
/// happens when the body panics or the commit fails.
struct OpenUnit<'a> {
    store: &'a SqliteStore,
    depth: usize,
    rollback: &'static str,
    open: bool,
}

impl Drop for OpenUnit<'_> {
    fn drop(&mut self) {
        self.store.depth.store(self.depth, Ordering::SeqCst);
        if self.open {
            if let Err(err) = self.store.conn.lock().execute_batch(self.rollback) {
                debug!(error = %err, depth = self.depth, "sqlite_store.atomic.abandon_failed");
            }
        }
    }
}

/// Column values as read from SQLite, before JSON decoding.
struct RawRow {
    id: i64,
    parent: Option<i64>,
    left: i64,
    right: i64,
    ancestors: String,
    payload: String,
}

impl RawRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            parent: row.get(1)?,
            left: row.get(2)?,
            right: row.get(3)?,
            ancestors: row.get(4)?,
            payload: row.get(5)?,
        })
    }

    fn decode(self) -> Result<Row> {
        let ancestors: Vec<NodeId> = serde_json::from_str(&self.ancestors)?;
        let payload: Payload = serde_json::from_str(&self.payload)?;
        Ok(Row {
            id: NodeId(from_sql_int(self.id)?),
            parent: self.parent.map(from_sql_int).transpose()?.map(NodeId),
            left: from_sql_int(self.left)?,
            right: from_sql_int(self.right)?,
            ancestors,
            payload,
        })
    }
}

/// SQL text with positional parameters appended in order.
#[derive(Default)]
struct SqlBuilder {
    text: String,
    params: Vec<Value>,
}

impl SqlBuilder {
    fn push(&mut self, text: &str) {
        self.text.push_str(text);
    }

    fn bind(&mut self, value: Value) {
        self.params.push(value);
        self.text.push_str(&format!("?{}", self.params.len()));
    }

    fn filter(&mut self, filter: &Filter) -> Result<()> {
        for (i, cond) in filter.conds().iter().enumerate() {
            self.push(if i == 0 { " WHERE " } else { " AND " });
            self.cond(cond)?;
        }
        Ok(())
    }

    fn cond(&mut self, cond: &Cond) -> Result<()> {
        match cond {
            Cond::IdIn(ids) if ids.is_empty() => self.push("0"),
            Cond::IdIn(ids) => {
                self.push("id IN (");
                for (i, id) in ids.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.bind(Value::Integer(to_sql_int(id.0)?));
                }
                self.push(")");
            }
            Cond::ParentIs(None) => self.push("parent_id IS NULL"),
            Cond::ParentIs(Some(parent)) => {
                self.push("parent_id = ");
                self.bind(Value::Integer(to_sql_int(parent.0)?));
            }
            Cond::Bound(side, op, value) => {
                self.push(&format!("{} {} ", bound_column(*side), op.sql()));
                self.bind(Value::Integer(to_sql_int(*value)?));
            }
            Cond::AncestorsContain(id) => {
                self.push("EXISTS (SELECT 1 FROM json_each(ancestors) WHERE json_each.value = ");
                self.bind(Value::Integer(to_sql_int(id.0)?));
                self.push(")");
            }
            Cond::AncestorAt(index, id) => {
                self.push("json_extract(ancestors, ");
                self.bind(Value::Text(format!("$[{index}]")));
                self.push(") = ");
                self.bind(Value::Integer(to_sql_int(id.0)?));
            }
            Cond::Property(key, op, value) => {
                let path = json_path(key)?;
                let (types, operand) = match value {
                    PropertyValue::Bool(b) => ("('true', 'false')", Value::Integer(i64::from(*b))),
                    PropertyValue::Int(i) => ("('integer', 'real')", Value::Integer(*i)),
                    PropertyValue::Float(f) => ("('integer', 'real')", Value::Real(*f)),
                    PropertyValue::String(s) => ("('text')", Value::Text(s.clone())),
                    PropertyValue::Bytes(_) => {
                        return Err(HierarchyError::Invalid(
                            "byte properties cannot be compared by the sqlite store",
                        ))
                    }
                };
                // Only compare values of a compatible JSON type.
                self.push("json_type(payload, ");
                self.bind(Value::Text(path.clone()));
                self.push(&format!(") IN {types} AND json_extract(payload, "));
                self.bind(Value::Text(path));
                self.push(&format!(") {} ", op.sql()));
                self.bind(operand);
            }
        }
        Ok(())
    }

    fn order(&mut self, order: &[(OrderKey, Direction)]) -> Result<()> {
        self.push(" ORDER BY ");
        for (key, direction) in order {
            match key {
                OrderKey::Id => self.push("id"),
                OrderKey::Left => self.push("lft"),
                OrderKey::Right => self.push("rgt"),
                OrderKey::Property(name) => {
                    self.push("json_extract(payload, ");
                    self.bind(Value::Text(json_path(name)?));
                    self.push(")");
                }
            }
            self.push(match direction {
                Direction::Asc => " ASC, ",
                Direction::Desc => " DESC, ",
            });
        }
        self.push("id ASC");
        Ok(())
    }
}

fn bound_column(side: Side) -> &'static str {
    match side {
        Side::Left => "lft",
        Side::Right => "rgt",
    }
}

fn json_path(key: &str) -> Result<String> {
    if key.contains('"') || key.contains('\\') {
        return Err(HierarchyError::Invalid(
            "property names used in sqlite queries cannot contain quotes or backslashes",
        ));
    }
    Ok(format!("$.\"{key}\""))
}

fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(HierarchyError::Invalid("table name must be a plain identifier"))
    }
}

fn parent_value(parent: Option<NodeId>) -> Result<Value> {
    Ok(match parent {
        Some(id) => Value::Integer(to_sql_int(id.0)?),
        None => Value::Null,
    })
}

fn to_sql_int(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| HierarchyError::Invalid("value exceeds sqlite integer range"))
}

fn from_sql_int(value: i64) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| HierarchyError::Corruption(format!("negative value {value} in sqlite store")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::payload;
    use crate::store::query::CmpOp;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory(&SqliteOptions::benchmark()).unwrap()
    }

    #[test]
    fn rejects_table_names_that_are_not_identifiers() {
        let opts = SqliteOptions::default().table("nodes; DROP TABLE x");
        assert!(matches!(
            SqliteStore::open_in_memory(&opts),
            Err(HierarchyError::Invalid(_))
        ));
        assert!(validate_identifier("_tree_2").is_ok());
        assert!(validate_identifier("2tree").is_err());
    }

    #[test]
    fn round_trips_every_column() {
        let store = store();
        let mut p = payload("num", 3);
        p.insert("name".into(), "three".into());
        let spec = RowSpec {
            parent: Some(NodeId(7)),
            left: 4,
            right: 9,
            ancestors: vec![NodeId(7), NodeId(1)],
            payload: p,
        };
        let created = store.create(spec).unwrap();
        assert_eq!(store.get(created.id).unwrap(), Some(created));
    }

    #[test]
    fn json_conditions_follow_the_memory_semantics() {
        let store = store();
        let root = store.create(RowSpec::new(payload("num", 1))).unwrap();
        let child = store
            .create(RowSpec {
                ancestors: vec![root.id],
                payload: payload("num", "seven"),
                ..RowSpec::default()
            })
            .unwrap();
        assert!(store.capabilities().list_queries);

        let found = store
            .select(&Query::new(Filter::new(Cond::AncestorsContain(root.id))))
            .unwrap();
        assert_eq!(found, vec![child.clone()]);
        let found = store
            .select(&Query::new(Filter::new(Cond::AncestorAt(0, root.id))))
            .unwrap();
        assert_eq!(found, vec![child]);

        // A string never compares greater than a number.
        let gt = Filter::new(Cond::Property("num".into(), CmpOp::Gt, 0.into()));
        assert_eq!(store.count(&gt).unwrap(), 1);
    }

    #[test]
    fn bulk_shift_and_max() {
        let store = store();
        assert_eq!(store.max(Side::Right).unwrap(), None);
        for i in 0..3u64 {
            store
                .create(RowSpec {
                    left: i * 2,
                    right: i * 2 + 1,
                    ..RowSpec::default()
                })
                .unwrap();
        }
        let changed = store
            .update_where(
                &Filter::all().bound(Side::Left, CmpOp::Ge, 2),
                &[Assign::Shift(Side::Left, 10), Assign::Shift(Side::Right, 10)],
            )
            .unwrap();
        assert_eq!(changed, 2);
        assert_eq!(store.max(Side::Right).unwrap(), Some(15));
    }

    #[test]
    fn savepoints_nest_and_roll_back() {
        let store = store();
        let outer: Result<()> = store.atomic(|| {
            store.create(RowSpec::default())?;
            let inner: Result<()> = store.atomic(|| {
                store.create(RowSpec::default())?;
                Err(HierarchyError::Invalid("inner"))
            });
            assert!(inner.is_err());
            assert_eq!(store.count(&Filter::all())?, 1);
            Err(HierarchyError::Invalid("outer"))
        });
        assert!(outer.is_err());
        assert_eq!(store.count(&Filter::all()).unwrap(), 0);
    }

    #[test]
    fn ordering_breaks_ties_by_id() {
        let store = store();
        for n in [2, 1, 2, 3] {
            store.create(RowSpec::new(payload("num", n))).unwrap();
        }
        let rows = store
            .select(&Query::default().order_by_property_desc("num").limit(3))
            .unwrap();
        let ids: Vec<u64> = rows.iter().map(|r| r.id.0).collect();
        assert_eq!(ids, vec![4, 1, 3]);
    }

    #[test]
    fn panicking_unit_rolls_back_the_transaction() {
        let store = store();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            store.atomic(|| -> Result<()> {
                store.create(RowSpec::default())?;
                panic!("unit body failed");
            })
        }));
        assert!(outcome.is_err());
        assert_eq!(store.depth.load(Ordering::SeqCst), 0);
        assert_eq!(store.count(&Filter::all()).unwrap(), 0);

        // The next unit opens a fresh transaction rather than a savepoint.
        store
            .atomic(|| store.create(RowSpec::default()).map(drop))
            .unwrap();
        assert_eq!(store.count(&Filter::all()).unwrap(), 1);
    }
}
