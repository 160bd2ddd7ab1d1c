mod common;

use std::sync::Arc;

use canopy::model::Field;
use canopy::store::{CounterMetrics, RowStore};
use canopy::{
    payload, AdjacencyList, Config, Hierarchy, HierarchyError, MemoryStore, NestedSet, NodeId,
    PathEnumeration, PropertyValue, RowSpec, SqliteOptions, SqliteStore,
};
use common::{parent_num, relations, Fixture};
use tempfile::TempDir;

fn open(dir: &TempDir, options: &SqliteOptions) -> SqliteStore {
    SqliteStore::open(dir.path().join("canopy.db"), options).unwrap()
}

#[test]
fn layouts_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let options = SqliteOptions::default();

    let (ids, before) = {
        let h = NestedSet::new(open(&dir, &options));
        let f = Fixture::build(&h);
        let ids: Vec<NodeId> = f.nums().map(|n| f.n(n)).collect();
        let before = relations(&h, &ids);
        (ids, before)
    };

    let h = NestedSet::new(open(&dir, &options));
    assert_eq!(relations(&h, &ids), before);
    assert!(h.check_integrity().unwrap().success);

    // Ids keep growing after reopen.
    let next = h.create_root(payload("num", 33)).unwrap();
    assert!(ids.iter().all(|id| *id < next.id));
}

#[test]
fn separate_tables_hold_separate_layouts() {
    let dir = tempfile::tempdir().unwrap();
    let alm = AdjacencyList::new(open(&dir, &SqliteOptions::default().table("alm_nodes")));
    let pem = PathEnumeration::new(open(&dir, &SqliteOptions::default().table("pem_nodes"))).unwrap();

    let a = alm.create_root(payload("num", 1)).unwrap();
    let b = alm.create_child(a.id, payload("num", 2)).unwrap();
    let x = pem.create_root(payload("num", 10)).unwrap();
    let y = pem.create_child(x.id, payload("num", 11)).unwrap();
    let z = pem.create_child(y.id, payload("num", 12)).unwrap();

    assert_eq!(alm.store().table(), "alm_nodes");
    assert_eq!(parent_num(&alm, b.id), Some(1));
    assert_eq!(common::nums(&pem.ancestors(z.id, None).unwrap()), vec![11, 10]);
    assert_eq!(pem.store().count(&canopy::store::Filter::all()).unwrap(), 3);
    assert_eq!(alm.store().count(&canopy::store::Filter::all()).unwrap(), 2);
}

#[test]
fn bad_table_names_are_refused() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["", "nodes; DROP TABLE x", "1nodes", "no-dash"] {
        let result = SqliteStore::open(dir.path().join("x.db"), &SqliteOptions::default().table(name));
        assert!(matches!(result, Err(HierarchyError::Invalid(_))), "{name:?}");
    }
}

#[test]
fn payloads_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir, &SqliteOptions::default());
    let mut data = payload("name", "root \"quoted\"");
    data.insert("ratio".into(), PropertyValue::Float(0.25));
    data.insert("active".into(), PropertyValue::Bool(true));
    data.insert("count".into(), PropertyValue::Int(-7));
    data.insert("blob".into(), PropertyValue::Bytes(vec![0, 1, 255]));
    let row = store.create(RowSpec::new(data.clone())).unwrap();

    let stored = store.get(row.id).unwrap().unwrap();
    assert_eq!(stored.payload, data);
    assert_eq!(stored.parent, None);
    assert!(stored.ancestors.is_empty());
}

#[test]
fn dangling_parent_reads_as_none() {
    let dir = tempfile::tempdir().unwrap();
    let h = AdjacencyList::new(open(&dir, &SqliteOptions::default()));
    let parent = h.create_root(payload("num", 1)).unwrap();
    let child = h.create_child(parent.id, payload("num", 2)).unwrap();

    // Remove the parent row behind the engine's back.
    assert!(h.store().delete(parent.id).unwrap());
    assert!(h.parent(child.id).unwrap().is_none());
    assert_eq!(h.root(child.id).unwrap().id, child.id);
    let report = h.check_integrity().unwrap();
    assert!(!report.success);
    assert_eq!(report.errors().count(), 1);
}

#[test]
fn failed_operations_roll_back() {
    let dir = tempfile::tempdir().unwrap();
    let h = NestedSet::new(open(&dir, &SqliteOptions::default()));
    let a = h.create_root(payload("num", 1)).unwrap();
    let b = h.create_child(a.id, payload("num", 2)).unwrap();
    let c = h.create_child(b.id, payload("num", 3)).unwrap();

    let snapshot = |h: &NestedSet<SqliteStore>| {
        [a.id, b.id, c.id]
            .iter()
            .map(|id| {
                let row = h.get(*id).unwrap();
                (row.left, row.right)
            })
            .collect::<Vec<_>>()
    };
    let before = snapshot(&h);
    let result: canopy::Result<()> = h.store().atomic(|| {
        h.set_parent(c.id, None)?;
        Err(HierarchyError::Invalid("abort"))
    });
    assert!(result.is_err());
    assert_eq!(snapshot(&h), before);
    assert!(matches!(
        h.set_parent(a.id, Some(c.id)),
        Err(HierarchyError::Cycle { .. })
    ));
    assert_eq!(snapshot(&h), before);
}

#[test]
fn metrics_count_store_work() {
    let dir = tempfile::tempdir().unwrap();
    let metrics = Arc::new(CounterMetrics::default());
    let store = open(&dir, &SqliteOptions::default()).with_metrics(metrics.clone());
    let h = AdjacencyList::new(store);
    let root = h.create_root(payload("num", 1)).unwrap();
    for num in 2..=5 {
        h.create_child(root.id, payload("num", num)).unwrap();
    }
    let before = metrics.snapshot();
    assert!(before.rows_written >= 5);
    assert!(before.transactions >= 4);

    assert_eq!(h.direct_children(root.id).unwrap().len(), 4);
    let after = metrics.snapshot();
    assert!(after.queries > before.queries);
    assert!(after.rows_read >= before.rows_read + 4);
}

#[test]
fn options_come_from_a_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("canopy.toml");
    std::fs::write(
        &path,
        "[hierarchy]\non_delete = \"promote\"\n\n[sqlite]\ntable = \"org_units\"\njournal_mode = \"delete\"\n",
    )
    .unwrap();
    let config = Config::load(Some(&path)).unwrap();
    let h = AdjacencyList::with_options(open(&dir, &config.sqlite), config.hierarchy);
    assert_eq!(h.store().table(), "org_units");

    let root = h.create_root(payload("num", 1)).unwrap();
    let mid = h.create_child(root.id, payload("num", 2)).unwrap();
    let leaf = h.create_child(mid.id, payload("num", 3)).unwrap();
    h.delete(mid.id).unwrap();
    assert_eq!(parent_num(&h, leaf.id), Some(1));
}

fn assert_refuses_non_finite_floats<H: Hierarchy>(h: &H) {
    let root = h.create_root(payload("num", 1)).unwrap();
    for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
        assert!(
            matches!(
                h.create_child(root.id, payload("w", value)),
                Err(HierarchyError::Invalid(_))
            ),
            "{value}"
        );
    }

    let mut child = h.create_child(root.id, payload("w", 0.5)).unwrap();
    child.payload.insert("w".into(), PropertyValue::Float(f64::NAN));
    assert!(matches!(
        h.store().update(&child, &[Field::Payload]),
        Err(HierarchyError::Invalid(_))
    ));

    let children = h.direct_children(root.id).unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].payload, payload("w", 0.5));
    assert!(h.check_integrity().unwrap().success);
}

#[test]
fn non_finite_floats_are_refused_by_both_stores() {
    let dir = tempfile::tempdir().unwrap();
    assert_refuses_non_finite_floats(&NestedSet::new(open(&dir, &SqliteOptions::default())));
    assert_refuses_non_finite_floats(&NestedSet::new(MemoryStore::new()));
}
