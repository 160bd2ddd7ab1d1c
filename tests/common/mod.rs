#![allow(dead_code)]

use std::collections::BTreeMap;

use canopy::{payload, Hierarchy, Node, NodeId, PropertyValue, Row};

/// (child, parent) pairs of the 32-node forest, by `num`.
pub const EDGES: &[(i64, i64)] = &[
    (2, 1),
    (3, 1),
    (4, 1),
    (5, 2),
    (6, 2),
    (7, 2),
    (8, 3),
    (9, 6),
    (10, 8),
    (11, 10),
    (13, 12),
    (14, 13),
    (16, 15),
    (17, 15),
    (21, 20),
    (22, 20),
    (23, 20),
    (24, 20),
    (25, 20),
    (26, 20),
    (27, 23),
    (28, 23),
    (29, 23),
    (30, 23),
    (31, 23),
    (32, 23),
];

pub const NODES: i64 = 32;

/// The forest above, created as 32 roots and then linked with `set_parent`.
pub struct Fixture {
    ids: BTreeMap<i64, NodeId>,
}

impl Fixture {
    pub fn build<H: Hierarchy>(h: &H) -> Fixture {
        let mut ids = BTreeMap::new();
        for num in 1..=NODES {
            let row = h.create_root(payload("num", num)).unwrap();
            ids.insert(num, row.id);
        }
        let fixture = Fixture { ids };
        for (child, parent) in EDGES {
            h.set_parent(fixture.n(*child), Some(fixture.n(*parent)))
                .unwrap();
        }
        fixture
    }

    pub fn n(&self, num: i64) -> NodeId {
        self.ids[&num]
    }

    pub fn nums(&self) -> impl Iterator<Item = i64> + '_ {
        self.ids.keys().copied()
    }
}

pub fn expected_parent(num: i64) -> Option<i64> {
    EDGES
        .iter()
        .find(|(child, _)| *child == num)
        .map(|(_, parent)| *parent)
}

pub fn expected_ancestors(num: i64) -> Vec<i64> {
    let mut chain = Vec::new();
    let mut current = num;
    while let Some(parent) = expected_parent(current) {
        chain.push(parent);
        current = parent;
    }
    chain
}

pub fn expected_children(num: i64) -> Vec<i64> {
    EDGES
        .iter()
        .filter(|(_, parent)| *parent == num)
        .map(|(child, _)| *child)
        .collect()
}

pub fn num(row: &Row) -> i64 {
    match row.property("num") {
        Some(PropertyValue::Int(n)) => *n,
        other => panic!("row {} has no integer num: {other:?}", row.id),
    }
}

pub fn nums(rows: &[Row]) -> Vec<i64> {
    rows.iter().map(num).collect()
}

pub fn sorted_nums(rows: &[Row]) -> Vec<i64> {
    let mut out = nums(rows);
    out.sort_unstable();
    out
}

pub fn parent_num<H: Hierarchy>(h: &H, node: NodeId) -> Option<i64> {
    h.parent(node).unwrap().as_ref().map(num)
}

/// Compact rendering of a snapshot: `1(2(5,6),3)`.
pub fn shape(node: &Node) -> String {
    let mut out = num(&node.instance).to_string();
    if !node.children.is_empty() {
        let inner: Vec<String> = node.children.iter().map(shape).collect();
        out.push('(');
        out.push_str(&inner.join(","));
        out.push(')');
    }
    out
}

/// Every structural relation the engines must agree on, keyed by `num`.
pub fn relations<H: Hierarchy>(h: &H, ids: &[NodeId]) -> Vec<(i64, Option<i64>, Vec<i64>, i64, Vec<i64>)> {
    ids.iter()
        .map(|id| {
            let row = h.get(*id).unwrap();
            (
                num(&row),
                parent_num(h, *id),
                nums(&h.ancestors(*id, None).unwrap()),
                num(&h.root(*id).unwrap()),
                sorted_nums(&h.direct_children(*id).unwrap()),
            )
        })
        .collect()
}
