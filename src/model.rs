//! Row and identifier types shared by every representation.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier assigned by the row store when a node is created.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        NodeId(value)
    }
}

impl From<NodeId> for u64 {
    fn from(value: NodeId) -> Self {
        value.0
    }
}

/// A single user payload value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// Boolean value.
    Bool(bool),
    /// Signed integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// UTF-8 string value.
    String(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl PropertyValue {
    /// Compares two values of compatible types; integers and floats compare numerically.
    pub fn partial_cmp_value(&self, other: &PropertyValue) -> Option<Ordering> {
        match (self, other) {
            (PropertyValue::Bool(a), PropertyValue::Bool(b)) => a.partial_cmp(b),
            (PropertyValue::Int(a), PropertyValue::Int(b)) => a.partial_cmp(b),
            (PropertyValue::Float(a), PropertyValue::Float(b)) => a.partial_cmp(b),
            (PropertyValue::Int(a), PropertyValue::Float(b)) => (*a as f64).partial_cmp(b),
            (PropertyValue::Float(a), PropertyValue::Int(b)) => a.partial_cmp(&(*b as f64)),
            (PropertyValue::String(a), PropertyValue::String(b)) => a.partial_cmp(b),
            (PropertyValue::Bytes(a), PropertyValue::Bytes(b)) => a.partial_cmp(b),
            _ => None,
        }
    }

    /// Total order used for sorting: missing < bool < number < string < bytes.
    pub(crate) fn sort_cmp(a: Option<&PropertyValue>, b: Option<&PropertyValue>) -> Ordering {
        fn rank(value: Option<&PropertyValue>) -> u8 {
            match value {
                None => 0,
                Some(PropertyValue::Bool(_)) => 1,
                Some(PropertyValue::Int(_)) | Some(PropertyValue::Float(_)) => 2,
                Some(PropertyValue::String(_)) => 3,
                Some(PropertyValue::Bytes(_)) => 4,
            }
        }
        match (a, b) {
            (Some(x), Some(y)) => x
                .partial_cmp_value(y)
                .unwrap_or_else(|| rank(a).cmp(&rank(b))),
            _ => rank(a).cmp(&rank(b)),
        }
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Int(i64::from(value))
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_owned())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

/// User-defined fields carried by a node, opaque to the engines.
pub type Payload = BTreeMap<String, PropertyValue>;

/// Builds a payload with a single entry.
pub fn payload(key: impl Into<String>, value: impl Into<PropertyValue>) -> Payload {
    let mut map = Payload::new();
    map.insert(key.into(), value.into());
    map
}

/// Interval column of a nested-set row.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Side {
    /// The `left` bound.
    Left,
    /// The `right` bound.
    Right,
}

/// Column names accepted by partial updates.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Field {
    /// Adjacency-list parent reference.
    Parent,
    /// Nested-set left bound.
    Left,
    /// Nested-set right bound.
    Right,
    /// Path-enumeration ancestor list.
    Ancestors,
    /// User payload.
    Payload,
}

/// One stored node.
///
/// The row is wide: every representation reads and writes only its own
/// structural columns and leaves the others at their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub left: u64,
    pub right: u64,
    pub ancestors: Vec<NodeId>,
    pub payload: Payload,
}

impl Row {
    pub(crate) fn from_spec(id: NodeId, spec: RowSpec) -> Self {
        Self {
            id,
            parent: spec.parent,
            left: spec.left,
            right: spec.right,
            ancestors: spec.ancestors,
            payload: spec.payload,
        }
    }

    /// Looks up a payload entry.
    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.payload.get(key)
    }

    /// Returns `bound` of the nested-set interval.
    pub fn bound(&self, side: Side) -> u64 {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    pub(crate) fn bound_mut(&mut self, side: Side) -> &mut u64 {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }

    /// True when this row's interval strictly contains `other`'s.
    pub fn encloses(&self, other: &Row) -> bool {
        self.left < other.left && other.right < self.right
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.id)?;
        if !self.payload.is_empty() {
            let mut first = true;
            write!(f, " {{")?;
            for (key, value) in &self.payload {
                if !first {
                    write!(f, ", ")?;
                }
                first = false;
                match value {
                    PropertyValue::Bool(v) => write!(f, "{key}: {v}")?,
                    PropertyValue::Int(v) => write!(f, "{key}: {v}")?,
                    PropertyValue::Float(v) => write!(f, "{key}: {v}")?,
                    PropertyValue::String(v) => write!(f, "{key}: {v:?}")?,
                    PropertyValue::Bytes(v) => write!(f, "{key}: <{} bytes>", v.len())?,
                }
            }
            write!(f, "}}")?;
        }
        Ok(())
    }
}

/// A row that has not been persisted yet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSpec {
    pub parent: Option<NodeId>,
    pub left: u64,
    pub right: u64,
    pub ancestors: Vec<NodeId>,
    pub payload: Payload,
}

impl RowSpec {
    /// Creates a row spec with only a payload set.
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            ..Default::default()
        }
    }
}

/// Identifies a storage layout; used for logging, reports and CLI selection.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Representation {
    /// Parent pointer per node.
    AdjacencyList,
    /// Interval per node.
    NestedSet,
    /// Ancestor list per node.
    PathEnumeration,
}

impl Representation {
    /// All representations, in a stable order.
    pub const ALL: [Representation; 3] = [
        Representation::AdjacencyList,
        Representation::NestedSet,
        Representation::PathEnumeration,
    ];

    /// Short label used in logs and reports.
    pub fn label(self) -> &'static str {
        match self {
            Representation::AdjacencyList => "adjacency-list",
            Representation::NestedSet => "nested-set",
            Representation::PathEnumeration => "path-enumeration",
        }
    }
}

impl fmt::Display for Representation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
