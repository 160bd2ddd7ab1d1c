//! Tree storage over a row store, in three layouts.
//!
//! * [`AdjacencyList`] keeps a parent reference per row.
//! * [`NestedSet`] keeps an interval per row that encloses its descendants.
//! * [`PathEnumeration`] keeps the list of ancestor ids per row.
//!
//! All three implement [`Hierarchy`] over any [`RowStore`]; the crate ships an
//! in-memory store and a SQLite store.
//!
//! ```
//! use canopy::{payload, AdjacencyList, Hierarchy, MemoryStore, TraversalOptions};
//!
//! # fn main() -> canopy::Result<()> {
//! let tree = AdjacencyList::new(MemoryStore::new());
//! let root = tree.create_root(payload("name", "root"))?;
//! let child = tree.create_child(root.id, payload("name", "child"))?;
//! assert_eq!(tree.root(child.id)?.id, root.id);
//! assert!(tree.set_parent(root.id, Some(child.id)).is_err());
//!
//! let snapshot = tree.children(root.id, &TraversalOptions::unbounded())?;
//! assert_eq!(snapshot.len(), 2);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engines;
pub mod error;
pub mod hierarchy;
pub mod model;
pub mod store;

pub use config::{Config, ConfigError, DeletePolicy, HierarchyOptions, SqliteOptions};
pub use engines::{AdjacencyList, NestedSet, PathEnumeration};
pub use error::{HierarchyError, Result};
pub use hierarchy::{Hierarchy, IntegrityReport, Node, TraversalOptions};
pub use model::{payload, NodeId, Payload, PropertyValue, Representation, Row, RowSpec};
pub use store::{MemoryStore, RowStore, SqliteStore};
