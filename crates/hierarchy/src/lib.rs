//! In-memory tool hierarchy (C1) and its filesystem loader (C5).
//!
//! The store is built once at startup from an on-disk tree of `*.json`
//! node files and treated as immutable afterward; see [`HierarchyStore`]
//! for the navigation and resolution contract.

mod error;
mod loader;
mod store;

pub use error::{HierarchyError, LoadError};
pub use loader::{load_hierarchy, LoadedHierarchy};
pub use store::{CategoryView, ChildSummary, HierarchyNode, HierarchyStore, ToolView};
