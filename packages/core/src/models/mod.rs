//! Data Models
//!
//! This module contains the core data structures used throughout the engine:
//!
//! - `Node` - one element of the classification tree, with its `Level`
//! - `HistoryEntry` - immutable audit record of a structural mutation
//! - `SubtreeDefinition` - nested shape shared by templates, exports and imports
//! - Derived statistics and integrity reports (`DerivedStats`, `Violation`, ...)

mod history;
mod node;
mod stats;
mod template;

pub use history::{HistoryAction, HistoryEntry, HistoryQuery};
pub use node::{
    Level, NewNode, Node, NodeChange, NodeId, NodeUpdate, ParseLevelError, SearchField,
};
pub use stats::{
    CacheStats, DerivedStats, DuplicateGroup, NodeStatistics, TreeStatistics, Violation,
};
pub use template::{BuiltinTemplate, SubtreeDefinition};
