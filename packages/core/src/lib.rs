//! Classtree Core - hierarchical classification tree engine
//!
//! This crate owns the tree that classified items (questions, exercises) are
//! filed under: subject → grade → chapter → section → topic → difficulty → type.
//!
//! # Architecture
//!
//! - **Typed hierarchy**: a static policy decides which level may sit beneath which
//! - **Single source of truth**: the node table; paths and counts are a derived cache
//! - **libsql/Turso**: embedded SQLite-compatible persistence, or in-memory tables
//! - **Best-effort audit**: history failures never undo a structural change
//!
//! # Modules
//!
//! - [`models`] - Data structures (Node, Level, HistoryEntry, SubtreeDefinition, ...)
//! - [`behaviors`] - Hierarchy policy
//! - [`services`] - NodeStore, PathStatsCache, HistoryLog, ValidationEngine, TreeService
//! - [`db`] - Storage traits and the memory/libsql backends
//! - [`config`] - Engine tunables
//! - [`utils`] - Logging setup

pub mod behaviors;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use behaviors::*;
pub use config::TreeConfig;
pub use models::*;
pub use services::*;
