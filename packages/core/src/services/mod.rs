//! Business Services
//!
//! This module contains the tree engine's services, leaf-first:
//!
//! - `NodeStore` - validated CRUD and adjacency queries (source of truth)
//! - `PathStatsCache` - rebuildable ancestor-path and aggregate-count index
//! - `HistoryLog` - best-effort audit trail
//! - `ValidationEngine` - full-tree integrity scans and empty-node cleanup
//! - `TreeService` - orchestrator composing the above
//!
//! Callers normally talk to `TreeService` only.

pub mod error;
pub mod history_log;
pub mod node_store;
pub mod path_stats_cache;
pub mod tree_service;
pub mod validation;

pub use error::{ErrorKind, TreeError};
pub use history_log::HistoryLog;
pub use node_store::{DeleteOutcome, NodeStore};
pub use path_stats_cache::{CacheWriter, PathStatsCache};
pub use tree_service::{BulkItemResult, BulkOutcome, TreeService};
pub use validation::ValidationEngine;
