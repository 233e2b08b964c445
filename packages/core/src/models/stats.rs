//! Derived statistics and integrity reports
//!
//! Everything here is computed from the node table (plus the external item
//! counts) and can be thrown away and rebuilt at any time.

use crate::models::{Level, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Per-node aggregates held by the path cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedStats {
    /// Items filed anywhere in the node's subtree
    pub question_count: u64,

    /// Items filed on the node itself
    pub direct_question_count: u64,

    pub child_count: usize,

    pub descendant_count: usize,

    /// Roots have depth 0
    pub depth: usize,

    pub last_updated: DateTime<Utc>,
}

/// Report for a single node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatistics {
    pub node_id: NodeId,
    pub direct_question_count: u64,
    pub total_question_count: u64,
    pub child_count: usize,
    pub descendant_count: usize,
    pub depth: usize,
    /// Ancestor names joined with `" > "`, ending with the node itself
    pub path: String,
}

/// Whole-tree summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeStatistics {
    pub total_nodes: usize,
    pub nodes_by_level: BTreeMap<Level, usize>,
    pub max_depth: usize,
    pub total_questions: u64,
    pub empty_nodes: usize,
    pub orphaned_nodes: usize,
    pub circular_references: usize,
}

/// Snapshot of the path cache's bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub is_stale: bool,
    pub last_rebuild: Option<DateTime<Utc>>,
    pub rebuild_count: u64,
}

/// Siblings sharing a name when compared case-insensitively
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateGroup {
    pub parent_id: Option<NodeId>,
    /// Lower-cased shared name
    pub name: String,
    pub node_ids: Vec<NodeId>,
}

/// Structural problem found by a full-tree scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// `parent_id` points at a node that does not exist
    Orphan {
        node_id: NodeId,
        missing_parent_id: NodeId,
    },

    /// Following parent pointers from these nodes loops back on itself
    Cycle { node_ids: Vec<NodeId> },

    /// Parent chain is longer than the configured walk bound without looping
    DepthExceeded { node_id: NodeId, limit: usize },

    /// Child level not permitted beneath the parent's actual level
    /// (`parent_level == None` means the node is a root)
    HierarchyViolation {
        node_id: NodeId,
        parent_id: Option<NodeId>,
        parent_level: Option<Level>,
        level: Level,
    },

    DuplicateSibling(DuplicateGroup),
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Orphan {
                node_id,
                missing_parent_id,
            } => write!(f, "node {} references missing parent {}", node_id, missing_parent_id),
            Violation::Cycle { node_ids } => {
                write!(f, "cycle through {} node(s) starting at ", node_ids.len())?;
                match node_ids.first() {
                    Some(first) => write!(f, "{}", first),
                    None => f.write_str("?"),
                }
            }
            Violation::DepthExceeded { node_id, limit } => {
                write!(f, "node {} is nested deeper than {}", node_id, limit)
            }
            Violation::HierarchyViolation {
                node_id,
                parent_level,
                level,
                ..
            } => match parent_level {
                Some(parent_level) => write!(
                    f,
                    "node {} at level {} cannot sit under a {}",
                    node_id, level, parent_level
                ),
                None => write!(f, "node {} at level {} cannot be a root", node_id, level),
            },
            Violation::DuplicateSibling(group) => write!(
                f,
                "{} siblings share the name '{}'",
                group.node_ids.len(),
                group.name
            ),
        }
    }
}
