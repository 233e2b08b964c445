//! Storage abstraction
//!
//! The engine talks to persistence through two traits:
//!
//! - [`NodeBackend`] - the node table; the single source of truth for structure
//! - [`HistoryStore`] - the append-only audit table
//!
//! Backends store exactly what they are given. All structural rules
//! (hierarchy, uniqueness, acyclicity) are enforced above this layer, which
//! lets tests seed corrupt rows for the validation scanner.

use crate::db::DatabaseError;
use crate::models::{HistoryEntry, HistoryQuery, Node, NodeId};
use async_trait::async_trait;

/// One row-level change inside an atomic batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeWrite {
    Insert(Node),
    Update(Node),
    Delete(NodeId),
}

impl NodeWrite {
    pub fn node_id(&self) -> NodeId {
        match self {
            NodeWrite::Insert(node) | NodeWrite::Update(node) => node.id,
            NodeWrite::Delete(id) => *id,
        }
    }
}

/// Node table access
///
/// `apply` must be all-or-nothing: either every write in the batch is
/// visible afterwards or none is.
#[async_trait]
pub trait NodeBackend: Send + Sync {
    async fn get_node(&self, id: NodeId) -> Result<Option<Node>, DatabaseError>;

    async fn list_nodes(&self) -> Result<Vec<Node>, DatabaseError>;

    /// Direct children of `parent_id` (`None` lists roots)
    async fn list_children(&self, parent_id: Option<NodeId>) -> Result<Vec<Node>, DatabaseError>;

    async fn apply(&self, writes: Vec<NodeWrite>) -> Result<(), DatabaseError>;
}

/// Audit table access
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append_history(&self, entry: &HistoryEntry) -> Result<(), DatabaseError>;

    /// Entries matching `query`, newest first, truncated to `query.limit`
    async fn load_history(&self, query: &HistoryQuery) -> Result<Vec<HistoryEntry>, DatabaseError>;
}
