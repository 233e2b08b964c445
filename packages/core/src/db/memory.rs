//! In-memory storage backend
//!
//! Used by tests and by hosts that do not need persistence. Node batches
//! are applied to a scratch copy of the table and swapped in only when every
//! write succeeded, which gives `apply` the same all-or-nothing behaviour as
//! a SQL transaction.

use crate::db::backend::{HistoryStore, NodeBackend, NodeWrite};
use crate::db::DatabaseError;
use crate::models::{HistoryEntry, HistoryQuery, Node, NodeId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// In-memory node and history tables
#[derive(Default)]
pub struct MemoryBackend {
    nodes: RwLock<HashMap<NodeId, Node>>,
    history: RwLock<Vec<HistoryEntry>>,
    fail_node_writes: AtomicBool,
    fail_history_writes: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `apply` fail until reset
    pub fn set_fail_node_writes(&self, fail: bool) {
        self.fail_node_writes.store(fail, Ordering::Release);
    }

    /// Make every subsequent `append_history` fail until reset
    pub fn set_fail_history_writes(&self, fail: bool) {
        self.fail_history_writes.store(fail, Ordering::Release);
    }

    pub async fn node_count(&self) -> usize {
        self.nodes.read().await.len()
    }

    pub async fn history_len(&self) -> usize {
        self.history.read().await.len()
    }
}

#[async_trait]
impl NodeBackend for MemoryBackend {
    async fn get_node(&self, id: NodeId) -> Result<Option<Node>, DatabaseError> {
        Ok(self.nodes.read().await.get(&id).cloned())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, DatabaseError> {
        Ok(self.nodes.read().await.values().cloned().collect())
    }

    async fn list_children(&self, parent_id: Option<NodeId>) -> Result<Vec<Node>, DatabaseError> {
        Ok(self
            .nodes
            .read()
            .await
            .values()
            .filter(|node| node.parent_id == parent_id)
            .cloned()
            .collect())
    }

    async fn apply(&self, writes: Vec<NodeWrite>) -> Result<(), DatabaseError> {
        if self.fail_node_writes.load(Ordering::Acquire) {
            return Err(DatabaseError::unavailable("Simulated node write error"));
        }

        let mut nodes = self.nodes.write().await;
        let mut scratch = nodes.clone();

        for write in writes {
            match write {
                NodeWrite::Insert(node) => {
                    if scratch.contains_key(&node.id) {
                        return Err(DatabaseError::sql_execution(format!(
                            "Failed to insert node {}: id already exists",
                            node.id
                        )));
                    }
                    scratch.insert(node.id, node);
                }
                NodeWrite::Update(node) => match scratch.get_mut(&node.id) {
                    Some(existing) => *existing = node,
                    None => {
                        return Err(DatabaseError::sql_execution(format!(
                            "Failed to update node {}: no such row",
                            node.id
                        )))
                    }
                },
                NodeWrite::Delete(id) => {
                    scratch.remove(&id);
                }
            }
        }

        *nodes = scratch;
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for MemoryBackend {
    async fn append_history(&self, entry: &HistoryEntry) -> Result<(), DatabaseError> {
        if self.fail_history_writes.load(Ordering::Acquire) {
            return Err(DatabaseError::unavailable("Simulated history write error"));
        }
        self.history.write().await.push(entry.clone());
        Ok(())
    }

    async fn load_history(&self, query: &HistoryQuery) -> Result<Vec<HistoryEntry>, DatabaseError> {
        let history = self.history.read().await;
        let matching = history.iter().rev().filter(|entry| query.matches(entry));
        Ok(match query.limit {
            Some(limit) => matching.take(limit).cloned().collect(),
            None => matching.cloned().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Level;
    use chrono::Utc;

    fn node(name: &str, parent_id: Option<NodeId>) -> Node {
        let now = Utc::now();
        Node {
            id: NodeId::new(),
            parent_id,
            name: name.to_string(),
            level: Level::Subject,
            description: String::new(),
            created_at: now,
            modified_at: now,
        }
    }

    #[tokio::test]
    async fn test_failed_batch_leaves_table_untouched() {
        let backend = MemoryBackend::new();
        let a = node("A", None);
        backend.apply(vec![NodeWrite::Insert(a.clone())]).await.unwrap();

        // Second write targets a missing row, so the rename must not land either
        let renamed = Node {
            name: "A2".into(),
            ..a.clone()
        };
        let result = backend
            .apply(vec![
                NodeWrite::Update(renamed),
                NodeWrite::Update(node("ghost", None)),
            ])
            .await;

        assert!(result.is_err());
        assert_eq!(backend.get_node(a.id).await.unwrap().unwrap().name, "A");
    }

    #[tokio::test]
    async fn test_simulated_write_errors() {
        let backend = MemoryBackend::new();
        backend.set_fail_node_writes(true);
        assert!(backend
            .apply(vec![NodeWrite::Insert(node("A", None))])
            .await
            .is_err());
        assert_eq!(backend.node_count().await, 0);

        let a = node("A", None);
        backend.set_fail_history_writes(true);
        assert!(backend
            .append_history(&HistoryEntry::created(&a))
            .await
            .is_err());
        assert_eq!(backend.history_len().await, 0);
    }

    #[tokio::test]
    async fn test_history_is_newest_first_and_limited() {
        let backend = MemoryBackend::new();
        let nodes: Vec<Node> = (0..3).map(|i| node(&format!("N{}", i), None)).collect();
        for n in &nodes {
            backend.append_history(&HistoryEntry::created(n)).await.unwrap();
        }

        let entries = backend
            .load_history(&HistoryQuery::new().limit(2))
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].node_id, nodes[2].id);
        assert_eq!(entries[1].node_id, nodes[1].id);
    }
}
