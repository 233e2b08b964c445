//! External item store contract
//!
//! Items (questions, exercises, ...) are owned elsewhere and only hold a
//! reference to the node they are filed under. The engine needs three
//! operations from their store: counting, re-pointing and orphaning.

use crate::db::DatabaseError;
use crate::models::NodeId;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// Collaborator interface to whatever stores the classified items
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Items filed directly on `node_id` (descendants are not included)
    async fn count_items_under(&self, node_id: NodeId) -> Result<u64, DatabaseError>;

    /// Re-point every item filed on `old_node_id` at `new_node_id`; returns how many moved
    async fn reparent_items(
        &self,
        old_node_id: NodeId,
        new_node_id: NodeId,
    ) -> Result<u64, DatabaseError>;

    /// Detach every item filed on `node_id`; returns how many were orphaned
    async fn mark_items_orphaned(&self, node_id: NodeId) -> Result<u64, DatabaseError>;
}

/// Where an item currently lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemPlacement {
    Filed(NodeId),
    /// Its node was removed with no surviving ancestor to take it
    Orphaned { former_node_id: NodeId },
}

/// In-memory item store keyed by item id
#[derive(Default)]
pub struct MemoryItemStore {
    items: RwLock<HashMap<String, ItemPlacement>>,
    fail_reads: AtomicBool,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// File (or re-file) an item under a node
    pub async fn file_item(&self, item_id: impl Into<String>, node_id: NodeId) {
        self.items
            .write()
            .await
            .insert(item_id.into(), ItemPlacement::Filed(node_id));
    }

    /// Take an item out of the store entirely
    pub async fn remove_item(&self, item_id: &str) -> Option<ItemPlacement> {
        self.items.write().await.remove(item_id)
    }

    pub async fn placement(&self, item_id: &str) -> Option<ItemPlacement> {
        self.items.read().await.get(item_id).copied()
    }

    /// Item ids filed directly on `node_id`, sorted
    pub async fn items_at(&self, node_id: NodeId) -> Vec<String> {
        let items = self.items.read().await;
        let ids: BTreeSet<&String> = items
            .iter()
            .filter(|(_, placement)| **placement == ItemPlacement::Filed(node_id))
            .map(|(id, _)| id)
            .collect();
        ids.into_iter().cloned().collect()
    }

    pub async fn orphaned_items(&self) -> Vec<String> {
        let items = self.items.read().await;
        let ids: BTreeSet<&String> = items
            .iter()
            .filter(|(_, placement)| matches!(placement, ItemPlacement::Orphaned { .. }))
            .map(|(id, _)| id)
            .collect();
        ids.into_iter().cloned().collect()
    }

    /// Whether any item is still filed on `node_id`
    pub async fn references(&self, node_id: NodeId) -> bool {
        self.items
            .read()
            .await
            .values()
            .any(|placement| *placement == ItemPlacement::Filed(node_id))
    }

    /// Make `count_items_under` fail until reset
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Release);
    }
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    async fn count_items_under(&self, node_id: NodeId) -> Result<u64, DatabaseError> {
        if self.fail_reads.load(Ordering::Acquire) {
            return Err(DatabaseError::unavailable("Simulated item store read error"));
        }
        let items = self.items.read().await;
        Ok(items
            .values()
            .filter(|placement| **placement == ItemPlacement::Filed(node_id))
            .count() as u64)
    }

    async fn reparent_items(
        &self,
        old_node_id: NodeId,
        new_node_id: NodeId,
    ) -> Result<u64, DatabaseError> {
        let mut moved = 0;
        for placement in self.items.write().await.values_mut() {
            if *placement == ItemPlacement::Filed(old_node_id) {
                *placement = ItemPlacement::Filed(new_node_id);
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn mark_items_orphaned(&self, node_id: NodeId) -> Result<u64, DatabaseError> {
        let mut orphaned = 0;
        for placement in self.items.write().await.values_mut() {
            if *placement == ItemPlacement::Filed(node_id) {
                *placement = ItemPlacement::Orphaned {
                    former_node_id: node_id,
                };
                orphaned += 1;
            }
        }
        Ok(orphaned)
    }
}
