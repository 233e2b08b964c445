//! Audit history records
//!
//! A `HistoryEntry` is written once per structural mutation and never
//! changed afterwards. Entries carry both the old and the new value of the
//! fields a mutation can touch, so a reader can reconstruct what happened
//! without consulting the node table.

use crate::models::{Level, Node, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HistoryAction {
    Create,
    Update,
    Move,
    Delete,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Create => "CREATE",
            HistoryAction::Update => "UPDATE",
            HistoryAction::Move => "MOVE",
            HistoryAction::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE" => Ok(HistoryAction::Create),
            "UPDATE" => Ok(HistoryAction::Update),
            "MOVE" => Ok(HistoryAction::Move),
            "DELETE" => Ok(HistoryAction::Delete),
            other => Err(format!("Unknown history action: {}", other)),
        }
    }
}

/// One immutable audit record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: Uuid,
    pub node_id: NodeId,
    pub action: HistoryAction,
    pub old_parent_id: Option<NodeId>,
    pub new_parent_id: Option<NodeId>,
    pub old_name: Option<String>,
    pub new_name: Option<String>,
    pub old_level: Option<Level>,
    pub new_level: Option<Level>,
    pub timestamp: DateTime<Utc>,
    pub changed_by: String,
    pub reason: Option<String>,
}

impl HistoryEntry {
    fn blank(node_id: NodeId, action: HistoryAction) -> Self {
        Self {
            id: Uuid::new_v4(),
            node_id,
            action,
            old_parent_id: None,
            new_parent_id: None,
            old_name: None,
            new_name: None,
            old_level: None,
            new_level: None,
            timestamp: Utc::now(),
            changed_by: String::new(),
            reason: None,
        }
    }

    pub fn created(node: &Node) -> Self {
        Self {
            new_parent_id: node.parent_id,
            new_name: Some(node.name.clone()),
            new_level: Some(node.level),
            ..Self::blank(node.id, HistoryAction::Create)
        }
    }

    /// Entry for an in-place edit; a change that only re-parents is logged as a move
    pub fn updated(before: &Node, after: &Node) -> Self {
        let action = if before.parent_id != after.parent_id
            && before.name == after.name
            && before.level == after.level
            && before.description == after.description
        {
            HistoryAction::Move
        } else {
            HistoryAction::Update
        };
        Self {
            old_parent_id: before.parent_id,
            new_parent_id: after.parent_id,
            old_name: Some(before.name.clone()),
            new_name: Some(after.name.clone()),
            old_level: Some(before.level),
            new_level: Some(after.level),
            ..Self::blank(after.id, action)
        }
    }

    pub fn moved(before: &Node, after: &Node) -> Self {
        Self {
            action: HistoryAction::Move,
            ..Self::updated(before, after)
        }
    }

    pub fn deleted(node: &Node) -> Self {
        Self {
            old_parent_id: node.parent_id,
            old_name: Some(node.name.clone()),
            old_level: Some(node.level),
            ..Self::blank(node.id, HistoryAction::Delete)
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_actor(mut self, changed_by: impl Into<String>) -> Self {
        self.changed_by = changed_by.into();
        self
    }
}

/// Filter for reading history, newest entries first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub node_id: Option<NodeId>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl HistoryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_node(mut self, node_id: NodeId) -> Self {
        self.node_id = Some(node_id);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `entry` passes the node and time filters (limit is applied by the reader)
    pub fn matches(&self, entry: &HistoryEntry) -> bool {
        if let Some(node_id) = self.node_id {
            if entry.node_id != node_id {
                return false;
            }
        }
        match self.since {
            Some(since) => entry.timestamp >= since,
            None => true,
        }
    }
}
