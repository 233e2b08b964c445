//! Tree Node Data Structures
//!
//! This module defines the core `Node` record stored by the engine, the
//! fixed `Level` ordering of the classification hierarchy, and the input
//! types used to create and patch nodes.
//!
//! # Levels
//!
//! Every node belongs to exactly one tier of the seven-tier order:
//!
//! ```text
//! subject → grade → chapter → section → topic → difficulty → type
//! ```
//!
//! Which tiers may appear beneath which is decided by
//! [`HierarchyPolicy`](crate::behaviors::HierarchyPolicy), not by the order
//! alone (a subject may hold chapters directly, for example).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Unique, immutable identifier of a tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for NodeId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Error returned when a string does not name a known level
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown level: {0}")]
pub struct ParseLevelError(pub String);

/// Tier of a node in the classification hierarchy
///
/// Variants are declared in hierarchy order, so the derived `Ord` follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Subject,
    Grade,
    Chapter,
    Section,
    Topic,
    Difficulty,
    Type,
}

impl Level {
    /// All levels, root tier first
    pub const ALL: [Level; 7] = [
        Level::Subject,
        Level::Grade,
        Level::Chapter,
        Level::Section,
        Level::Topic,
        Level::Difficulty,
        Level::Type,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Subject => "subject",
            Level::Grade => "grade",
            Level::Chapter => "chapter",
            Level::Section => "section",
            Level::Topic => "topic",
            Level::Difficulty => "difficulty",
            Level::Type => "type",
        }
    }

    /// Zero-based position in the hierarchy order
    pub fn rank(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Level::ALL
            .iter()
            .copied()
            .find(|level| level.as_str() == wanted)
            .ok_or_else(|| ParseLevelError(s.to_string()))
    }
}

/// Node fields that `search` can match against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchField {
    Name,
    Description,
}

/// One element of the classification tree
///
/// `parent_id == None` marks a root. Names are unique among siblings when
/// compared case-insensitively; the engine enforces this on every write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,

    #[serde(default)]
    pub parent_id: Option<NodeId>,

    pub name: String,

    pub level: Level,

    #[serde(default)]
    pub description: String,

    pub created_at: DateTime<Utc>,

    pub modified_at: DateTime<Utc>,
}

impl Node {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Lower-cased name used for sibling uniqueness and ordering
    pub fn name_key(&self) -> String {
        self.name.to_lowercase()
    }
}

/// Input for creating a node
///
/// # Examples
///
/// ```rust
/// # use classtree_core::models::{Level, NewNode};
/// let algebra = NewNode::new("Algebra", Level::Chapter).with_description("Equations and more");
/// assert_eq!(algebra.level, Level::Chapter);
/// assert!(algebra.parent_id.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNode {
    pub name: String,

    pub level: Level,

    #[serde(default)]
    pub parent_id: Option<NodeId>,

    #[serde(default)]
    pub description: String,
}

impl NewNode {
    pub fn new(name: impl Into<String>, level: Level) -> Self {
        Self {
            name: name.into(),
            level,
            parent_id: None,
            description: String::new(),
        }
    }

    pub fn with_parent(mut self, parent_id: NodeId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Distinguishes a missing field from an explicit `null`
///
/// - Missing field → `None` (don't update)
/// - `null` → `Some(None)` (clear)
/// - value → `Some(Some(value))`
fn deserialize_optional_field<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Some(Option::<T>::deserialize(deserializer)?))
}

/// Partial node update
///
/// Only provided fields are changed. `parent_id` uses the double-Option
/// pattern: `Some(None)` turns the node into a root, `Some(Some(id))`
/// re-parents it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<Level>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_field"
    )]
    pub parent_id: Option<Option<NodeId>>,
}

impl NodeUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_parent(mut self, parent_id: Option<NodeId>) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.level.is_none()
            && self.description.is_none()
            && self.parent_id.is_none()
    }
}

/// Before/after snapshot of a node touched by a structural edit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeChange {
    pub before: Node,
    pub after: Node,
}

impl NodeChange {
    pub fn parent_changed(&self) -> bool {
        self.before.parent_id != self.after.parent_id
    }

    /// True when only the parent differs
    pub fn is_pure_move(&self) -> bool {
        self.parent_changed()
            && self.before.name == self.after.name
            && self.before.level == self.after.level
            && self.before.description == self.after.description
    }
}
