//! Parent → child level transitions
//!
//! | parent      | permitted children    |
//! |-------------|-----------------------|
//! | *(root)*    | subject               |
//! | subject     | grade, chapter        |
//! | grade       | chapter, topic        |
//! | chapter     | section, topic        |
//! | section     | topic, difficulty     |
//! | topic       | difficulty, type      |
//! | difficulty  | type                  |
//! | type        | *(terminal)*          |
//!
//! Every permitted transition moves strictly down the level order, so a
//! chain of valid transitions is at most seven nodes long.

use crate::models::Level;

/// Static lookup of permitted level transitions
#[derive(Debug, Clone, Copy, Default)]
pub struct HierarchyPolicy;

impl HierarchyPolicy {
    /// Levels a child may take beneath `parent_level` (`None` = no parent)
    pub fn allowed_children(parent_level: Option<Level>) -> &'static [Level] {
        match parent_level {
            None => &[Level::Subject],
            Some(Level::Subject) => &[Level::Grade, Level::Chapter],
            Some(Level::Grade) => &[Level::Chapter, Level::Topic],
            Some(Level::Chapter) => &[Level::Section, Level::Topic],
            Some(Level::Section) => &[Level::Topic, Level::Difficulty],
            Some(Level::Topic) => &[Level::Difficulty, Level::Type],
            Some(Level::Difficulty) => &[Level::Type],
            Some(Level::Type) => &[],
        }
    }

    pub fn validate_transition(parent_level: Option<Level>, child_level: Level) -> bool {
        Self::allowed_children(parent_level).contains(&child_level)
    }

    /// A terminal level admits no children
    pub fn is_terminal(level: Level) -> bool {
        Self::allowed_children(Some(level)).is_empty()
    }

    /// Human-readable rejection message for a failed transition
    pub fn describe_rejection(parent_level: Option<Level>, child_level: Level) -> String {
        let allowed = Self::allowed_children(parent_level)
            .iter()
            .map(Level::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        match parent_level {
            None => format!(
                "A {} cannot be a root node (roots must be: {})",
                child_level, allowed
            ),
            Some(parent) if allowed.is_empty() => {
                format!("A {} cannot have children (tried to add a {})", parent, child_level)
            }
            Some(parent) => format!(
                "A {} cannot be a child of a {} (allowed: {})",
                child_level, parent, allowed
            ),
        }
    }
}
