//! Configuration for the tree engine

use crate::models::SearchField;
use serde::{Deserialize, Serialize};

/// A valid chain is at most this many nodes deep (one per level)
const MIN_WALK_DEPTH: usize = 8;

/// Tunables shared by the node store, cache, history log and validator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Upper bound on parent-pointer walks before a chain is treated as cyclic
    pub max_walk_depth: usize,

    /// Maximum node name length in characters (after trimming)
    pub max_name_length: usize,

    /// Appended to the source name when `copy_subtree` gets no explicit name
    pub copy_suffix: String,

    /// History rows returned when a query sets no limit
    pub history_default_limit: usize,

    /// Fields searched when the caller passes none
    pub default_search_fields: Vec<SearchField>,

    /// Actor recorded on history entries
    pub changed_by: String,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_walk_depth: 64,
            max_name_length: 255,
            copy_suffix: " (Copy)".to_string(),
            history_default_limit: 100,
            default_search_fields: vec![SearchField::Name, SearchField::Description],
            changed_by: "system".to_string(),
        }
    }
}

impl TreeConfig {
    /// Parse from JSON; missing fields take their defaults
    pub fn from_json_str(raw: &str) -> Result<Self, String> {
        let config: TreeConfig =
            serde_json::from_str(raw).map_err(|e| format!("invalid tree config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_walk_depth < MIN_WALK_DEPTH {
            return Err(format!(
                "max_walk_depth must be at least {} to fit every level",
                MIN_WALK_DEPTH
            ));
        }

        if self.max_name_length == 0 {
            return Err("max_name_length must be greater than 0".to_string());
        }

        if self.copy_suffix.trim().is_empty() {
            return Err("copy_suffix cannot be empty".to_string());
        }

        if self.history_default_limit == 0 {
            return Err("history_default_limit must be greater than 0".to_string());
        }

        if self.default_search_fields.is_empty() {
            return Err("default_search_fields cannot be empty".to_string());
        }

        if self.changed_by.trim().is_empty() {
            return Err("changed_by cannot be empty".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TreeConfig::default();
        assert_eq!(config.max_walk_depth, 64);
        assert_eq!(config.copy_suffix, " (Copy)");
        assert_eq!(config.changed_by, "system");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = TreeConfig::default();

        // Too shallow to hold a full subject..type chain
        config.max_walk_depth = 3;
        assert!(config.validate().is_err());

        config.max_walk_depth = 64;
        config.history_default_limit = 0;
        assert!(config.validate().is_err());

        config.history_default_limit = 10;
        config.default_search_fields.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = TreeConfig::from_json_str(r#"{"copy_suffix": " - copy"}"#).unwrap();
        assert_eq!(config.copy_suffix, " - copy");
        assert_eq!(config.max_name_length, 255);

        assert!(TreeConfig::from_json_str(r#"{"max_name_length": 0}"#).is_err());
        assert!(TreeConfig::from_json_str("not json").is_err());
    }
}
