//! Structural Rules
//!
//! This module holds the static rules every tree write must respect:
//!
//! - `HierarchyPolicy` - which levels may appear beneath which
//!
//! Rules here are pure functions with no storage access, so the node store,
//! the validation engine and template materialization all share one table.

mod hierarchy_policy;

pub use hierarchy_policy::HierarchyPolicy;
