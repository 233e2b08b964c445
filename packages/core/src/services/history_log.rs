//! Append-only audit trail of structural mutations
//!
//! Appends are best-effort: a failed write is logged and swallowed so it
//! can never block or roll back the mutation that produced it.

use crate::db::HistoryStore;
use crate::models::{HistoryEntry, HistoryQuery};
use crate::services::error::Result;
use std::sync::Arc;

pub struct HistoryLog {
    store: Arc<dyn HistoryStore>,
    changed_by: String,
    default_limit: usize,
}

impl HistoryLog {
    pub fn new(store: Arc<dyn HistoryStore>, changed_by: impl Into<String>, default_limit: usize) -> Self {
        Self {
            store,
            changed_by: changed_by.into(),
            default_limit,
        }
    }

    /// Record an entry; returns whether it was persisted
    ///
    /// Entries without an actor are stamped with the configured one.
    pub async fn append(&self, entry: HistoryEntry) -> bool {
        let entry = if entry.changed_by.is_empty() {
            entry.with_actor(self.changed_by.clone())
        } else {
            entry
        };

        match self.store.append_history(&entry).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    node_id = %entry.node_id,
                    action = %entry.action,
                    error = %e,
                    "Failed to append history entry"
                );
                false
            }
        }
    }

    /// Append several entries; returns how many were persisted
    pub async fn append_all(&self, entries: impl IntoIterator<Item = HistoryEntry>) -> usize {
        let mut written = 0;
        for entry in entries {
            if self.append(entry).await {
                written += 1;
            }
        }
        written
    }

    /// Matching entries, newest first; an unset limit uses the configured default
    pub async fn query(&self, query: HistoryQuery) -> Result<Vec<HistoryEntry>> {
        let query = HistoryQuery {
            limit: Some(query.limit.unwrap_or(self.default_limit)),
            ..query
        };
        Ok(self.store.load_history(&query).await?)
    }
}
