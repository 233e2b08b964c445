//! TursoBackend - libsql persistence for the node and history tables
//!
//! # Schema
//!
//! ```sql
//! tree_nodes   (id TEXT PRIMARY KEY, parent_id TEXT, name, level, description,
//!               created_at, modified_at)
//! tree_history (seq INTEGER PRIMARY KEY AUTOINCREMENT, id TEXT UNIQUE, node_id,
//!               action, old/new parent_id, old/new name, old/new level,
//!               changed_at, changed_by, reason)
//! ```
//!
//! The derived path/statistics index is not persisted; it is
//! rebuilt from `tree_nodes` on demand.
//!
//! # Connections
//!
//! Every operation opens its own connection through `connect_with_timeout()`
//! so the 5-second busy timeout applies when futures hop between threads.
//! Batches run inside `BEGIN TRANSACTION` / `COMMIT` and roll back on the
//! first failed statement.

use crate::db::backend::{HistoryStore, NodeBackend, NodeWrite};
use crate::db::DatabaseError;
use crate::models::{HistoryEntry, HistoryQuery, Level, Node, NodeId};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{params, Builder, Connection, Database, Row};
use std::path::PathBuf;
use std::sync::Arc;

const NODE_COLUMNS: &str = "id, parent_id, name, level, description, created_at, modified_at";

const HISTORY_COLUMNS: &str = "id, node_id, action, old_parent_id, new_parent_id, old_name, \
                               new_name, old_level, new_level, changed_at, changed_by, reason";

/// libsql-backed node and history tables
///
/// # Examples
///
/// ```no_run
/// use classtree_core::db::TursoBackend;
/// use std::path::PathBuf;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let backend = TursoBackend::new(PathBuf::from("./data/tree.db")).await?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct TursoBackend {
    db: Arc<Database>,
    db_path: PathBuf,
}

impl TursoBackend {
    /// Open (or create) the database file and ensure the schema exists
    pub async fn new(db_path: PathBuf) -> Result<Self, DatabaseError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| DatabaseError::connection_failed(db_path.clone(), e))?;

        let backend = Self {
            db: Arc::new(db),
            db_path,
        };
        backend.initialize_schema().await?;
        tracing::debug!(path = %backend.db_path.display(), "Opened tree database");
        Ok(backend)
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    /// Get a connection with busy timeout configured
    pub async fn connect_with_timeout(&self) -> Result<Connection, DatabaseError> {
        let conn = self.db.connect().map_err(DatabaseError::LibsqlError)?;
        Self::execute_pragma(&conn, "PRAGMA busy_timeout = 5000").await?;
        Ok(conn)
    }

    /// PRAGMA statements return rows, so they go through query() rather than execute()
    async fn execute_pragma(conn: &Connection, pragma: &str) -> Result<(), DatabaseError> {
        let mut stmt = conn.prepare(pragma).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        let _ = stmt.query(()).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        Ok(())
    }

    async fn initialize_schema(&self) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;

        Self::execute_pragma(&conn, "PRAGMA journal_mode = WAL").await?;

        let statements = [
            "CREATE TABLE IF NOT EXISTS tree_nodes (
                id TEXT PRIMARY KEY,
                parent_id TEXT,
                name TEXT NOT NULL,
                level TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                modified_at TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_tree_nodes_parent ON tree_nodes(parent_id)",
            "CREATE INDEX IF NOT EXISTS idx_tree_nodes_level ON tree_nodes(level)",
            "CREATE TABLE IF NOT EXISTS tree_history (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                node_id TEXT NOT NULL,
                action TEXT NOT NULL,
                old_parent_id TEXT,
                new_parent_id TEXT,
                old_name TEXT,
                new_name TEXT,
                old_level TEXT,
                new_level TEXT,
                changed_at TEXT NOT NULL,
                changed_by TEXT NOT NULL,
                reason TEXT
            )",
            "CREATE INDEX IF NOT EXISTS idx_tree_history_node ON tree_history(node_id)",
        ];

        for sql in statements {
            conn.execute(sql, ()).await.map_err(|e| {
                DatabaseError::initialization_failed(format!("Failed to create schema: {}", e))
            })?;
        }

        Ok(())
    }

    async fn query_nodes(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<Node>, DatabaseError> {
        let conn = self.connect_with_timeout().await?;

        let mut stmt = conn.prepare(sql).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to prepare node query: {}", e))
        })?;

        let mut rows = stmt.query(params).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute node query: {}", e))
        })?;

        let mut nodes = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        {
            nodes.push(row_to_node(&row)?);
        }
        Ok(nodes)
    }

    async fn execute_write(conn: &Connection, write: &NodeWrite) -> Result<(), DatabaseError> {
        match write {
            NodeWrite::Insert(node) => {
                conn.execute(
                    &format!(
                        "INSERT INTO tree_nodes ({}) VALUES (?, ?, ?, ?, ?, ?, ?)",
                        NODE_COLUMNS
                    ),
                    params![
                        node.id.to_string(),
                        node.parent_id.map(|id| id.to_string()),
                        node.name.clone(),
                        node.level.as_str(),
                        node.description.clone(),
                        format_timestamp(&node.created_at),
                        format_timestamp(&node.modified_at),
                    ],
                )
                .await
                .map_err(|e| {
                    DatabaseError::sql_execution(format!("Failed to insert node {}: {}", node.id, e))
                })?;
            }
            NodeWrite::Update(node) => {
                let changed = conn
                    .execute(
                        "UPDATE tree_nodes SET parent_id = ?, name = ?, level = ?, description = ?, modified_at = ? WHERE id = ?",
                        params![
                            node.parent_id.map(|id| id.to_string()),
                            node.name.clone(),
                            node.level.as_str(),
                            node.description.clone(),
                            format_timestamp(&node.modified_at),
                            node.id.to_string(),
                        ],
                    )
                    .await
                    .map_err(|e| {
                        DatabaseError::sql_execution(format!(
                            "Failed to update node {}: {}",
                            node.id, e
                        ))
                    })?;
                if changed == 0 {
                    return Err(DatabaseError::sql_execution(format!(
                        "Failed to update node {}: no such row",
                        node.id
                    )));
                }
            }
            NodeWrite::Delete(id) => {
                conn.execute("DELETE FROM tree_nodes WHERE id = ?", [id.to_string()])
                    .await
                    .map_err(|e| {
                        DatabaseError::sql_execution(format!("Failed to delete node {}: {}", id, e))
                    })?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl NodeBackend for TursoBackend {
    async fn get_node(&self, id: NodeId) -> Result<Option<Node>, DatabaseError> {
        let mut nodes = self
            .query_nodes(
                &format!("SELECT {} FROM tree_nodes WHERE id = ?", NODE_COLUMNS),
                [id.to_string()],
            )
            .await?;
        Ok(nodes.pop())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, DatabaseError> {
        self.query_nodes(&format!("SELECT {} FROM tree_nodes", NODE_COLUMNS), ())
            .await
    }

    async fn list_children(&self, parent_id: Option<NodeId>) -> Result<Vec<Node>, DatabaseError> {
        match parent_id {
            Some(parent_id) => {
                self.query_nodes(
                    &format!("SELECT {} FROM tree_nodes WHERE parent_id = ?", NODE_COLUMNS),
                    [parent_id.to_string()],
                )
                .await
            }
            None => {
                self.query_nodes(
                    &format!("SELECT {} FROM tree_nodes WHERE parent_id IS NULL", NODE_COLUMNS),
                    (),
                )
                .await
            }
        }
    }

    async fn apply(&self, writes: Vec<NodeWrite>) -> Result<(), DatabaseError> {
        if writes.is_empty() {
            return Ok(());
        }

        let conn = self.connect_with_timeout().await?;

        conn.execute("BEGIN TRANSACTION", ()).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to begin transaction: {}", e))
        })?;

        for write in &writes {
            if let Err(e) = Self::execute_write(&conn, write).await {
                let _rollback = conn.execute("ROLLBACK", ()).await;
                return Err(e);
            }
        }

        if let Err(e) = conn.execute("COMMIT", ()).await {
            let _rollback = conn.execute("ROLLBACK", ()).await;
            return Err(DatabaseError::sql_execution(format!(
                "Failed to commit transaction: {}",
                e
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl HistoryStore for TursoBackend {
    async fn append_history(&self, entry: &HistoryEntry) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;

        conn.execute(
            &format!(
                "INSERT INTO tree_history ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                HISTORY_COLUMNS
            ),
            params![
                entry.id.to_string(),
                entry.node_id.to_string(),
                entry.action.as_str(),
                entry.old_parent_id.map(|id| id.to_string()),
                entry.new_parent_id.map(|id| id.to_string()),
                entry.old_name.clone(),
                entry.new_name.clone(),
                entry.old_level.map(|level| level.as_str()),
                entry.new_level.map(|level| level.as_str()),
                format_timestamp(&entry.timestamp),
                entry.changed_by.clone(),
                entry.reason.clone(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::sql_execution(format!("Failed to append history: {}", e)))?;

        Ok(())
    }

    async fn load_history(&self, query: &HistoryQuery) -> Result<Vec<HistoryEntry>, DatabaseError> {
        let conn = self.connect_with_timeout().await?;

        let mut rows = match query.node_id {
            Some(node_id) => {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {} FROM tree_history WHERE node_id = ? ORDER BY seq DESC",
                        HISTORY_COLUMNS
                    ))
                    .await
                    .map_err(|e| {
                        DatabaseError::sql_execution(format!(
                            "Failed to prepare history query: {}",
                            e
                        ))
                    })?;
                stmt.query([node_id.to_string()]).await
            }
            None => {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {} FROM tree_history ORDER BY seq DESC",
                        HISTORY_COLUMNS
                    ))
                    .await
                    .map_err(|e| {
                        DatabaseError::sql_execution(format!(
                            "Failed to prepare history query: {}",
                            e
                        ))
                    })?;
                stmt.query(()).await
            }
        }
        .map_err(|e| DatabaseError::sql_execution(format!("Failed to execute history query: {}", e)))?;

        let limit = query.limit.unwrap_or(usize::MAX);
        let mut entries = Vec::new();
        while entries.len() < limit {
            let Some(row) = rows
                .next()
                .await
                .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
            else {
                break;
            };
            let entry = row_to_history(&row)?;
            if query.matches(&entry) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| DatabaseError::corrupt_row(format!("bad timestamp '{}': {}", raw, e)))
}

fn parse_node_id(raw: &str) -> Result<NodeId, DatabaseError> {
    raw.parse()
        .map_err(|e| DatabaseError::corrupt_row(format!("bad node id '{}': {}", raw, e)))
}

fn parse_level(raw: &str) -> Result<Level, DatabaseError> {
    raw.parse()
        .map_err(|e| DatabaseError::corrupt_row(format!("{}", e)))
}

fn text(row: &Row, idx: i32) -> Result<String, DatabaseError> {
    row.get::<String>(idx)
        .map_err(|e| DatabaseError::corrupt_row(format!("column {}: {}", idx, e)))
}

fn optional_text(row: &Row, idx: i32) -> Result<Option<String>, DatabaseError> {
    row.get::<Option<String>>(idx)
        .map_err(|e| DatabaseError::corrupt_row(format!("column {}: {}", idx, e)))
}

fn row_to_node(row: &Row) -> Result<Node, DatabaseError> {
    let id = text(row, 0)?;
    let parent_id = optional_text(row, 1)?;
    let level = text(row, 3)?;
    let created_at = text(row, 5)?;
    let modified_at = text(row, 6)?;

    Ok(Node {
        id: parse_node_id(&id)?,
        parent_id: parent_id.as_deref().map(parse_node_id).transpose()?,
        name: text(row, 2)?,
        level: parse_level(&level)?,
        description: text(row, 4)?,
        created_at: parse_timestamp(&created_at)?,
        modified_at: parse_timestamp(&modified_at)?,
    })
}

fn row_to_history(row: &Row) -> Result<HistoryEntry, DatabaseError> {
    let id = text(row, 0)?;
    let node_id = text(row, 1)?;
    let action = text(row, 2)?;
    let old_parent_id = optional_text(row, 3)?;
    let new_parent_id = optional_text(row, 4)?;
    let old_level = optional_text(row, 7)?;
    let new_level = optional_text(row, 8)?;
    let changed_at = text(row, 9)?;

    Ok(HistoryEntry {
        id: id
            .parse()
            .map_err(|e| DatabaseError::corrupt_row(format!("bad history id '{}': {}", id, e)))?,
        node_id: parse_node_id(&node_id)?,
        action: action.parse().map_err(DatabaseError::corrupt_row)?,
        old_parent_id: old_parent_id.as_deref().map(parse_node_id).transpose()?,
        new_parent_id: new_parent_id.as_deref().map(parse_node_id).transpose()?,
        old_name: optional_text(row, 5)?,
        new_name: optional_text(row, 6)?,
        old_level: old_level.as_deref().map(parse_level).transpose()?,
        new_level: new_level.as_deref().map(parse_level).transpose()?,
        timestamp: parse_timestamp(&changed_at)?,
        changed_by: text(row, 10)?,
        reason: optional_text(row, 11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn node(name: &str, level: Level, parent_id: Option<NodeId>) -> Node {
        let now = Utc::now();
        Node {
            id: NodeId::new(),
            parent_id,
            name: name.to_string(),
            level,
            description: format!("{} description", name),
            created_at: now,
            modified_at: now,
        }
    }

    async fn create_test_backend() -> anyhow::Result<(TursoBackend, TempDir)> {
        let temp_dir = TempDir::new()?;
        let backend = TursoBackend::new(temp_dir.path().join("tree.db")).await?;
        Ok((backend, temp_dir))
    }

    #[tokio::test]
    async fn test_node_rows_round_trip() -> anyhow::Result<()> {
        let (backend, _temp_dir) = create_test_backend().await?;
        let math = node("Math", Level::Subject, None);
        let algebra = node("Algebra", Level::Chapter, Some(math.id));
        backend
            .apply(vec![
                NodeWrite::Insert(math.clone()),
                NodeWrite::Insert(algebra.clone()),
            ])
            .await?;

        let loaded = backend.get_node(algebra.id).await?.expect("algebra stored");
        assert_eq!(loaded.parent_id, Some(math.id));
        assert_eq!(loaded.level, Level::Chapter);
        assert_eq!(loaded.description, "Algebra description");

        let roots = backend.list_children(None).await?;
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].id, math.id);
        assert_eq!(backend.list_children(Some(math.id)).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_batch_rolls_back() -> anyhow::Result<()> {
        let (backend, _temp_dir) = create_test_backend().await?;
        let math = node("Math", Level::Subject, None);
        backend.apply(vec![NodeWrite::Insert(math.clone())]).await?;

        let physics = node("Physics", Level::Subject, None);
        let result = backend
            .apply(vec![
                NodeWrite::Insert(physics.clone()),
                NodeWrite::Update(node("Ghost", Level::Subject, None)),
            ])
            .await;

        assert!(result.is_err());
        assert!(backend.get_node(physics.id).await?.is_none());
        assert_eq!(backend.list_nodes().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_history_persists_newest_first() -> anyhow::Result<()> {
        let (backend, _temp_dir) = create_test_backend().await?;
        let math = node("Math", Level::Subject, None);
        let renamed = Node {
            name: "Mathematics".into(),
            ..math.clone()
        };

        backend.append_history(&HistoryEntry::created(&math)).await?;
        backend
            .append_history(&HistoryEntry::updated(&math, &renamed).with_actor("tester"))
            .await?;

        let entries = backend
            .load_history(&HistoryQuery::new().for_node(math.id))
            .await?;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].new_name.as_deref(), Some("Mathematics"));
        assert_eq!(entries[0].changed_by, "tester");
        assert_eq!(entries[1].new_level, Some(Level::Subject));

        let limited = backend.load_history(&HistoryQuery::new().limit(1)).await?;
        assert_eq!(limited.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_reopen_keeps_rows() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("nested").join("tree.db");
        let math = node("Math", Level::Subject, None);
        {
            let backend = TursoBackend::new(path.clone()).await?;
            backend.apply(vec![NodeWrite::Insert(math.clone())]).await?;
        }
        let reopened = TursoBackend::new(path).await?;
        assert_eq!(reopened.get_node(math.id).await?.map(|n| n.name), Some("Math".into()));
        Ok(())
    }
}
