//! Tree Service - orchestration of structural operations
//!
//! `TreeService` is the entry point callers use. Each mutation runs the same
//! sequence:
//!
//! 1. Take the cache writer (serializes writers and blocks cache readers)
//! 2. Validate and apply the change through [`NodeStore`]
//! 3. Bring the path cache up to date for the affected subtrees
//! 4. Release the writer, then append history
//!
//! A failed cache rebuild is logged and marks the cache stale; the next read
//! rebuilds it from the node table. A failed history append is logged and
//! dropped. Neither undoes the structural change.
//!
//! # Bulk operations
//!
//! `bulk_move` and `bulk_delete` attempt each id on its own. One failure
//! never stops or rolls back the others; inspect [`BulkOutcome`].

use crate::config::TreeConfig;
use crate::db::{HistoryStore, ItemStore, MemoryBackend, MemoryItemStore, NodeBackend};
use crate::models::{
    BuiltinTemplate, CacheStats, DuplicateGroup, HistoryEntry, HistoryQuery, Level, NewNode,
    Node, NodeId, NodeStatistics, NodeUpdate, SearchField, SubtreeDefinition, TreeStatistics,
    Violation,
};
use crate::services::error::{ErrorKind, Result, TreeError};
use crate::services::history_log::HistoryLog;
use crate::services::node_store::{DeleteOutcome, NodeStore};
use crate::services::path_stats_cache::{CacheWriter, PathStatsCache};
use crate::services::validation::ValidationEngine;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Subjects seeded by [`TreeService::create_default_structure`]
const DEFAULT_SUBJECTS: &[(&str, &str)] = &[
    ("Mathematics", "Mathematics subject"),
    ("Physics", "Physics subject"),
    ("Chemistry", "Chemistry subject"),
    ("Biology", "Biology subject"),
    ("Literature", "Literature subject"),
    ("History", "History subject"),
    ("Geography", "Geography subject"),
    ("English", "English subject"),
];

const DEFAULT_GRADES: std::ops::RangeInclusive<u32> = 10..=12;

/// Per-id result of a bulk operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkItemResult {
    pub id: NodeId,
    /// `None` on success
    pub error: Option<String>,
}

impl BulkItemResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkOutcome {
    pub results: Vec<BulkItemResult>,
}

impl BulkOutcome {
    fn record<T>(&mut self, id: NodeId, result: Result<T>) {
        self.results.push(BulkItemResult {
            id,
            error: result.err().map(|e| e.to_string()),
        });
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> Vec<&BulkItemResult> {
        self.results.iter().filter(|r| !r.is_success()).collect()
    }
}

/// High-level tree operations with cache and history bookkeeping
pub struct TreeService {
    store: NodeStore,
    cache: PathStatsCache,
    history: HistoryLog,
    validator: ValidationEngine,
    config: Arc<TreeConfig>,
}

impl TreeService {
    /// Create a service with the default configuration
    pub fn new(
        nodes: Arc<dyn NodeBackend>,
        history: Arc<dyn HistoryStore>,
        items: Arc<dyn ItemStore>,
    ) -> Self {
        Self::build(nodes, history, items, Arc::new(TreeConfig::default()))
    }

    /// Create a service after validating `config`
    pub fn with_config(
        nodes: Arc<dyn NodeBackend>,
        history: Arc<dyn HistoryStore>,
        items: Arc<dyn ItemStore>,
        config: TreeConfig,
    ) -> Result<Self> {
        config.validate().map_err(TreeError::configuration)?;
        Ok(Self::build(nodes, history, items, Arc::new(config)))
    }

    /// Service over fresh in-memory storage
    pub fn in_memory() -> Self {
        let backend = Arc::new(MemoryBackend::new());
        Self::new(backend.clone(), backend, Arc::new(MemoryItemStore::new()))
    }

    fn build(
        nodes: Arc<dyn NodeBackend>,
        history: Arc<dyn HistoryStore>,
        items: Arc<dyn ItemStore>,
        config: Arc<TreeConfig>,
    ) -> Self {
        Self {
            store: NodeStore::new(nodes.clone(), items.clone(), config.clone()),
            cache: PathStatsCache::new(nodes.clone(), items.clone(), config.max_walk_depth),
            history: HistoryLog::new(
                history,
                config.changed_by.clone(),
                config.history_default_limit,
            ),
            validator: ValidationEngine::new(nodes, items, config.max_walk_depth),
            config,
        }
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    pub fn cache(&self) -> &PathStatsCache {
        &self.cache
    }

    /// Record a failed cache update without failing the mutation
    fn settle_cache(writer: &mut CacheWriter<'_>, operation: &str, result: Result<()>) {
        if let Err(e) = result {
            tracing::warn!(
                operation,
                error = %e,
                "Path cache update failed; marking stale for full rebuild"
            );
            writer.mark_stale();
        }
    }

    //
    // SINGLE-NODE MUTATIONS
    //

    pub async fn create_node(&self, data: NewNode) -> Result<Node> {
        let mut cache = self.cache.begin_update().await;
        let node = self.store.create(data).await?;
        let result = cache.rebuild_subtree(node.id).await;
        Self::settle_cache(&mut cache, "create", result);
        drop(cache);

        self.history.append(HistoryEntry::created(&node)).await;
        Ok(node)
    }

    /// Apply a patch; a changed `parent_id` is handled like a move
    pub async fn update_node(&self, id: NodeId, patch: NodeUpdate) -> Result<Node> {
        let mut cache = self.cache.begin_update().await;
        let change = self.store.update(id, patch).await?;
        if change.before == change.after {
            return Ok(change.after);
        }
        if change.parent_changed() {
            let mut result = cache.rebuild_subtree(id).await;
            if result.is_ok() {
                result = cache.refresh_ancestors(change.before.parent_id).await;
            }
            Self::settle_cache(&mut cache, "update", result);
        }
        drop(cache);

        self.history
            .append(HistoryEntry::updated(&change.before, &change.after))
            .await;
        Ok(change.after)
    }

    pub async fn move_node(&self, id: NodeId, new_parent_id: Option<NodeId>) -> Result<Node> {
        let mut cache = self.cache.begin_update().await;
        let change = self.store.move_node(id, new_parent_id).await?;
        if !change.parent_changed() {
            return Ok(change.after);
        }

        let mut result = cache.rebuild_subtree(id).await;
        if result.is_ok() {
            result = cache.refresh_ancestors(change.before.parent_id).await;
        }
        Self::settle_cache(&mut cache, "move", result);
        drop(cache);

        self.history
            .append(HistoryEntry::moved(&change.before, &change.after))
            .await;
        Ok(change.after)
    }

    /// Exchange the parents of two nodes; both move or neither does
    pub async fn swap_nodes(&self, a: NodeId, b: NodeId) -> Result<(Node, Node)> {
        let mut cache = self.cache.begin_update().await;
        let (change_a, change_b) = self.store.swap(a, b).await?;
        if !change_a.parent_changed() {
            return Ok((change_a.after, change_b.after));
        }

        let mut result = cache.rebuild_subtree(a).await;
        if result.is_ok() {
            result = cache.rebuild_subtree(b).await;
        }
        Self::settle_cache(&mut cache, "swap", result);
        drop(cache);

        self.history
            .append_all([
                HistoryEntry::moved(&change_a.before, &change_a.after),
                HistoryEntry::moved(&change_b.before, &change_b.after),
            ])
            .await;
        Ok((change_a.after, change_b.after))
    }

    /// Delete a node; `force` also removes descendants and re-homes their items
    pub async fn delete_node(&self, id: NodeId, force: bool) -> Result<DeleteOutcome> {
        let mut cache = self.cache.begin_update().await;
        let outcome = match self.store.delete(id, force).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // Rows may be gone even though item re-homing failed
                if e.kind() == ErrorKind::Storage {
                    cache.mark_stale();
                }
                return Err(e);
            }
        };
        let removed = outcome.removed_ids();
        cache.remove_subtree(&removed);
        let parent_id = outcome.removed.last().and_then(|root| root.parent_id);
        let result = cache.refresh_ancestors(parent_id).await;
        Self::settle_cache(&mut cache, "delete", result);
        drop(cache);

        let entries: Vec<HistoryEntry> = outcome
            .removed
            .iter()
            .map(|node| {
                let entry = HistoryEntry::deleted(node);
                if node.id == id {
                    entry
                } else {
                    entry.with_reason(format!("cascade delete of {}", id))
                }
            })
            .collect();
        self.history.append_all(entries).await;
        Ok(outcome)
    }

    //
    // SUBTREE MATERIALIZATION
    //

    /// Insert definitions beneath `parent_id` and index them; returns every created node
    async fn materialize(
        &self,
        cache: &mut CacheWriter<'_>,
        definitions: &[SubtreeDefinition],
        parent_id: Option<NodeId>,
        operation: &str,
    ) -> Result<Vec<Node>> {
        let created = self.store.create_subtrees(definitions, parent_id).await?;

        let mut result = Ok(());
        for root in created.iter().filter(|node| node.parent_id == parent_id) {
            result = cache.rebuild_subtree(root.id).await;
            if result.is_err() {
                break;
            }
        }
        Self::settle_cache(cache, operation, result);
        Ok(created)
    }

    async fn log_created(&self, nodes: &[Node], reason: &str) {
        self.history
            .append_all(
                nodes
                    .iter()
                    .map(|node| HistoryEntry::created(node).with_reason(reason)),
            )
            .await;
    }

    /// Deep-clone `source_id` and its descendants beneath `target_parent_id`
    ///
    /// The copy gets fresh ids throughout. Its root is named `new_name`, or the
    /// source name plus the configured copy suffix.
    pub async fn copy_subtree(
        &self,
        source_id: NodeId,
        target_parent_id: Option<NodeId>,
        new_name: Option<String>,
    ) -> Result<Node> {
        let mut cache = self.cache.begin_update().await;

        if let Some(target) = target_parent_id {
            let lineage = self.store.get_ancestors(target, true).await?;
            if lineage.iter().any(|node| node.id == source_id) {
                return Err(TreeError::cycle(format!(
                    "Cannot copy node {} into its own subtree",
                    source_id
                )));
            }
        }

        let mut definition = self.store.subtree_definition(source_id, false).await?;
        definition.name = match new_name {
            Some(name) => name,
            None => format!("{}{}", definition.name, self.config.copy_suffix),
        };

        let created = self
            .materialize(&mut cache, &[definition], target_parent_id, "copy")
            .await?;
        drop(cache);

        let root = created
            .first()
            .cloned()
            .ok_or_else(|| TreeError::node_not_found(source_id))?;
        tracing::info!(
            source_id = %source_id,
            copy_id = %root.id,
            nodes = created.len(),
            "Copied subtree"
        );
        self.log_created(&created, &format!("copy of {}", source_id))
            .await;
        Ok(root)
    }

    /// Materialize nested definitions beneath `parent_id`; returns the new top-level nodes
    ///
    /// The whole template is validated before anything is written.
    pub async fn apply_template(
        &self,
        template: &[SubtreeDefinition],
        parent_id: Option<NodeId>,
    ) -> Result<Vec<Node>> {
        if template.is_empty() {
            return Ok(Vec::new());
        }

        let mut cache = self.cache.begin_update().await;
        let created = self
            .materialize(&mut cache, template, parent_id, "template")
            .await?;
        drop(cache);

        tracing::info!(nodes = created.len(), parent_id = ?parent_id, "Applied template");
        self.log_created(&created, "template").await;
        Ok(created
            .into_iter()
            .filter(|node| node.parent_id == parent_id)
            .collect())
    }

    /// Apply one of the [`BuiltinTemplate`]s by name
    pub async fn apply_builtin_template(
        &self,
        name: &str,
        parent_id: Option<NodeId>,
    ) -> Result<Vec<Node>> {
        let template: BuiltinTemplate = name.parse().map_err(TreeError::validation)?;
        self.apply_template(&template.definitions(), parent_id)
            .await
    }

    /// Seed subjects with grade levels; does nothing unless the tree is empty
    ///
    /// Returns whether anything was created.
    pub async fn create_default_structure(&self) -> Result<bool> {
        if !self.store.backend().list_nodes().await?.is_empty() {
            return Ok(false);
        }

        let definitions: Vec<SubtreeDefinition> = DEFAULT_SUBJECTS
            .iter()
            .map(|(name, description)| {
                SubtreeDefinition::new(*name, Level::Subject)
                    .with_description(*description)
                    .with_children(
                        DEFAULT_GRADES
                            .map(|grade| {
                                SubtreeDefinition::new(format!("Grade {}", grade), Level::Grade)
                                    .with_description(format!("{} grade {}", name, grade))
                            })
                            .collect(),
                    )
            })
            .collect();

        self.apply_template(&definitions, None).await?;
        Ok(true)
    }

    //
    // IMPORT / EXPORT
    //

    /// Nested definition of a subtree, annotated with item counts
    pub async fn export_subtree(&self, id: NodeId) -> Result<SubtreeDefinition> {
        self.store.subtree_definition(id, true).await
    }

    /// Every root subtree, sorted by name
    pub async fn export_tree(&self) -> Result<Vec<SubtreeDefinition>> {
        let mut exported = Vec::new();
        for root in self.store.get_children(None).await? {
            exported.push(self.store.subtree_definition(root.id, true).await?);
        }
        Ok(exported)
    }

    pub async fn export_subtree_json(&self, id: NodeId) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.export_subtree(id).await?)?)
    }

    /// Recreate an exported subtree beneath `parent_id`; item counts are ignored
    pub async fn import_subtree(
        &self,
        definition: &SubtreeDefinition,
        parent_id: Option<NodeId>,
    ) -> Result<Node> {
        let mut cache = self.cache.begin_update().await;
        let created = self
            .materialize(
                &mut cache,
                std::slice::from_ref(definition),
                parent_id,
                "import",
            )
            .await?;
        drop(cache);

        let root = created
            .first()
            .cloned()
            .ok_or_else(|| TreeError::validation("Imported definition produced no nodes"))?;
        tracing::info!(root_id = %root.id, nodes = created.len(), "Imported subtree");
        self.log_created(&created, "import").await;
        Ok(root)
    }

    pub async fn import_subtree_json(&self, json: &str, parent_id: Option<NodeId>) -> Result<Node> {
        let definition: SubtreeDefinition = serde_json::from_str(json)?;
        self.import_subtree(&definition, parent_id).await
    }

    //
    // BULK OPERATIONS
    //

    /// Move each id independently; failures are reported per id
    pub async fn bulk_move(&self, ids: &[NodeId], new_parent_id: Option<NodeId>) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for id in ids {
            let result = self.move_node(*id, new_parent_id).await;
            outcome.record(*id, result);
        }
        tracing::info!(
            attempted = ids.len(),
            succeeded = outcome.succeeded(),
            "Bulk move finished"
        );
        outcome
    }

    /// Delete each id independently; failures are reported per id
    pub async fn bulk_delete(&self, ids: &[NodeId], force: bool) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for id in ids {
            let result = self.delete_node(*id, force).await;
            outcome.record(*id, result);
        }
        tracing::info!(
            attempted = ids.len(),
            succeeded = outcome.succeeded(),
            "Bulk delete finished"
        );
        outcome
    }

    //
    // QUERIES
    //

    pub async fn get_node(&self, id: NodeId) -> Result<Option<Node>> {
        self.store.get(id).await
    }

    pub async fn get_children(&self, parent_id: Option<NodeId>) -> Result<Vec<Node>> {
        self.store.get_children(parent_id).await
    }

    pub async fn get_tree_roots(&self) -> Result<Vec<Node>> {
        self.store.get_children(None).await
    }

    pub async fn get_descendants(&self, id: NodeId, max_depth: Option<usize>) -> Result<Vec<Node>> {
        self.store.get_descendants(id, max_depth).await
    }

    pub async fn get_ancestors(&self, id: NodeId, include_self: bool) -> Result<Vec<Node>> {
        self.store.get_ancestors(id, include_self).await
    }

    pub async fn get_siblings(&self, id: NodeId, include_self: bool) -> Result<Vec<Node>> {
        self.store.get_siblings(id, include_self).await
    }

    pub async fn get_by_level(&self, level: Level) -> Result<Vec<Node>> {
        self.store.get_by_level(level).await
    }

    /// Case-insensitive substring search; empty `fields` uses the configured defaults
    pub async fn search(&self, query: &str, fields: &[SearchField]) -> Result<Vec<Node>> {
        self.store.search(query, fields).await
    }

    pub async fn depth(&self, id: NodeId) -> Result<usize> {
        self.cache.depth(id).await
    }

    pub async fn path(&self, id: NodeId) -> Result<Vec<NodeId>> {
        self.cache.path(id).await
    }

    pub async fn question_count(&self, id: NodeId) -> Result<u64> {
        self.cache.question_count(id).await
    }

    pub async fn child_count(&self, id: NodeId) -> Result<usize> {
        self.cache.child_count(id).await
    }

    /// Names from the root down to the node, joined with `" > "`
    pub async fn get_path_string(&self, id: NodeId) -> Result<String> {
        let lineage = self.store.get_ancestors(id, true).await?;
        Ok(lineage
            .iter()
            .map(|node| node.name.as_str())
            .collect::<Vec<_>>()
            .join(" > "))
    }

    pub async fn node_statistics(&self, id: NodeId) -> Result<NodeStatistics> {
        let stats = self.cache.node_stats(id).await?;
        Ok(NodeStatistics {
            node_id: id,
            direct_question_count: stats.direct_question_count,
            total_question_count: stats.question_count,
            child_count: stats.child_count,
            descendant_count: stats.descendant_count,
            depth: stats.depth,
            path: self.get_path_string(id).await?,
        })
    }

    pub async fn tree_statistics(&self) -> Result<TreeStatistics> {
        self.validator.tree_statistics().await
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    pub async fn history(&self, query: HistoryQuery) -> Result<Vec<HistoryEntry>> {
        self.history.query(query).await
    }

    //
    // MAINTENANCE
    //

    pub async fn validate_structure(&self) -> Result<Vec<Violation>> {
        self.validator.validate_structure().await
    }

    pub async fn find_empty_nodes(&self) -> Result<Vec<Node>> {
        self.validator.find_empty_nodes().await
    }

    pub async fn find_duplicate_nodes(&self) -> Result<Vec<DuplicateGroup>> {
        self.validator.find_duplicate_nodes().await
    }

    /// Delete empty leaves deepest-first, or with `dry_run` only list them
    pub async fn cleanup_empty_nodes(&self, dry_run: bool) -> Result<Vec<NodeId>> {
        let mut cache = self.cache.begin_update().await;
        let plan = self.validator.cleanup_plan().await?;
        let ids: Vec<NodeId> = plan.iter().map(|node| node.id).collect();
        if dry_run || ids.is_empty() {
            return Ok(ids);
        }

        self.validator.remove(&ids).await?;
        cache.remove_subtree(&ids);
        let parents: BTreeSet<NodeId> = plan.iter().filter_map(|node| node.parent_id).collect();
        let mut result = Ok(());
        for parent in parents {
            result = cache.refresh_ancestors(Some(parent)).await;
            if result.is_err() {
                break;
            }
        }
        Self::settle_cache(&mut cache, "cleanup", result);
        drop(cache);

        self.history
            .append_all(
                plan.iter()
                    .map(|node| HistoryEntry::deleted(node).with_reason("empty node cleanup")),
            )
            .await;
        Ok(ids)
    }

    /// Refresh cached item counts after the external item store changed under `node_id`
    pub async fn notify_items_changed(&self, node_id: NodeId) -> Result<()> {
        self.store.require(node_id).await?;
        let mut cache = self.cache.begin_update().await;
        let result = cache.refresh_ancestors(Some(node_id)).await;
        Self::settle_cache(&mut cache, "item refresh", result);
        Ok(())
    }

    /// Rebuild the path cache from the node table
    pub async fn repair_cache(&self) -> Result<()> {
        self.cache.rebuild_all().await?;
        tracing::info!("Path cache rebuilt");
        Ok(())
    }
}
