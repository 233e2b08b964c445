//! NodeStore - validated CRUD and adjacency queries over the node table
//!
//! Every write goes through the same checks:
//!
//! 1. Name is trimmed, non-empty and within the configured length
//! 2. The parent (if any) exists
//! 3. Re-parenting never places a node beneath itself (checked transitively)
//! 4. `HierarchyPolicy` permits the level beneath the parent's level
//! 5. No sibling already uses the name (case-insensitive)
//!
//! Multi-row edits (swap, cascade delete, subtree creation) are sent to the
//! backend as a single atomic batch.

use crate::behaviors::HierarchyPolicy;
use crate::config::TreeConfig;
use crate::db::{ItemStore, NodeBackend, NodeWrite};
use crate::models::{
    Level, NewNode, Node, NodeChange, NodeId, NodeUpdate, SearchField, SubtreeDefinition,
};
use crate::services::error::{Result, TreeError};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// What a delete removed and where the affected items went
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// Removed nodes, deepest first
    pub removed: Vec<Node>,

    /// Surviving ancestor that received the subtree's items, if any
    pub items_reassigned_to: Option<NodeId>,

    pub items_reparented: u64,

    pub items_orphaned: u64,
}

impl DeleteOutcome {
    pub fn removed_ids(&self) -> Vec<NodeId> {
        self.removed.iter().map(|node| node.id).collect()
    }
}

/// A node and everything beneath it, read breadth-first
pub(crate) struct Subtree {
    pub root: Node,
    /// Root first, then by increasing depth, siblings by name
    pub order: Vec<(Node, usize)>,
    pub children: HashMap<NodeId, Vec<Node>>,
}

impl Subtree {
    pub fn ids(&self) -> Vec<NodeId> {
        self.order.iter().map(|(node, _)| node.id).collect()
    }

    fn to_definition(&self, node: &Node, counts: Option<&HashMap<NodeId, u64>>) -> SubtreeDefinition {
        let children: Vec<SubtreeDefinition> = self
            .children
            .get(&node.id)
            .map(|kids| {
                kids.iter()
                    .map(|child| self.to_definition(child, counts))
                    .collect()
            })
            .unwrap_or_default();

        let question_count = counts.map(|counts| {
            counts.get(&node.id).copied().unwrap_or(0)
                + children
                    .iter()
                    .map(|child| child.question_count.unwrap_or(0))
                    .sum::<u64>()
        });

        SubtreeDefinition {
            name: node.name.clone(),
            level: node.level,
            description: node.description.clone(),
            children,
            question_count,
        }
    }
}

/// Sort siblings by case-insensitive name, ties broken by exact name
pub(crate) fn sort_by_name(nodes: &mut [Node]) {
    nodes.sort_by(|a, b| {
        a.name_key()
            .cmp(&b.name_key())
            .then_with(|| a.name.cmp(&b.name))
    });
}

/// Authoritative, validated access to the node table
#[derive(Clone)]
pub struct NodeStore {
    backend: Arc<dyn NodeBackend>,
    items: Arc<dyn ItemStore>,
    config: Arc<TreeConfig>,
}

impl NodeStore {
    pub fn new(
        backend: Arc<dyn NodeBackend>,
        items: Arc<dyn ItemStore>,
        config: Arc<TreeConfig>,
    ) -> Self {
        Self {
            backend,
            items,
            config,
        }
    }

    pub fn backend(&self) -> &Arc<dyn NodeBackend> {
        &self.backend
    }

    //
    // VALIDATION HELPERS
    //

    fn normalize_name(&self, raw: &str) -> Result<String> {
        let name = raw.trim();
        if name.is_empty() {
            return Err(TreeError::validation("Node name cannot be empty"));
        }
        if name.chars().count() > self.config.max_name_length {
            return Err(TreeError::validation(format!(
                "Node name exceeds {} characters",
                self.config.max_name_length
            )));
        }
        Ok(name.to_string())
    }

    async fn load_parent(&self, parent_id: Option<NodeId>) -> Result<Option<Node>> {
        match parent_id {
            Some(parent_id) => Ok(Some(self.require(parent_id).await?)),
            None => Ok(None),
        }
    }

    fn ensure_transition(parent: Option<&Node>, level: Level) -> Result<()> {
        let parent_level = parent.map(|p| p.level);
        if HierarchyPolicy::validate_transition(parent_level, level) {
            Ok(())
        } else {
            Err(TreeError::validation(HierarchyPolicy::describe_rejection(
                parent_level,
                level,
            )))
        }
    }

    /// Reject `name` if a sibling under `parent_id` (other than `exclude`) already uses it
    async fn ensure_unique_name(
        &self,
        parent_id: Option<NodeId>,
        name: &str,
        exclude: &[NodeId],
    ) -> Result<()> {
        let key = name.to_lowercase();
        let siblings = self.backend.list_children(parent_id).await?;
        if siblings
            .iter()
            .any(|sibling| !exclude.contains(&sibling.id) && sibling.name_key() == key)
        {
            return Err(TreeError::validation(format!(
                "A node named '{}' already exists under this parent",
                name
            )));
        }
        Ok(())
    }

    /// Fail with `Cycle` if `candidate_parent` is `id` or lies beneath it
    async fn ensure_not_within(&self, id: NodeId, candidate_parent: NodeId) -> Result<()> {
        let mut current = Some(candidate_parent);
        let mut steps = 0;
        while let Some(cursor) = current {
            if cursor == id {
                return Err(TreeError::cycle(format!(
                    "Node {} cannot be placed beneath itself or one of its descendants",
                    id
                )));
            }
            steps += 1;
            if steps > self.config.max_walk_depth {
                return Err(TreeError::cycle(format!(
                    "Parent chain above {} exceeds {} steps",
                    candidate_parent, self.config.max_walk_depth
                )));
            }
            current = self
                .backend
                .get_node(cursor)
                .await?
                .and_then(|node| node.parent_id);
        }
        Ok(())
    }

    /// Validate a new node without persisting it
    pub(crate) async fn prepare(&self, data: NewNode, now: DateTime<Utc>) -> Result<Node> {
        let name = self.normalize_name(&data.name)?;
        let parent = self.load_parent(data.parent_id).await?;
        Self::ensure_transition(parent.as_ref(), data.level)?;
        self.ensure_unique_name(data.parent_id, &name, &[]).await?;

        Ok(Node {
            id: NodeId::new(),
            parent_id: data.parent_id,
            name,
            level: data.level,
            description: data.description.trim().to_string(),
            created_at: now,
            modified_at: now,
        })
    }

    //
    // WRITES
    //

    pub async fn create(&self, data: NewNode) -> Result<Node> {
        let node = self.prepare(data, Utc::now()).await?;
        self.backend
            .apply(vec![NodeWrite::Insert(node.clone())])
            .await?;
        tracing::debug!(node_id = %node.id, level = %node.level, "Created node");
        Ok(node)
    }

    /// Apply a partial update, re-validating whatever changed
    pub async fn update(&self, id: NodeId, patch: NodeUpdate) -> Result<NodeChange> {
        let before = self.require(id).await?;
        if patch.is_empty() {
            return Ok(NodeChange {
                after: before.clone(),
                before,
            });
        }

        let name = match &patch.name {
            Some(raw) => self.normalize_name(raw)?,
            None => before.name.clone(),
        };
        let level = patch.level.unwrap_or(before.level);
        let parent_id = patch.parent_id.unwrap_or(before.parent_id);
        let description = match &patch.description {
            Some(raw) => raw.trim().to_string(),
            None => before.description.clone(),
        };

        let parent_changed = parent_id != before.parent_id;
        if parent_changed {
            if let Some(new_parent) = parent_id {
                self.ensure_not_within(id, new_parent).await?;
            }
        }

        let parent = self.load_parent(parent_id).await?;
        Self::ensure_transition(parent.as_ref(), level)?;

        if level != before.level {
            let children = self.backend.list_children(Some(id)).await?;
            if let Some(child) = children
                .iter()
                .find(|child| !HierarchyPolicy::validate_transition(Some(level), child.level))
            {
                return Err(TreeError::validation(format!(
                    "Cannot change level to {}: existing child '{}' is a {}",
                    level, child.name, child.level
                )));
            }
        }

        if parent_changed || name.to_lowercase() != before.name_key() {
            self.ensure_unique_name(parent_id, &name, &[id]).await?;
        }

        let after = Node {
            parent_id,
            name,
            level,
            description,
            modified_at: Utc::now(),
            ..before.clone()
        };
        self.backend
            .apply(vec![NodeWrite::Update(after.clone())])
            .await?;
        tracing::debug!(node_id = %id, "Updated node");
        Ok(NodeChange { before, after })
    }

    /// Re-parent a node (`None` makes it a root)
    pub async fn move_node(&self, id: NodeId, new_parent_id: Option<NodeId>) -> Result<NodeChange> {
        let before = self.require(id).await?;
        if new_parent_id == before.parent_id {
            return Ok(NodeChange {
                after: before.clone(),
                before,
            });
        }

        if let Some(new_parent) = new_parent_id {
            self.ensure_not_within(id, new_parent).await?;
        }
        let parent = self.load_parent(new_parent_id).await?;
        Self::ensure_transition(parent.as_ref(), before.level)?;
        self.ensure_unique_name(new_parent_id, &before.name, &[id])
            .await?;

        let after = Node {
            parent_id: new_parent_id,
            modified_at: Utc::now(),
            ..before.clone()
        };
        self.backend
            .apply(vec![NodeWrite::Update(after.clone())])
            .await?;
        tracing::debug!(
            node_id = %id,
            old_parent = ?before.parent_id,
            new_parent = ?new_parent_id,
            "Moved node"
        );
        Ok(NodeChange { before, after })
    }

    /// Exchange the parents of two nodes; both legs land or neither does
    pub async fn swap(&self, a: NodeId, b: NodeId) -> Result<(NodeChange, NodeChange)> {
        if a == b {
            return Err(TreeError::validation("Cannot swap a node with itself"));
        }
        let node_a = self.require(a).await?;
        let node_b = self.require(b).await?;

        if node_a.parent_id == node_b.parent_id {
            return Ok((
                NodeChange {
                    after: node_a.clone(),
                    before: node_a,
                },
                NodeChange {
                    after: node_b.clone(),
                    before: node_b,
                },
            ));
        }

        // Check acyclicity against the post-swap parent map
        let mut parents: HashMap<NodeId, Option<NodeId>> = self
            .backend
            .list_nodes()
            .await?
            .into_iter()
            .map(|node| (node.id, node.parent_id))
            .collect();
        parents.insert(a, node_b.parent_id);
        parents.insert(b, node_a.parent_id);
        for id in [a, b] {
            let mut current = parents.get(&id).copied().flatten();
            let mut steps = 0;
            while let Some(cursor) = current {
                steps += 1;
                if cursor == id || steps > self.config.max_walk_depth {
                    return Err(TreeError::cycle(format!(
                        "Swapping {} and {} would place a node beneath itself",
                        a, b
                    )));
                }
                current = parents.get(&cursor).copied().flatten();
            }
        }

        let parent_for_a = self.load_parent(node_b.parent_id).await?;
        let parent_for_b = self.load_parent(node_a.parent_id).await?;
        Self::ensure_transition(parent_for_a.as_ref(), node_a.level)?;
        Self::ensure_transition(parent_for_b.as_ref(), node_b.level)?;
        self.ensure_unique_name(node_b.parent_id, &node_a.name, &[a, b])
            .await?;
        self.ensure_unique_name(node_a.parent_id, &node_b.name, &[a, b])
            .await?;

        let now = Utc::now();
        let after_a = Node {
            parent_id: node_b.parent_id,
            modified_at: now,
            ..node_a.clone()
        };
        let after_b = Node {
            parent_id: node_a.parent_id,
            modified_at: now,
            ..node_b.clone()
        };
        self.backend
            .apply(vec![
                NodeWrite::Update(after_a.clone()),
                NodeWrite::Update(after_b.clone()),
            ])
            .await?;
        tracing::debug!(a = %a, b = %b, "Swapped node parents");

        Ok((
            NodeChange {
                before: node_a,
                after: after_a,
            },
            NodeChange {
                before: node_b,
                after: after_b,
            },
        ))
    }

    /// Delete a node, or with `cascade` its whole subtree
    ///
    /// Without `cascade` the delete is refused while the node has children or
    /// filed items. With `cascade`, items filed anywhere in the subtree are
    /// handed to the deleted root's parent, or orphaned when the root has no
    /// surviving parent.
    pub async fn delete(&self, id: NodeId, cascade: bool) -> Result<DeleteOutcome> {
        let subtree = self.collect_subtree(id, None).await?;
        let root = subtree.root.clone();

        let mut counts = Vec::with_capacity(subtree.order.len());
        for (node, _) in &subtree.order {
            counts.push((node.id, self.items.count_items_under(node.id).await?));
        }
        let total_items: u64 = counts.iter().map(|(_, count)| count).sum();

        if !cascade {
            let child_count = subtree.order.len() - 1;
            if child_count > 0 {
                return Err(TreeError::conflict(format!(
                    "Node '{}' has {} descendant node(s); delete them first or cascade",
                    root.name, child_count
                )));
            }
            if total_items > 0 {
                return Err(TreeError::conflict(format!(
                    "Node '{}' still has {} item(s) filed under it",
                    root.name, total_items
                )));
            }
        }

        let heir = match root.parent_id {
            Some(parent_id) => self
                .backend
                .get_node(parent_id)
                .await?
                .map(|parent| parent.id),
            None => None,
        };

        let mut outcome = DeleteOutcome {
            items_reassigned_to: heir,
            ..Default::default()
        };
        outcome.removed = subtree
            .order
            .into_iter()
            .rev()
            .map(|(node, _)| node)
            .collect();
        self.backend
            .apply(
                outcome
                    .removed
                    .iter()
                    .map(|node| NodeWrite::Delete(node.id))
                    .collect(),
            )
            .await?;

        // Items are re-homed by their former node ids once the rows are gone
        for (node_id, count) in counts {
            if count == 0 {
                continue;
            }
            match heir {
                Some(heir) => {
                    outcome.items_reparented += self.items.reparent_items(node_id, heir).await?
                }
                None => outcome.items_orphaned += self.items.mark_items_orphaned(node_id).await?,
            }
        }

        tracing::debug!(
            node_id = %id,
            removed = outcome.removed.len(),
            reparented = outcome.items_reparented,
            orphaned = outcome.items_orphaned,
            "Deleted node"
        );
        Ok(outcome)
    }

    /// Validate and insert nested definitions beneath `parent_id` in one batch
    ///
    /// Returns every created node, parents before children.
    pub async fn create_subtrees(
        &self,
        definitions: &[SubtreeDefinition],
        parent_id: Option<NodeId>,
    ) -> Result<Vec<Node>> {
        let parent = self.load_parent(parent_id).await?;
        let taken: HashSet<String> = self
            .backend
            .list_children(parent_id)
            .await?
            .iter()
            .map(Node::name_key)
            .collect();

        let mut created = Vec::new();
        self.plan_definitions(
            definitions,
            parent_id,
            parent.map(|p| p.level),
            taken,
            Utc::now(),
            &mut created,
        )?;

        self.backend
            .apply(created.iter().cloned().map(NodeWrite::Insert).collect())
            .await?;
        Ok(created)
    }

    fn plan_definitions(
        &self,
        definitions: &[SubtreeDefinition],
        parent_id: Option<NodeId>,
        parent_level: Option<Level>,
        mut taken: HashSet<String>,
        now: DateTime<Utc>,
        out: &mut Vec<Node>,
    ) -> Result<()> {
        for definition in definitions {
            let name = self.normalize_name(&definition.name)?;
            if !HierarchyPolicy::validate_transition(parent_level, definition.level) {
                return Err(TreeError::validation(HierarchyPolicy::describe_rejection(
                    parent_level,
                    definition.level,
                )));
            }
            if !taken.insert(name.to_lowercase()) {
                return Err(TreeError::validation(format!(
                    "A node named '{}' already exists under this parent",
                    name
                )));
            }

            let node = Node {
                id: NodeId::new(),
                parent_id,
                name,
                level: definition.level,
                description: definition.description.trim().to_string(),
                created_at: now,
                modified_at: now,
            };
            let id = node.id;
            out.push(node);
            self.plan_definitions(
                &definition.children,
                Some(id),
                Some(definition.level),
                HashSet::new(),
                now,
                out,
            )?;
        }
        Ok(())
    }

    //
    // READS
    //

    pub async fn get(&self, id: NodeId) -> Result<Option<Node>> {
        Ok(self.backend.get_node(id).await?)
    }

    /// Like `get`, but a missing node is a `NotFound` error
    pub async fn require(&self, id: NodeId) -> Result<Node> {
        self.backend
            .get_node(id)
            .await?
            .ok_or_else(|| TreeError::node_not_found(id))
    }

    /// Children of `parent_id` sorted by name (`None` lists the roots)
    pub async fn get_children(&self, parent_id: Option<NodeId>) -> Result<Vec<Node>> {
        if let Some(parent_id) = parent_id {
            self.require(parent_id).await?;
        }
        let mut children = self.backend.list_children(parent_id).await?;
        sort_by_name(&mut children);
        Ok(children)
    }

    /// Breadth-first read of a subtree, optionally stopping after `max_depth` levels
    pub(crate) async fn collect_subtree(
        &self,
        id: NodeId,
        max_depth: Option<usize>,
    ) -> Result<Subtree> {
        let root = self.require(id).await?;
        let mut order = vec![(root.clone(), 0)];
        let mut children_map = HashMap::new();
        let mut visited = HashSet::from([id]);
        let mut queue = VecDeque::from([(id, 0usize)]);

        while let Some((current, depth)) = queue.pop_front() {
            if max_depth.is_some_and(|max| depth >= max) {
                continue;
            }
            let mut children = self.backend.list_children(Some(current)).await?;
            children.retain(|child| !visited.contains(&child.id));
            sort_by_name(&mut children);
            for child in &children {
                visited.insert(child.id);
                queue.push_back((child.id, depth + 1));
            }
            order.extend(children.iter().cloned().map(|child| (child, depth + 1)));
            children_map.insert(current, children);
        }

        // Queue order already groups by depth; stable-sort each depth band by name
        order.sort_by(|(a, da), (b, db)| {
            da.cmp(db)
                .then_with(|| a.name_key().cmp(&b.name_key()))
                .then_with(|| a.name.cmp(&b.name))
        });

        Ok(Subtree {
            root,
            order,
            children: children_map,
        })
    }

    /// Descendants ordered by increasing depth, then name
    pub async fn get_descendants(&self, id: NodeId, max_depth: Option<usize>) -> Result<Vec<Node>> {
        let subtree = self.collect_subtree(id, max_depth).await?;
        Ok(subtree
            .order
            .into_iter()
            .skip(1)
            .map(|(node, _)| node)
            .collect())
    }

    /// Ancestors in root-to-node order
    pub async fn get_ancestors(&self, id: NodeId, include_self: bool) -> Result<Vec<Node>> {
        let node = self.require(id).await?;
        let mut chain = Vec::new();
        let mut seen = HashSet::from([id]);
        let mut current = node.parent_id;

        while let Some(cursor) = current {
            if !seen.insert(cursor) || chain.len() >= self.config.max_walk_depth {
                return Err(TreeError::cycle(format!(
                    "Parent chain of {} does not terminate",
                    id
                )));
            }
            // A dangling parent ends the chain
            let Some(parent) = self.backend.get_node(cursor).await? else {
                break;
            };
            current = parent.parent_id;
            chain.push(parent);
        }

        chain.reverse();
        if include_self {
            chain.push(node);
        }
        Ok(chain)
    }

    pub async fn get_siblings(&self, id: NodeId, include_self: bool) -> Result<Vec<Node>> {
        let node = self.require(id).await?;
        let mut siblings = self.backend.list_children(node.parent_id).await?;
        if !include_self {
            siblings.retain(|sibling| sibling.id != id);
        }
        sort_by_name(&mut siblings);
        Ok(siblings)
    }

    pub async fn get_by_level(&self, level: Level) -> Result<Vec<Node>> {
        let mut nodes: Vec<Node> = self
            .backend
            .list_nodes()
            .await?
            .into_iter()
            .filter(|node| node.level == level)
            .collect();
        sort_by_name(&mut nodes);
        Ok(nodes)
    }

    /// Case-insensitive substring search; name matches come before description-only matches
    pub async fn search(&self, query: &str, fields: &[SearchField]) -> Result<Vec<Node>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let fields = if fields.is_empty() {
            self.config.default_search_fields.as_slice()
        } else {
            fields
        };

        let mut by_name = Vec::new();
        let mut by_description = Vec::new();
        for node in self.backend.list_nodes().await? {
            if fields.contains(&SearchField::Name) && node.name_key().contains(&needle) {
                by_name.push(node);
            } else if fields.contains(&SearchField::Description)
                && node.description.to_lowercase().contains(&needle)
            {
                by_description.push(node);
            }
        }

        sort_by_name(&mut by_name);
        sort_by_name(&mut by_description);
        by_name.extend(by_description);
        Ok(by_name)
    }

    /// Nested definition of a subtree, optionally annotated with item counts
    pub async fn subtree_definition(&self, id: NodeId, with_counts: bool) -> Result<SubtreeDefinition> {
        let subtree = self.collect_subtree(id, None).await?;
        if !with_counts {
            return Ok(subtree.to_definition(&subtree.root, None));
        }

        let mut counts = HashMap::with_capacity(subtree.order.len());
        for (node, _) in &subtree.order {
            counts.insert(node.id, self.items.count_items_under(node.id).await?);
        }
        Ok(subtree.to_definition(&subtree.root, Some(&counts)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryBackend, MemoryItemStore};
    use crate::services::error::ErrorKind;

    fn create_test_store() -> (NodeStore, Arc<MemoryBackend>, Arc<MemoryItemStore>) {
        let backend = Arc::new(MemoryBackend::new());
        let items = Arc::new(MemoryItemStore::new());
        let store = NodeStore::new(
            backend.clone(),
            items.clone(),
            Arc::new(TreeConfig::default()),
        );
        (store, backend, items)
    }

    #[tokio::test]
    async fn test_create_trims_and_validates_name() {
        let (store, _, _) = create_test_store();
        let math = store
            .create(NewNode::new("  Math  ", Level::Subject).with_description(" numbers "))
            .await
            .unwrap();
        assert_eq!(math.name, "Math");
        assert_eq!(math.description, "numbers");

        let err = store
            .create(NewNode::new("   ", Level::Subject))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let long = "x".repeat(300);
        assert!(store.create(NewNode::new(long, Level::Subject)).await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_sibling_names_rejected_case_insensitively() {
        let (store, _, _) = create_test_store();
        let math = store.create(NewNode::new("Math", Level::Subject)).await.unwrap();
        store
            .create(NewNode::new("Algebra", Level::Chapter).with_parent(math.id))
            .await
            .unwrap();

        let err = store
            .create(NewNode::new("ALGEBRA", Level::Chapter).with_parent(math.id))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        // Same name under a different parent is fine
        let physics = store
            .create(NewNode::new("Physics", Level::Subject))
            .await
            .unwrap();
        store
            .create(NewNode::new("Algebra", Level::Chapter).with_parent(physics.id))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_parent_is_not_found() {
        let (store, _, _) = create_test_store();
        let err = store
            .create(NewNode::new("Algebra", Level::Chapter).with_parent(NodeId::new()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_rename_to_own_name_with_different_case_is_allowed() {
        let (store, _, _) = create_test_store();
        let math = store.create(NewNode::new("Math", Level::Subject)).await.unwrap();
        let change = store
            .update(math.id, NodeUpdate::new().with_name("MATH"))
            .await
            .unwrap();
        assert_eq!(change.after.name, "MATH");
    }

    #[tokio::test]
    async fn test_level_change_must_fit_existing_children() {
        let (store, _, _) = create_test_store();
        let math = store.create(NewNode::new("Math", Level::Subject)).await.unwrap();
        let grade = store
            .create(NewNode::new("Grade 10", Level::Grade).with_parent(math.id))
            .await
            .unwrap();
        store
            .create(NewNode::new("Equations", Level::Topic).with_parent(grade.id))
            .await
            .unwrap();

        // A section cannot sit directly under a subject
        let err = store
            .update(grade.id, NodeUpdate::new().with_level(Level::Section))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        // Chapter fits under the subject and still admits the topic child
        let change = store
            .update(grade.id, NodeUpdate::new().with_level(Level::Chapter))
            .await
            .unwrap();
        assert_eq!(change.after.level, Level::Chapter);
    }

    #[tokio::test]
    async fn test_level_change_rejected_by_children() {
        let (store, _, _) = create_test_store();
        let math = store.create(NewNode::new("Math", Level::Subject)).await.unwrap();
        let algebra = store
            .create(NewNode::new("Algebra", Level::Chapter).with_parent(math.id))
            .await
            .unwrap();
        store
            .create(NewNode::new("Linear", Level::Section).with_parent(algebra.id))
            .await
            .unwrap();

        // A grade cannot hold a section
        let err = store
            .update(algebra.id, NodeUpdate::new().with_level(Level::Grade))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Linear"));
    }

    #[tokio::test]
    async fn test_descendants_ordered_by_depth_then_name() {
        let (store, _, _) = create_test_store();
        let math = store.create(NewNode::new("Math", Level::Subject)).await.unwrap();
        let geometry = store
            .create(NewNode::new("Geometry", Level::Chapter).with_parent(math.id))
            .await
            .unwrap();
        let algebra = store
            .create(NewNode::new("algebra", Level::Chapter).with_parent(math.id))
            .await
            .unwrap();
        store
            .create(NewNode::new("Angles", Level::Topic).with_parent(geometry.id))
            .await
            .unwrap();

        let names: Vec<String> = store
            .get_descendants(math.id, None)
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.name)
            .collect();
        assert_eq!(names, vec!["algebra", "Geometry", "Angles"]);

        let shallow = store.get_descendants(math.id, Some(1)).await.unwrap();
        assert_eq!(shallow.len(), 2);
        assert_eq!(shallow[0].id, algebra.id);
        assert!(store.get_descendants(math.id, Some(0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ancestors_and_siblings() {
        let (store, _, _) = create_test_store();
        let math = store.create(NewNode::new("Math", Level::Subject)).await.unwrap();
        let algebra = store
            .create(NewNode::new("Algebra", Level::Chapter).with_parent(math.id))
            .await
            .unwrap();
        let geometry = store
            .create(NewNode::new("Geometry", Level::Chapter).with_parent(math.id))
            .await
            .unwrap();
        let equations = store
            .create(NewNode::new("Equations", Level::Topic).with_parent(algebra.id))
            .await
            .unwrap();

        let ancestors = store.get_ancestors(equations.id, false).await.unwrap();
        assert_eq!(
            ancestors.iter().map(|n| n.id).collect::<Vec<_>>(),
            vec![math.id, algebra.id]
        );
        let with_self = store.get_ancestors(equations.id, true).await.unwrap();
        assert_eq!(with_self.last().map(|n| n.id), Some(equations.id));

        let siblings = store.get_siblings(algebra.id, false).await.unwrap();
        assert_eq!(siblings.len(), 1);
        assert_eq!(siblings[0].id, geometry.id);
        assert_eq!(store.get_siblings(algebra.id, true).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_search_orders_name_matches_first() {
        let (store, _, _) = create_test_store();
        store
            .create(NewNode::new("Physics", Level::Subject).with_description("Waves and light"))
            .await
            .unwrap();
        store
            .create(NewNode::new("Light", Level::Subject))
            .await
            .unwrap();

        let hits = store.search("LIGHT", &[]).await.unwrap();
        assert_eq!(
            hits.iter().map(|n| n.name.as_str()).collect::<Vec<_>>(),
            vec!["Light", "Physics"]
        );

        let names_only = store.search("light", &[SearchField::Name]).await.unwrap();
        assert_eq!(names_only.len(), 1);
        assert!(store.search("  ", &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_swap_is_atomic_when_backend_fails() {
        let (store, backend, _) = create_test_store();
        let math = store.create(NewNode::new("Math", Level::Subject)).await.unwrap();
        let physics = store
            .create(NewNode::new("Physics", Level::Subject))
            .await
            .unwrap();
        let algebra = store
            .create(NewNode::new("Algebra", Level::Chapter).with_parent(math.id))
            .await
            .unwrap();
        let mechanics = store
            .create(NewNode::new("Mechanics", Level::Chapter).with_parent(physics.id))
            .await
            .unwrap();

        backend.set_fail_node_writes(true);
        assert!(store.swap(algebra.id, mechanics.id).await.is_err());
        backend.set_fail_node_writes(false);

        assert_eq!(
            store.require(algebra.id).await.unwrap().parent_id,
            Some(math.id)
        );
        assert_eq!(
            store.require(mechanics.id).await.unwrap().parent_id,
            Some(physics.id)
        );

        let (a, b) = store.swap(algebra.id, mechanics.id).await.unwrap();
        assert_eq!(a.after.parent_id, Some(physics.id));
        assert_eq!(b.after.parent_id, Some(math.id));
    }

    #[tokio::test]
    async fn test_swap_rejects_ancestor_descendant_pair() {
        let (store, _, _) = create_test_store();
        let math = store.create(NewNode::new("Math", Level::Subject)).await.unwrap();
        let grade = store
            .create(NewNode::new("Grade 10", Level::Grade).with_parent(math.id))
            .await
            .unwrap();
        let algebra = store
            .create(NewNode::new("Algebra", Level::Chapter).with_parent(grade.id))
            .await
            .unwrap();

        let err = store.swap(grade.id, algebra.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cycle);
    }

    #[tokio::test]
    async fn test_create_subtrees_rejects_whole_batch_on_bad_child() {
        let (store, backend, _) = create_test_store();
        let math = store.create(NewNode::new("Math", Level::Subject)).await.unwrap();

        let bad = SubtreeDefinition::new("Algebra", Level::Chapter)
            .with_child(SubtreeDefinition::new("Equations", Level::Topic))
            .with_child(SubtreeDefinition::new("Math again", Level::Subject));
        let err = store
            .create_subtrees(&[bad], Some(math.id))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(backend.node_count().await, 1);
    }

    #[tokio::test]
    async fn test_subtree_definition_counts_items() {
        let (store, _, items) = create_test_store();
        let math = store.create(NewNode::new("Math", Level::Subject)).await.unwrap();
        let algebra = store
            .create(NewNode::new("Algebra", Level::Chapter).with_parent(math.id))
            .await
            .unwrap();
        items.file_item("q1", algebra.id).await;
        items.file_item("q2", math.id).await;

        let plain = store.subtree_definition(math.id, false).await.unwrap();
        assert!(plain.question_count.is_none());

        let counted = store.subtree_definition(math.id, true).await.unwrap();
        assert_eq!(counted.question_count, Some(2));
        assert_eq!(counted.children[0].question_count, Some(1));
    }
}
