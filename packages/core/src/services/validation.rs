//! Validation Engine - full-tree integrity scans
//!
//! Scans read the node table once and report problems without changing
//! anything. They work on whatever is stored, including rows that bypassed
//! the node store's checks (imports from older tools, manual edits).
//!
//! Reported problems:
//!
//! - **Orphan**: `parent_id` points at a node that does not exist
//! - **Cycle**: following parent pointers revisits a node
//! - **DepthExceeded**: a parent chain longer than the walk bound
//! - **HierarchyViolation**: a level not permitted under the parent's level
//! - **DuplicateSibling**: siblings whose names match case-insensitively

use crate::behaviors::HierarchyPolicy;
use crate::db::{ItemStore, NodeBackend, NodeWrite};
use crate::models::{DuplicateGroup, Level, Node, NodeId, TreeStatistics, Violation};
use crate::services::error::Result;
use crate::services::node_store::sort_by_name;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Result of walking one node's parent chain
enum Walk {
    /// Reached a root (or a dangling parent) after this many steps
    Depth(usize),
    /// Entered a loop; holds the loop members
    Cycle(Vec<NodeId>),
    TooDeep,
}

/// One read of the node table, indexed for scanning
struct Scan {
    nodes: HashMap<NodeId, Node>,
    child_counts: HashMap<NodeId, usize>,
}

impl Scan {
    fn new(nodes: Vec<Node>) -> Self {
        let mut child_counts = HashMap::new();
        for node in &nodes {
            if let Some(parent_id) = node.parent_id {
                *child_counts.entry(parent_id).or_insert(0) += 1;
            }
        }
        Self {
            nodes: nodes.into_iter().map(|node| (node.id, node)).collect(),
            child_counts,
        }
    }

    /// Nodes in a stable order for reporting
    fn sorted(&self) -> Vec<&Node> {
        let mut nodes: Vec<&Node> = self.nodes.values().collect();
        nodes.sort_by(|a, b| {
            a.name_key()
                .cmp(&b.name_key())
                .then_with(|| a.id.cmp(&b.id))
        });
        nodes
    }

    fn walk(&self, start: NodeId, limit: usize) -> Walk {
        let mut path: Vec<NodeId> = Vec::new();
        let mut positions: HashMap<NodeId, usize> = HashMap::new();
        let mut current = Some(start);

        while let Some(cursor) = current {
            let Some(node) = self.nodes.get(&cursor) else {
                break;
            };
            if let Some(&pos) = positions.get(&cursor) {
                return Walk::Cycle(path[pos..].to_vec());
            }
            if path.len() > limit {
                return Walk::TooDeep;
            }
            positions.insert(cursor, path.len());
            path.push(cursor);
            current = node.parent_id;
        }

        Walk::Depth(path.len().saturating_sub(1))
    }

    fn duplicate_groups(&self) -> Vec<DuplicateGroup> {
        let mut groups: BTreeMap<(Option<NodeId>, String), Vec<&Node>> = BTreeMap::new();
        for node in self.nodes.values() {
            groups
                .entry((node.parent_id, node.name_key()))
                .or_default()
                .push(node);
        }

        let mut duplicates: Vec<DuplicateGroup> = groups
            .into_iter()
            .filter(|(_, nodes)| nodes.len() > 1)
            .map(|((parent_id, name), mut nodes)| {
                nodes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
                DuplicateGroup {
                    parent_id,
                    name,
                    node_ids: nodes.into_iter().map(|node| node.id).collect(),
                }
            })
            .collect();
        duplicates.sort_by(|a, b| a.name.cmp(&b.name));
        duplicates
    }
}

/// Read-only integrity scanner plus empty-node cleanup
pub struct ValidationEngine {
    backend: Arc<dyn NodeBackend>,
    items: Arc<dyn ItemStore>,
    max_walk_depth: usize,
}

impl ValidationEngine {
    pub fn new(
        backend: Arc<dyn NodeBackend>,
        items: Arc<dyn ItemStore>,
        max_walk_depth: usize,
    ) -> Self {
        Self {
            backend,
            items,
            max_walk_depth,
        }
    }

    async fn scan(&self) -> Result<Scan> {
        Ok(Scan::new(self.backend.list_nodes().await?))
    }

    /// Full scan for orphans, cycles, hierarchy violations and duplicate siblings
    pub async fn validate_structure(&self) -> Result<Vec<Violation>> {
        let scan = self.scan().await?;
        let nodes = scan.sorted();
        let mut violations = Vec::new();

        for node in &nodes {
            if let Some(parent_id) = node.parent_id {
                if !scan.nodes.contains_key(&parent_id) {
                    violations.push(Violation::Orphan {
                        node_id: node.id,
                        missing_parent_id: parent_id,
                    });
                }
            }
        }

        let mut in_reported_cycle: HashSet<NodeId> = HashSet::new();
        for node in &nodes {
            match scan.walk(node.id, self.max_walk_depth) {
                Walk::Depth(_) => {}
                Walk::Cycle(mut members) => {
                    if members.iter().any(|id| in_reported_cycle.contains(id)) {
                        continue;
                    }
                    in_reported_cycle.extend(members.iter().copied());
                    members.sort();
                    violations.push(Violation::Cycle { node_ids: members });
                }
                Walk::TooDeep => violations.push(Violation::DepthExceeded {
                    node_id: node.id,
                    limit: self.max_walk_depth,
                }),
            }
        }

        for node in &nodes {
            let parent_level = match node.parent_id {
                None => None,
                Some(parent_id) => match scan.nodes.get(&parent_id) {
                    Some(parent) => Some(parent.level),
                    // Already reported as an orphan
                    None => continue,
                },
            };
            if !HierarchyPolicy::validate_transition(parent_level, node.level) {
                violations.push(Violation::HierarchyViolation {
                    node_id: node.id,
                    parent_id: node.parent_id,
                    parent_level,
                    level: node.level,
                });
            }
        }

        violations.extend(
            scan.duplicate_groups()
                .into_iter()
                .map(Violation::DuplicateSibling),
        );

        if !violations.is_empty() {
            tracing::info!(count = violations.len(), "Tree validation found problems");
        }
        Ok(violations)
    }

    async fn empty_nodes_in(&self, scan: &Scan) -> Result<Vec<Node>> {
        let mut empty = Vec::new();
        for node in scan.nodes.values() {
            if scan.child_counts.contains_key(&node.id) {
                continue;
            }
            if self.items.count_items_under(node.id).await? == 0 {
                empty.push(node.clone());
            }
        }
        Ok(empty)
    }

    /// Leaves with no filed items, sorted by name
    pub async fn find_empty_nodes(&self) -> Result<Vec<Node>> {
        let scan = self.scan().await?;
        let mut empty = self.empty_nodes_in(&scan).await?;
        sort_by_name(&mut empty);
        Ok(empty)
    }

    /// Empty nodes in deletion order (deepest first)
    pub(crate) async fn cleanup_plan(&self) -> Result<Vec<Node>> {
        let scan = self.scan().await?;
        let empty = self.empty_nodes_in(&scan).await?;
        let mut with_depth: Vec<(usize, Node)> = empty
            .into_iter()
            .map(|node| {
                let depth = match scan.walk(node.id, self.max_walk_depth) {
                    Walk::Depth(depth) => depth,
                    _ => self.max_walk_depth,
                };
                (depth, node)
            })
            .collect();
        with_depth.sort_by(|(da, a), (db, b)| {
            db.cmp(da)
                .then_with(|| a.name_key().cmp(&b.name_key()))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(with_depth.into_iter().map(|(_, node)| node).collect())
    }

    /// Delete rows by id; the caller keeps the cache and history in step
    pub(crate) async fn remove(&self, ids: &[NodeId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.backend
            .apply(ids.iter().map(|id| NodeWrite::Delete(*id)).collect())
            .await?;
        tracing::info!(removed = ids.len(), "Removed empty nodes");
        Ok(())
    }

    /// Sibling groups sharing a case-insensitive name
    pub async fn find_duplicate_nodes(&self) -> Result<Vec<DuplicateGroup>> {
        Ok(self.scan().await?.duplicate_groups())
    }

    /// Whole-tree summary computed from the node table
    pub async fn tree_statistics(&self) -> Result<TreeStatistics> {
        let scan = self.scan().await?;
        let mut stats = TreeStatistics {
            total_nodes: scan.nodes.len(),
            ..Default::default()
        };

        let mut cycle_members: HashSet<NodeId> = HashSet::new();
        for node in scan.nodes.values() {
            *stats.nodes_by_level.entry(node.level).or_insert(0) += 1;
            stats.total_questions += self.items.count_items_under(node.id).await?;

            if let Some(parent_id) = node.parent_id {
                if !scan.nodes.contains_key(&parent_id) {
                    stats.orphaned_nodes += 1;
                }
            }
            match scan.walk(node.id, self.max_walk_depth) {
                Walk::Depth(depth) => stats.max_depth = stats.max_depth.max(depth),
                Walk::Cycle(members) => cycle_members.extend(members),
                Walk::TooDeep => {}
            }
        }
        stats.circular_references = cycle_members.len();
        stats.empty_nodes = self.empty_nodes_in(&scan).await?.len();

        for level in Level::ALL {
            stats.nodes_by_level.entry(level).or_insert(0);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryBackend, MemoryItemStore};
    use chrono::Utc;

    fn raw(name: &str, level: Level, parent_id: Option<NodeId>) -> Node {
        let now = Utc::now();
        Node {
            id: NodeId::new(),
            parent_id,
            name: name.to_string(),
            level,
            description: String::new(),
            created_at: now,
            modified_at: now,
        }
    }

    async fn engine_with(nodes: Vec<Node>) -> (ValidationEngine, Arc<MemoryItemStore>) {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .apply(nodes.into_iter().map(NodeWrite::Insert).collect())
            .await
            .unwrap();
        let items = Arc::new(MemoryItemStore::new());
        (ValidationEngine::new(backend, items.clone(), 64), items)
    }

    #[tokio::test]
    async fn test_clean_tree_has_no_violations() {
        let math = raw("Math", Level::Subject, None);
        let algebra = raw("Algebra", Level::Chapter, Some(math.id));
        let (engine, _) = engine_with(vec![math, algebra]).await;
        assert!(engine.validate_structure().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reports_each_violation_kind() {
        let math = raw("Math", Level::Subject, None);
        let orphan = raw("Lost", Level::Chapter, Some(NodeId::new()));
        let misplaced = raw("Physics", Level::Subject, Some(math.id));
        let dup_a = raw("Algebra", Level::Chapter, Some(math.id));
        let dup_b = raw("ALGEBRA", Level::Chapter, Some(math.id));

        let mut loop_a = raw("Loop A", Level::Chapter, None);
        let loop_b = raw("Loop B", Level::Topic, Some(loop_a.id));
        loop_a.parent_id = Some(loop_b.id);

        let (engine, _) = engine_with(vec![
            math.clone(),
            orphan.clone(),
            misplaced.clone(),
            dup_a,
            dup_b,
            loop_a.clone(),
            loop_b.clone(),
        ])
        .await;
        let violations = engine.validate_structure().await.unwrap();

        assert!(violations.contains(&Violation::Orphan {
            node_id: orphan.id,
            missing_parent_id: orphan.parent_id.unwrap(),
        }));
        assert!(violations.iter().any(|v| matches!(
            v,
            Violation::HierarchyViolation { node_id, .. } if *node_id == misplaced.id
        )));
        let mut loop_ids = vec![loop_a.id, loop_b.id];
        loop_ids.sort();
        let cycles: Vec<&Violation> = violations
            .iter()
            .filter(|v| matches!(v, Violation::Cycle { .. }))
            .collect();
        assert_eq!(cycles, vec![&Violation::Cycle { node_ids: loop_ids }]);
        assert!(violations.iter().any(|v| matches!(
            v,
            Violation::DuplicateSibling(group) if group.name == "algebra" && group.node_ids.len() == 2
        )));
    }

    #[tokio::test]
    async fn test_empty_nodes_and_cleanup_order() {
        let math = raw("Math", Level::Subject, None);
        let algebra = raw("Algebra", Level::Chapter, Some(math.id));
        let equations = raw("Equations", Level::Topic, Some(algebra.id));
        let geometry = raw("Geometry", Level::Chapter, Some(math.id));
        let (engine, items) = engine_with(vec![
            math.clone(),
            algebra.clone(),
            equations.clone(),
            geometry.clone(),
        ])
        .await;
        items.file_item("q1", geometry.id).await;

        let empty = engine.find_empty_nodes().await.unwrap();
        assert_eq!(empty.iter().map(|n| n.id).collect::<Vec<_>>(), vec![equations.id]);

        let plan: Vec<NodeId> = engine
            .cleanup_plan()
            .await
            .unwrap()
            .iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(plan, vec![equations.id]);
        assert_eq!(engine.tree_statistics().await.unwrap().total_nodes, 4);

        engine.remove(&plan).await.unwrap();
        // Algebra became a leaf, so the next plan picks it up
        let next: Vec<NodeId> = engine
            .cleanup_plan()
            .await
            .unwrap()
            .iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(next, vec![algebra.id]);
    }

    #[tokio::test]
    async fn test_tree_statistics() {
        let math = raw("Math", Level::Subject, None);
        let algebra = raw("Algebra", Level::Chapter, Some(math.id));
        let equations = raw("Equations", Level::Topic, Some(algebra.id));
        let orphan = raw("Lost", Level::Topic, Some(NodeId::new()));
        let (engine, items) =
            engine_with(vec![math, algebra.clone(), equations.clone(), orphan]).await;
        items.file_item("q1", equations.id).await;
        items.file_item("q2", algebra.id).await;

        let stats = engine.tree_statistics().await.unwrap();
        assert_eq!(stats.total_nodes, 4);
        assert_eq!(stats.max_depth, 2);
        assert_eq!(stats.total_questions, 2);
        assert_eq!(stats.orphaned_nodes, 1);
        assert_eq!(stats.circular_references, 0);
        assert_eq!(stats.empty_nodes, 1);
        assert_eq!(stats.nodes_by_level[&Level::Topic], 2);
        assert_eq!(stats.nodes_by_level[&Level::Grade], 0);
    }
}
